use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user.
    User,
    /// The agent.
    Assistant,
    /// Tool output fed back to the agent.
    Tool,
    /// System instructions.
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the LLM runtime.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A source cited by an assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Display title.
    pub title: String,
    /// Optional link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Optional quoted excerpt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Status of a structured question asked by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    /// Waiting for the user.
    #[default]
    Pending,
    /// The user answered.
    Answered,
    /// The question was withdrawn.
    Cancelled,
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionStatus::Pending => write!(f, "pending"),
            QuestionStatus::Answered => write!(f, "answered"),
            QuestionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for QuestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(QuestionStatus::Pending),
            "answered" => Ok(QuestionStatus::Answered),
            "cancelled" => Ok(QuestionStatus::Cancelled),
            _ => Err(format!("Unknown question status: {}", s)),
        }
    }
}

/// One question within a question document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Question id, used as the answer key.
    pub id: String,
    /// Prompt shown to the user.
    pub text: String,
    /// Offered choices; empty means free text.
    #[serde(default)]
    pub options: Vec<String>,
    /// Whether several options may be chosen.
    #[serde(default)]
    pub multi_select: bool,
}

impl Question {
    /// Create a free-text question
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            options: Vec::new(),
            multi_select: false,
        }
    }

    /// Set the offered options
    pub fn with_options<I, T>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// How a pending question was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionResolution {
    /// Answers keyed by question id.
    Answered(BTreeMap<String, String>),
    /// Withdrawn without an answer.
    Cancelled,
}

/// Structured questions the agent asks the user during a HITL pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDocument {
    /// Agent that asked.
    pub agent_name: String,
    /// Checkpoint that will be resumed with the answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// The questions.
    pub questions: Vec<Question>,
    /// Current status.
    pub status: QuestionStatus,
    /// Answers keyed by question id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub answers: BTreeMap<String, String>,
    /// When the question left the pending state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl QuestionDocument {
    /// Create a pending question document
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            checkpoint_id: None,
            questions: Vec::new(),
            status: QuestionStatus::Pending,
            answers: BTreeMap::new(),
            resolved_at: None,
        }
    }

    /// Add a question
    pub fn with_question(mut self, question: Question) -> Self {
        self.questions.push(question);
        self
    }

    /// Link the checkpoint awaiting the answers
    pub fn with_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Whether the document still waits for the user.
    pub fn is_pending(&self) -> bool {
        self.status == QuestionStatus::Pending
    }

    /// Apply a resolution. Only a pending document can be resolved.
    pub fn resolve(&mut self, resolution: &QuestionResolution) -> StorageResult<()> {
        if !self.is_pending() {
            return Err(StorageError::InvalidState {
                message: format!("question is already {}", self.status),
            });
        }

        match resolution {
            QuestionResolution::Answered(answers) => {
                if answers.is_empty() {
                    return Err(StorageError::validation("answers", "must not be empty"));
                }
                if let Some(unknown) = answers
                    .keys()
                    .find(|k| !self.questions.iter().any(|q| &q.id == *k))
                {
                    return Err(StorageError::validation(
                        "answers",
                        format!("unknown question id: {}", unknown),
                    ));
                }
                self.answers = answers.clone();
                self.status = QuestionStatus::Answered;
            }
            QuestionResolution::Cancelled => {
                self.status = QuestionStatus::Cancelled;
            }
        }

        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}

/// User-authored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Text content.
    pub content: String,
}

/// Assistant-authored message with its optional structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Text content.
    pub content: String,
    /// Tool calls made while producing this answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Sources cited.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Opaque debug trace for developer tooling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_trace: Option<serde_json::Value>,
    /// Structured question for the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionDocument>,
}

impl AssistantMessage {
    /// Create a plain assistant message
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            citations: Vec::new(),
            debug_trace: None,
            question: None,
        }
    }

    /// Set tool calls
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Set citations
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    /// Set debug trace
    pub fn with_debug_trace(mut self, trace: serde_json::Value) -> Self {
        self.debug_trace = Some(trace);
        self
    }

    /// Attach a question document
    pub fn with_question(mut self, question: QuestionDocument) -> Self {
        self.question = Some(question);
        self
    }
}

/// Tool result fed back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    /// Tool output.
    pub content: String,
    /// Id of the tool call this answers.
    pub tool_call_id: String,
}

/// System instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Text content.
    pub content: String,
}

/// Role-specific message payload.
///
/// Structured fields live on the variant that may carry them, so a user
/// message can never hold a question and a tool message always has its
/// correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageBody {
    /// See [`UserMessage`].
    User(UserMessage),
    /// See [`AssistantMessage`].
    Assistant(AssistantMessage),
    /// See [`ToolMessage`].
    Tool(ToolMessage),
    /// See [`SystemMessage`].
    System(SystemMessage),
}

impl MessageBody {
    /// User message body
    pub fn user(content: impl Into<String>) -> Self {
        MessageBody::User(UserMessage {
            content: content.into(),
        })
    }

    /// Plain assistant message body
    pub fn assistant(content: impl Into<String>) -> Self {
        MessageBody::Assistant(AssistantMessage::new(content))
    }

    /// Tool result body
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        MessageBody::Tool(ToolMessage {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        })
    }

    /// System message body
    pub fn system(content: impl Into<String>) -> Self {
        MessageBody::System(SystemMessage {
            content: content.into(),
        })
    }

    /// The author role.
    pub fn role(&self) -> Role {
        match self {
            MessageBody::User(_) => Role::User,
            MessageBody::Assistant(_) => Role::Assistant,
            MessageBody::Tool(_) => Role::Tool,
            MessageBody::System(_) => Role::System,
        }
    }

    /// The text content.
    pub fn content(&self) -> &str {
        match self {
            MessageBody::User(m) => &m.content,
            MessageBody::Assistant(m) => &m.content,
            MessageBody::Tool(m) => &m.content,
            MessageBody::System(m) => &m.content,
        }
    }

    /// The question document, if any.
    pub fn question(&self) -> Option<&QuestionDocument> {
        match self {
            MessageBody::Assistant(m) => m.question.as_ref(),
            _ => None,
        }
    }

    /// Status of the carried question, if any.
    pub fn question_status(&self) -> Option<QuestionStatus> {
        self.question().map(|q| q.status)
    }
}

impl From<AssistantMessage> for MessageBody {
    fn from(message: AssistantMessage) -> Self {
        MessageBody::Assistant(message)
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: String,
    /// Parent session ID.
    pub session_id: String,
    /// Role-specific payload.
    #[serde(flatten)]
    pub body: MessageBody,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message in a session
    pub fn new(session_id: impl Into<String>, body: impl Into<MessageBody>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    /// The author role.
    pub fn role(&self) -> Role {
        self.body.role()
    }

    /// The text content.
    pub fn content(&self) -> &str {
        self.body.content()
    }
}

/// Ordering of a message listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageOrder {
    /// Replay order, used when feeding history back to the agent.
    #[default]
    OldestFirst,
    /// Display order.
    NewestFirst,
}

/// Paging for message listings.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Sort order.
    pub order: MessageOrder,
    /// Maximum number of messages; `None` returns all.
    pub limit: Option<u32>,
    /// Number of messages to skip.
    pub offset: u32,
}

impl MessageQuery {
    /// All messages oldest-first
    pub fn replay() -> Self {
        Self::default()
    }

    /// Newest-first page for display
    pub fn display(limit: u32) -> Self {
        Self {
            order: MessageOrder::NewestFirst,
            limit: Some(limit),
            offset: 0,
        }
    }
}
