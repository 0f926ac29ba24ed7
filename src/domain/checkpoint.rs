use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Role, ToolCall};
use crate::error::{StorageError, StorageResult};
use crate::tenancy::{OwnerId, TenantId};

/// One entry of the agent's message history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls issued by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool call answered by a tool turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl AgentMessage {
    /// Create a history entry
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Set tool calls
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Durable snapshot of an agent execution paused for human input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Opaque checkpoint identifier, round-tripped by the human-facing channel.
    pub id: String,
    /// Logical execution thread.
    pub thread_id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Agent that suspended.
    pub agent_name: String,
    /// Message history at suspension time.
    pub messages: Vec<AgentMessage>,
    /// Tool invocations awaiting the human.
    pub pending_tools: Vec<ToolCall>,
    /// Interrupt category (e.g. "confirmation", "ask_user_question").
    pub interrupt_type: String,
    /// Interrupt details for the human-facing channel.
    pub interrupt_payload: serde_json::Value,
    /// Originating session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Upstream response id preceding the suspension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
    /// After this instant the checkpoint must not be resumed.
    pub expires_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Whether the checkpoint is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Lifecycle state at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> CheckpointState {
        if self.is_expired_at(now) {
            CheckpointState::Expired
        } else {
            CheckpointState::Suspended
        }
    }
}

/// State of a persisted checkpoint row.
///
/// A running thread has no row and a consumed checkpoint has been deleted,
/// so only these two states are observable on a stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    /// Awaiting human input.
    Suspended,
    /// Past its TTL; eligible for sweep.
    Expired,
}

/// Everything needed to suspend a thread.
#[derive(Debug, Clone)]
pub struct SuspendRequest {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Logical execution thread.
    pub thread_id: String,
    /// Agent that suspends.
    pub agent_name: String,
    /// History snapshot.
    pub messages: Vec<AgentMessage>,
    /// Tool calls awaiting input.
    pub pending_tools: Vec<ToolCall>,
    /// Interrupt category.
    pub interrupt_type: String,
    /// Interrupt details.
    pub interrupt_payload: serde_json::Value,
    /// Originating session.
    pub session_id: Option<String>,
    /// Upstream response id preceding the suspension.
    pub previous_response_id: Option<String>,
    /// Overrides the configured TTL.
    pub ttl: Option<Duration>,
}

impl SuspendRequest {
    /// Create a suspend request for a thread
    pub fn new(
        tenant_id: TenantId,
        owner_id: OwnerId,
        thread_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            owner_id,
            thread_id: thread_id.into(),
            agent_name: agent_name.into(),
            messages: Vec::new(),
            pending_tools: Vec::new(),
            interrupt_type: String::new(),
            interrupt_payload: serde_json::Value::Null,
            session_id: None,
            previous_response_id: None,
            ttl: None,
        }
    }

    /// Set the history snapshot
    pub fn with_messages(mut self, messages: Vec<AgentMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Set pending tool calls
    pub fn with_pending_tools(mut self, tools: Vec<ToolCall>) -> Self {
        self.pending_tools = tools;
        self
    }

    /// Set the interrupt category and payload
    pub fn with_interrupt(
        mut self,
        interrupt_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        self.interrupt_type = interrupt_type.into();
        self.interrupt_payload = payload;
        self
    }

    /// Link the originating session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the preceding upstream response id
    pub fn with_previous_response(mut self, response_id: impl Into<String>) -> Self {
        self.previous_response_id = Some(response_id.into());
        self
    }

    /// Override the TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Build the checkpoint created at `now`, expiring after `ttl`.
    ///
    /// Fails with `Validation` when the expiry is not representable.
    pub fn into_checkpoint(
        self,
        now: DateTime<Utc>,
        default_ttl: Duration,
    ) -> StorageResult<Checkpoint> {
        let ttl = self.ttl.unwrap_or(default_ttl);
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| StorageError::validation("ttl", "out of range"))?;
        Ok(Checkpoint {
            id: Uuid::new_v4().to_string(),
            thread_id: self.thread_id,
            tenant_id: self.tenant_id,
            owner_id: self.owner_id,
            agent_name: self.agent_name,
            messages: self.messages,
            pending_tools: self.pending_tools,
            interrupt_type: self.interrupt_type,
            interrupt_payload: self.interrupt_payload,
            session_id: self.session_id,
            previous_response_id: self.previous_response_id,
            created_at: now,
            expires_at,
        })
    }
}

/// A consumed checkpoint merged with the human's input, ready for the agent
/// to continue execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    /// Id of the consumed checkpoint.
    pub checkpoint_id: String,
    /// Logical execution thread.
    pub thread_id: String,
    /// Agent to continue.
    pub agent_name: String,
    /// Originating session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Upstream response id to continue from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    /// History snapshot.
    pub messages: Vec<AgentMessage>,
    /// Tool calls that were awaiting input.
    pub pending_tools: Vec<ToolCall>,
    /// Interrupt category.
    pub interrupt_type: String,
    /// Interrupt details.
    pub interrupt_payload: serde_json::Value,
    /// What the human supplied.
    pub human_input: serde_json::Value,
}

impl ResumeState {
    /// Merge a consumed checkpoint with human input.
    pub fn merge(checkpoint: Checkpoint, human_input: serde_json::Value) -> Self {
        Self {
            checkpoint_id: checkpoint.id,
            thread_id: checkpoint.thread_id,
            agent_name: checkpoint.agent_name,
            session_id: checkpoint.session_id,
            previous_response_id: checkpoint.previous_response_id,
            messages: checkpoint.messages,
            pending_tools: checkpoint.pending_tools,
            interrupt_type: checkpoint.interrupt_type,
            interrupt_payload: checkpoint.interrupt_payload,
            human_input,
        }
    }
}
