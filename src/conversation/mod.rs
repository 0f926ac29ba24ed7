//! One conversational turn, wired across sessions, messages, checkpoints,
//! tracing and query memory.
//!
//! The flow is:
//!
//! ```text
//! submit_user_message ──▶ (agent runs) ──▶ finish_turn
//!                               │
//!                               └──▶ ask_question ──▶ answer_question ──▶ (agent resumes)
//!                                                 └─▶ cancel_question
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{
    AssistantMessage, Checkpoint, Message, MessageBody, NewTrace, NewValidatedQuery,
    QuestionDocument, QuestionResolution, ResumeState, Session, SuspendRequest, Trace, TraceClose,
    TraceStatus, ValidatedQuery,
};
use crate::error::{StorageError, StorageResult};
use crate::hitl::CheckpointEngine;
use crate::memory::QueryMemory;
use crate::storage::Store;
use crate::telemetry::Tracer;
use crate::tenancy::{OwnerId, TenantId};

/// Interrupt type of checkpoints created by [`Conversation::ask_question`].
pub const ASK_USER_QUESTION: &str = "ask_user_question";

const TITLE_MAX_CHARS: usize = 60;

/// A user message accepted into a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnStarted {
    /// The session, created when the turn started a new conversation.
    pub session: Session,
    /// The stored user message.
    pub message: Message,
    /// Trace opened for the turn; absent when tracing failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

/// A question put to the user with its suspended thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAsked {
    /// Assistant message carrying the pending question.
    pub message: Message,
    /// Checkpoint resumed by the answer.
    pub checkpoint: Checkpoint,
}

/// Everything recorded when the assistant completes a turn.
#[derive(Debug, Clone)]
pub struct FinishTurn {
    /// Session the turn belongs to.
    pub session_id: String,
    /// The assistant's answer.
    pub message: AssistantMessage,
    /// Upstream response id for conversational continuity.
    pub response_id: Option<String>,
    /// Trace opened by [`Conversation::submit_user_message`].
    pub trace_id: Option<String>,
    /// Total generation time.
    pub generation_ms: Option<i64>,
    /// SQL proven to answer the user's question.
    pub validated_query: Option<NewValidatedQuery>,
}

impl FinishTurn {
    /// Finish a turn with the assistant's answer
    pub fn new(session_id: impl Into<String>, message: AssistantMessage) -> Self {
        Self {
            session_id: session_id.into(),
            message,
            response_id: None,
            trace_id: None,
            generation_ms: None,
            validated_query: None,
        }
    }

    /// Set the upstream response id
    pub fn with_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.response_id = Some(response_id.into());
        self
    }

    /// Close this trace with the turn
    pub fn with_trace(mut self, trace_id: impl Into<String>, generation_ms: i64) -> Self {
        self.trace_id = Some(trace_id.into());
        self.generation_ms = Some(generation_ms);
        self
    }

    /// Remember the SQL that answered the question
    pub fn with_validated_query(mut self, query: NewValidatedQuery) -> Self {
        self.validated_query = Some(query);
        self
    }
}

/// What [`Conversation::finish_turn`] stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnFinished {
    /// The stored assistant message.
    pub message: Message,
    /// The recorded validated query, when one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_query: Option<ValidatedQuery>,
}

/// Conversation service over a single [`Store`].
#[derive(Clone)]
pub struct Conversation<S> {
    store: S,
    checkpoints: CheckpointEngine<S>,
    tracer: Tracer<S>,
    memory: QueryMemory<S>,
}

impl<S: Store + Clone> Conversation<S> {
    /// Create a conversation service
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            checkpoints: CheckpointEngine::new(store.clone(), &config.checkpoint),
            tracer: Tracer::new(store.clone()),
            memory: QueryMemory::new(store.clone(), &config.memory),
            store,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The checkpoint engine.
    pub fn checkpoints(&self) -> &CheckpointEngine<S> {
        &self.checkpoints
    }

    /// The tracer.
    pub fn tracer(&self) -> &Tracer<S> {
        &self.tracer
    }

    /// The query memory.
    pub fn memory(&self) -> &QueryMemory<S> {
        &self.memory
    }

    /// Accept a user message, creating the session on the first message.
    pub async fn submit_user_message(
        &self,
        tenant: TenantId,
        owner: OwnerId,
        session_id: Option<&str>,
        text: &str,
    ) -> StorageResult<TurnStarted> {
        if text.trim().is_empty() {
            return Err(StorageError::validation("content", "must not be empty"));
        }

        let session = match session_id {
            Some(id) => self
                .store
                .get_session(tenant, id)
                .await?
                .ok_or_else(|| StorageError::not_found("Session", id))?,
            None => {
                let session = Session::new(tenant, owner).with_title(title_from(text));
                self.store.create_session(&session).await?;
                info!(session_id = %session.id, "Session created");
                session
            }
        };

        let message = Message::new(&session.id, MessageBody::user(text));
        self.store.append_message(tenant, &message).await?;

        let trace = self
            .tracer
            .open(&NewTrace::local(tenant, &session.id))
            .await;

        debug!(session_id = %session.id, message_id = %message.id, "User message accepted");
        Ok(TurnStarted {
            session,
            message,
            trace,
        })
    }

    /// Ask the user a question and suspend the agent until it is answered.
    ///
    /// `request` must link the session. The checkpoint payload carries the
    /// question and the id of the message that shows it.
    pub async fn ask_question(
        &self,
        request: SuspendRequest,
        question: QuestionDocument,
        content: &str,
    ) -> StorageResult<QuestionAsked> {
        let tenant = request.tenant_id;
        let session_id = request
            .session_id
            .clone()
            .ok_or_else(|| StorageError::validation("session_id", "required to ask a question"))?;
        if question.questions.is_empty() {
            return Err(StorageError::validation("questions", "must not be empty"));
        }
        if !question.is_pending() {
            return Err(StorageError::validation("status", "a new question must be pending"));
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        let payload = serde_json::json!({
            "message_id": message_id,
            "question": question,
        });
        let checkpoint = self
            .checkpoints
            .suspend(request.with_interrupt(ASK_USER_QUESTION, payload))
            .await?;

        let mut message = Message::new(
            &session_id,
            AssistantMessage::new(content).with_question(question.with_checkpoint(&checkpoint.id)),
        );
        message.id = message_id;

        if let Err(e) = self.store.append_message(tenant, &message).await {
            if let Err(cancel_err) = self.checkpoints.cancel(tenant, &checkpoint.id).await {
                warn!(
                    error = %cancel_err,
                    checkpoint_id = %checkpoint.id,
                    "Failed to cancel checkpoint after rejected question"
                );
            }
            return Err(e);
        }

        info!(
            session_id = %session_id,
            message_id = %message.id,
            checkpoint_id = %checkpoint.id,
            "Question asked"
        );
        Ok(QuestionAsked {
            message,
            checkpoint,
        })
    }

    /// Answer the session's pending question and resume its checkpoint.
    ///
    /// The answers become the human input as `{"answers": {...}}`. When the
    /// checkpoint has expired the question is cancelled and `Expired` is
    /// returned.
    pub async fn answer_question(
        &self,
        tenant: TenantId,
        session_id: &str,
        checkpoint_id: &str,
        answers: BTreeMap<String, String>,
    ) -> StorageResult<ResumeState> {
        let pending = self.pending_for(tenant, session_id, checkpoint_id).await?;
        let human_input = serde_json::json!({ "answers": &answers });
        let resolution = QuestionResolution::Answered(answers);

        // Reject bad answers before the checkpoint is consumed.
        if let Some(doc) = pending.body.question() {
            doc.clone().resolve(&resolution)?;
        }

        let state = match self
            .checkpoints
            .resume(tenant, checkpoint_id, human_input)
            .await
        {
            Ok(state) => state,
            Err(e @ StorageError::Expired { .. }) => {
                self.store
                    .resolve_question(tenant, &pending.id, &QuestionResolution::Cancelled)
                    .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.store
            .resolve_question(tenant, &pending.id, &resolution)
            .await?;

        info!(
            session_id,
            message_id = %pending.id,
            checkpoint_id,
            "Question answered"
        );
        Ok(state)
    }

    /// Withdraw the session's pending question and drop its checkpoint.
    pub async fn cancel_question(&self, tenant: TenantId, session_id: &str) -> StorageResult<Message> {
        let pending = self
            .store
            .pending_question(tenant, session_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Question", session_id))?;

        let message = self
            .store
            .resolve_question(tenant, &pending.id, &QuestionResolution::Cancelled)
            .await?;

        if let Some(checkpoint_id) = pending.body.question().and_then(|q| q.checkpoint_id.as_deref())
        {
            match self.checkpoints.cancel(tenant, checkpoint_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(checkpoint_id, "Checkpoint already gone");
                }
                Err(e) => return Err(e),
            }
        }

        info!(session_id, message_id = %message.id, "Question cancelled");
        Ok(message)
    }

    /// Store the assistant's answer and close out the turn.
    pub async fn finish_turn(&self, tenant: TenantId, turn: FinishTurn) -> StorageResult<TurnFinished> {
        let start = Instant::now();

        if let Some(query) = &turn.validated_query {
            query.validate()?;
        }

        let message = Message::new(&turn.session_id, turn.message);
        self.store.append_message(tenant, &message).await?;

        if let Some(response_id) = &turn.response_id {
            self.store
                .set_last_response_id(tenant, &turn.session_id, response_id)
                .await?;
        }

        if let Some(trace_id) = &turn.trace_id {
            let mut close = TraceClose::new(TraceStatus::Completed).with_message(&message.id);
            if let Some(ms) = turn.generation_ms {
                close = close.with_generation_ms(ms);
            }
            self.tracer.close(tenant, trace_id, &close).await;
        }

        let validated_query = match &turn.validated_query {
            Some(query) => Some(self.memory.record_query(tenant, query).await?),
            None => None,
        };

        debug!(
            session_id = %turn.session_id,
            message_id = %message.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Turn finished"
        );
        Ok(TurnFinished {
            message,
            validated_query,
        })
    }

    async fn pending_for(
        &self,
        tenant: TenantId,
        session_id: &str,
        checkpoint_id: &str,
    ) -> StorageResult<Message> {
        let pending = self
            .store
            .pending_question(tenant, session_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Question", session_id))?;

        let linked = pending
            .body
            .question()
            .and_then(|q| q.checkpoint_id.as_deref());
        if linked != Some(checkpoint_id) {
            return Err(StorageError::InvalidState {
                message: format!(
                    "pending question in session {} is not linked to checkpoint {}",
                    session_id, checkpoint_id
                ),
            });
        }
        Ok(pending)
    }
}

fn title_from(text: &str) -> String {
    let line = text.trim().lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_short_text() {
        assert_eq!(title_from("  Revenue by region?  "), "Revenue by region?");
    }

    #[test]
    fn test_title_from_first_line_only() {
        assert_eq!(title_from("Top customers\nfor 2024 please"), "Top customers");
    }

    #[test]
    fn test_title_from_truncates_long_text() {
        let text = "a".repeat(100);
        let title = title_from(&text);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_finish_turn_builder() {
        let turn = FinishTurn::new("s1", AssistantMessage::new("done"))
            .with_response_id("resp_1")
            .with_trace("t1", 1200);
        assert_eq!(turn.response_id.as_deref(), Some("resp_1"));
        assert_eq!(turn.trace_id.as_deref(), Some("t1"));
        assert_eq!(turn.generation_ms, Some(1200));
        assert!(turn.validated_query.is_none());
    }
}
