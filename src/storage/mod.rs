//! Storage layer for sessions, messages, checkpoints, artifacts, telemetry
//! and query memory.
//!
//! Each concern is a separate async trait so services can depend on exactly
//! what they use. [`SqliteStorage`] implements all of them. Every method takes
//! the caller's [`TenantId`] and filters by it; rows of other tenants behave
//! as if they did not exist.

mod artifacts;
mod checkpoints;
mod memory;
mod messages;
mod sessions;
mod sqlite;
mod telemetry;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Artifact, ArtifactProviderFile, ArtifactQuery, Checkpoint, Generation, Learning,
    LearningSearch, ListOptions, Message, MessageQuery, NewLearning, NewTrace, NewValidatedQuery,
    QuerySearch, QuestionDocument, QuestionResolution, Session, Span, Trace, TraceClose,
    TraceEvent, TraceTree, ValidatedQuery,
};
use crate::error::StorageResult;
use crate::tenancy::{OwnerId, TenantId};

/// Result limit used when a memory search does not name one.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session. A named parent must exist in the same tenant.
    async fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Session>>;
    /// List an owner's sessions, pinned first, then newest first.
    async fn list_sessions(
        &self,
        tenant: TenantId,
        owner: OwnerId,
        opts: &ListOptions,
    ) -> StorageResult<Vec<Session>>;
    /// List sessions forked from `parent_id`, oldest first.
    async fn list_child_sessions(
        &self,
        tenant: TenantId,
        parent_id: &str,
    ) -> StorageResult<Vec<Session>>;
    /// Archive a session. Rejected while a live checkpoint references it.
    async fn archive_session(&self, tenant: TenantId, id: &str) -> StorageResult<Session>;
    /// Return an archived session to active.
    async fn unarchive_session(&self, tenant: TenantId, id: &str) -> StorageResult<Session>;
    /// Pin or unpin a session.
    async fn set_session_pinned(
        &self,
        tenant: TenantId,
        id: &str,
        pinned: bool,
    ) -> StorageResult<Session>;
    /// Change a session's title.
    async fn rename_session(&self, tenant: TenantId, id: &str, title: &str)
        -> StorageResult<Session>;
    /// Record the last upstream LLM response id.
    async fn set_last_response_id(
        &self,
        tenant: TenantId,
        id: &str,
        response_id: &str,
    ) -> StorageResult<()>;
    /// Fork a session into a child owned by `owner`, copying its messages.
    async fn fork_session(
        &self,
        tenant: TenantId,
        source_id: &str,
        owner: OwnerId,
    ) -> StorageResult<Session>;
}

/// Message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to an active session.
    ///
    /// `NotFound` when the session is absent for the tenant, `InvalidState`
    /// when it is archived, `Conflict` when the message carries a pending
    /// question and another one is already pending.
    async fn append_message(&self, tenant: TenantId, message: &Message) -> StorageResult<()>;
    /// Get a message by ID.
    async fn get_message(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Message>>;
    /// List a session's messages.
    async fn list_messages(
        &self,
        tenant: TenantId,
        session_id: &str,
        query: &MessageQuery,
    ) -> StorageResult<Vec<Message>>;
    /// The message carrying the session's pending question, if any.
    async fn pending_question(
        &self,
        tenant: TenantId,
        session_id: &str,
    ) -> StorageResult<Option<Message>>;
    /// Attach a pending question to an assistant message that has none.
    async fn set_pending_question(
        &self,
        tenant: TenantId,
        message_id: &str,
        question: &QuestionDocument,
    ) -> StorageResult<Message>;
    /// Move a pending question to answered or cancelled.
    async fn resolve_question(
        &self,
        tenant: TenantId,
        message_id: &str,
        resolution: &QuestionResolution,
    ) -> StorageResult<Message>;
}

/// Raw checkpoint persistence. Liveness rules live in
/// [`CheckpointEngine`](crate::hitl::CheckpointEngine).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert a checkpoint after clearing the thread's expired rows.
    ///
    /// `AlreadySuspended` when a live checkpoint exists for the thread,
    /// `NotFound` when the linked session is not active in the tenant.
    async fn insert_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;
    /// Atomically delete and return a checkpoint.
    async fn take_checkpoint(&self, tenant: TenantId, id: &str)
        -> StorageResult<Option<Checkpoint>>;
    /// Atomically delete and return a thread's checkpoint.
    async fn take_thread_checkpoint(
        &self,
        tenant: TenantId,
        thread_id: &str,
    ) -> StorageResult<Option<Checkpoint>>;
    /// Get a checkpoint by ID, expired or not.
    async fn get_checkpoint(&self, tenant: TenantId, id: &str)
        -> StorageResult<Option<Checkpoint>>;
    /// Get a thread's checkpoint, expired or not.
    async fn thread_checkpoint(
        &self,
        tenant: TenantId,
        thread_id: &str,
    ) -> StorageResult<Option<Checkpoint>>;
    /// Unexpired checkpoints linked to a session, oldest first.
    async fn list_session_checkpoints(
        &self,
        tenant: TenantId,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Checkpoint>>;
    /// Delete every checkpoint with expiry at or before `now`, across tenants.
    async fn delete_expired_checkpoints(&self, now: DateTime<Utc>) -> StorageResult<u64>;
}

/// Artifact persistence.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create an artifact in an existing session.
    ///
    /// When the idempotency key was already used in the session, the first
    /// artifact is returned and nothing is written.
    async fn create_artifact(&self, artifact: &Artifact) -> StorageResult<Artifact>;
    /// Get an artifact by ID, including logically deleted ones.
    async fn get_artifact(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Artifact>>;
    /// A session's artifacts, newest first, deleted ones excluded.
    async fn list_session_artifacts(
        &self,
        tenant: TenantId,
        session_id: &str,
        query: &ArtifactQuery,
    ) -> StorageResult<Vec<Artifact>>;
    /// Change name and/or description.
    async fn update_artifact(
        &self,
        tenant: TenantId,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> StorageResult<Artifact>;
    /// `pending_upload` → `available`, recording where the content lives.
    async fn mark_available(
        &self,
        tenant: TenantId,
        id: &str,
        url: &str,
        size_bytes: i64,
    ) -> StorageResult<Artifact>;
    /// `pending_upload` → `failed`.
    async fn mark_failed(&self, tenant: TenantId, id: &str) -> StorageResult<Artifact>;
    /// Logically delete an artifact.
    async fn delete_artifact(&self, tenant: TenantId, id: &str) -> StorageResult<()>;
    /// Logically delete every artifact in a session; returns how many changed.
    async fn delete_session_artifacts(&self, tenant: TenantId, session_id: &str)
        -> StorageResult<u64>;
    /// Upsert the provider mirror record of an artifact.
    async fn sync_provider_file(&self, file: &ArtifactProviderFile) -> StorageResult<()>;
    /// The provider mirror record, stale or not.
    async fn provider_file(
        &self,
        tenant: TenantId,
        artifact_id: &str,
        provider: &str,
    ) -> StorageResult<Option<ArtifactProviderFile>>;

    /// The provider mirror record, only when it still matches the artifact's
    /// url and size. `None` means the caller must re-upload.
    async fn reusable_provider_file(
        &self,
        tenant: TenantId,
        artifact_id: &str,
        provider: &str,
    ) -> StorageResult<Option<ArtifactProviderFile>> {
        let Some(artifact) = self.get_artifact(tenant, artifact_id).await? else {
            return Ok(None);
        };
        let file = self.provider_file(tenant, artifact_id, provider).await?;
        Ok(file.filter(|f| f.matches(&artifact)))
    }
}

/// Trace persistence. Every write is idempotent on external ids.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Open a trace, or return the existing one with the same external id.
    async fn open_trace(&self, trace: &NewTrace) -> StorageResult<Trace>;
    /// Record the final status of a trace.
    async fn close_trace(
        &self,
        tenant: TenantId,
        trace_id: &str,
        close: &TraceClose,
    ) -> StorageResult<Trace>;
    /// Link the assistant message produced by the turn.
    async fn link_trace_message(
        &self,
        tenant: TenantId,
        trace_id: &str,
        message_id: &str,
    ) -> StorageResult<()>;
    /// Get a trace by ID.
    async fn get_trace(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Trace>>;
    /// Get a trace by its provider-assigned id.
    async fn trace_by_external_id(
        &self,
        tenant: TenantId,
        external_trace_id: &str,
    ) -> StorageResult<Option<Trace>>;
    /// Insert or merge a generation.
    async fn record_generation(&self, tenant: TenantId, generation: &Generation)
        -> StorageResult<()>;
    /// Insert or merge a span.
    async fn record_span(&self, tenant: TenantId, span: &Span) -> StorageResult<()>;
    /// Insert or merge an event.
    async fn record_event(&self, tenant: TenantId, event: &TraceEvent) -> StorageResult<()>;
    /// A trace with everything recorded under it.
    async fn trace_tree(&self, tenant: TenantId, trace_id: &str)
        -> StorageResult<Option<TraceTree>>;
}

/// Query memory persistence.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a learning, or increment the usage of the one with the same
    /// content hash.
    async fn record_learning(&self, tenant: TenantId, learning: &NewLearning)
        -> StorageResult<Learning>;
    /// Get a learning by ID.
    async fn get_learning(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Learning>>;
    /// Ranked learning lookup.
    async fn search_learnings(
        &self,
        tenant: TenantId,
        search: &LearningSearch,
    ) -> StorageResult<Vec<Learning>>;
    /// Learnings scoped to a table, most used first, capped like a search.
    async fn list_learnings_by_table(
        &self,
        tenant: TenantId,
        table_name: &str,
        limit: Option<u32>,
    ) -> StorageResult<Vec<Learning>>;
    /// Count one more use of a learning.
    async fn increment_learning_usage(&self, tenant: TenantId, id: &str) -> StorageResult<()>;
    /// Delete a learning.
    async fn delete_learning(&self, tenant: TenantId, id: &str) -> StorageResult<()>;
    /// Insert a validated query, or increment the usage of the one with the
    /// same SQL hash.
    async fn record_validated_query(
        &self,
        tenant: TenantId,
        query: &NewValidatedQuery,
    ) -> StorageResult<ValidatedQuery>;
    /// Get a validated query by ID.
    async fn get_validated_query(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> StorageResult<Option<ValidatedQuery>>;
    /// Ranked validated-query lookup.
    async fn search_validated_queries(
        &self,
        tenant: TenantId,
        search: &QuerySearch,
    ) -> StorageResult<Vec<ValidatedQuery>>;
    /// Count one more reuse of a validated query.
    async fn increment_query_usage(&self, tenant: TenantId, id: &str) -> StorageResult<()>;
    /// Delete a validated query.
    async fn delete_validated_query(&self, tenant: TenantId, id: &str) -> StorageResult<()>;
}

/// Tenant-wide maintenance.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Delete every row belonging to a tenant; returns the number of rows.
    async fn purge_tenant(&self, tenant: TenantId) -> StorageResult<u64>;
}

/// Everything the services need from a backend.
pub trait Store:
    SessionStore + MessageStore + CheckpointStore + ArtifactStore + TraceStore + MemoryStore + TenantStore
{
}

impl<T> Store for T where
    T: SessionStore
        + MessageStore
        + CheckpointStore
        + ArtifactStore
        + TraceStore
        + MemoryStore
        + TenantStore
{
}
