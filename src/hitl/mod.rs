//! Human-in-the-loop checkpoint engine.
//!
//! A thread is RUNNING while it has no checkpoint row, SUSPENDED while its
//! row is unexpired, EXPIRED once the row's expiry has passed, and CONSUMED
//! after resume deletes the row. Consumption is a single `DELETE ... RETURNING`
//! so exactly one caller can resume a checkpoint, from any process sharing the
//! database.

mod sweeper;

pub use sweeper::CheckpointSweeper;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::domain::{Checkpoint, ResumeState, SuspendRequest};
use crate::error::{StorageError, StorageResult};
use crate::storage::CheckpointStore;
use crate::tenancy::TenantId;

/// Suspends and resumes agent threads through a [`CheckpointStore`].
#[derive(Clone)]
pub struct CheckpointEngine<S> {
    store: S,
    ttl: Duration,
}

impl<S: CheckpointStore> CheckpointEngine<S> {
    /// Create an engine using the configured default TTL.
    pub fn new(store: S, config: &CheckpointConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
        }
    }

    /// Create an engine with an explicit default TTL.
    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Default TTL applied when a request does not override it.
    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a checkpoint for a thread awaiting human input.
    ///
    /// Fails with `AlreadySuspended` when the thread already has a live
    /// checkpoint in the tenant.
    pub async fn suspend(&self, request: SuspendRequest) -> StorageResult<Checkpoint> {
        self.suspend_at(request, Utc::now()).await
    }

    /// [`suspend`](Self::suspend) with an explicit clock.
    pub async fn suspend_at(
        &self,
        request: SuspendRequest,
        now: DateTime<Utc>,
    ) -> StorageResult<Checkpoint> {
        if request.thread_id.trim().is_empty() {
            return Err(StorageError::validation("thread_id", "must not be empty"));
        }
        if request.agent_name.trim().is_empty() {
            return Err(StorageError::validation("agent_name", "must not be empty"));
        }
        if let Some(ttl) = request.ttl {
            if ttl <= Duration::zero() {
                return Err(StorageError::validation("ttl", "must be positive"));
            }
        }

        let checkpoint = request.into_checkpoint(now, self.ttl)?;
        self.store.insert_checkpoint(&checkpoint, now).await?;

        info!(
            checkpoint_id = %checkpoint.id,
            thread_id = %checkpoint.thread_id,
            interrupt = %checkpoint.interrupt_type,
            expires_at = %checkpoint.expires_at,
            "Thread suspended"
        );
        Ok(checkpoint)
    }

    /// Consume a checkpoint and merge it with the human's input.
    ///
    /// `NotFound` when absent (including already consumed), `Expired` when past
    /// its TTL. Either way the row is gone afterwards.
    pub async fn resume(
        &self,
        tenant: TenantId,
        checkpoint_id: &str,
        human_input: serde_json::Value,
    ) -> StorageResult<ResumeState> {
        self.resume_at(tenant, checkpoint_id, human_input, Utc::now())
            .await
    }

    /// [`resume`](Self::resume) with an explicit clock.
    pub async fn resume_at(
        &self,
        tenant: TenantId,
        checkpoint_id: &str,
        human_input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StorageResult<ResumeState> {
        let checkpoint = self
            .store
            .take_checkpoint(tenant, checkpoint_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Checkpoint", checkpoint_id))?;

        consume(checkpoint, human_input, now)
    }

    /// Consume whatever checkpoint the thread has.
    pub async fn resume_thread(
        &self,
        tenant: TenantId,
        thread_id: &str,
        human_input: serde_json::Value,
    ) -> StorageResult<ResumeState> {
        self.resume_thread_at(tenant, thread_id, human_input, Utc::now())
            .await
    }

    /// [`resume_thread`](Self::resume_thread) with an explicit clock.
    pub async fn resume_thread_at(
        &self,
        tenant: TenantId,
        thread_id: &str,
        human_input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StorageResult<ResumeState> {
        let checkpoint = self
            .store
            .take_thread_checkpoint(tenant, thread_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Checkpoint", thread_id))?;

        consume(checkpoint, human_input, now)
    }

    /// Drop a checkpoint without resuming it.
    pub async fn cancel(&self, tenant: TenantId, checkpoint_id: &str) -> StorageResult<()> {
        let checkpoint = self
            .store
            .take_checkpoint(tenant, checkpoint_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Checkpoint", checkpoint_id))?;

        info!(
            checkpoint_id = %checkpoint.id,
            thread_id = %checkpoint.thread_id,
            "Checkpoint cancelled"
        );
        Ok(())
    }

    /// A checkpoint that can still be resumed.
    pub async fn get_live(
        &self,
        tenant: TenantId,
        checkpoint_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        let now = Utc::now();
        Ok(self
            .store
            .get_checkpoint(tenant, checkpoint_id)
            .await?
            .filter(|c| !c.is_expired_at(now)))
    }

    /// The thread's checkpoint, if it can still be resumed.
    pub async fn live_for_thread(
        &self,
        tenant: TenantId,
        thread_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        let now = Utc::now();
        Ok(self
            .store
            .thread_checkpoint(tenant, thread_id)
            .await?
            .filter(|c| !c.is_expired_at(now)))
    }

    /// Live checkpoints linked to a session.
    pub async fn list_session(
        &self,
        tenant: TenantId,
        session_id: &str,
    ) -> StorageResult<Vec<Checkpoint>> {
        self.store
            .list_session_checkpoints(tenant, session_id, Utc::now())
            .await
    }

    /// Delete every expired checkpoint.
    pub async fn sweep(&self) -> StorageResult<u64> {
        self.sweep_at(Utc::now()).await
    }

    /// [`sweep`](Self::sweep) with an explicit clock.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let removed = self.store.delete_expired_checkpoints(now).await?;
        if removed > 0 {
            info!(removed, "Swept expired checkpoints");
        } else {
            debug!("No expired checkpoints to sweep");
        }
        Ok(removed)
    }
}

fn consume(
    checkpoint: Checkpoint,
    human_input: serde_json::Value,
    now: DateTime<Utc>,
) -> StorageResult<ResumeState> {
    if checkpoint.is_expired_at(now) {
        warn!(
            checkpoint_id = %checkpoint.id,
            thread_id = %checkpoint.thread_id,
            expired_at = %checkpoint.expires_at,
            "Discarded expired checkpoint on resume"
        );
        return Err(StorageError::Expired {
            checkpoint_id: checkpoint.id,
        });
    }

    info!(
        checkpoint_id = %checkpoint.id,
        thread_id = %checkpoint.thread_id,
        "Thread resumed"
    );
    Ok(ResumeState::merge(checkpoint, human_input))
}
