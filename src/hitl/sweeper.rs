//! Periodic deletion of expired checkpoints.
//!
//! The sweeper ticks on a [`tokio::time::interval`] and stops when its
//! [`CancellationToken`] fires. A failed sweep is logged and retried on the
//! next tick. Several sweepers may run against the same database.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::CheckpointEngine;
use crate::storage::CheckpointStore;

/// Background task that sweeps expired checkpoints.
pub struct CheckpointSweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CheckpointSweeper {
    /// Spawn a sweeper ticking every `period`. The first sweep runs immediately.
    pub fn start<S>(engine: CheckpointEngine<S>, period: Duration) -> Self
    where
        S: CheckpointStore + 'static,
    {
        Self::start_with_token(engine, period, CancellationToken::new())
    }

    /// Spawn a sweeper that also stops when `cancel` fires.
    pub fn start_with_token<S>(
        engine: CheckpointEngine<S>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self
    where
        S: CheckpointStore + 'static,
    {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = engine.sweep().await {
                            warn!(error = %e, "Checkpoint sweep failed");
                        }
                    }
                }
            }

            debug!("Checkpoint sweeper stopped");
        });

        Self { cancel, handle }
    }

    /// A token that stops this sweeper when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the sweeper and wait for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }

    /// Wait until the sweeper stops through its token.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
