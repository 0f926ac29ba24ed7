//! # BiChat Core
//!
//! Persistence and control-flow engine behind a conversational BI assistant.
//!
//! ## Features
//!
//! - **Sessions & Messages**: tenant-scoped conversations with at most one
//!   pending question per session
//! - **Human-in-the-loop**: checkpoint a suspended agent thread, resume it
//!   exactly once with the human's input, sweep expired checkpoints
//! - **Artifacts**: idempotent creation, upload lifecycle and provider mirrors
//! - **Tracing**: traces, generations, spans and events, idempotent on
//!   external ids and merged on re-record
//! - **Query Memory**: deduplicated learnings and validated SQL with ranked
//!   full-text recall
//!
//! ## Architecture
//!
//! ```text
//! Conversational layer → Conversation ─┬─ CheckpointEngine ─┐
//!                                      ├─ Tracer            ├─ Store traits → SQLite
//!                                      └─ QueryMemory ──────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use bichat_core::{Config, Conversation, SqliteStorage};
//! use bichat_core::tenancy::{OwnerId, TenantId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let chat = Conversation::new(storage, &config);
//!     let turn = chat
//!         .submit_user_message(TenantId::random(), OwnerId(1), None, "Revenue by region?")
//!         .await?;
//!     println!("session {}", turn.session.id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration loaded from the environment.
pub mod config;
/// One conversational turn across all components.
pub mod conversation;
/// Domain types shared by stores and services.
pub mod domain;
/// Error types and result aliases.
pub mod error;
/// Checkpoint/resume engine and expiry sweeper.
pub mod hitl;
/// Learnings and validated-query recall.
pub mod memory;
/// Storage traits and the SQLite backend.
pub mod storage;
/// Best-effort trace recording.
pub mod telemetry;
/// Tenant and owner identifiers.
pub mod tenancy;

pub use config::Config;
pub use conversation::Conversation;
pub use error::{AppError, AppResult, StorageError, StorageResult};
pub use hitl::{CheckpointEngine, CheckpointSweeper};
pub use memory::QueryMemory;
pub use storage::{SqliteStorage, Store};
pub use telemetry::Tracer;
