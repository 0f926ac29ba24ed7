//! Plain data types shared by the stores and services.
//!
//! Everything here is serde-serializable so the conversational transport can
//! hand it straight to its own framing.

mod artifact;
mod checkpoint;
pub mod memory;
mod message;
mod session;
mod telemetry;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use artifact::{Artifact, ArtifactProviderFile, ArtifactQuery, ArtifactStatus, ArtifactType};
pub use checkpoint::{AgentMessage, Checkpoint, CheckpointState, ResumeState, SuspendRequest};
pub use memory::{
    Learning, LearningCategory, LearningSearch, NewLearning, NewValidatedQuery, QuerySearch,
    ValidatedQuery,
};
pub use message::{
    AssistantMessage, Citation, Message, MessageBody, MessageOrder, MessageQuery, Question,
    QuestionDocument, QuestionResolution, QuestionStatus, Role, SystemMessage, ToolCall,
    ToolMessage, UserMessage,
};
pub use session::{ListOptions, Session, SessionStatus};
pub use telemetry::{
    Generation, NewTrace, Span, Trace, TraceClose, TraceEvent, TraceStatus, TraceTree,
};
