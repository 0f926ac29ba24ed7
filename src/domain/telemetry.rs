use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenancy::TenantId;

/// Outcome of an assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// Turn in progress.
    #[default]
    Running,
    /// Turn finished normally.
    Completed,
    /// Turn failed.
    Error,
    /// Turn paused for human input.
    Interrupted,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceStatus::Running => write!(f, "running"),
            TraceStatus::Completed => write!(f, "completed"),
            TraceStatus::Error => write!(f, "error"),
            TraceStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::str::FromStr for TraceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(TraceStatus::Running),
            "completed" => Ok(TraceStatus::Completed),
            "error" => Ok(TraceStatus::Error),
            "interrupted" => Ok(TraceStatus::Interrupted),
            _ => Err(format!("Unknown trace status: {}", s)),
        }
    }
}

/// Per-turn observability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Internal trace id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Session the turn belongs to.
    pub session_id: String,
    /// Assistant message produced by the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Id assigned by the tracing provider, unique per tenant.
    pub external_trace_id: String,
    /// Link into the tracing provider's UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_url: Option<String>,
    /// Turn outcome.
    pub status: TraceStatus,
    /// Total generation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_ms: Option<i64>,
    /// Model reasoning summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Why the turn was observed (interrupt, error, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_reason: Option<String>,
    /// Merged metadata object.
    pub metadata: serde_json::Value,
    /// When the trace was opened.
    pub created_at: DateTime<Utc>,
    /// When the trace was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Final state recorded when a trace is closed.
#[derive(Debug, Clone, Default)]
pub struct TraceClose {
    /// Final status.
    pub status: TraceStatus,
    /// Total generation time.
    pub generation_ms: Option<i64>,
    /// Assistant message produced by the turn.
    pub message_id: Option<String>,
    /// Model reasoning summary.
    pub thinking: Option<String>,
    /// Why the turn was observed.
    pub observation_reason: Option<String>,
}

impl TraceClose {
    /// Close with a status
    pub fn new(status: TraceStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Set the generation duration
    pub fn with_generation_ms(mut self, ms: i64) -> Self {
        self.generation_ms = Some(ms);
        self
    }

    /// Link the produced message
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the reasoning summary
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    /// Set the observation reason
    pub fn with_observation_reason(mut self, reason: impl Into<String>) -> Self {
        self.observation_reason = Some(reason.into());
        self
    }
}

/// One LLM call under a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Internal trace id.
    pub trace_id: String,
    /// Id assigned by the LLM runtime, unique within the trace.
    pub external_id: String,
    /// Upstream request id.
    pub request_id: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// LLM provider.
    pub provider: Option<String>,
    /// Why the model stopped.
    pub finish_reason: Option<String>,
    /// Prompt tokens.
    pub prompt_tokens: i64,
    /// Completion tokens.
    pub completion_tokens: i64,
    /// Total tokens.
    pub total_tokens: i64,
    /// Tokens served from the provider cache.
    pub cached_tokens: i64,
    /// Cost in the provider's currency.
    pub cost: f64,
    /// Call latency.
    pub latency_ms: i64,
    /// Prompt text.
    pub input: Option<String>,
    /// Completion text.
    pub output: Option<String>,
    /// Model reasoning summary.
    pub thinking: Option<String>,
    /// Why the generation was observed.
    pub observation_reason: Option<String>,
    /// Merged metadata object.
    pub metadata: serde_json::Value,
    /// Call start.
    pub started_at: Option<DateTime<Utc>>,
    /// Call end.
    pub completed_at: Option<DateTime<Utc>>,
    /// When first recorded.
    pub created_at: DateTime<Utc>,
}

impl Generation {
    /// Create a generation record under a trace
    pub fn new(trace_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            external_id: external_id.into(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Set model and provider
    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    /// Set token counters
    pub fn with_tokens(mut self, prompt: i64, completion: i64) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self.total_tokens = prompt + completion;
        self
    }

    /// Set prompt and completion text
    pub fn with_io(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self.output = Some(output.into());
        self
    }

    /// Set the finish reason
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Set latency and cost
    pub fn with_latency(mut self, latency_ms: i64, cost: f64) -> Self {
        self.latency_ms = latency_ms;
        self.cost = cost;
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Operational step under a trace (tool call, retrieval, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Internal trace id.
    pub trace_id: String,
    /// Id assigned by the runtime, unique within the trace.
    pub external_id: String,
    /// Enclosing span.
    pub parent_external_id: Option<String>,
    /// Generation that triggered the span.
    pub generation_external_id: Option<String>,
    /// Span name.
    pub name: String,
    /// Span kind (e.g. "tool").
    pub kind: String,
    /// Span status (e.g. "ok", "error").
    pub status: String,
    /// Log level.
    pub level: Option<String>,
    /// Tool call correlation id.
    pub call_id: Option<String>,
    /// Tool name.
    pub tool_name: Option<String>,
    /// Input text.
    pub input: Option<String>,
    /// Output text.
    pub output: Option<String>,
    /// Error text.
    pub error: Option<String>,
    /// Duration.
    pub duration_ms: i64,
    /// Merged attributes object.
    pub attributes: serde_json::Value,
    /// Span start.
    pub started_at: Option<DateTime<Utc>>,
    /// Span end.
    pub completed_at: Option<DateTime<Utc>>,
    /// When first recorded.
    pub created_at: DateTime<Utc>,
}

impl Span {
    /// Create a span record under a trace
    pub fn new(
        trace_id: impl Into<String>,
        external_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            external_id: external_id.into(),
            name: name.into(),
            kind: "span".to_string(),
            status: "ok".to_string(),
            attributes: serde_json::json!({}),
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Mark as a tool call
    pub fn for_tool(mut self, call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        self.kind = "tool".to_string();
        self.call_id = Some(call_id.into());
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Set the parent span
    pub fn with_parent(mut self, parent_external_id: impl Into<String>) -> Self {
        self.parent_external_id = Some(parent_external_id.into());
        self
    }

    /// Set the triggering generation
    pub fn with_generation(mut self, generation_external_id: impl Into<String>) -> Self {
        self.generation_external_id = Some(generation_external_id.into());
        self
    }

    /// Set input and output
    pub fn with_io(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self.output = Some(output.into());
        self
    }

    /// Mark as failed
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.status = "error".to_string();
        self.error = Some(error.into());
        self
    }

    /// Set duration
    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Set attributes
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Point-in-time marker under a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Internal trace id.
    pub trace_id: String,
    /// Id assigned by the runtime, unique within the trace.
    pub external_id: String,
    /// Event name.
    pub name: String,
    /// Event kind (e.g. "interrupt").
    pub kind: String,
    /// Log level.
    pub level: Option<String>,
    /// Human-readable message.
    pub message: Option<String>,
    /// Reason code.
    pub reason: Option<String>,
    /// Related span.
    pub span_external_id: Option<String>,
    /// Related generation.
    pub generation_external_id: Option<String>,
    /// Merged attributes object.
    pub attributes: serde_json::Value,
    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
}

impl TraceEvent {
    /// Create an event record under a trace
    pub fn new(
        trace_id: impl Into<String>,
        external_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            external_id: external_id.into(),
            name: name.into(),
            kind: "event".to_string(),
            attributes: serde_json::json!({}),
            occurred_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Set the kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Set message and reason
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the reason code
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Correlate with a span
    pub fn with_span(mut self, span_external_id: impl Into<String>) -> Self {
        self.span_external_id = Some(span_external_id.into());
        self
    }

    /// Set attributes
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A trace with everything recorded under it, each list ordered by time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceTree {
    /// The trace.
    pub trace: Trace,
    /// LLM calls.
    pub generations: Vec<Generation>,
    /// Operational steps.
    pub spans: Vec<Span>,
    /// Markers.
    pub events: Vec<TraceEvent>,
}

/// Request to open a trace for a turn.
#[derive(Debug, Clone)]
pub struct NewTrace {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Session the turn belongs to.
    pub session_id: String,
    /// Produced message, when already known.
    pub message_id: Option<String>,
    /// Provider-assigned id; generated when absent.
    pub external_trace_id: String,
    /// Link into the provider's UI.
    pub trace_url: Option<String>,
    /// Initial metadata.
    pub metadata: serde_json::Value,
}

impl NewTrace {
    /// Open a trace with a provider-assigned id
    pub fn new(
        tenant_id: TenantId,
        session_id: impl Into<String>,
        external_trace_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            session_id: session_id.into(),
            message_id: None,
            external_trace_id: external_trace_id.into(),
            trace_url: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Open a trace with a locally generated external id
    pub fn local(tenant_id: TenantId, session_id: impl Into<String>) -> Self {
        Self::new(tenant_id, session_id, Uuid::new_v4().to_string())
    }

    /// Link a message
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the provider UI link
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.trace_url = Some(url.into());
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
