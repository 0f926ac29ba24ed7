//! Best-effort recording of traces, generations, spans and events.
//!
//! A failed telemetry write never fails the turn that produced it: the
//! [`Tracer`] logs the error and carries on.

use tracing::{debug, warn};

use crate::domain::{Generation, NewTrace, Span, Trace, TraceClose, TraceEvent, TraceTree};
use crate::error::StorageResult;
use crate::storage::TraceStore;
use crate::tenancy::TenantId;

/// Writes telemetry through a [`TraceStore`], swallowing failures.
#[derive(Clone)]
pub struct Tracer<S> {
    store: S,
}

impl<S: TraceStore> Tracer<S> {
    /// Create a tracer over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Open a trace, or return the one already opened with the same external id.
    pub async fn open(&self, trace: &NewTrace) -> Option<Trace> {
        match self.store.open_trace(trace).await {
            Ok(t) => {
                debug!(
                    trace_id = %t.id,
                    external_trace_id = %t.external_trace_id,
                    session_id = %t.session_id,
                    "Trace opened"
                );
                Some(t)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    external_trace_id = %trace.external_trace_id,
                    session_id = %trace.session_id,
                    "Failed to open trace"
                );
                None
            }
        }
    }

    /// Record or merge an LLM generation.
    pub async fn generation(&self, tenant: TenantId, generation: &Generation) {
        if let Err(e) = self.store.record_generation(tenant, generation).await {
            warn!(
                error = %e,
                trace_id = %generation.trace_id,
                external_id = %generation.external_id,
                "Failed to record generation"
            );
        }
    }

    /// Record or merge a span.
    pub async fn span(&self, tenant: TenantId, span: &Span) {
        if let Err(e) = self.store.record_span(tenant, span).await {
            warn!(
                error = %e,
                trace_id = %span.trace_id,
                external_id = %span.external_id,
                "Failed to record span"
            );
        }
    }

    /// Record or merge an event.
    pub async fn event(&self, tenant: TenantId, event: &TraceEvent) {
        if let Err(e) = self.store.record_event(tenant, event).await {
            warn!(
                error = %e,
                trace_id = %event.trace_id,
                external_id = %event.external_id,
                "Failed to record trace event"
            );
        }
    }

    /// Link the assistant message a trace produced.
    pub async fn link_message(&self, tenant: TenantId, trace_id: &str, message_id: &str) {
        if let Err(e) = self
            .store
            .link_trace_message(tenant, trace_id, message_id)
            .await
        {
            warn!(error = %e, trace_id, message_id, "Failed to link trace message");
        }
    }

    /// Record a trace's final status.
    pub async fn close(&self, tenant: TenantId, trace_id: &str, close: &TraceClose) -> Option<Trace> {
        match self.store.close_trace(tenant, trace_id, close).await {
            Ok(t) => {
                debug!(trace_id, status = %t.status, "Trace closed");
                Some(t)
            }
            Err(e) => {
                warn!(error = %e, trace_id, "Failed to close trace");
                None
            }
        }
    }

    /// Read back a trace with everything recorded under it.
    pub async fn tree(&self, tenant: TenantId, trace_id: &str) -> StorageResult<Option<TraceTree>> {
        self.store.trace_tree(tenant, trace_id).await
    }
}
