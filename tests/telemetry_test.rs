//! Integration tests for trace recording
//!
//! Every write is idempotent on external ids; re-recording merges the
//! non-empty fields into the stored row.

use pretty_assertions::assert_eq;
use serde_json::json;

use bichat_core::domain::{
    Generation, NewTrace, Session, Span, TraceClose, TraceEvent, TraceStatus,
};
use bichat_core::storage::{SessionStore, SqliteStorage, TraceStore};
use bichat_core::tenancy::{OwnerId, TenantId};
use bichat_core::Tracer;

async fn setup() -> (SqliteStorage, TenantId, Session) {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let tenant = TenantId::random();
    let session = Session::new(tenant, OwnerId(1));
    storage.create_session(&session).await.unwrap();
    (storage, tenant, session)
}

#[cfg(test)]
mod trace_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_duplicate_open_returns_same_trace() {
        let (storage, tenant, session) = setup().await;

        let first = storage
            .open_trace(&NewTrace::new(tenant, &session.id, "ext-1"))
            .await
            .unwrap();
        let second = storage
            .open_trace(&NewTrace::new(tenant, &session.id, "ext-1").with_url("https://x"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, TraceStatus::Running);
        assert!(second.trace_url.is_none(), "Reopening must not rewrite the trace");
    }

    #[tokio::test]
    async fn test_open_in_missing_session_is_not_found() {
        let (storage, tenant, _) = setup().await;
        let err = storage
            .open_trace(&NewTrace::new(tenant, "missing", "ext-1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_close_trace_records_outcome() {
        let (storage, tenant, session) = setup().await;
        let trace = storage
            .open_trace(&NewTrace::local(tenant, &session.id))
            .await
            .unwrap();

        let closed = storage
            .close_trace(
                tenant,
                &trace.id,
                &TraceClose::new(TraceStatus::Completed)
                    .with_generation_ms(850)
                    .with_message("msg-1"),
            )
            .await
            .unwrap();
        assert_eq!(closed.status, TraceStatus::Completed);
        assert_eq!(closed.generation_ms, Some(850));
        assert_eq!(closed.message_id.as_deref(), Some("msg-1"));

        let err = storage
            .close_trace(TenantId::random(), &trace.id, &TraceClose::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_generation_rerecord_merges_fields() {
        let (storage, tenant, session) = setup().await;
        let trace = storage
            .open_trace(&NewTrace::local(tenant, &session.id))
            .await
            .unwrap();

        storage
            .record_generation(
                tenant,
                &Generation::new(&trace.id, "gen-1")
                    .with_model("openai", "gpt-4o")
                    .with_metadata(json!({"attempt": 1})),
            )
            .await
            .unwrap();
        storage
            .record_generation(
                tenant,
                &Generation::new(&trace.id, "gen-1")
                    .with_tokens(120, 30)
                    .with_io("", "SELECT 1")
                    .with_metadata(json!({"cached": false})),
            )
            .await
            .unwrap();

        let tree = storage.trace_tree(tenant, &trace.id).await.unwrap().unwrap();
        assert_eq!(tree.generations.len(), 1);
        let generation = &tree.generations[0];
        assert_eq!(generation.model.as_deref(), Some("gpt-4o"));
        assert_eq!(generation.provider.as_deref(), Some("openai"));
        assert_eq!(generation.total_tokens, 150);
        assert_eq!(generation.output.as_deref(), Some("SELECT 1"));
        assert_eq!(generation.metadata, json!({"attempt": 1, "cached": false}));
    }

    #[tokio::test]
    async fn test_span_and_event_are_idempotent() {
        let (storage, tenant, session) = setup().await;
        let trace = storage
            .open_trace(&NewTrace::local(tenant, &session.id))
            .await
            .unwrap();

        let span = Span::new(&trace.id, "span-1", "execute_sql")
            .for_tool("call_1", "execute_sql")
            .with_io("SELECT 1", "");
        storage.record_span(tenant, &span).await.unwrap();
        // Empty name and kind keep the stored values.
        let update = Span {
            kind: String::new(),
            ..Span::new(&trace.id, "span-1", "")
                .with_error("timeout")
                .with_duration(30_000)
        };
        storage.record_span(tenant, &update).await.unwrap();

        let event = TraceEvent::new(&trace.id, "evt-1", "interrupt")
            .with_kind("interrupt")
            .with_reason("confirmation")
            .with_span("span-1");
        storage.record_event(tenant, &event).await.unwrap();
        storage.record_event(tenant, &event).await.unwrap();

        let tree = storage.trace_tree(tenant, &trace.id).await.unwrap().unwrap();
        assert_eq!(tree.spans.len(), 1);
        let stored = &tree.spans[0];
        assert_eq!(stored.name, "execute_sql");
        assert_eq!(stored.kind, "tool");
        assert_eq!(stored.status, "error");
        assert_eq!(stored.input.as_deref(), Some("SELECT 1"));
        assert_eq!(stored.error.as_deref(), Some("timeout"));
        assert_eq!(stored.duration_ms, 30_000);

        assert_eq!(tree.events.len(), 1);
        assert_eq!(tree.events[0].reason.as_deref(), Some("confirmation"));
        assert_eq!(tree.events[0].span_external_id.as_deref(), Some("span-1"));
    }

    #[tokio::test]
    async fn test_record_under_missing_trace_is_not_found() {
        let (storage, tenant, _) = setup().await;
        let err = storage
            .record_generation(tenant, &Generation::new("missing", "gen-1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_trace_tree_for_other_tenant_is_none() {
        let (storage, tenant, session) = setup().await;
        let trace = storage
            .open_trace(&NewTrace::local(tenant, &session.id))
            .await
            .unwrap();

        assert!(storage
            .trace_tree(TenantId::random(), &trace.id)
            .await
            .unwrap()
            .is_none());
    }
}

#[cfg(test)]
mod tracer_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_tracer_swallows_failures() {
        let (storage, tenant, _) = setup().await;
        let tracer = Tracer::new(storage);

        assert!(tracer
            .open(&NewTrace::local(tenant, "missing"))
            .await
            .is_none());
        tracer
            .generation(tenant, &Generation::new("missing", "gen-1"))
            .await;
        tracer.span(tenant, &Span::new("missing", "s", "x")).await;
        tracer
            .event(tenant, &TraceEvent::new("missing", "e", "x"))
            .await;
        tracer.link_message(tenant, "missing", "msg").await;
        assert!(tracer
            .close(tenant, "missing", &TraceClose::new(TraceStatus::Error))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tracer_records_turn() {
        let (storage, tenant, session) = setup().await;
        let tracer = Tracer::new(storage);

        let trace = tracer
            .open(&NewTrace::local(tenant, &session.id))
            .await
            .unwrap();
        tracer
            .generation(
                tenant,
                &Generation::new(&trace.id, "gen-1").with_latency(420, 0.002),
            )
            .await;
        tracer.link_message(tenant, &trace.id, "msg-9").await;
        let closed = tracer
            .close(tenant, &trace.id, &TraceClose::new(TraceStatus::Completed))
            .await
            .unwrap();
        assert_eq!(closed.message_id.as_deref(), Some("msg-9"));

        let tree = tracer.tree(tenant, &trace.id).await.unwrap().unwrap();
        assert_eq!(tree.generations[0].latency_ms, 420);
    }
}
