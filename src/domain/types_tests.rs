//! Unit tests for domain types and builder patterns.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde_json::json;

use super::*;
use crate::error::StorageError;
use crate::tenancy::{OwnerId, TenantId};

// ============================================================================
// Session tests
// ============================================================================

#[test]
fn test_session_new() {
    let tenant = TenantId::random();
    let session = Session::new(tenant, OwnerId(7));
    assert!(!session.id.is_empty());
    assert_eq!(session.tenant_id, tenant);
    assert_eq!(session.status, SessionStatus::Active);
    assert!(!session.pinned);
    assert!(session.parent_session_id.is_none());
    assert!(session.last_response_id.is_none());
}

#[test]
fn test_session_builders() {
    let session = Session::new(TenantId::random(), OwnerId(1))
        .with_title("Revenue by region")
        .with_parent("parent-1")
        .as_pinned();
    assert_eq!(session.title, "Revenue by region");
    assert_eq!(session.parent_session_id.as_deref(), Some("parent-1"));
    assert!(session.pinned);
    assert!(!session.is_archived());
}

#[test]
fn test_session_status_parse() {
    assert_eq!("ARCHIVED".parse::<SessionStatus>().unwrap(), SessionStatus::Archived);
    assert!("deleted".parse::<SessionStatus>().is_err());
}

// ============================================================================
// Message tests
// ============================================================================

#[test]
fn test_message_body_role_and_content() {
    let body = MessageBody::tool("call-1", "42 rows");
    assert_eq!(body.role(), Role::Tool);
    assert_eq!(body.content(), "42 rows");
    assert!(body.question().is_none());
}

#[test]
fn test_message_serializes_role_tag() {
    let message = Message::new("sess-1", MessageBody::user("hello"));
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["role"], "user");
    assert_eq!(value["content"], "hello");
    assert_eq!(value["session_id"], "sess-1");
}

#[test]
fn test_assistant_message_with_question() {
    let doc = QuestionDocument::new("sql_agent")
        .with_question(Question::new("q1", "Which region?").with_options(["EU", "US"]));
    let message = Message::new("sess-1", AssistantMessage::new("Need input").with_question(doc));
    assert_eq!(message.role(), Role::Assistant);
    assert_eq!(message.body.question_status(), Some(QuestionStatus::Pending));
    assert_eq!(message.body.question().unwrap().questions[0].options, vec!["EU", "US"]);
}

#[test]
fn test_question_resolve_answered() {
    let mut doc = QuestionDocument::new("agent").with_question(Question::new("q1", "Send?"));
    let answers = BTreeMap::from([("q1".to_string(), "yes".to_string())]);
    doc.resolve(&QuestionResolution::Answered(answers)).unwrap();
    assert_eq!(doc.status, QuestionStatus::Answered);
    assert_eq!(doc.answers.get("q1").map(String::as_str), Some("yes"));
    assert!(doc.resolved_at.is_some());
}

#[test]
fn test_question_resolve_rejects_unknown_id() {
    let mut doc = QuestionDocument::new("agent").with_question(Question::new("q1", "Send?"));
    let answers = BTreeMap::from([("q9".to_string(), "yes".to_string())]);
    let err = doc.resolve(&QuestionResolution::Answered(answers)).unwrap_err();
    assert!(matches!(err, StorageError::Validation { .. }));
    assert!(doc.is_pending());
}

#[test]
fn test_question_resolve_twice_is_invalid_state() {
    let mut doc = QuestionDocument::new("agent").with_question(Question::new("q1", "Send?"));
    doc.resolve(&QuestionResolution::Cancelled).unwrap();
    let err = doc.resolve(&QuestionResolution::Cancelled).unwrap_err();
    assert!(matches!(err, StorageError::InvalidState { .. }));
}

#[test]
fn test_message_query_display() {
    let q = MessageQuery::display(20);
    assert_eq!(q.order, MessageOrder::NewestFirst);
    assert_eq!(q.limit, Some(20));
    assert_eq!(MessageQuery::replay().order, MessageOrder::OldestFirst);
}

// ============================================================================
// Checkpoint tests
// ============================================================================

#[test]
fn test_suspend_request_unrepresentable_expiry() {
    let err = SuspendRequest::new(TenantId::random(), OwnerId(1), "T1", "a")
        .with_ttl(Duration::MAX)
        .into_checkpoint(Utc::now(), Duration::hours(24))
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation { ref field, .. } if field == "ttl"));
}

#[test]
fn test_suspend_request_into_checkpoint() {
    let tenant = TenantId::random();
    let now = Utc::now();
    let checkpoint = SuspendRequest::new(tenant, OwnerId(1), "T1", "sql_agent")
        .with_messages(vec![AgentMessage::new(Role::User, "email the report")])
        .with_pending_tools(vec![ToolCall::new("c1", "send_email", "{}")])
        .with_interrupt("confirmation", json!({"tool": "send_email"}))
        .with_session("sess-1")
        .into_checkpoint(now, Duration::hours(24))
        .unwrap();

    assert_eq!(checkpoint.thread_id, "T1");
    assert_eq!(checkpoint.expires_at - checkpoint.created_at, Duration::hours(24));
    assert_eq!(checkpoint.pending_tools[0].name, "send_email");
    assert_eq!(checkpoint.session_id.as_deref(), Some("sess-1"));
    assert_eq!(checkpoint.state_at(now), CheckpointState::Suspended);
    assert_eq!(
        checkpoint.state_at(now + Duration::hours(24)),
        CheckpointState::Expired
    );
}

#[test]
fn test_suspend_request_ttl_override() {
    let now = Utc::now();
    let checkpoint = SuspendRequest::new(TenantId::random(), OwnerId(1), "T1", "a")
        .with_ttl(Duration::minutes(5))
        .into_checkpoint(now, Duration::hours(24))
        .unwrap();
    assert_eq!(checkpoint.expires_at, now + Duration::minutes(5));
}

#[test]
fn test_resume_state_merge() {
    let now = Utc::now();
    let checkpoint = SuspendRequest::new(TenantId::random(), OwnerId(1), "T1", "a")
        .with_previous_response("resp-9")
        .into_checkpoint(now, Duration::hours(1))
        .unwrap();
    let id = checkpoint.id.clone();
    let state = ResumeState::merge(checkpoint, json!({"approved": true}));
    assert_eq!(state.checkpoint_id, id);
    assert_eq!(state.previous_response_id.as_deref(), Some("resp-9"));
    assert_eq!(state.human_input["approved"], true);
}

// ============================================================================
// Artifact tests
// ============================================================================

#[test]
fn test_artifact_defaults() {
    let artifact = Artifact::new(TenantId::random(), "sess-1", ArtifactType::Chart, "chart-1");
    assert_eq!(artifact.status, ArtifactStatus::PendingUpload);
    assert_eq!(artifact.metadata, json!({}));
    assert!(artifact.validate().is_ok());
}

#[test]
fn test_attachment_requires_upload() {
    let tenant = TenantId::random();
    let err = Artifact::new(tenant, "s", ArtifactType::Attachment, "a.csv")
        .validate()
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation { ref field, .. } if field == "upload_id"));
    assert!(Artifact::new(tenant, "s", ArtifactType::Attachment, "a.csv")
        .with_upload("up-1")
        .validate()
        .is_ok());
}

#[test]
fn test_artifact_rejects_blank_name_and_non_object_metadata() {
    let tenant = TenantId::random();
    assert!(Artifact::new(tenant, "s", ArtifactType::File, "  ").validate().is_err());
    assert!(Artifact::new(tenant, "s", ArtifactType::File, "f")
        .with_metadata(json!([1, 2]))
        .validate()
        .is_err());
}

#[test]
fn test_artifact_type_parse() {
    assert_eq!("code_output".parse::<ArtifactType>().unwrap(), ArtifactType::CodeOutput);
    assert_eq!(ArtifactType::Export.to_string(), "export");
    assert!("image".parse::<ArtifactType>().is_err());
}

#[test]
fn test_provider_file_matches() {
    let tenant = TenantId::random();
    let artifact = Artifact::new(tenant, "s", ArtifactType::Export, "e.xlsx")
        .with_location("s3://bucket/e.xlsx", 2048);
    let mirror = ArtifactProviderFile {
        tenant_id: tenant,
        artifact_id: artifact.id.clone(),
        provider: "openai".to_string(),
        provider_file_id: "file-1".to_string(),
        source_url: "s3://bucket/e.xlsx".to_string(),
        source_size_bytes: 2048,
        synced_at: Utc::now(),
    };
    assert!(mirror.matches(&artifact));

    let resized = artifact.clone().with_location("s3://bucket/e.xlsx", 4096);
    assert!(!mirror.matches(&resized));
}

// ============================================================================
// Telemetry tests
// ============================================================================

#[test]
fn test_trace_status_parse() {
    assert_eq!("interrupted".parse::<TraceStatus>().unwrap(), TraceStatus::Interrupted);
    assert_eq!(TraceStatus::default(), TraceStatus::Running);
}

#[test]
fn test_generation_builder_totals_tokens() {
    let generation = Generation::new("trace-1", "gen-1")
        .with_model("openai", "gpt-4o")
        .with_tokens(100, 25);
    assert_eq!(generation.total_tokens, 125);
    assert_eq!(generation.model.as_deref(), Some("gpt-4o"));
}

#[test]
fn test_span_for_tool_with_error() {
    let span = Span::new("trace-1", "span-1", "sql")
        .for_tool("call-1", "execute_sql")
        .with_error("syntax error");
    assert_eq!(span.kind, "tool");
    assert_eq!(span.status, "error");
    assert_eq!(span.tool_name.as_deref(), Some("execute_sql"));
}

#[test]
fn test_new_trace_local_generates_external_id() {
    let a = NewTrace::local(TenantId::random(), "s");
    let b = NewTrace::local(TenantId::random(), "s");
    assert_ne!(a.external_trace_id, b.external_trace_id);
}
