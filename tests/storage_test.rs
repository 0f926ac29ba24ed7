//! Integration tests for the SQLite session and message stores
//!
//! Most tests use an in-memory database. Concurrency tests use a WAL
//! database file in a temp dir so several pooled connections race for real.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use bichat_core::config::DatabaseConfig;
use bichat_core::domain::{
    AssistantMessage, ListOptions, Message, MessageBody, MessageQuery, Question,
    QuestionDocument, QuestionResolution, QuestionStatus, Role, Session, SessionStatus,
};
use bichat_core::storage::{MessageStore, SessionStore, SqliteStorage, TenantStore};
use bichat_core::tenancy::{OwnerId, TenantId};
use bichat_core::StorageError;

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

/// Create a file-backed storage with a real connection pool
async fn create_file_storage() -> (SqliteStorage, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig {
        path: dir.path().join("bichat.db"),
        max_connections: 5,
        busy_timeout_ms: 5000,
    };
    let storage = SqliteStorage::new(&config)
        .await
        .expect("Failed to create file storage");
    (storage, dir)
}

async fn create_session(storage: &SqliteStorage, tenant: TenantId) -> Session {
    let session = Session::new(tenant, OwnerId(1)).with_title("Quarterly revenue");
    storage.create_session(&session).await.unwrap();
    session
}

fn question_message(session_id: &str) -> Message {
    let question = QuestionDocument::new("analyst")
        .with_question(Question::new("q1", "Which region?").with_options(["EMEA", "APAC"]));
    Message::new(
        session_id,
        AssistantMessage::new("I need one detail").with_question(question),
    )
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_get_session() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let loaded = storage.get_session(tenant, &session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.title, "Quarterly revenue");
        assert_eq!(loaded.owner_id, OwnerId(1));
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_get_session_hidden_from_other_tenant() {
        let storage = create_test_storage().await;
        let session = create_session(&storage, TenantId::random()).await;

        let other = storage
            .get_session(TenantId::random(), &session.id)
            .await
            .unwrap();
        assert!(other.is_none(), "Other tenants must not see the session");
    }

    #[tokio::test]
    async fn test_create_session_with_parent_in_other_tenant_fails() {
        let storage = create_test_storage().await;
        let parent = create_session(&storage, TenantId::random()).await;

        let child = Session::new(TenantId::random(), OwnerId(1)).with_parent(&parent.id);
        let err = storage.create_session(&child).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_sessions_pinned_first_and_archived_hidden() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();

        let older = create_session(&storage, tenant).await;
        let newer = create_session(&storage, tenant).await;
        let archived = create_session(&storage, tenant).await;
        storage.set_session_pinned(tenant, &older.id, true).await.unwrap();
        storage.archive_session(tenant, &archived.id).await.unwrap();

        let listed = storage
            .list_sessions(tenant, OwnerId(1), &ListOptions::default())
            .await
            .unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![older.id.as_str(), newer.id.as_str()]);

        let all = storage
            .list_sessions(
                tenant,
                OwnerId(1),
                &ListOptions {
                    include_archived: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_sessions_filters_owner() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        create_session(&storage, tenant).await;
        storage
            .create_session(&Session::new(tenant, OwnerId(2)))
            .await
            .unwrap();

        let listed = storage
            .list_sessions(tenant, OwnerId(2), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner_id, OwnerId(2));
    }

    #[tokio::test]
    async fn test_rename_and_unarchive() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let renamed = storage
            .rename_session(tenant, &session.id, "  Churn deep dive ")
            .await
            .unwrap();
        assert_eq!(renamed.title, "Churn deep dive");

        let archived = storage.archive_session(tenant, &session.id).await.unwrap();
        assert!(archived.is_archived());
        let active = storage.unarchive_session(tenant, &session.id).await.unwrap();
        assert_eq!(active.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_rename_rejects_blank_title() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let err = storage
            .rename_session(tenant, &session.id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_set_last_response_id() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        storage
            .set_last_response_id(tenant, &session.id, "resp_123")
            .await
            .unwrap();
        let loaded = storage.get_session(tenant, &session.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_response_id.as_deref(), Some("resp_123"));

        let err = storage
            .set_last_response_id(tenant, "missing", "resp_1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_archive_missing_session_is_not_found() {
        let storage = create_test_storage().await;
        let err = storage
            .archive_session(TenantId::random(), "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

#[cfg(test)]
mod message_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_append_and_list_messages_in_order() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        for text in ["first", "second", "third"] {
            storage
                .append_message(tenant, &Message::new(&session.id, MessageBody::user(text)))
                .await
                .unwrap();
        }

        let replay = storage
            .list_messages(tenant, &session.id, &MessageQuery::replay())
            .await
            .unwrap();
        let contents: Vec<&str> = replay.iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);

        let page = storage
            .list_messages(tenant, &session.id, &MessageQuery::display(2))
            .await
            .unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn test_append_round_trips_tool_message() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let message = Message::new(&session.id, MessageBody::tool("call-9", "12 rows"));
        storage.append_message(tenant, &message).await.unwrap();

        let loaded = storage.get_message(tenant, &message.id).await.unwrap().unwrap();
        assert_eq!(loaded.role(), Role::Tool);
        assert_eq!(loaded.body, message.body);
        assert_eq!(loaded.session_id, session.id);
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_conflict() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let message = Message::new(&session.id, MessageBody::user("hello"));
        storage.append_message(tenant, &message).await.unwrap();

        match storage.append_message(tenant, &message).await {
            Err(StorageError::Conflict { message: text }) => {
                assert!(text.contains(&message.id));
                assert!(text.contains("already exists"));
                assert!(!text.contains("pending question"));
            }
            other => panic!("expected a conflict, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_append_to_missing_session_is_not_found() {
        let storage = create_test_storage().await;
        let message = Message::new("missing", MessageBody::user("hi"));

        let err = storage
            .append_message(TenantId::random(), &message)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_append_to_archived_session_is_invalid_state() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;
        storage.archive_session(tenant, &session.id).await.unwrap();

        let err = storage
            .append_message(tenant, &Message::new(&session.id, MessageBody::user("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_append_to_other_tenant_session_is_not_found() {
        let storage = create_test_storage().await;
        let session = create_session(&storage, TenantId::random()).await;

        let err = storage
            .append_message(
                TenantId::random(),
                &Message::new(&session.id, MessageBody::user("hi")),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_second_pending_question_conflicts() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        storage
            .append_message(tenant, &question_message(&session.id))
            .await
            .unwrap();
        let err = storage
            .append_message(tenant, &question_message(&session.id))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_resolve_question_allows_next_question() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let asked = question_message(&session.id);
        storage.append_message(tenant, &asked).await.unwrap();

        let pending = storage.pending_question(tenant, &session.id).await.unwrap();
        assert_eq!(pending.map(|m| m.id), Some(asked.id.clone()));

        let mut answers = BTreeMap::new();
        answers.insert("q1".to_string(), "EMEA".to_string());
        let resolved = storage
            .resolve_question(tenant, &asked.id, &QuestionResolution::Answered(answers))
            .await
            .unwrap();
        assert_eq!(resolved.body.question_status(), Some(QuestionStatus::Answered));
        assert_eq!(
            resolved.body.question().unwrap().answers.get("q1").map(String::as_str),
            Some("EMEA")
        );

        assert!(storage
            .pending_question(tenant, &session.id)
            .await
            .unwrap()
            .is_none());
        storage
            .append_message(tenant, &question_message(&session.id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_twice_is_invalid_state() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;
        let asked = question_message(&session.id);
        storage.append_message(tenant, &asked).await.unwrap();

        storage
            .resolve_question(tenant, &asked.id, &QuestionResolution::Cancelled)
            .await
            .unwrap();
        let err = storage
            .resolve_question(tenant, &asked.id, &QuestionResolution::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_resolve_with_unknown_question_id_is_validation() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;
        let asked = question_message(&session.id);
        storage.append_message(tenant, &asked).await.unwrap();

        let mut answers = BTreeMap::new();
        answers.insert("nope".to_string(), "x".to_string());
        let err = storage
            .resolve_question(tenant, &asked.id, &QuestionResolution::Answered(answers))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));

        let still = storage.pending_question(tenant, &session.id).await.unwrap();
        assert!(still.is_some(), "A rejected answer leaves the question pending");
    }

    #[tokio::test]
    async fn test_set_pending_question_on_plain_assistant_message() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let plain = Message::new(&session.id, MessageBody::assistant("Let me check"));
        storage.append_message(tenant, &plain).await.unwrap();

        let question =
            QuestionDocument::new("analyst").with_question(Question::new("q1", "Which year?"));
        let updated = storage
            .set_pending_question(tenant, &plain.id, &question)
            .await
            .unwrap();
        assert_eq!(updated.body.question_status(), Some(QuestionStatus::Pending));

        let err = storage
            .set_pending_question(tenant, &plain.id, &question)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_set_pending_question_on_user_message_is_invalid_state() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;
        let user = Message::new(&session.id, MessageBody::user("hi"));
        storage.append_message(tenant, &user).await.unwrap();

        let question = QuestionDocument::new("analyst").with_question(Question::new("q1", "?"));
        let err = storage
            .set_pending_question(tenant, &user.id, &question)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_pending_questions_admit_one() {
        let (storage, _dir) = create_file_storage().await;
        let tenant = TenantId::random();
        let session = create_session(&storage, tenant).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            let session_id = session.id.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .append_message(tenant, &question_message(&session_id))
                    .await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);

        let all = storage
            .list_messages(tenant, &session.id, &MessageQuery::replay())
            .await
            .unwrap();
        let pending = all
            .iter()
            .filter(|m| m.body.question_status() == Some(QuestionStatus::Pending))
            .count();
        assert_eq!(pending, 1);
    }
}

#[cfg(test)]
mod fork_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fork_copies_messages_and_cancels_pending_question() {
        let storage = create_test_storage().await;
        let tenant = TenantId::random();
        let source = create_session(&storage, tenant).await;
        storage
            .set_last_response_id(tenant, &source.id, "resp_1")
            .await
            .unwrap();

        storage
            .append_message(tenant, &Message::new(&source.id, MessageBody::user("Revenue?")))
            .await
            .unwrap();
        storage
            .append_message(tenant, &question_message(&source.id))
            .await
            .unwrap();

        let child = storage
            .fork_session(tenant, &source.id, OwnerId(9))
            .await
            .unwrap();
        assert_eq!(child.parent_session_id.as_deref(), Some(source.id.as_str()));
        assert_eq!(child.owner_id, OwnerId(9));
        assert_eq!(child.title, "Quarterly revenue (fork)");
        assert!(child.last_response_id.is_none());

        let copied = storage
            .list_messages(tenant, &child.id, &MessageQuery::replay())
            .await
            .unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(copied[0].content(), "Revenue?");
        assert_eq!(
            copied[1].body.question_status(),
            Some(QuestionStatus::Cancelled)
        );

        // The source keeps its pending question.
        assert!(storage
            .pending_question(tenant, &source.id)
            .await
            .unwrap()
            .is_some());

        let children = storage.list_child_sessions(tenant, &source.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[tokio::test]
    async fn test_fork_missing_session_is_not_found() {
        let storage = create_test_storage().await;
        let err = storage
            .fork_session(TenantId::random(), "missing", OwnerId(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

#[cfg(test)]
mod tenant_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_purge_tenant_removes_only_that_tenant() {
        let storage = create_test_storage().await;
        let doomed = TenantId::random();
        let kept = TenantId::random();

        let a = create_session(&storage, doomed).await;
        storage
            .append_message(doomed, &Message::new(&a.id, MessageBody::user("bye")))
            .await
            .unwrap();
        let b = create_session(&storage, kept).await;

        let removed = storage.purge_tenant(doomed).await.unwrap();
        assert_eq!(removed, 2);

        assert!(storage.get_session(doomed, &a.id).await.unwrap().is_none());
        assert!(storage.get_session(kept, &b.id).await.unwrap().is_some());
    }
}
