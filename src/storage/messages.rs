use async_trait::async_trait;
use sqlx::{Executor, Sqlite};
use tracing::debug;

use super::sqlite::{
    decode_enum, decode_json, decode_optional_json, encode_json, format_timestamp, parse_timestamp,
};
use super::{MessageStore, SessionStore, SqliteStorage};
use crate::domain::{
    AssistantMessage, Message, MessageBody, MessageOrder, MessageQuery, QuestionDocument,
    QuestionResolution, QuestionStatus, Role, SystemMessage, ToolMessage, UserMessage,
};
use crate::error::{is_unique_violation, is_unique_violation_on, StorageError, StorageResult};
use crate::tenancy::TenantId;

pub(super) const MESSAGE_COLUMNS: &str = "id, session_id, role, content, tool_calls, \
     tool_call_id, citations, debug_trace, question, created_at";

/// Insert a message into an active session of the tenant.
///
/// Returns the number of rows written: zero when the session is missing,
/// belongs to another tenant or is archived.
pub(super) async fn insert_message<'e, E>(
    executor: E,
    tenant: TenantId,
    message: &Message,
) -> StorageResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (tool_calls, tool_call_id, citations, debug_trace, question) = match &message.body {
        MessageBody::Assistant(m) => (
            (!m.tool_calls.is_empty())
                .then(|| encode_json(&m.tool_calls))
                .transpose()?,
            None,
            (!m.citations.is_empty())
                .then(|| encode_json(&m.citations))
                .transpose()?,
            m.debug_trace.as_ref().map(encode_json).transpose()?,
            m.question.as_ref().map(encode_json).transpose()?,
        ),
        MessageBody::Tool(m) => (None, Some(m.tool_call_id.clone()), None, None, None),
        MessageBody::User(_) | MessageBody::System(_) => (None, None, None, None, None),
    };
    let question_status = message.body.question_status().map(|s| s.to_string());
    let asks_pending = message.body.question_status() == Some(QuestionStatus::Pending);

    let result = sqlx::query(
        r#"
        INSERT INTO messages (id, tenant_id, session_id, role, content, tool_calls, tool_call_id,
                              citations, debug_trace, question, question_status, created_at)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
        FROM sessions
        WHERE id = ?3 AND tenant_id = ?2 AND status = 'active'
        "#,
    )
    .bind(&message.id)
    .bind(tenant.to_string())
    .bind(&message.session_id)
    .bind(message.role().to_string())
    .bind(message.content())
    .bind(tool_calls)
    .bind(tool_call_id)
    .bind(citations)
    .bind(debug_trace)
    .bind(question)
    .bind(question_status)
    .bind(format_timestamp(message.created_at))
    .execute(executor)
    .await
    .map_err(|e| {
        if is_unique_violation_on(&e, "messages.id") {
            StorageError::Conflict {
                message: format!("message {} already exists", message.id),
            }
        } else if asks_pending && is_unique_violation(&e) {
            StorageError::Conflict {
                message: format!(
                    "session {} already has a pending question",
                    message.session_id
                ),
            }
        } else {
            StorageError::from(e)
        }
    })?;

    Ok(result.rows_affected())
}

#[async_trait]
impl MessageStore for SqliteStorage {
    async fn append_message(&self, tenant: TenantId, message: &Message) -> StorageResult<()> {
        let inserted = insert_message(&self.pool, tenant, message).await?;

        if inserted == 0 {
            return match self.get_session(tenant, &message.session_id).await? {
                None => Err(StorageError::not_found("Session", &message.session_id)),
                Some(_) => Err(StorageError::InvalidState {
                    message: format!("session {} is archived", message.session_id),
                }),
            };
        }

        debug!(
            message_id = %message.id,
            session_id = %message.session_id,
            role = %message.role(),
            "Appended message"
        );
        Ok(())
    }

    async fn get_message(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE id = ? AND tenant_id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose()
    }

    async fn list_messages(
        &self,
        tenant: TenantId,
        session_id: &str,
        query: &MessageQuery,
    ) -> StorageResult<Vec<Message>> {
        let order = match query.order {
            MessageOrder::OldestFirst => "created_at ASC, rowid ASC",
            MessageOrder::NewestFirst => "created_at DESC, rowid DESC",
        };
        // SQLite treats a negative LIMIT as no limit.
        let limit = query.limit.map_or(-1, i64::from);

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE tenant_id = ? AND session_id = ? \
             ORDER BY {} LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS, order
        ))
        .bind(tenant.to_string())
        .bind(session_id)
        .bind(limit)
        .bind(i64::from(query.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn pending_question(
        &self,
        tenant: TenantId,
        session_id: &str,
    ) -> StorageResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages \
             WHERE tenant_id = ? AND session_id = ? AND question_status = 'pending'",
            MESSAGE_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose()
    }

    async fn set_pending_question(
        &self,
        tenant: TenantId,
        message_id: &str,
        question: &QuestionDocument,
    ) -> StorageResult<Message> {
        if !question.is_pending() {
            return Err(StorageError::validation("question", "must be pending"));
        }
        if question.questions.is_empty() {
            return Err(StorageError::validation("question", "must ask at least one question"));
        }

        let mut message = self
            .get_message(tenant, message_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Message", message_id))?;

        let MessageBody::Assistant(assistant) = &mut message.body else {
            return Err(StorageError::InvalidState {
                message: format!("only assistant messages can ask questions ({})", message_id),
            });
        };
        if assistant.question.is_some() {
            return Err(StorageError::InvalidState {
                message: format!("message {} already carries a question", message_id),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE messages SET question = ?, question_status = 'pending'
            WHERE id = ? AND tenant_id = ? AND question IS NULL
            "#,
        )
        .bind(encode_json(question)?)
        .bind(message_id)
        .bind(tenant.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict {
                    message: format!(
                        "session {} already has a pending question",
                        message.session_id
                    ),
                }
            } else {
                StorageError::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::InvalidState {
                message: format!("message {} already carries a question", message_id),
            });
        }

        assistant.question = Some(question.clone());
        Ok(message)
    }

    async fn resolve_question(
        &self,
        tenant: TenantId,
        message_id: &str,
        resolution: &QuestionResolution,
    ) -> StorageResult<Message> {
        let mut message = self
            .get_message(tenant, message_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Message", message_id))?;

        let MessageBody::Assistant(AssistantMessage {
            question: Some(document),
            ..
        }) = &mut message.body
        else {
            return Err(StorageError::InvalidState {
                message: format!("message {} has no question", message_id),
            });
        };

        document.resolve(resolution)?;

        let result = sqlx::query(
            r#"
            UPDATE messages SET question = ?, question_status = ?
            WHERE id = ? AND tenant_id = ? AND question_status = 'pending'
            "#,
        )
        .bind(encode_json(&*document)?)
        .bind(document.status.to_string())
        .bind(message_id)
        .bind(tenant.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::InvalidState {
                message: format!("question on message {} is no longer pending", message_id),
            });
        }

        debug!(message_id = %message_id, status = %document.status, "Resolved question");
        Ok(message)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
pub(super) struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    citations: Option<String>,
    debug_trace: Option<String>,
    question: Option<String>,
    created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let content = row.content;
        let body = match decode_enum::<Role>("role", &row.role)? {
            Role::User => MessageBody::User(UserMessage { content }),
            Role::System => MessageBody::System(SystemMessage { content }),
            Role::Tool => MessageBody::Tool(ToolMessage {
                content,
                tool_call_id: row.tool_call_id.unwrap_or_default(),
            }),
            Role::Assistant => MessageBody::Assistant(AssistantMessage {
                content,
                tool_calls: decode_optional_json(row.tool_calls)?.unwrap_or_default(),
                citations: decode_optional_json(row.citations)?.unwrap_or_default(),
                debug_trace: row.debug_trace.as_deref().map(decode_json).transpose()?,
                question: decode_optional_json(row.question)?,
            }),
        };

        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            body,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}
