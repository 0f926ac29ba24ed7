use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::messages::MessageRow;
use super::sqlite::{decode_enum, decode_tenant, format_timestamp, parse_timestamp};
use super::{SessionStore, SqliteStorage};
use crate::domain::{
    ListOptions, Message, MessageBody, QuestionResolution, Session, SessionStatus,
};
use crate::error::{StorageError, StorageResult};
use crate::tenancy::{OwnerId, TenantId};

const SESSION_COLUMNS: &str = "id, tenant_id, owner_id, title, status, pinned, \
     parent_session_id, last_response_id, created_at, updated_at";

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, tenant_id, owner_id, title, status, pinned,
                                  parent_session_id, last_response_id, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE ?7 IS NULL
               OR EXISTS (SELECT 1 FROM sessions WHERE id = ?7 AND tenant_id = ?2)
            "#,
        )
        .bind(&session.id)
        .bind(session.tenant_id.to_string())
        .bind(session.owner_id.0)
        .bind(&session.title)
        .bind(session.status.to_string())
        .bind(session.pinned)
        .bind(&session.parent_session_id)
        .bind(&session.last_response_id)
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(session.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let parent = session.parent_session_id.clone().unwrap_or_default();
            return Err(StorageError::not_found("Session", parent));
        }

        debug!(session_id = %session.id, tenant = %session.tenant_id, "Created session");
        Ok(())
    }

    async fn get_session(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sessions WHERE id = ? AND tenant_id = ?",
            SESSION_COLUMNS
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn list_sessions(
        &self,
        tenant: TenantId,
        owner: OwnerId,
        opts: &ListOptions,
    ) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM sessions
            WHERE tenant_id = ? AND owner_id = ?
              AND (? OR status = 'active')
            ORDER BY pinned DESC, created_at DESC, id
            LIMIT ? OFFSET ?
            "#,
            SESSION_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(owner.0)
        .bind(opts.include_archived)
        .bind(i64::from(opts.limit))
        .bind(i64::from(opts.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn list_child_sessions(
        &self,
        tenant: TenantId,
        parent_id: &str,
    ) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sessions WHERE tenant_id = ? AND parent_session_id = ? \
             ORDER BY created_at, id",
            SESSION_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn archive_session(&self, tenant: TenantId, id: &str) -> StorageResult<Session> {
        let now = format_timestamp(Utc::now());
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE sessions SET status = 'archived', updated_at = ?1
            WHERE id = ?2 AND tenant_id = ?3
              AND NOT EXISTS (
                  SELECT 1 FROM checkpoints
                  WHERE tenant_id = ?3 AND session_id = ?2 AND expires_at > ?1
              )
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(&now)
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                info!(session_id = %id, "Archived session");
                Session::try_from(row)
            }
            None => match self.get_session(tenant, id).await? {
                None => Err(StorageError::not_found("Session", id)),
                Some(_) => Err(StorageError::InvalidState {
                    message: format!("session {} has a live checkpoint", id),
                }),
            },
        }
    }

    async fn unarchive_session(&self, tenant: TenantId, id: &str) -> StorageResult<Session> {
        self.update_returning(
            tenant,
            id,
            "status = 'active'",
            None,
        )
        .await
    }

    async fn set_session_pinned(
        &self,
        tenant: TenantId,
        id: &str,
        pinned: bool,
    ) -> StorageResult<Session> {
        let assignment = if pinned { "pinned = 1" } else { "pinned = 0" };
        self.update_returning(tenant, id, assignment, None).await
    }

    async fn rename_session(
        &self,
        tenant: TenantId,
        id: &str,
        title: &str,
    ) -> StorageResult<Session> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StorageError::validation("title", "must not be empty"));
        }
        self.update_returning(tenant, id, "title = ?4", Some(title)).await
    }

    async fn set_last_response_id(
        &self,
        tenant: TenantId,
        id: &str,
        response_id: &str,
    ) -> StorageResult<()> {
        self.update_returning(tenant, id, "last_response_id = ?4", Some(response_id))
            .await
            .map(|_| ())
    }

    async fn fork_session(
        &self,
        tenant: TenantId,
        source_id: &str,
        owner: OwnerId,
    ) -> StorageResult<Session> {
        let source = self
            .get_session(tenant, source_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Session", source_id))?;

        let title = if source.title.is_empty() {
            String::new()
        } else {
            format!("{} (fork)", source.title)
        };
        let child = Session::new(tenant, owner)
            .with_title(title)
            .with_parent(&source.id);

        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front.
        sqlx::query(
            r#"
            INSERT INTO sessions (id, tenant_id, owner_id, title, status, pinned,
                                  parent_session_id, last_response_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'active', 0, ?, NULL, ?, ?)
            "#,
        )
        .bind(&child.id)
        .bind(tenant.to_string())
        .bind(owner.0)
        .bind(&child.title)
        .bind(&source.id)
        .bind(format_timestamp(child.created_at))
        .bind(format_timestamp(child.updated_at))
        .execute(&mut *tx)
        .await?;

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE tenant_id = ? AND session_id = ? \
             ORDER BY created_at, rowid",
            super::messages::MESSAGE_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(&source.id)
        .fetch_all(&mut *tx)
        .await?;

        let copied = rows.len();
        for row in rows {
            let original = Message::try_from(row)?;
            let mut body = original.body;
            if let MessageBody::Assistant(assistant) = &mut body {
                if let Some(question) = assistant.question.as_mut() {
                    if question.is_pending() {
                        question.resolve(&QuestionResolution::Cancelled)?;
                    }
                }
            }
            let copy = Message {
                id: Uuid::new_v4().to_string(),
                session_id: child.id.clone(),
                body,
                created_at: original.created_at,
            };
            super::messages::insert_message(&mut *tx, tenant, &copy).await?;
        }

        tx.commit().await?;

        info!(
            source_id = %source.id,
            session_id = %child.id,
            messages = copied,
            "Forked session"
        );
        Ok(child)
    }
}

impl SqliteStorage {
    /// Apply `assignment` to a session and return the updated row.
    ///
    /// Placeholders: `?1` now, `?2` id, `?3` tenant, `?4` the optional value.
    async fn update_returning(
        &self,
        tenant: TenantId,
        id: &str,
        assignment: &str,
        value: Option<&str>,
    ) -> StorageResult<Session> {
        let sql = format!(
            "UPDATE sessions SET {}, updated_at = ?1 WHERE id = ?2 AND tenant_id = ?3 RETURNING {}",
            assignment, SESSION_COLUMNS
        );
        let mut query = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(format_timestamp(Utc::now()))
            .bind(id)
            .bind(tenant.to_string());
        if let Some(value) = value {
            query = query.bind(value);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("Session", id))?;
        Session::try_from(row)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    tenant_id: String,
    owner_id: i64,
    title: String,
    status: String,
    pinned: bool,
    parent_session_id: Option<String>,
    last_response_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: decode_tenant(&row.tenant_id)?,
            owner_id: OwnerId(row.owner_id),
            title: row.title,
            status: decode_enum::<SessionStatus>("status", &row.status)?,
            pinned: row.pinned,
            parent_session_id: row.parent_session_id,
            last_response_id: row.last_response_id,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}
