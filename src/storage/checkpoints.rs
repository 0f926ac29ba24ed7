use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::sqlite::{decode_json, decode_tenant, encode_json, format_timestamp, parse_timestamp};
use super::{CheckpointStore, SqliteStorage};
use crate::domain::Checkpoint;
use crate::error::{is_unique_violation, is_unique_violation_on, StorageError, StorageResult};
use crate::tenancy::{OwnerId, TenantId};

const CHECKPOINT_COLUMNS: &str = "id, tenant_id, owner_id, thread_id, agent_name, messages, \
     pending_tools, interrupt_type, interrupt_payload, session_id, previous_response_id, \
     created_at, expires_at";

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn insert_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let tenant_id = checkpoint.tenant_id.to_string();

        let cleared = sqlx::query(
            "DELETE FROM checkpoints WHERE tenant_id = ? AND thread_id = ? AND expires_at <= ?",
        )
        .bind(&tenant_id)
        .bind(&checkpoint.thread_id)
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?
        .rows_affected();
        if cleared > 0 {
            debug!(thread_id = %checkpoint.thread_id, "Cleared expired checkpoint before suspend");
        }

        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (id, tenant_id, owner_id, thread_id, agent_name, messages,
                                     pending_tools, interrupt_type, interrupt_payload, session_id,
                                     previous_response_id, created_at, expires_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
            WHERE ?10 IS NULL
               OR EXISTS (
                   SELECT 1 FROM sessions
                   WHERE id = ?10 AND tenant_id = ?2 AND status = 'active'
               )
            "#,
        )
        .bind(&checkpoint.id)
        .bind(&tenant_id)
        .bind(checkpoint.owner_id.0)
        .bind(&checkpoint.thread_id)
        .bind(&checkpoint.agent_name)
        .bind(encode_json(&checkpoint.messages)?)
        .bind(encode_json(&checkpoint.pending_tools)?)
        .bind(&checkpoint.interrupt_type)
        .bind(encode_json(&checkpoint.interrupt_payload)?)
        .bind(&checkpoint.session_id)
        .bind(&checkpoint.previous_response_id)
        .bind(format_timestamp(checkpoint.created_at))
        .bind(format_timestamp(checkpoint.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation_on(&e, "checkpoints.id") {
                StorageError::Conflict {
                    message: format!("checkpoint {} already exists", checkpoint.id),
                }
            } else if is_unique_violation(&e) {
                StorageError::AlreadySuspended {
                    thread_id: checkpoint.thread_id.clone(),
                }
            } else {
                StorageError::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            let session = checkpoint.session_id.clone().unwrap_or_default();
            return Err(StorageError::not_found("Session", session));
        }

        Ok(())
    }

    async fn take_checkpoint(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(&format!(
            "DELETE FROM checkpoints WHERE id = ? AND tenant_id = ? RETURNING {}",
            CHECKPOINT_COLUMNS
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn take_thread_checkpoint(
        &self,
        tenant: TenantId,
        thread_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(&format!(
            "DELETE FROM checkpoints WHERE tenant_id = ? AND thread_id = ? RETURNING {}",
            CHECKPOINT_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn get_checkpoint(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkpoints WHERE id = ? AND tenant_id = ?",
            CHECKPOINT_COLUMNS
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn thread_checkpoint(
        &self,
        tenant: TenantId,
        thread_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkpoints WHERE tenant_id = ? AND thread_id = ?",
            CHECKPOINT_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn list_session_checkpoints(
        &self,
        tenant: TenantId,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkpoints \
             WHERE tenant_id = ? AND session_id = ? AND expires_at > ? \
             ORDER BY created_at, id",
            CHECKPOINT_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(session_id)
        .bind(format_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Checkpoint::try_from).collect()
    }

    async fn delete_expired_checkpoints(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE expires_at <= ?")
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    tenant_id: String,
    owner_id: i64,
    thread_id: String,
    agent_name: String,
    messages: String,
    pending_tools: String,
    interrupt_type: String,
    interrupt_payload: String,
    session_id: Option<String>,
    previous_response_id: Option<String>,
    created_at: String,
    expires_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = StorageError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: decode_tenant(&row.tenant_id)?,
            owner_id: OwnerId(row.owner_id),
            thread_id: row.thread_id,
            agent_name: row.agent_name,
            messages: decode_json(&row.messages)?,
            pending_tools: decode_json(&row.pending_tools)?,
            interrupt_type: row.interrupt_type,
            interrupt_payload: decode_json(&row.interrupt_payload)?,
            session_id: row.session_id,
            previous_response_id: row.previous_response_id,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
        })
    }
}
