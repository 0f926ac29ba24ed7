use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::sqlite::{
    decode_enum, decode_json, decode_tenant, encode_json, format_timestamp, parse_timestamp,
};
use super::{ArtifactStore, SessionStore, SqliteStorage};
use crate::domain::{
    Artifact, ArtifactProviderFile, ArtifactQuery, ArtifactStatus, ArtifactType,
};
use crate::error::{StorageError, StorageResult};
use crate::tenancy::TenantId;

const ARTIFACT_COLUMNS: &str = "id, tenant_id, session_id, message_id, upload_id, \
     artifact_type, name, description, mime_type, url, size_bytes, metadata, status, \
     idempotency_key, created_at, updated_at";

#[async_trait]
impl ArtifactStore for SqliteStorage {
    async fn create_artifact(&self, artifact: &Artifact) -> StorageResult<Artifact> {
        artifact.validate()?;
        let tenant_id = artifact.tenant_id.to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO artifacts (id, tenant_id, session_id, message_id, upload_id,
                                   artifact_type, name, description, mime_type, url, size_bytes,
                                   metadata, status, idempotency_key, created_at, updated_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16
            FROM sessions
            WHERE id = ?3 AND tenant_id = ?2
            ON CONFLICT (tenant_id, session_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(&artifact.id)
        .bind(&tenant_id)
        .bind(&artifact.session_id)
        .bind(&artifact.message_id)
        .bind(&artifact.upload_id)
        .bind(artifact.artifact_type.to_string())
        .bind(&artifact.name)
        .bind(&artifact.description)
        .bind(&artifact.mime_type)
        .bind(&artifact.url)
        .bind(artifact.size_bytes)
        .bind(encode_json(&artifact.metadata)?)
        .bind(artifact.status.to_string())
        .bind(&artifact.idempotency_key)
        .bind(format_timestamp(artifact.created_at))
        .bind(format_timestamp(artifact.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(artifact_id = %artifact.id, session_id = %artifact.session_id, "Created artifact");
            return Ok(artifact.clone());
        }

        // Nothing written: either the key was already used or the session is absent.
        if let Some(key) = &artifact.idempotency_key {
            let row: Option<ArtifactRow> = sqlx::query_as(&format!(
                "SELECT {} FROM artifacts \
                 WHERE tenant_id = ? AND session_id = ? AND idempotency_key = ?",
                ARTIFACT_COLUMNS
            ))
            .bind(&tenant_id)
            .bind(&artifact.session_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                debug!(idempotency_key = %key, "Reused artifact for idempotency key");
                return Artifact::try_from(row);
            }
        }

        match self.get_session(artifact.tenant_id, &artifact.session_id).await? {
            None => Err(StorageError::not_found("Session", &artifact.session_id)),
            Some(_) => Err(StorageError::Conflict {
                message: format!("artifact {} was not created", artifact.id),
            }),
        }
    }

    async fn get_artifact(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(&format!(
            "SELECT {} FROM artifacts WHERE id = ? AND tenant_id = ?",
            ARTIFACT_COLUMNS
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Artifact::try_from).transpose()
    }

    async fn list_session_artifacts(
        &self,
        tenant: TenantId,
        session_id: &str,
        query: &ArtifactQuery,
    ) -> StorageResult<Vec<Artifact>> {
        let type_filter = if query.types.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; query.types.len()].join(", ");
            format!("AND artifact_type IN ({})", placeholders)
        };

        let sql = format!(
            "SELECT {} FROM artifacts \
             WHERE tenant_id = ? AND session_id = ? AND status <> 'deleted' {} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            ARTIFACT_COLUMNS, type_filter
        );

        let mut q = sqlx::query_as::<_, ArtifactRow>(&sql)
            .bind(tenant.to_string())
            .bind(session_id);
        for artifact_type in &query.types {
            q = q.bind(artifact_type.to_string());
        }
        let rows = q
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Artifact::try_from).collect()
    }

    async fn update_artifact(
        &self,
        tenant: TenantId,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> StorageResult<Artifact> {
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(StorageError::validation("name", "must not be empty"));
            }
        }

        let row: Option<ArtifactRow> = sqlx::query_as(&format!(
            r#"
            UPDATE artifacts
            SET name = COALESCE(?, name),
                description = COALESCE(?, description),
                updated_at = ?
            WHERE id = ? AND tenant_id = ? AND status <> 'deleted'
            RETURNING {}
            "#,
            ARTIFACT_COLUMNS
        ))
        .bind(name)
        .bind(description)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Artifact::try_from)
            .transpose()?
            .ok_or_else(|| StorageError::not_found("Artifact", id))
    }

    async fn mark_available(
        &self,
        tenant: TenantId,
        id: &str,
        url: &str,
        size_bytes: i64,
    ) -> StorageResult<Artifact> {
        if size_bytes < 0 {
            return Err(StorageError::validation("size_bytes", "must not be negative"));
        }

        let row: Option<ArtifactRow> = sqlx::query_as(&format!(
            r#"
            UPDATE artifacts
            SET status = 'available', url = ?, size_bytes = ?, updated_at = ?
            WHERE id = ? AND tenant_id = ? AND status = 'pending_upload'
            RETURNING {}
            "#,
            ARTIFACT_COLUMNS
        ))
        .bind(url)
        .bind(size_bytes)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        self.transition_result(tenant, id, row, ArtifactStatus::Available)
            .await
    }

    async fn mark_failed(&self, tenant: TenantId, id: &str) -> StorageResult<Artifact> {
        let row: Option<ArtifactRow> = sqlx::query_as(&format!(
            r#"
            UPDATE artifacts SET status = 'failed', updated_at = ?
            WHERE id = ? AND tenant_id = ? AND status = 'pending_upload'
            RETURNING {}
            "#,
            ARTIFACT_COLUMNS
        ))
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        self.transition_result(tenant, id, row, ArtifactStatus::Failed)
            .await
    }

    async fn delete_artifact(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE artifacts SET status = 'deleted', updated_at = ? \
             WHERE id = ? AND tenant_id = ? AND status <> 'deleted'",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .bind(tenant.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Artifact", id));
        }
        Ok(())
    }

    async fn delete_session_artifacts(
        &self,
        tenant: TenantId,
        session_id: &str,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE artifacts SET status = 'deleted', updated_at = ? \
             WHERE tenant_id = ? AND session_id = ? AND status <> 'deleted'",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(tenant.to_string())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        info!(session_id = %session_id, count = result.rows_affected(), "Deleted session artifacts");
        Ok(result.rows_affected())
    }

    async fn sync_provider_file(&self, file: &ArtifactProviderFile) -> StorageResult<()> {
        if file.provider.trim().is_empty() {
            return Err(StorageError::validation("provider", "must not be empty"));
        }
        if file.provider_file_id.trim().is_empty() {
            return Err(StorageError::validation("provider_file_id", "must not be empty"));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO artifact_provider_files (tenant_id, artifact_id, provider, provider_file_id,
                                                 source_url, source_size_bytes, synced_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
            FROM artifacts
            WHERE id = ?2 AND tenant_id = ?1
            ON CONFLICT (tenant_id, artifact_id, provider) DO UPDATE SET
                provider_file_id = excluded.provider_file_id,
                source_url = excluded.source_url,
                source_size_bytes = excluded.source_size_bytes,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(file.tenant_id.to_string())
        .bind(&file.artifact_id)
        .bind(&file.provider)
        .bind(&file.provider_file_id)
        .bind(&file.source_url)
        .bind(file.source_size_bytes)
        .bind(format_timestamp(file.synced_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Artifact", &file.artifact_id));
        }
        Ok(())
    }

    async fn provider_file(
        &self,
        tenant: TenantId,
        artifact_id: &str,
        provider: &str,
    ) -> StorageResult<Option<ArtifactProviderFile>> {
        let row: Option<ProviderFileRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, artifact_id, provider, provider_file_id, source_url,
                   source_size_bytes, synced_at
            FROM artifact_provider_files
            WHERE tenant_id = ? AND artifact_id = ? AND provider = ?
            "#,
        )
        .bind(tenant.to_string())
        .bind(artifact_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ArtifactProviderFile::try_from).transpose()
    }
}

impl SqliteStorage {
    /// Map a conditional status update to the artifact or the reason it did
    /// not apply.
    async fn transition_result(
        &self,
        tenant: TenantId,
        id: &str,
        row: Option<ArtifactRow>,
        target: ArtifactStatus,
    ) -> StorageResult<Artifact> {
        if let Some(row) = row {
            debug!(artifact_id = %id, status = %target, "Artifact status changed");
            return Artifact::try_from(row);
        }

        match self.get_artifact(tenant, id).await? {
            None => Err(StorageError::not_found("Artifact", id)),
            Some(current) => Err(StorageError::InvalidState {
                message: format!(
                    "artifact {} cannot move from {} to {}",
                    id, current.status, target
                ),
            }),
        }
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    tenant_id: String,
    session_id: String,
    message_id: Option<String>,
    upload_id: Option<String>,
    artifact_type: String,
    name: String,
    description: Option<String>,
    mime_type: Option<String>,
    url: Option<String>,
    size_bytes: i64,
    metadata: String,
    status: String,
    idempotency_key: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = StorageError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: decode_tenant(&row.tenant_id)?,
            session_id: row.session_id,
            message_id: row.message_id,
            upload_id: row.upload_id,
            artifact_type: decode_enum::<ArtifactType>("artifact_type", &row.artifact_type)?,
            name: row.name,
            description: row.description,
            mime_type: row.mime_type,
            url: row.url,
            size_bytes: row.size_bytes,
            metadata: decode_json(&row.metadata)?,
            status: decode_enum::<ArtifactStatus>("status", &row.status)?,
            idempotency_key: row.idempotency_key,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProviderFileRow {
    tenant_id: String,
    artifact_id: String,
    provider: String,
    provider_file_id: String,
    source_url: String,
    source_size_bytes: i64,
    synced_at: String,
}

impl TryFrom<ProviderFileRow> for ArtifactProviderFile {
    type Error = StorageError;

    fn try_from(row: ProviderFileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: decode_tenant(&row.tenant_id)?,
            artifact_id: row.artifact_id,
            provider: row.provider,
            provider_file_id: row.provider_file_id,
            source_url: row.source_url,
            source_size_bytes: row.source_size_bytes,
            synced_at: parse_timestamp(&row.synced_at)?,
        })
    }
}
