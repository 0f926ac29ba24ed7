use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::tenancy::TenantId;

/// Kind of artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// User-supplied upload. Must reference an upload id.
    Attachment,
    /// Chart specification.
    Chart,
    /// File produced by code execution.
    CodeOutput,
    /// Data export (CSV, XLSX, ...).
    Export,
    /// Any other generated file.
    #[default]
    File,
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactType::Attachment => write!(f, "attachment"),
            ArtifactType::Chart => write!(f, "chart"),
            ArtifactType::CodeOutput => write!(f, "code_output"),
            ArtifactType::Export => write!(f, "export"),
            ArtifactType::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "attachment" => Ok(ArtifactType::Attachment),
            "chart" => Ok(ArtifactType::Chart),
            "code_output" => Ok(ArtifactType::CodeOutput),
            "export" => Ok(ArtifactType::Export),
            "file" => Ok(ArtifactType::File),
            _ => Err(format!("Unknown artifact type: {}", s)),
        }
    }
}

/// Artifact lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Row exists, content not yet stored.
    #[default]
    PendingUpload,
    /// Content is stored and downloadable.
    Available,
    /// Storing the content failed.
    Failed,
    /// Logically deleted.
    Deleted,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactStatus::PendingUpload => write!(f, "pending_upload"),
            ArtifactStatus::Available => write!(f, "available"),
            ArtifactStatus::Failed => write!(f, "failed"),
            ArtifactStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending_upload" => Ok(ArtifactStatus::PendingUpload),
            "available" => Ok(ArtifactStatus::Available),
            "failed" => Ok(ArtifactStatus::Failed),
            "deleted" => Ok(ArtifactStatus::Deleted),
            _ => Err(format!("Unknown artifact status: {}", s)),
        }
    }
}

/// A durable output of a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning session.
    pub session_id: String,
    /// Message that produced the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Underlying upload, required for attachments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    /// Kind of artifact.
    pub artifact_type: ArtifactType,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Location of the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Content size in bytes.
    pub size_bytes: i64,
    /// Free-form metadata object.
    pub metadata: serde_json::Value,
    /// Lifecycle status.
    pub status: ArtifactStatus,
    /// Caller-supplied idempotency key, unique per (tenant, session).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// When the artifact was created.
    pub created_at: DateTime<Utc>,
    /// When the artifact was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    /// Create a new pending artifact in a session
    pub fn new(
        tenant_id: TenantId,
        session_id: impl Into<String>,
        artifact_type: ArtifactType,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            session_id: session_id.into(),
            message_id: None,
            upload_id: None,
            artifact_type,
            name: name.into(),
            description: None,
            mime_type: None,
            url: None,
            size_bytes: 0,
            metadata: serde_json::json!({}),
            status: ArtifactStatus::PendingUpload,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the producing message
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the underlying upload
    pub fn with_upload(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the content location and size
    pub fn with_location(mut self, url: impl Into<String>, size_bytes: i64) -> Self {
        self.url = Some(url.into());
        self.size_bytes = size_bytes.max(0);
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Create directly in the available state
    pub fn as_available(mut self) -> Self {
        self.status = ArtifactStatus::Available;
        self
    }

    /// Check the invariants that do not need the database.
    pub fn validate(&self) -> StorageResult<()> {
        if self.name.trim().is_empty() {
            return Err(StorageError::validation("name", "must not be empty"));
        }
        if self.artifact_type == ArtifactType::Attachment
            && self.upload_id.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(StorageError::validation(
                "upload_id",
                "attachment artifacts must reference an upload",
            ));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(StorageError::validation(
                    "idempotency_key",
                    "must not be blank when present",
                ));
            }
        }
        if !self.metadata.is_object() {
            return Err(StorageError::validation("metadata", "must be a JSON object"));
        }
        Ok(())
    }
}

/// Paging and type filter for artifact listings.
#[derive(Debug, Clone)]
pub struct ArtifactQuery {
    /// Restrict to these types; empty means all.
    pub types: Vec<ArtifactType>,
    /// Maximum number of artifacts.
    pub limit: u32,
    /// Number of artifacts to skip.
    pub offset: u32,
}

impl Default for ArtifactQuery {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            limit: 50,
            offset: 0,
        }
    }
}

/// Mirror record of an artifact uploaded to an external tool runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactProviderFile {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Mirrored artifact.
    pub artifact_id: String,
    /// Tool runtime (e.g. "openai").
    pub provider: String,
    /// File handle inside the provider.
    pub provider_file_id: String,
    /// Source location at upload time.
    pub source_url: String,
    /// Source size at upload time.
    pub source_size_bytes: i64,
    /// When the mirror was last synced.
    pub synced_at: DateTime<Utc>,
}

impl ArtifactProviderFile {
    /// Whether the mirror still matches the artifact's current content.
    pub fn matches(&self, artifact: &Artifact) -> bool {
        artifact.url.as_deref() == Some(self.source_url.as_str())
            && artifact.size_bytes == self.source_size_bytes
    }
}
