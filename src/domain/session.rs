use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenancy::{OwnerId, TenantId};

/// A conversation between one owner and the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Human-readable title.
    pub title: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Whether the session is pinned to the top of listings.
    pub pinned: bool,
    /// Session this one was forked from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// Last upstream LLM response id, used for conversational continuity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_id: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepts new messages.
    #[default]
    Active,
    /// Read-only; no new messages.
    Archived,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "archived" => Ok(SessionStatus::Archived),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

impl Session {
    /// Create a new active session
    pub fn new(tenant_id: TenantId, owner_id: OwnerId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            owner_id,
            title: String::new(),
            status: SessionStatus::Active,
            pinned: false,
            parent_session_id: None,
            last_response_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the parent session
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent_id.into());
        self
    }

    /// Mark as pinned
    pub fn as_pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Whether the session rejects new messages.
    pub fn is_archived(&self) -> bool {
        self.status == SessionStatus::Archived
    }
}

/// Paging and filtering for session listings.
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Maximum number of sessions to return.
    pub limit: u32,
    /// Number of sessions to skip.
    pub offset: u32,
    /// Include archived sessions.
    pub include_archived: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            include_archived: false,
        }
    }
}
