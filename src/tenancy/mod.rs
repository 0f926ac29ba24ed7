//! Tenant and owner identifiers.
//!
//! Every row in the store is partitioned by [`TenantId`]. The engine performs
//! no authentication; callers supply the ids and every query is filtered by
//! them, so a row belonging to another tenant is indistinguishable from a
//! missing one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Tenant identifier. Never the nil UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct TenantId(Uuid);

impl TenantId {
    /// Wrap a UUID, rejecting the nil value.
    pub fn new(id: Uuid) -> StorageResult<Self> {
        if id.is_nil() {
            return Err(StorageError::validation("tenant_id", "must not be nil"));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random tenant id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s.trim())
            .map_err(|e| StorageError::validation("tenant_id", e.to_string()))?;
        Self::new(id)
    }
}

impl TryFrom<Uuid> for TenantId {
    type Error = StorageError;

    fn try_from(id: Uuid) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<TenantId> for Uuid {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Owning user id, as issued by the platform's auth subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_tenant_rejected() {
        let err = TenantId::new(Uuid::nil()).unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[test]
    fn test_tenant_parse_roundtrip() {
        let tenant = TenantId::random();
        let parsed: TenantId = tenant.to_string().parse().unwrap();
        assert_eq!(parsed, tenant);
    }

    #[test]
    fn test_tenant_parse_invalid() {
        assert!("not-a-uuid".parse::<TenantId>().is_err());
        assert!("00000000-0000-0000-0000-000000000000"
            .parse::<TenantId>()
            .is_err());
    }

    #[test]
    fn test_tenant_deserialize_rejects_nil() {
        let result: Result<TenantId, _> =
            serde_json::from_str("\"00000000-0000-0000-0000-000000000000\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_owner_display() {
        assert_eq!(OwnerId(42).to_string(), "42");
    }
}
