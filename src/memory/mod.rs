//! Query memory: lessons learned from failed SQL and validated queries that
//! answered a question, recalled by ranked full-text search.

use tracing::{debug, info};

use crate::config::MemoryConfig;
use crate::domain::{
    Learning, LearningSearch, NewLearning, NewValidatedQuery, QuerySearch, ValidatedQuery,
};
use crate::error::StorageResult;
use crate::storage::MemoryStore;
use crate::tenancy::TenantId;

/// Records and recalls tenant-scoped query memory.
#[derive(Clone)]
pub struct QueryMemory<S> {
    store: S,
    search_limit: u32,
}

impl<S: MemoryStore> QueryMemory<S> {
    /// Create a memory service using the configured search limit.
    pub fn new(store: S, config: &MemoryConfig) -> Self {
        Self {
            store,
            search_limit: config.search_limit.max(1),
        }
    }

    /// Limit applied to searches that do not set one.
    pub fn search_limit(&self) -> u32 {
        self.search_limit
    }

    /// Record a learning. Recording the same lesson again bumps its usage.
    pub async fn record_learning(
        &self,
        tenant: TenantId,
        learning: &NewLearning,
    ) -> StorageResult<Learning> {
        let recorded = self.store.record_learning(tenant, learning).await?;
        info!(
            learning_id = %recorded.id,
            category = %recorded.category,
            used_count = recorded.used_count,
            "Learning recorded"
        );
        Ok(recorded)
    }

    /// Record a validated query. Recording the same SQL again bumps its usage.
    pub async fn record_query(
        &self,
        tenant: TenantId,
        query: &NewValidatedQuery,
    ) -> StorageResult<ValidatedQuery> {
        let recorded = self.store.record_validated_query(tenant, query).await?;
        info!(
            query_id = %recorded.id,
            tables = ?recorded.tables_used,
            used_count = recorded.used_count,
            "Validated query recorded"
        );
        Ok(recorded)
    }

    /// Ranked learning lookup.
    pub async fn search_learnings(
        &self,
        tenant: TenantId,
        search: LearningSearch,
    ) -> StorageResult<Vec<Learning>> {
        let search = LearningSearch {
            limit: Some(search.limit.unwrap_or(self.search_limit)),
            ..search
        };
        let found = self.store.search_learnings(tenant, &search).await?;
        debug!(query = %search.query, results = found.len(), "Learnings searched");
        Ok(found)
    }

    /// Ranked validated-query lookup.
    pub async fn search_queries(
        &self,
        tenant: TenantId,
        search: QuerySearch,
    ) -> StorageResult<Vec<ValidatedQuery>> {
        let search = QuerySearch {
            limit: Some(search.limit.unwrap_or(self.search_limit)),
            ..search
        };
        let found = self.store.search_validated_queries(tenant, &search).await?;
        debug!(query = %search.query, results = found.len(), "Validated queries searched");
        Ok(found)
    }

    /// Learnings scoped to a table, most used first.
    ///
    /// Returns at most `limit` entries, or the configured search limit.
    pub async fn learnings_for_table(
        &self,
        tenant: TenantId,
        table_name: &str,
        limit: Option<u32>,
    ) -> StorageResult<Vec<Learning>> {
        let limit = Some(limit.unwrap_or(self.search_limit));
        self.store
            .list_learnings_by_table(tenant, table_name, limit)
            .await
    }

    /// Count one more application of a learning.
    pub async fn learning_applied(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        self.store.increment_learning_usage(tenant, id).await
    }

    /// Count one more reuse of a validated query.
    pub async fn query_reused(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        self.store.increment_query_usage(tenant, id).await
    }

    /// Forget a learning.
    pub async fn forget_learning(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        self.store.delete_learning(tenant, id).await?;
        info!(learning_id = id, "Learning deleted");
        Ok(())
    }

    /// Forget a validated query.
    pub async fn forget_query(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        self.store.delete_validated_query(tenant, id).await?;
        info!(query_id = id, "Validated query deleted");
        Ok(())
    }
}
