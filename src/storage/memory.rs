use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::sqlite::{
    decode_enum, decode_json, decode_tenant, encode_json, format_timestamp, fts_query,
    like_pattern, parse_timestamp,
};
use super::{MemoryStore, SqliteStorage, DEFAULT_SEARCH_LIMIT};
use crate::domain::{
    Learning, LearningCategory, LearningSearch, NewLearning, NewValidatedQuery, QuerySearch,
    ValidatedQuery,
};
use crate::error::{StorageError, StorageResult};
use crate::tenancy::TenantId;

const LEARNING_FIELDS: &[&str] = &[
    "id",
    "tenant_id",
    "category",
    "trigger_text",
    "lesson",
    "table_name",
    "sql_patch",
    "content_hash",
    "used_count",
    "created_at",
    "updated_at",
];

const QUERY_FIELDS: &[&str] = &[
    "id",
    "tenant_id",
    "question",
    "sql_text",
    "summary",
    "tables_used",
    "data_quality_notes",
    "sql_hash",
    "used_count",
    "created_at",
    "updated_at",
];

/// Upper bound on any search, whatever the caller asks for.
const MAX_SEARCH_LIMIT: u32 = 100;

/// Queries this short are matched as substrings instead of full-text terms.
const SHORT_QUERY_CHARS: usize = 3;

fn columns(fields: &[&str], alias: &str) -> String {
    fields
        .iter()
        .map(|f| format!("{}.{}", alias, f))
        .collect::<Vec<_>>()
        .join(", ")
}

fn effective_limit(limit: Option<u32>) -> i64 {
    i64::from(limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT))
}

/// How the free text of a search is matched.
enum TextMatch {
    /// No text: order by usage.
    Any,
    /// Substring match on a `LIKE` pattern.
    Like(String),
    /// FTS5 `MATCH` expression, ranked by bm25.
    FullText(String),
}

impl TextMatch {
    fn from_query(query: &str) -> Self {
        let query = query.trim();
        if query.is_empty() {
            return TextMatch::Any;
        }
        if query.chars().count() <= SHORT_QUERY_CHARS {
            return TextMatch::Like(like_pattern(query));
        }
        match fts_query(query) {
            Some(expr) => TextMatch::FullText(expr),
            None => TextMatch::Like(like_pattern(query)),
        }
    }
}

#[async_trait]
impl MemoryStore for SqliteStorage {
    async fn record_learning(
        &self,
        tenant: TenantId,
        learning: &NewLearning,
    ) -> StorageResult<Learning> {
        learning.validate()?;
        let now = format_timestamp(Utc::now());

        let row: LearningRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO learnings (id, tenant_id, category, trigger_text, lesson, table_name,
                                   sql_patch, content_hash, used_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)
            ON CONFLICT (tenant_id, content_hash) DO UPDATE SET
                lesson = excluded.lesson,
                sql_patch = COALESCE(excluded.sql_patch, learnings.sql_patch),
                used_count = learnings.used_count + 1,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            LEARNING_FIELDS.join(", ")
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(tenant.to_string())
        .bind(learning.category.to_string())
        .bind(learning.trigger.trim())
        .bind(learning.lesson.trim())
        .bind(&learning.table_name)
        .bind(&learning.sql_patch)
        .bind(learning.content_hash())
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        let learning = Learning::try_from(row)?;
        debug!(
            learning_id = %learning.id,
            used_count = learning.used_count,
            "Recorded learning"
        );
        Ok(learning)
    }

    async fn get_learning(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Learning>> {
        let row: Option<LearningRow> = sqlx::query_as(&format!(
            "SELECT {} FROM learnings l WHERE l.id = ? AND l.tenant_id = ?",
            columns(LEARNING_FIELDS, "l")
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Learning::try_from).transpose()
    }

    async fn search_learnings(
        &self,
        tenant: TenantId,
        search: &LearningSearch,
    ) -> StorageResult<Vec<Learning>> {
        let text = TextMatch::from_query(&search.query);
        let mut binds: Vec<String> = Vec::new();

        let (from, mut clauses, order) = match &text {
            TextMatch::FullText(expr) => {
                binds.push(expr.clone());
                (
                    "learnings_fts JOIN learnings l ON l.seq = learnings_fts.rowid",
                    vec!["learnings_fts MATCH ?".to_string()],
                    "bm25(learnings_fts), l.used_count DESC, l.created_at DESC",
                )
            }
            TextMatch::Like(pattern) => {
                binds.push(pattern.clone());
                binds.push(pattern.clone());
                (
                    "learnings l",
                    vec![
                        "(l.trigger_text LIKE ? ESCAPE '\\' OR l.lesson LIKE ? ESCAPE '\\')"
                            .to_string(),
                    ],
                    "l.used_count DESC, l.created_at DESC",
                )
            }
            TextMatch::Any => ("learnings l", Vec::new(), "l.used_count DESC, l.created_at DESC"),
        };

        clauses.push("l.tenant_id = ?".to_string());
        binds.push(tenant.to_string());
        if let Some(category) = search.category {
            clauses.push("l.category = ?".to_string());
            binds.push(category.to_string());
        }
        if let Some(table) = &search.table_name {
            clauses.push("l.table_name = ? COLLATE NOCASE".to_string());
            binds.push(table.clone());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT ?",
            columns(LEARNING_FIELDS, "l"),
            from,
            clauses.join(" AND "),
            order
        );

        let mut query = sqlx::query_as::<_, LearningRow>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query
            .bind(effective_limit(search.limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Learning::try_from).collect()
    }

    async fn list_learnings_by_table(
        &self,
        tenant: TenantId,
        table_name: &str,
        limit: Option<u32>,
    ) -> StorageResult<Vec<Learning>> {
        let rows: Vec<LearningRow> = sqlx::query_as(&format!(
            "SELECT {} FROM learnings l \
             WHERE l.tenant_id = ? AND l.table_name = ? COLLATE NOCASE \
             ORDER BY l.used_count DESC, l.created_at DESC \
             LIMIT ?",
            columns(LEARNING_FIELDS, "l")
        ))
        .bind(tenant.to_string())
        .bind(table_name)
        .bind(effective_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Learning::try_from).collect()
    }

    async fn increment_learning_usage(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE learnings SET used_count = used_count + 1, updated_at = ? \
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .bind(tenant.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Learning", id));
        }
        Ok(())
    }

    async fn delete_learning(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM learnings WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Learning", id));
        }
        Ok(())
    }

    async fn record_validated_query(
        &self,
        tenant: TenantId,
        query: &NewValidatedQuery,
    ) -> StorageResult<ValidatedQuery> {
        query.validate()?;
        let now = format_timestamp(Utc::now());

        let row: QueryRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO validated_queries (id, tenant_id, question, sql_text, summary, tables_used,
                                           data_quality_notes, sql_hash, used_count, created_at,
                                           updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)
            ON CONFLICT (tenant_id, sql_hash) DO UPDATE SET
                question = excluded.question,
                summary = excluded.summary,
                tables_used = excluded.tables_used,
                data_quality_notes = excluded.data_quality_notes,
                used_count = validated_queries.used_count + 1,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            QUERY_FIELDS.join(", ")
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(tenant.to_string())
        .bind(query.question.trim())
        .bind(query.sql.trim())
        .bind(query.summary.trim())
        .bind(encode_json(&query.tables_used)?)
        .bind(encode_json(&query.data_quality_notes)?)
        .bind(query.sql_hash())
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        let saved = ValidatedQuery::try_from(row)?;
        debug!(
            query_id = %saved.id,
            used_count = saved.used_count,
            "Recorded validated query"
        );
        Ok(saved)
    }

    async fn get_validated_query(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> StorageResult<Option<ValidatedQuery>> {
        let row: Option<QueryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM validated_queries v WHERE v.id = ? AND v.tenant_id = ?",
            columns(QUERY_FIELDS, "v")
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ValidatedQuery::try_from).transpose()
    }

    async fn search_validated_queries(
        &self,
        tenant: TenantId,
        search: &QuerySearch,
    ) -> StorageResult<Vec<ValidatedQuery>> {
        let text = TextMatch::from_query(&search.query);
        let mut binds: Vec<String> = Vec::new();

        let (from, mut clauses, order) = match &text {
            TextMatch::FullText(expr) => {
                binds.push(expr.clone());
                (
                    "validated_queries_fts JOIN validated_queries v \
                     ON v.seq = validated_queries_fts.rowid",
                    vec!["validated_queries_fts MATCH ?".to_string()],
                    "bm25(validated_queries_fts), v.used_count DESC, v.created_at DESC",
                )
            }
            TextMatch::Like(pattern) => {
                binds.push(pattern.clone());
                binds.push(pattern.clone());
                (
                    "validated_queries v",
                    vec!["(v.question LIKE ? ESCAPE '\\' OR v.summary LIKE ? ESCAPE '\\')"
                        .to_string()],
                    "v.used_count DESC, v.created_at DESC",
                )
            }
            TextMatch::Any => (
                "validated_queries v",
                Vec::new(),
                "v.used_count DESC, v.created_at DESC",
            ),
        };

        clauses.push("v.tenant_id = ?".to_string());
        binds.push(tenant.to_string());

        let tables: Vec<String> = search
            .tables
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if !tables.is_empty() {
            let placeholders = vec!["?"; tables.len()].join(", ");
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(v.tables_used) WHERE lower(json_each.value) IN ({}))",
                placeholders
            ));
            binds.extend(tables);
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT ?",
            columns(QUERY_FIELDS, "v"),
            from,
            clauses.join(" AND "),
            order
        );

        let mut query = sqlx::query_as::<_, QueryRow>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query
            .bind(effective_limit(search.limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ValidatedQuery::try_from).collect()
    }

    async fn increment_query_usage(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE validated_queries SET used_count = used_count + 1, updated_at = ? \
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .bind(tenant.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("ValidatedQuery", id));
        }
        Ok(())
    }

    async fn delete_validated_query(&self, tenant: TenantId, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM validated_queries WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("ValidatedQuery", id));
        }
        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct LearningRow {
    id: String,
    tenant_id: String,
    category: String,
    trigger_text: String,
    lesson: String,
    table_name: Option<String>,
    sql_patch: Option<String>,
    content_hash: String,
    used_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<LearningRow> for Learning {
    type Error = StorageError;

    fn try_from(row: LearningRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: decode_tenant(&row.tenant_id)?,
            category: decode_enum::<LearningCategory>("category", &row.category)?,
            trigger: row.trigger_text,
            lesson: row.lesson,
            table_name: row.table_name,
            sql_patch: row.sql_patch,
            content_hash: row.content_hash,
            used_count: row.used_count,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QueryRow {
    id: String,
    tenant_id: String,
    question: String,
    sql_text: String,
    summary: String,
    tables_used: String,
    data_quality_notes: String,
    sql_hash: String,
    used_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<QueryRow> for ValidatedQuery {
    type Error = StorageError;

    fn try_from(row: QueryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: decode_tenant(&row.tenant_id)?,
            question: row.question,
            sql: row.sql_text,
            summary: row.summary,
            tables_used: decode_json(&row.tables_used)?,
            data_quality_notes: decode_json(&row.data_quality_notes)?,
            sql_hash: row.sql_hash,
            used_count: row.used_count,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}
