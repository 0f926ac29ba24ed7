//! Query memory types: learnings distilled from failed SQL and validated SQL
//! patterns that answered a question.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};
use crate::tenancy::TenantId;

/// What kind of lesson a learning records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    /// SQL failed to execute.
    SqlError,
    /// A column was compared or cast with the wrong type.
    TypeMismatch,
    /// The user corrected the agent.
    UserCorrection,
    /// Domain rule the agent must follow.
    BusinessRule,
}

impl std::fmt::Display for LearningCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LearningCategory::SqlError => write!(f, "sql_error"),
            LearningCategory::TypeMismatch => write!(f, "type_mismatch"),
            LearningCategory::UserCorrection => write!(f, "user_correction"),
            LearningCategory::BusinessRule => write!(f, "business_rule"),
        }
    }
}

impl std::str::FromStr for LearningCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql_error" => Ok(LearningCategory::SqlError),
            "type_mismatch" => Ok(LearningCategory::TypeMismatch),
            "user_correction" => Ok(LearningCategory::UserCorrection),
            "business_rule" => Ok(LearningCategory::BusinessRule),
            _ => Err(format!("Unknown learning category: {}", s)),
        }
    }
}

/// A stored lesson.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    /// Unique learning identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Lesson category.
    pub category: LearningCategory,
    /// What triggered the lesson (error text, user phrase, ...).
    pub trigger: String,
    /// The lesson itself.
    pub lesson: String,
    /// Table the lesson applies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Corrected SQL fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_patch: Option<String>,
    /// Dedup key; see [`learning_hash`].
    pub content_hash: String,
    /// How many times the lesson was recorded or applied.
    pub used_count: i64,
    /// When first recorded.
    pub created_at: DateTime<Utc>,
    /// When last recorded or applied.
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a learning.
#[derive(Debug, Clone)]
pub struct NewLearning {
    /// Lesson category.
    pub category: LearningCategory,
    /// What triggered the lesson.
    pub trigger: String,
    /// The lesson.
    pub lesson: String,
    /// Table the lesson applies to.
    pub table_name: Option<String>,
    /// Corrected SQL fragment.
    pub sql_patch: Option<String>,
}

impl NewLearning {
    /// Create a learning
    pub fn new(
        category: LearningCategory,
        trigger: impl Into<String>,
        lesson: impl Into<String>,
    ) -> Self {
        Self {
            category,
            trigger: trigger.into(),
            lesson: lesson.into(),
            table_name: None,
            sql_patch: None,
        }
    }

    /// Scope to a table
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    /// Attach a corrected SQL fragment
    pub fn with_sql_patch(mut self, patch: impl Into<String>) -> Self {
        self.sql_patch = Some(patch.into());
        self
    }

    /// Reject blank trigger or lesson.
    pub fn validate(&self) -> StorageResult<()> {
        if self.trigger.trim().is_empty() {
            return Err(StorageError::validation("trigger", "must not be empty"));
        }
        if self.lesson.trim().is_empty() {
            return Err(StorageError::validation("lesson", "must not be empty"));
        }
        Ok(())
    }

    /// Dedup key of this learning.
    pub fn content_hash(&self) -> String {
        learning_hash(self.category, &self.trigger, self.table_name.as_deref())
    }
}

/// Search options for learnings.
#[derive(Debug, Clone, Default)]
pub struct LearningSearch {
    /// Free-text query; empty lists by usage.
    pub query: String,
    /// Restrict to a category.
    pub category: Option<LearningCategory>,
    /// Restrict to a table.
    pub table_name: Option<String>,
    /// Maximum results; the configured default when `None`.
    pub limit: Option<u32>,
}

impl LearningSearch {
    /// Search by text
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Restrict to a category
    pub fn in_category(mut self, category: LearningCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Restrict to a table
    pub fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A SQL query proven to answer a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedQuery {
    /// Unique identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Natural-language question it answered.
    pub question: String,
    /// The SQL.
    pub sql: String,
    /// What the query returns.
    pub summary: String,
    /// Tables the query reads.
    pub tables_used: Vec<String>,
    /// Known data-quality caveats.
    pub data_quality_notes: Vec<String>,
    /// Dedup key; see [`sql_hash`].
    pub sql_hash: String,
    /// How many times the query was recorded or reused.
    pub used_count: i64,
    /// When first recorded.
    pub created_at: DateTime<Utc>,
    /// When last recorded or reused.
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a validated query.
#[derive(Debug, Clone)]
pub struct NewValidatedQuery {
    /// Question it answered.
    pub question: String,
    /// The SQL.
    pub sql: String,
    /// What the query returns.
    pub summary: String,
    /// Tables the query reads.
    pub tables_used: Vec<String>,
    /// Known data-quality caveats.
    pub data_quality_notes: Vec<String>,
}

impl NewValidatedQuery {
    /// Create a validated query
    pub fn new(
        question: impl Into<String>,
        sql: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            sql: sql.into(),
            summary: summary.into(),
            tables_used: Vec::new(),
            data_quality_notes: Vec::new(),
        }
    }

    /// Set the tables read
    pub fn with_tables<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tables_used = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Add a data-quality caveat
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.data_quality_notes.push(note.into());
        self
    }

    /// Only read-only `SELECT`/`WITH` statements are stored.
    pub fn validate(&self) -> StorageResult<()> {
        if self.question.trim().is_empty() {
            return Err(StorageError::validation("question", "must not be empty"));
        }
        if !is_read_only_sql(&self.sql) {
            return Err(StorageError::validation(
                "sql",
                "only SELECT and WITH queries can be saved",
            ));
        }
        Ok(())
    }

    /// Dedup key of this query.
    pub fn sql_hash(&self) -> String {
        sql_hash(&self.sql)
    }
}

/// Search options for validated queries.
#[derive(Debug, Clone, Default)]
pub struct QuerySearch {
    /// Free-text query over question and summary; empty lists by usage.
    pub query: String,
    /// Keep queries reading at least one of these tables.
    pub tables: Vec<String>,
    /// Maximum results; the configured default when `None`.
    pub limit: Option<u32>,
}

impl QuerySearch {
    /// Search by text
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Keep queries touching any of these tables
    pub fn touching<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the normalized (category, trigger, table) triple.
///
/// Case and runs of whitespace do not change the hash.
pub fn learning_hash(category: LearningCategory, trigger: &str, table: Option<&str>) -> String {
    let key = format!(
        "{}\u{1f}{}\u{1f}{}",
        category,
        normalize(trigger),
        normalize(table.unwrap_or(""))
    );
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// SHA-256 of the SQL with whitespace collapsed and a trailing `;` removed.
///
/// Case is preserved: string literals are significant.
pub fn sql_hash(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(';').trim_end();
    format!("{:x}", Sha256::digest(trimmed.as_bytes()))
}

fn is_read_only_sql(sql: &str) -> bool {
    let head = sql.trim_start().trim_start_matches('(').trim_start();
    let keyword: String = head
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase();
    keyword == "SELECT" || keyword == "WITH"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_hash_normalizes() {
        let a = learning_hash(LearningCategory::SqlError, "column  X does not exist", Some("Orders"));
        let b = learning_hash(LearningCategory::SqlError, "Column x does not exist ", Some("orders"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_learning_hash_distinguishes_category_and_table() {
        let base = learning_hash(LearningCategory::SqlError, "t", Some("a"));
        assert_ne!(base, learning_hash(LearningCategory::TypeMismatch, "t", Some("a")));
        assert_ne!(base, learning_hash(LearningCategory::SqlError, "t", Some("b")));
        assert_ne!(base, learning_hash(LearningCategory::SqlError, "t", None));
    }

    #[test]
    fn test_sql_hash_ignores_layout() {
        let a = sql_hash("SELECT id\n  FROM orders;");
        let b = sql_hash("SELECT id FROM orders");
        assert_eq!(a, b);
        assert_ne!(a, sql_hash("select id from orders"));
    }

    #[test]
    fn test_read_only_sql() {
        assert!(is_read_only_sql("  select 1"));
        assert!(is_read_only_sql("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(is_read_only_sql("(SELECT 1)"));
        assert!(!is_read_only_sql("DELETE FROM orders"));
        assert!(!is_read_only_sql("SELECTED"));
        assert!(!is_read_only_sql(""));
    }

    #[test]
    fn test_validated_query_validation() {
        let err = NewValidatedQuery::new("q", "UPDATE t SET x = 1", "s")
            .validate()
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
        assert!(NewValidatedQuery::new("q", "SELECT 1", "s").validate().is_ok());
    }

    #[test]
    fn test_learning_validation() {
        assert!(NewLearning::new(LearningCategory::BusinessRule, " ", "x")
            .validate()
            .is_err());
        assert!(NewLearning::new(LearningCategory::BusinessRule, "t", "x")
            .validate()
            .is_ok());
    }
}
