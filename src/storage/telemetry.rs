use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::sqlite::{
    decode_enum, decode_json, decode_tenant, encode_json, format_timestamp, parse_optional_timestamp,
    parse_timestamp,
};
use super::{SqliteStorage, TraceStore};
use crate::domain::{
    Generation, NewTrace, Span, Trace, TraceClose, TraceEvent, TraceStatus, TraceTree,
};
use crate::error::{StorageError, StorageResult};
use crate::tenancy::TenantId;

const TRACE_COLUMNS: &str = "id, tenant_id, session_id, message_id, external_trace_id, \
     trace_url, status, generation_ms, thinking, observation_reason, metadata, created_at, \
     updated_at";

const GENERATION_COLUMNS: &str = "trace_id, external_id, request_id, model, provider, \
     finish_reason, prompt_tokens, completion_tokens, total_tokens, cached_tokens, cost, \
     latency_ms, input_text, output_text, thinking, observation_reason, metadata, started_at, \
     completed_at, created_at";

const SPAN_COLUMNS: &str = "trace_id, external_id, parent_external_id, generation_external_id, \
     name, kind, status, level, call_id, tool_name, input_text, output_text, error_text, \
     duration_ms, attributes, started_at, completed_at, created_at";

const EVENT_COLUMNS: &str = "trace_id, external_id, name, kind, level, message, reason, \
     span_external_id, generation_external_id, attributes, occurred_at";

fn require_external_id(field: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn require_object(field: &str, value: &serde_json::Value) -> StorageResult<String> {
    match value {
        serde_json::Value::Null => Ok("{}".to_string()),
        serde_json::Value::Object(_) => encode_json(value),
        _ => Err(StorageError::validation(field, "must be a JSON object")),
    }
}

#[async_trait]
impl TraceStore for SqliteStorage {
    async fn open_trace(&self, trace: &NewTrace) -> StorageResult<Trace> {
        require_external_id("external_trace_id", &trace.external_trace_id)?;
        let metadata = require_object("metadata", &trace.metadata)?;
        let now = format_timestamp(Utc::now());
        let tenant_id = trace.tenant_id.to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO traces (id, tenant_id, session_id, message_id, external_trace_id,
                                trace_url, status, metadata, created_at, updated_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'running', ?7, ?8, ?8
            FROM sessions
            WHERE id = ?3 AND tenant_id = ?2
            ON CONFLICT (tenant_id, external_trace_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&tenant_id)
        .bind(&trace.session_id)
        .bind(&trace.message_id)
        .bind(&trace.external_trace_id)
        .bind(&trace.trace_url)
        .bind(metadata)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(external_trace_id = %trace.external_trace_id, "Opened trace");
        }

        self.trace_by_external_id(trace.tenant_id, &trace.external_trace_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Session", &trace.session_id))
    }

    async fn close_trace(
        &self,
        tenant: TenantId,
        trace_id: &str,
        close: &TraceClose,
    ) -> StorageResult<Trace> {
        let row: Option<TraceRow> = sqlx::query_as(&format!(
            r#"
            UPDATE traces
            SET status = ?,
                generation_ms = COALESCE(?, generation_ms),
                message_id = COALESCE(NULLIF(?, ''), message_id),
                thinking = COALESCE(NULLIF(?, ''), thinking),
                observation_reason = COALESCE(NULLIF(?, ''), observation_reason),
                updated_at = ?
            WHERE id = ? AND tenant_id = ?
            RETURNING {}
            "#,
            TRACE_COLUMNS
        ))
        .bind(close.status.to_string())
        .bind(close.generation_ms)
        .bind(&close.message_id)
        .bind(&close.thinking)
        .bind(&close.observation_reason)
        .bind(format_timestamp(Utc::now()))
        .bind(trace_id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trace::try_from)
            .transpose()?
            .ok_or_else(|| StorageError::not_found("Trace", trace_id))
    }

    async fn link_trace_message(
        &self,
        tenant: TenantId,
        trace_id: &str,
        message_id: &str,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE traces SET message_id = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(message_id)
        .bind(format_timestamp(Utc::now()))
        .bind(trace_id)
        .bind(tenant.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Trace", trace_id));
        }
        Ok(())
    }

    async fn get_trace(&self, tenant: TenantId, id: &str) -> StorageResult<Option<Trace>> {
        let row: Option<TraceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM traces WHERE id = ? AND tenant_id = ?",
            TRACE_COLUMNS
        ))
        .bind(id)
        .bind(tenant.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trace::try_from).transpose()
    }

    async fn trace_by_external_id(
        &self,
        tenant: TenantId,
        external_trace_id: &str,
    ) -> StorageResult<Option<Trace>> {
        let row: Option<TraceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM traces WHERE tenant_id = ? AND external_trace_id = ?",
            TRACE_COLUMNS
        ))
        .bind(tenant.to_string())
        .bind(external_trace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trace::try_from).transpose()
    }

    async fn record_generation(
        &self,
        tenant: TenantId,
        generation: &Generation,
    ) -> StorageResult<()> {
        require_external_id("external_id", &generation.external_id)?;
        let metadata = require_object("metadata", &generation.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO generations (tenant_id, trace_id, external_id, request_id, model, provider,
                                     finish_reason, prompt_tokens, completion_tokens, total_tokens,
                                     cached_tokens, cost, latency_ms, input_text, output_text,
                                     thinking, observation_reason, metadata, started_at,
                                     completed_at, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                   ?18, ?19, ?20, ?21
            FROM traces
            WHERE id = ?2 AND tenant_id = ?1
            ON CONFLICT (tenant_id, trace_id, external_id) DO UPDATE SET
                request_id = COALESCE(NULLIF(excluded.request_id, ''), generations.request_id),
                model = COALESCE(NULLIF(excluded.model, ''), generations.model),
                provider = COALESCE(NULLIF(excluded.provider, ''), generations.provider),
                finish_reason = COALESCE(NULLIF(excluded.finish_reason, ''), generations.finish_reason),
                prompt_tokens = COALESCE(NULLIF(excluded.prompt_tokens, 0), generations.prompt_tokens),
                completion_tokens = COALESCE(NULLIF(excluded.completion_tokens, 0), generations.completion_tokens),
                total_tokens = COALESCE(NULLIF(excluded.total_tokens, 0), generations.total_tokens),
                cached_tokens = COALESCE(NULLIF(excluded.cached_tokens, 0), generations.cached_tokens),
                cost = COALESCE(NULLIF(excluded.cost, 0), generations.cost),
                latency_ms = COALESCE(NULLIF(excluded.latency_ms, 0), generations.latency_ms),
                input_text = COALESCE(NULLIF(excluded.input_text, ''), generations.input_text),
                output_text = COALESCE(NULLIF(excluded.output_text, ''), generations.output_text),
                thinking = COALESCE(NULLIF(excluded.thinking, ''), generations.thinking),
                observation_reason = COALESCE(NULLIF(excluded.observation_reason, ''), generations.observation_reason),
                metadata = json_patch(generations.metadata, excluded.metadata),
                started_at = COALESCE(excluded.started_at, generations.started_at),
                completed_at = COALESCE(excluded.completed_at, generations.completed_at)
            "#,
        )
        .bind(tenant.to_string())
        .bind(&generation.trace_id)
        .bind(&generation.external_id)
        .bind(&generation.request_id)
        .bind(&generation.model)
        .bind(&generation.provider)
        .bind(&generation.finish_reason)
        .bind(generation.prompt_tokens)
        .bind(generation.completion_tokens)
        .bind(generation.total_tokens)
        .bind(generation.cached_tokens)
        .bind(generation.cost)
        .bind(generation.latency_ms)
        .bind(&generation.input)
        .bind(&generation.output)
        .bind(&generation.thinking)
        .bind(&generation.observation_reason)
        .bind(metadata)
        .bind(generation.started_at.map(format_timestamp))
        .bind(generation.completed_at.map(format_timestamp))
        .bind(format_timestamp(generation.created_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Trace", &generation.trace_id));
        }
        Ok(())
    }

    async fn record_span(&self, tenant: TenantId, span: &Span) -> StorageResult<()> {
        require_external_id("external_id", &span.external_id)?;
        let attributes = require_object("attributes", &span.attributes)?;

        let result = sqlx::query(
            r#"
            INSERT INTO spans (tenant_id, trace_id, external_id, parent_external_id,
                               generation_external_id, name, kind, status, level, call_id,
                               tool_name, input_text, output_text, error_text, duration_ms,
                               attributes, started_at, completed_at, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                   ?18, ?19
            FROM traces
            WHERE id = ?2 AND tenant_id = ?1
            ON CONFLICT (tenant_id, trace_id, external_id) DO UPDATE SET
                parent_external_id = COALESCE(NULLIF(excluded.parent_external_id, ''), spans.parent_external_id),
                generation_external_id = COALESCE(NULLIF(excluded.generation_external_id, ''), spans.generation_external_id),
                name = COALESCE(NULLIF(excluded.name, ''), spans.name),
                kind = COALESCE(NULLIF(excluded.kind, ''), spans.kind),
                status = COALESCE(NULLIF(excluded.status, ''), spans.status),
                level = COALESCE(NULLIF(excluded.level, ''), spans.level),
                call_id = COALESCE(NULLIF(excluded.call_id, ''), spans.call_id),
                tool_name = COALESCE(NULLIF(excluded.tool_name, ''), spans.tool_name),
                input_text = COALESCE(NULLIF(excluded.input_text, ''), spans.input_text),
                output_text = COALESCE(NULLIF(excluded.output_text, ''), spans.output_text),
                error_text = COALESCE(NULLIF(excluded.error_text, ''), spans.error_text),
                duration_ms = COALESCE(NULLIF(excluded.duration_ms, 0), spans.duration_ms),
                attributes = json_patch(spans.attributes, excluded.attributes),
                started_at = COALESCE(excluded.started_at, spans.started_at),
                completed_at = COALESCE(excluded.completed_at, spans.completed_at)
            "#,
        )
        .bind(tenant.to_string())
        .bind(&span.trace_id)
        .bind(&span.external_id)
        .bind(&span.parent_external_id)
        .bind(&span.generation_external_id)
        .bind(&span.name)
        .bind(&span.kind)
        .bind(&span.status)
        .bind(&span.level)
        .bind(&span.call_id)
        .bind(&span.tool_name)
        .bind(&span.input)
        .bind(&span.output)
        .bind(&span.error)
        .bind(span.duration_ms)
        .bind(attributes)
        .bind(span.started_at.map(format_timestamp))
        .bind(span.completed_at.map(format_timestamp))
        .bind(format_timestamp(span.created_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Trace", &span.trace_id));
        }
        Ok(())
    }

    async fn record_event(&self, tenant: TenantId, event: &TraceEvent) -> StorageResult<()> {
        require_external_id("external_id", &event.external_id)?;
        let attributes = require_object("attributes", &event.attributes)?;

        let result = sqlx::query(
            r#"
            INSERT INTO trace_events (tenant_id, trace_id, external_id, name, kind, level, message,
                                      reason, span_external_id, generation_external_id,
                                      attributes, occurred_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
            FROM traces
            WHERE id = ?2 AND tenant_id = ?1
            ON CONFLICT (tenant_id, trace_id, external_id) DO UPDATE SET
                name = COALESCE(NULLIF(excluded.name, ''), trace_events.name),
                kind = COALESCE(NULLIF(excluded.kind, ''), trace_events.kind),
                level = COALESCE(NULLIF(excluded.level, ''), trace_events.level),
                message = COALESCE(NULLIF(excluded.message, ''), trace_events.message),
                reason = COALESCE(NULLIF(excluded.reason, ''), trace_events.reason),
                span_external_id = COALESCE(NULLIF(excluded.span_external_id, ''), trace_events.span_external_id),
                generation_external_id = COALESCE(NULLIF(excluded.generation_external_id, ''), trace_events.generation_external_id),
                attributes = json_patch(trace_events.attributes, excluded.attributes),
                occurred_at = excluded.occurred_at
            "#,
        )
        .bind(tenant.to_string())
        .bind(&event.trace_id)
        .bind(&event.external_id)
        .bind(&event.name)
        .bind(&event.kind)
        .bind(&event.level)
        .bind(&event.message)
        .bind(&event.reason)
        .bind(&event.span_external_id)
        .bind(&event.generation_external_id)
        .bind(attributes)
        .bind(format_timestamp(event.occurred_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Trace", &event.trace_id));
        }
        Ok(())
    }

    async fn trace_tree(
        &self,
        tenant: TenantId,
        trace_id: &str,
    ) -> StorageResult<Option<TraceTree>> {
        let Some(trace) = self.get_trace(tenant, trace_id).await? else {
            return Ok(None);
        };
        let tenant_id = tenant.to_string();

        let generations: Vec<GenerationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM generations WHERE tenant_id = ? AND trace_id = ? \
             ORDER BY COALESCE(started_at, created_at), external_id",
            GENERATION_COLUMNS
        ))
        .bind(&tenant_id)
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;

        let spans: Vec<SpanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM spans WHERE tenant_id = ? AND trace_id = ? \
             ORDER BY COALESCE(started_at, created_at), external_id",
            SPAN_COLUMNS
        ))
        .bind(&tenant_id)
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;

        let events: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM trace_events WHERE tenant_id = ? AND trace_id = ? \
             ORDER BY occurred_at, external_id",
            EVENT_COLUMNS
        ))
        .bind(&tenant_id)
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(TraceTree {
            trace,
            generations: generations
                .into_iter()
                .map(Generation::try_from)
                .collect::<StorageResult<_>>()?,
            spans: spans
                .into_iter()
                .map(Span::try_from)
                .collect::<StorageResult<_>>()?,
            events: events
                .into_iter()
                .map(TraceEvent::try_from)
                .collect::<StorageResult<_>>()?,
        }))
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct TraceRow {
    id: String,
    tenant_id: String,
    session_id: String,
    message_id: Option<String>,
    external_trace_id: String,
    trace_url: Option<String>,
    status: String,
    generation_ms: Option<i64>,
    thinking: Option<String>,
    observation_reason: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TraceRow> for Trace {
    type Error = StorageError;

    fn try_from(row: TraceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: decode_tenant(&row.tenant_id)?,
            session_id: row.session_id,
            message_id: row.message_id,
            external_trace_id: row.external_trace_id,
            trace_url: row.trace_url,
            status: decode_enum::<TraceStatus>("status", &row.status)?,
            generation_ms: row.generation_ms,
            thinking: row.thinking,
            observation_reason: row.observation_reason,
            metadata: decode_json(&row.metadata)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GenerationRow {
    trace_id: String,
    external_id: String,
    request_id: Option<String>,
    model: Option<String>,
    provider: Option<String>,
    finish_reason: Option<String>,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    cached_tokens: i64,
    cost: f64,
    latency_ms: i64,
    input_text: Option<String>,
    output_text: Option<String>,
    thinking: Option<String>,
    observation_reason: Option<String>,
    metadata: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

impl TryFrom<GenerationRow> for Generation {
    type Error = StorageError;

    fn try_from(row: GenerationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            trace_id: row.trace_id,
            external_id: row.external_id,
            request_id: row.request_id,
            model: row.model,
            provider: row.provider,
            finish_reason: row.finish_reason,
            prompt_tokens: row.prompt_tokens,
            completion_tokens: row.completion_tokens,
            total_tokens: row.total_tokens,
            cached_tokens: row.cached_tokens,
            cost: row.cost,
            latency_ms: row.latency_ms,
            input: row.input_text,
            output: row.output_text,
            thinking: row.thinking,
            observation_reason: row.observation_reason,
            metadata: decode_json(&row.metadata)?,
            started_at: parse_optional_timestamp(row.started_at)?,
            completed_at: parse_optional_timestamp(row.completed_at)?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SpanRow {
    trace_id: String,
    external_id: String,
    parent_external_id: Option<String>,
    generation_external_id: Option<String>,
    name: String,
    kind: String,
    status: String,
    level: Option<String>,
    call_id: Option<String>,
    tool_name: Option<String>,
    input_text: Option<String>,
    output_text: Option<String>,
    error_text: Option<String>,
    duration_ms: i64,
    attributes: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

impl TryFrom<SpanRow> for Span {
    type Error = StorageError;

    fn try_from(row: SpanRow) -> Result<Self, Self::Error> {
        Ok(Self {
            trace_id: row.trace_id,
            external_id: row.external_id,
            parent_external_id: row.parent_external_id,
            generation_external_id: row.generation_external_id,
            name: row.name,
            kind: row.kind,
            status: row.status,
            level: row.level,
            call_id: row.call_id,
            tool_name: row.tool_name,
            input: row.input_text,
            output: row.output_text,
            error: row.error_text,
            duration_ms: row.duration_ms,
            attributes: decode_json(&row.attributes)?,
            started_at: parse_optional_timestamp(row.started_at)?,
            completed_at: parse_optional_timestamp(row.completed_at)?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    trace_id: String,
    external_id: String,
    name: String,
    kind: String,
    level: Option<String>,
    message: Option<String>,
    reason: Option<String>,
    span_external_id: Option<String>,
    generation_external_id: Option<String>,
    attributes: String,
    occurred_at: String,
}

impl TryFrom<EventRow> for TraceEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            trace_id: row.trace_id,
            external_id: row.external_id,
            name: row.name,
            kind: row.kind,
            level: row.level,
            message: row.message,
            reason: row.reason,
            span_external_id: row.span_external_id,
            generation_external_id: row.generation_external_id,
            attributes: decode_json(&row.attributes)?,
            occurred_at: parse_timestamp(&row.occurred_at)?,
        })
    }
}
