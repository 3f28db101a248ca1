//! Postgres-backed audit store.
//!
//! Tables are created by `migrations/`. A trigger keeps `audit_records`
//! append-only apart from the single review update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use medroute_core::audit::{
    AgentStatistics, AuditFilter, AuditKind, AuditRecord, AuditStore, ReviewInfo, ReviewStatus,
};
use medroute_core::error::AuditError;
use medroute_core::escalation::{EscalationRecord, EscalationStatus};

const AUDIT_COLUMNS: &str = "id, request_id, timestamp, agent_name, kind, user_digest, urgency, \
     pre_confidence, post_confidence, escalation_id, input_digest, output_digest, \
     redacted_fields, detail, review_status, review";

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    request_id: Uuid,
    timestamp: DateTime<Utc>,
    agent_name: String,
    kind: String,
    user_digest: String,
    urgency: String,
    pre_confidence: f64,
    post_confidence: f64,
    escalation_id: Option<String>,
    input_digest: String,
    output_digest: String,
    redacted_fields: Vec<String>,
    detail: Option<String>,
    review_status: String,
    review: Option<serde_json::Value>,
}

#[derive(sqlx::FromRow)]
struct EscalationRow {
    id: String,
    request_id: Uuid,
    capability: String,
    reasons: serde_json::Value,
    red_flags: Vec<String>,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total: i64,
    completed: i64,
    escalations: i64,
    failures: i64,
    timed_out: i64,
    safety_violations: i64,
    reviewed: i64,
    overrides: i64,
    average_confidence: f64,
}

fn backend_error(err: sqlx::Error) -> AuditError {
    tracing::error!("Audit store error: {:?}", err);
    AuditError::Backend(err.to_string())
}

fn decode<T: DeserializeOwned>(column: &str, value: serde_json::Value) -> Result<T, AuditError> {
    serde_json::from_value(value)
        .map_err(|e| AuditError::Backend(format!("corrupt {column} column: {e}")))
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let kind = AuditKind::parse(&row.kind)
            .ok_or_else(|| AuditError::Backend(format!("unknown audit kind '{}'", row.kind)))?;
        let review_status = ReviewStatus::parse(&row.review_status).ok_or_else(|| {
            AuditError::Backend(format!("unknown review status '{}'", row.review_status))
        })?;
        let review: Option<ReviewInfo> = row.review.map(|v| decode("review", v)).transpose()?;

        Ok(AuditRecord {
            id: row.id,
            request_id: row.request_id,
            timestamp: row.timestamp,
            agent_name: row.agent_name,
            kind,
            user_digest: row.user_digest,
            urgency: decode("urgency", serde_json::Value::String(row.urgency))?,
            pre_confidence: row.pre_confidence,
            post_confidence: row.post_confidence,
            escalation_id: row.escalation_id,
            input_digest: row.input_digest,
            output_digest: row.output_digest,
            redacted_fields: row.redacted_fields,
            detail: row.detail,
            review_status,
            review,
        })
    }
}

impl TryFrom<EscalationRow> for EscalationRecord {
    type Error = AuditError;

    fn try_from(row: EscalationRow) -> Result<Self, Self::Error> {
        let status = EscalationStatus::parse(&row.status).ok_or_else(|| {
            AuditError::Backend(format!("unknown escalation status '{}'", row.status))
        })?;
        Ok(EscalationRecord {
            id: row.id,
            request_id: row.request_id,
            capability: row.capability,
            reasons: decode("reasons", row.reasons)?,
            red_flags: row.red_flags,
            status,
            created_at: row.created_at,
        })
    }
}

/// Insert one audit record on `conn`, mapping a duplicate id to `Conflict`.
async fn insert_record(conn: &mut PgConnection, record: &AuditRecord) -> Result<(), AuditError> {
    let review = record
        .review
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AuditError::Backend(e.to_string()))?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_records (
            id, request_id, timestamp, agent_name, kind, user_digest, urgency,
            pre_confidence, post_confidence, escalation_id, input_digest, output_digest,
            redacted_fields, detail, review_status, review
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(record.id)
    .bind(record.request_id)
    .bind(record.timestamp)
    .bind(&record.agent_name)
    .bind(record.kind.as_str())
    .bind(&record.user_digest)
    .bind(record.urgency.as_str())
    .bind(record.pre_confidence)
    .bind(record.post_confidence)
    .bind(&record.escalation_id)
    .bind(&record.input_digest)
    .bind(&record.output_digest)
    .bind(&record.redacted_fields)
    .bind(&record.detail)
    .bind(record.review_status.as_str())
    .bind(review)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            Err(AuditError::Conflict(record.id.to_string()))
        }
        Err(err) => Err(backend_error(err)),
    }
}

/// Insert one escalation on `conn`; returns false when the id already exists.
async fn insert_escalation(
    conn: &mut PgConnection,
    escalation: &EscalationRecord,
) -> Result<bool, AuditError> {
    let reasons = serde_json::to_value(&escalation.reasons)
        .map_err(|e| AuditError::Backend(e.to_string()))?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO escalations (id, request_id, capability, reasons, red_flags, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&escalation.id)
    .bind(escalation.request_id)
    .bind(&escalation.capability)
    .bind(reasons)
    .bind(&escalation.red_flags)
    .bind(escalation.status.as_str())
    .bind(escalation.created_at)
    .execute(&mut *conn)
    .await
    .map_err(backend_error)?;
    Ok(inserted.rows_affected() == 1)
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut conn = self.pool.acquire().await.map_err(backend_error)?;
        insert_record(&mut *conn, &record).await
    }

    async fn get(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?
        .ok_or_else(|| AuditError::NotFound(id.to_string()))?;
        row.try_into()
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            r#"
            SELECT {AUDIT_COLUMNS}
            FROM audit_records
            WHERE ($1::text IS NULL OR agent_name = $1)
              AND ($2::float8 IS NULL OR post_confidence >= $2)
              AND ($3::timestamptz IS NULL OR timestamp >= $3)
              AND ($4::timestamptz IS NULL OR timestamp <= $4)
              AND ($5::bool IS NULL OR (escalation_id IS NOT NULL) = $5)
              AND ($6::text IS NULL OR kind = $6)
            ORDER BY timestamp DESC, id DESC
            LIMIT $7
            "#
        ))
        .bind(&filter.agent_name)
        .bind(filter.min_confidence)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.escalated)
        .bind(filter.kind.map(AuditKind::as_str))
        .bind(filter.effective_limit() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn set_review(&self, id: Uuid, review: ReviewInfo) -> Result<AuditRecord, AuditError> {
        let review_json =
            serde_json::to_value(&review).map_err(|e| AuditError::Backend(e.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let existing = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_records WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_error)?
        .ok_or_else(|| AuditError::NotFound(id.to_string()))?;
        if existing.review.is_some() {
            return Err(AuditError::Conflict(id.to_string()));
        }

        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "UPDATE audit_records SET review = $2, review_status = $3 WHERE id = $1 \
             RETURNING {AUDIT_COLUMNS}"
        ))
        .bind(id)
        .bind(review_json)
        .bind(ReviewStatus::Reviewed.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(backend_error)?;

        if let Some(escalation_id) = &row.escalation_id {
            sqlx::query("UPDATE escalations SET status = $2 WHERE id = $1")
                .bind(escalation_id)
                .bind(EscalationStatus::Reviewed.as_str())
                .execute(&mut *tx)
                .await
                .map_err(backend_error)?;
        }

        tx.commit().await.map_err(backend_error)?;
        row.try_into()
    }

    async fn append_batch(
        &self,
        records: Vec<AuditRecord>,
        escalations: Vec<EscalationRecord>,
    ) -> Result<Vec<String>, AuditError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let mut inserted = Vec::new();
        for escalation in &escalations {
            if insert_escalation(&mut *tx, escalation).await? {
                inserted.push(escalation.id.clone());
            }
        }
        for record in &records {
            insert_record(&mut *tx, record).await?;
        }

        tx.commit().await.map_err(backend_error)?;
        Ok(inserted)
    }

    async fn record_escalation(&self, escalation: EscalationRecord) -> Result<bool, AuditError> {
        let mut conn = self.pool.acquire().await.map_err(backend_error)?;
        insert_escalation(&mut *conn, &escalation).await
    }

    async fn list_escalations(
        &self,
        pending_only: bool,
    ) -> Result<Vec<EscalationRecord>, AuditError> {
        let rows = sqlx::query_as::<_, EscalationRow>(
            r#"
            SELECT id, request_id, capability, reasons, red_flags, status, created_at
            FROM escalations
            WHERE (NOT $1 OR status = 'pending_review')
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(pending_only)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        rows.into_iter().map(EscalationRecord::try_from).collect()
    }

    async fn agent_statistics(&self, agent_name: &str) -> Result<AgentStatistics, AuditError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE kind = 'completed') AS completed,
                COUNT(*) FILTER (WHERE escalation_id IS NOT NULL) AS escalations,
                COUNT(*) FILTER (WHERE kind = 'agent_execution_failure') AS failures,
                COUNT(*) FILTER (WHERE kind = 'timed_out') AS timed_out,
                COUNT(*) FILTER (WHERE kind = 'safety_violation') AS safety_violations,
                COUNT(*) FILTER (WHERE review IS NOT NULL) AS reviewed,
                COUNT(*) FILTER (WHERE COALESCE((review->>'overridden')::boolean, false)) AS overrides,
                COALESCE(AVG(post_confidence), 0)::float8 AS average_confidence
            FROM audit_records
            WHERE agent_name = $1
            "#,
        )
        .bind(agent_name)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_error)?;

        let override_rate = if row.reviewed > 0 {
            row.overrides as f64 / row.reviewed as f64
        } else {
            0.0
        };
        Ok(AgentStatistics {
            agent_name: agent_name.to_string(),
            total_invocations: row.total as u64,
            completed: row.completed as u64,
            escalations: row.escalations as u64,
            failures: row.failures as u64,
            timed_out: row.timed_out as u64,
            safety_violations: row.safety_violations as u64,
            reviewed: row.reviewed as u64,
            overrides: row.overrides as u64,
            average_confidence: row.average_confidence,
            override_rate,
        })
    }

    async fn ping(&self) -> Result<(), AuditError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(backend_error)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
