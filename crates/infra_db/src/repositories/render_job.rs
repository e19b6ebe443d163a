//! Render job repository
//!
//! Jobs are inserted inside the invoice transaction and updated afterwards
//! from autocommit connections by the render queue.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain_billing::{InvoiceSnapshot, RenderJob, RenderJobStatus};

use crate::error::DatabaseError;
use crate::repositories::shipment::to_db_count;

/// Database row for a render job
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RenderJobRow {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub snapshot: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub storage_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RenderJobRow> for RenderJob {
    type Error = DatabaseError;

    fn try_from(row: RenderJobRow) -> Result<Self, Self::Error> {
        let snapshot: InvoiceSnapshot = serde_json::from_str(&row.snapshot)
            .map_err(|e| DatabaseError::decode("render_jobs.snapshot", e))?;

        Ok(RenderJob {
            invoice_id: row.invoice_id,
            invoice_number: row.invoice_number,
            snapshot,
            status: row
                .status
                .parse::<RenderJobStatus>()
                .map_err(|e| DatabaseError::decode("render_jobs.status", e))?,
            attempts: u32::try_from(row.attempts)
                .map_err(|e| DatabaseError::decode("render_jobs.attempts", e))?,
            last_error: row.last_error,
            storage_key: row.storage_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderJobRepository;

impl RenderJobRepository {
    /// Queues a job; an existing job for the same invoice is left untouched
    pub async fn enqueue(conn: &mut PgConnection, job: &RenderJob) -> Result<(), DatabaseError> {
        let snapshot = serde_json::to_string(&job.snapshot)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO render_jobs (
                invoice_id, invoice_number, snapshot, status, attempts,
                last_error, storage_key, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (invoice_id) DO NOTHING
            "#,
        )
        .bind(job.invoice_id)
        .bind(&job.invoice_number)
        .bind(snapshot)
        .bind(job.status.as_str())
        .bind(to_db_count(job.attempts, "render_jobs.attempts")?)
        .bind(&job.last_error)
        .bind(&job.storage_key)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Option<RenderJob>, DatabaseError> {
        let row = sqlx::query_as::<_, RenderJobRow>(
            r#"
            SELECT invoice_id, invoice_number, snapshot, status, attempts,
                   last_error, storage_key, created_at, updated_at
            FROM render_jobs
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(RenderJob::try_from).transpose()
    }

    /// Pending jobs and failed jobs with retries left, oldest first
    pub async fn due(
        conn: &mut PgConnection,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<RenderJob>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, RenderJobRow>(
            r#"
            SELECT invoice_id, invoice_number, snapshot, status, attempts,
                   last_error, storage_key, created_at, updated_at
            FROM render_jobs
            WHERE status = 'PENDING' OR (status = 'FAILED' AND attempts < $1)
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(to_db_count(max_attempts, "render_jobs.attempts")?)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(RenderJob::try_from).collect()
    }

    pub async fn mark_succeeded(
        conn: &mut PgConnection,
        invoice_id: Uuid,
        storage_key: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
            SET status = 'SUCCEEDED', attempts = attempts + 1, storage_key = $2,
                last_error = NULL, updated_at = now()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(storage_key)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("RenderJob", invoice_id));
        }
        Ok(())
    }

    pub async fn mark_failed(
        conn: &mut PgConnection,
        invoice_id: Uuid,
        error: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
            SET status = 'FAILED', attempts = attempts + 1, last_error = $2, updated_at = now()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(error)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("RenderJob", invoice_id));
        }
        Ok(())
    }
}
