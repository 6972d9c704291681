use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{IngestJob, JobStatus};

fn job_from_row(row: &PgRow) -> Result<IngestJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;

    Ok(IngestJob {
        id: row.try_get("id")?,
        archive_path: row.try_get("archive_path")?,
        scratch_dir: row.try_get("scratch_dir")?,
        dest_dir: row.try_get("dest_dir")?,
        // Unknown status values from older rows fall back to ready so they
        // re-enter the queue instead of wedging.
        status: status_str.parse().unwrap_or(JobStatus::Ready),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        retry_count: row.try_get("retry_count")?,
        error: row.try_get("error")?,
    })
}

/// Insert a new ingest job in `ready` status.
pub async fn create_job(
    pool: &PgPool,
    archive_path: &str,
    scratch_dir: &str,
    dest_dir: &str,
) -> Result<IngestJob, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO ingest_jobs (archive_path, scratch_dir, dest_dir, status)
        VALUES ($1, $2, $3, 'ready')
        RETURNING id, archive_path, scratch_dir, dest_dir, status,
                  created_at, updated_at, retry_count, error
        "#,
    )
    .bind(archive_path)
    .bind(scratch_dir)
    .bind(dest_dir)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<IngestJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, archive_path, scratch_dir, dest_dir, status,
               created_at, updated_at, retry_count, error
        FROM ingest_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Atomically claim the oldest `ready` job, flipping it to `processing`.
///
/// The conditional update with `FOR UPDATE SKIP LOCKED` keeps the claim safe
/// even if a second worker instance is ever pointed at the same store. Jobs
/// are served FIFO by insertion order.
pub async fn claim_next_ready(pool: &PgPool) -> Result<Option<IngestJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'processing',
            processing_started_at = NOW(),
            updated_at = NOW()
        WHERE id = (
            SELECT id FROM ingest_jobs
            WHERE status = 'ready'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, archive_path, scratch_dir, dest_dir, status,
                  created_at, updated_at, retry_count, error
        "#,
    )
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Update job status. Updating a nonexistent job is an error, never a no-op.
pub async fn set_status(pool: &PgPool, job_id: Uuid, status: JobStatus) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = $1,
            updated_at = NOW(),
            processing_started_at = CASE WHEN $1 = 'processing' THEN NOW() ELSE processing_started_at END,
            processing_completed_at = CASE WHEN $1 IN ('done', 'failed') THEN NOW() ELSE processing_completed_at END
        WHERE id = $2
        "#,
    )
    .bind(status.to_string())
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Terminal failure: record the error message alongside the status.
pub async fn mark_failed(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'failed',
            error = $1,
            updated_at = NOW(),
            processing_completed_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Transient failure: put the job back in the queue with the error recorded.
pub async fn requeue(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'ready',
            error = $1,
            updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Increment retry count
pub async fn increment_retry_count(pool: &PgPool, job_id: Uuid) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET retry_count = retry_count + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING retry_count
        "#,
    )
    .bind(job_id)
    .fetch_one(pool)
    .await?;

    row.try_get("retry_count")
}

/// Number of jobs currently waiting in `ready` status.
pub async fn ready_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS depth FROM ingest_jobs WHERE status = 'ready'")
        .fetch_one(pool)
        .await?;

    row.try_get("depth")
}
