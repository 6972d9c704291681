//! The ingestion worker: a single long-lived loop that claims ready jobs and
//! drives them through extraction and reconciliation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::db::queries;
use crate::models::job::{IngestJob, JobStatus};
use crate::services::extract::{self, ExtractError};
use crate::services::reconcile::{self, ReconcileError, ReconcileSummary};

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const MAX_RETRIES: i32 = 3;
const JOB_TIMEOUT_SECS: u64 = 600; // 10 minutes per job

/// Failure of a single job, classified for the retry decision.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("job timed out after {0}s")]
    Timeout(u64),

    #[error("pipeline task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl JobError {
    /// Fatal errors mean the archive itself is corrupt or mismatched; the job
    /// goes straight to `failed`. Everything else is retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Extract(e) => e.is_fatal(),
            Self::Reconcile(e) => e.is_fatal(),
            Self::Timeout(_) | Self::Join(_) => false,
        }
    }

    /// Pipeline step the failure belongs to, for structured logs.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Extract(_) => "extract",
            Self::Reconcile(_) => "reconcile",
            Self::Timeout(_) => "timeout",
            Self::Join(_) => "task",
        }
    }
}

/// Handle to a running worker loop. Dropping it does NOT stop the worker;
/// call [`WorkerHandle::shutdown`].
pub struct WorkerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request cooperative shutdown and wait for the loop to exit. A job in
    /// flight is finished first; cancellation is only observed between jobs.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "ingest worker task panicked during shutdown");
        }
    }
}

/// Spawn the poll-process loop on the current tokio runtime.
pub fn start(db: PgPool) -> WorkerHandle {
    let token = CancellationToken::new();
    let task = tokio::spawn(run_loop(db, token.clone()));
    WorkerHandle { token, task }
}

async fn run_loop(db: PgPool, token: CancellationToken) {
    tracing::info!("ingest worker started");

    loop {
        if token.is_cancelled() {
            break;
        }

        match process_next_job(&db).await {
            Ok(true) => {
                // Job processed; poll again immediately.
                tracing::debug!("job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("no jobs available, sleeping");
                idle_wait(&token).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "job store unavailable, backing off");
                idle_wait(&token).await;
            }
        }
    }

    tracing::info!("ingest worker stopped");
}

/// Cancellation-aware idle wait between polls.
async fn idle_wait(token: &CancellationToken) {
    tokio::select! {
        () = token.cancelled() => {}
        () = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
    }
}

/// Claim and process the next job.
/// Returns Ok(true) if a job was processed, Ok(false) if none was ready.
/// Only job-store failures surface as errors; job failures are absorbed here.
pub async fn process_next_job(db: &PgPool) -> Result<bool, sqlx::Error> {
    let job = match queries::claim_next_ready(db).await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %job.id,
        archive = %job.archive_path,
        dest = %job.dest_dir,
        "processing ingest job"
    );

    let started = Instant::now();
    let outcome = match timeout(Duration::from_secs(JOB_TIMEOUT_SECS), run_pipeline(&job)).await {
        Ok(result) => result,
        Err(_) => Err(JobError::Timeout(JOB_TIMEOUT_SECS)),
    };

    match outcome {
        Ok(summary) => {
            queries::set_status(db, job.id, JobStatus::Done).await?;

            metrics::counter!("ingest_jobs_completed").increment(1);
            metrics::histogram!("ingest_processing_seconds")
                .record(started.elapsed().as_secs_f64());

            tracing::info!(
                job_id = %job.id,
                entries = summary.entries,
                copied = summary.copied,
                skipped = summary.skipped,
                "ingest job completed"
            );
        }
        Err(e) => {
            handle_job_failure(db, &job, &e).await?;
        }
    }

    if let Ok(depth) = queries::ready_count(db).await {
        metrics::gauge!("ingest_queue_depth").set(depth as f64);
    }

    Ok(true)
}

/// Extract then reconcile, off the async runtime's worker threads.
async fn run_pipeline(job: &IngestJob) -> Result<ReconcileSummary, JobError> {
    let archive = PathBuf::from(&job.archive_path);
    let scratch = PathBuf::from(&job.scratch_dir);
    let dest = PathBuf::from(&job.dest_dir);

    tracing::debug!(job_id = %job.id, "extracting archive");
    let scratch_for_extract = scratch.clone();
    tokio::task::spawn_blocking(move || extract::extract(&archive, &scratch_for_extract))
        .await??;

    tracing::debug!(job_id = %job.id, "reconciling manifest");
    let summary =
        tokio::task::spawn_blocking(move || reconcile::reconcile(&scratch, &dest)).await??;

    Ok(summary)
}

/// Per-job error boundary: classify, record, and decide the next status.
/// The worker loop itself never dies on a job failure.
async fn handle_job_failure(
    db: &PgPool,
    job: &IngestJob,
    error: &JobError,
) -> Result<(), sqlx::Error> {
    tracing::error!(
        job_id = %job.id,
        step = error.step(),
        error = %error,
        "ingest job failed"
    );

    if error.is_fatal() {
        queries::mark_failed(db, job.id, &error.to_string()).await?;
        metrics::counter!("ingest_jobs_failed").increment(1);
        tracing::warn!(job_id = %job.id, "job marked failed: corrupt or mismatched archive");
        return Ok(());
    }

    let retry_count = queries::increment_retry_count(db, job.id).await?;

    if retry_count >= MAX_RETRIES {
        queries::mark_failed(
            db,
            job.id,
            &format!("processing failed after {MAX_RETRIES} attempts: {error}"),
        )
        .await?;
        metrics::counter!("ingest_jobs_failed").increment(1);
        tracing::warn!(
            job_id = %job.id,
            retry_count = retry_count,
            "job failed after max retries"
        );
    } else {
        queries::requeue(db, job.id, &error.to_string()).await?;
        metrics::counter!("ingest_jobs_retried").increment(1);
        tracing::info!(
            job_id = %job.id,
            retry_count = retry_count,
            "job requeued for retry"
        );
    }

    Ok(())
}
