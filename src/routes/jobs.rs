use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::{JobResponse, JobStatusResponse, UploadCompleteRequest};

/// POST /api/v1/uploads/complete — register a fully assembled archive.
///
/// Called by the upload transport once a file has been moved into place on
/// disk. Derives the per-job scratch and dataset directories from the upload
/// name and inserts a `ready` job for the worker to claim.
pub async fn upload_complete(
    State(state): State<AppState>,
    Json(request): Json<UploadCompleteRequest>,
) -> Result<(StatusCode, Json<JobResponse>), (StatusCode, String)> {
    request
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if !std::path::Path::new(&request.archive_path).is_absolute() {
        return Err((
            StatusCode::BAD_REQUEST,
            "archive_path must be absolute".to_string(),
        ));
    }

    let scratch_dir = state.temp_dir.join(&request.name);
    let dest_dir = state.dataset_dir.join(&request.name);

    let job = queries::create_job(
        &state.db,
        &request.archive_path,
        &scratch_dir.to_string_lossy(),
        &dest_dir.to_string_lossy(),
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, name = %request.name, "failed to create ingest job");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to create job".to_string(),
        )
    })?;

    metrics::counter!("ingest_jobs_total").increment(1);
    if let Ok(depth) = queries::ready_count(&state.db).await {
        metrics::gauge!("ingest_queue_depth").set(depth as f64);
    }

    tracing::info!(
        job_id = %job.id,
        archive = %job.archive_path,
        "ingest job registered"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            job_id: job.id,
            status: job.status.to_string(),
            message: "archive queued for ingestion".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id} — check ingest job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, job_id = %job_id, "failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status.to_string(),
        dest_dir: job.dest_dir,
        retry_count: job.retry_count,
        error: job.error,
    }))
}
