use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an ingest job in the durable queue.
///
/// `ready` jobs are claimable; a claimed job moves to `processing` and ends in
/// `done` or `failed`. A transient failure puts the job back to `ready` with
/// its retry count incremented.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Ready,
    Processing,
    Done,
    Failed,
}

/// One unit of ingestion work tied to a single uploaded archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: Uuid,
    /// Absolute path of the raw uploaded archive.
    pub archive_path: String,
    /// Absolute path of the extraction working directory.
    pub scratch_dir: String,
    /// Absolute path of the final dataset directory.
    pub dest_dir: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: i32,
    pub error: Option<String>,
}

/// Notification that an upload has been fully assembled on disk.
#[derive(Debug, Deserialize, Validate)]
pub struct UploadCompleteRequest {
    /// Dataset name, used to derive the scratch and destination directories.
    #[garde(length(min = 1, max = 128), custom(validate_dataset_name))]
    pub name: String,

    /// Absolute path of the assembled archive.
    #[garde(length(min = 1, max = 4096))]
    pub archive_path: String,
}

fn validate_dataset_name(value: &str, _ctx: &()) -> garde::Result {
    if value.contains('/') || value.contains('\\') {
        return Err(garde::Error::new("name must not contain path separators"));
    }
    if value == "." || value == ".." {
        return Err(garde::Error::new("name must not be a directory reference"));
    }
    Ok(())
}

/// Response after registering an archive for ingestion.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub dest_dir: String,
    pub retry_count: i32,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for (status, text) in [
            (JobStatus::Ready, "ready"),
            (JobStatus::Processing, "processing"),
            (JobStatus::Done, "done"),
            (JobStatus::Failed, "failed"),
        ] {
            assert_eq!(status.to_string(), text);
            assert_eq!(text.parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn dataset_name_rejects_separators_and_traversal() {
        assert!(validate_dataset_name("run-42", &()).is_ok());
        assert!(validate_dataset_name("a/b", &()).is_err());
        assert!(validate_dataset_name("a\\b", &()).is_err());
        assert!(validate_dataset_name("..", &()).is_err());
    }
}
