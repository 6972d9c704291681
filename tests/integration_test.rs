//! Integration test: full ingestion flow against a live PostgreSQL instance.
//!
//! Requires a dedicated (empty) database reachable via `DATABASE_URL`.
//! Run with: cargo test --test integration_test -- --ignored

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::ZipWriter;

use dataset_ingest::{
    db::{self, queries},
    models::job::JobStatus,
    services::worker,
};

fn build_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create archive file");
    let mut zip = ZipWriter::new(file);
    for (name, bytes) in entries {
        zip.start_file(*name, FileOptions::default())
            .expect("start entry");
        zip.write_all(bytes).expect("write entry");
    }
    zip.finish().expect("finish archive");
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = db::init_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    // 1. Updating a job that does not exist is an error, never a no-op.
    let missing = queries::set_status(&pool, Uuid::new_v4(), JobStatus::Done).await;
    assert!(matches!(missing, Err(sqlx::Error::RowNotFound)));

    // 2. Register a well-formed archive and a broken one (label missing).
    let dir = TempDir::new().expect("tempdir");
    let good_archive = dir.path().join("good.zip");
    build_archive(
        &good_archive,
        &[
            ("item.json", br#"{"a": "C:\\cap\\img1.jpg"}"# as &[u8]),
            ("items/C/cap/img1.jpg", b"jpeg-bytes"),
            ("labels/a.txt", b"0 0.5 0.5 0.2 0.2"),
        ],
    );
    let bad_archive = dir.path().join("bad.zip");
    build_archive(
        &bad_archive,
        &[
            ("item.json", br#"{"b": "C:\\cap\\img2.jpg"}"# as &[u8]),
            ("items/C/cap/img2.jpg", b"jpeg-bytes"),
        ],
    );

    let good = queries::create_job(
        &pool,
        good_archive.to_str().unwrap(),
        dir.path().join("scratch-good").to_str().unwrap(),
        dir.path().join("dataset-good").to_str().unwrap(),
    )
    .await
    .expect("create good job");
    assert_eq!(good.status, JobStatus::Ready);
    assert_eq!(good.retry_count, 0);

    let bad = queries::create_job(
        &pool,
        bad_archive.to_str().unwrap(),
        dir.path().join("scratch-bad").to_str().unwrap(),
        dir.path().join("dataset-bad").to_str().unwrap(),
    )
    .await
    .expect("create bad job");

    assert_eq!(queries::ready_count(&pool).await.unwrap(), 2);

    // 3. Jobs are claimed FIFO: the good job first, then the bad one.
    assert!(worker::process_next_job(&pool).await.expect("process good"));

    let done = queries::get_job(&pool, good.id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(done.status, JobStatus::Done);

    let dataset = dir.path().join("dataset-good");
    assert!(dataset.join("images/img1.jpg").is_file());
    assert!(dataset.join("labels/a.txt").is_file());
    for list in ["img.txt", "label.txt", "img_val.txt", "label_val.txt"] {
        let lines: Vec<String> = fs::read_to_string(dataset.join(list))
            .expect("read list")
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines.len(), 1, "{list} should have exactly one line");
    }

    // 4. The broken archive lands in `failed` without killing the worker.
    assert!(worker::process_next_job(&pool).await.expect("process bad"));

    let failed = queries::get_job(&pool, bad.id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("label"));
    // Documented partial-write behavior: the image copy survives the abort.
    assert!(dir.path().join("dataset-bad/images/img2.jpg").is_file());

    // 5. Queue is drained.
    assert!(!worker::process_next_job(&pool).await.expect("drained"));
    assert_eq!(queries::ready_count(&pool).await.unwrap(), 0);

    // 6. Retry plumbing: requeue, bump the attempt counter, reclaim, fail.
    queries::requeue(&pool, bad.id, "operator requeued").await.expect("requeue");
    assert_eq!(queries::increment_retry_count(&pool, bad.id).await.unwrap(), 1);

    let reclaimed = queries::claim_next_ready(&pool)
        .await
        .expect("claim")
        .expect("requeued job is claimable");
    assert_eq!(reclaimed.id, bad.id);
    assert_eq!(reclaimed.status, JobStatus::Processing);

    queries::mark_failed(&pool, bad.id, "still missing label").await.expect("mark failed");

    // 7. Re-running a completed job is cheap and never duplicates list lines.
    queries::requeue(&pool, good.id, "rerun").await.expect("requeue good");
    assert!(worker::process_next_job(&pool).await.expect("rerun good"));

    let rerun = queries::get_job(&pool, good.id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(rerun.status, JobStatus::Done);

    let img_lines = fs::read_to_string(dataset.join("img.txt")).expect("read img.txt");
    assert_eq!(img_lines.lines().count(), 1);
    assert_eq!(
        fs::read(dataset.join("img.txt")).unwrap(),
        fs::read(dataset.join("img_val.txt")).unwrap()
    );

    // 8. The worker loop starts, idles on an empty queue, and stops cleanly.
    let handle = worker::start(pool.clone());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    handle.shutdown().await;

    println!("full integration flow passed");
}
