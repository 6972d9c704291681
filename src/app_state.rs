use sqlx::PgPool;
use std::path::PathBuf;

use crate::config::AppConfig;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Root under which per-job scratch directories are derived.
    pub temp_dir: PathBuf,
    /// Root under which finished dataset directories are derived.
    pub dataset_dir: PathBuf,
}

impl AppState {
    pub fn new(db: PgPool, config: &AppConfig) -> Self {
        Self {
            db,
            temp_dir: PathBuf::from(&config.temp_dir),
            dataset_dir: PathBuf::from(&config.dataset_dir),
        }
    }
}
