use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Root directory for per-job extraction scratch space
    pub temp_dir: String,

    /// Root directory under which finished datasets are written
    pub dataset_dir: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
