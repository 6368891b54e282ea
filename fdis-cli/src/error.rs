use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("No configuration: pass --config, or both --source and --dest")]
    NoConfig,

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] fdis_pipeline::PipelineError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Process exit status for errors raised before or instead of a run report.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Pipeline(e) if !e.is_configuration() => 1,
            AppError::Logging(_) | AppError::Io(_) => 1,
            _ => 2,
        }
    }
}
