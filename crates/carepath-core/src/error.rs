use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarepathError {
    // Graph repository errors
    #[error("Repository read failed: {0}")]
    Repository(String),

    // Oracle errors
    #[error("Oracle request failed: {0}")]
    OracleRequest(String),

    #[error("Oracle response parse error: {0}")]
    OracleParse(String),

    #[error("Oracle timed out after {timeout_secs}s")]
    OracleTimeout { timeout_secs: u64 },

    // Session errors
    #[error("Session error: {0}")]
    Session(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CarepathError>;
