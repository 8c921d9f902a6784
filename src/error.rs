use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Authentication failed: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Diagram error: {0}")]
    Diagram(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
