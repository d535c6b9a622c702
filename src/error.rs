use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Marketplace returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short label used to bucket failures in poll metrics.
    pub fn kind(&self) -> String {
        match self {
            Error::Config(_) => "config".to_string(),
            Error::Validation(_) => "validation".to_string(),
            Error::Http(e) if e.is_timeout() => "timeout".to_string(),
            Error::Http(e) if e.is_connect() => "connect".to_string(),
            Error::Http(_) => "http".to_string(),
            Error::Api { status, .. } => format!("api_{}", status),
            Error::Decode(_) => "decode".to_string(),
            Error::Io(_) => "io".to_string(),
            Error::Json(_) => "json".to_string(),
            Error::Yaml(_) => "yaml".to_string(),
            Error::Toml(_) => "toml".to_string(),
            Error::Database(_) => "database".to_string(),
            Error::InvalidState(_) => "invalid_state".to_string(),
            Error::Internal(_) => "internal".to_string(),
        }
    }
}
