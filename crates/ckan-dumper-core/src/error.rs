use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    ClientError(String),

    #[error("CKAN error during {action}: {error}")]
    Ckan { action: String, error: Value },

    #[error("Expected JSON in response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cannot cast value '{value}' of field {field} to {field_type}")]
    Cast {
        field: String,
        value: String,
        field_type: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Environment variable {0} referenced by the API key is not set")]
    MissingEnvVar(String),

    #[error("Package must be published before resource {0}")]
    PackageNotPublished(String),

    #[error("Found {count} resources named {name} on the package, expected at most one")]
    AmbiguousResource { name: String, count: usize },

    #[error("Generic error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns the raw CKAN error payload, if this error was reported by CKAN.
    pub fn ckan_payload(&self) -> Option<&Value> {
        match self {
            AppError::Ckan { error, .. } => Some(error),
            _ => None,
        }
    }
}
