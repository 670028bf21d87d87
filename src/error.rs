//! KnowVault error types

use serde::Serialize;
use thiserror::Error;

/// KnowVault error type
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or empty tenant identifier, or otherwise malformed request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Extraction, chunking or embedding pipeline failure
    #[error("Ingestion failure: {0}")]
    Ingestion(String),

    /// Vector or memory store unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Reasoning engine failure
    #[error("Generation failure: {0}")]
    Generation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Tag carried by every failure surfaced at a gateway boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    IngestionFailure,
    StoreUnavailable,
    GenerationFailure,
    Internal,
}

impl ErrorKind {
    /// Wire code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::IngestionFailure => "INGESTION_FAILURE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::GenerationFailure => "GENERATION_FAILURE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl Error {
    /// Classify this error into one of the boundary kinds
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Ingestion(_) => ErrorKind::IngestionFailure,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Generation(_) | Self::Http(_) => ErrorKind::GenerationFailure,
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Human-readable message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::Ingestion(m)
            | Self::StoreUnavailable(m)
            | Self::Generation(m)
            | Self::Config(m)
            | Self::Internal(m) => m.clone(),
            Self::Io(e) => e.to_string(),
            Self::Serialization(e) => e.to_string(),
            Self::Http(e) => e.to_string(),
        }
    }

    /// Re-tag an error raised inside the ingestion pipeline.
    ///
    /// Validation and store failures keep their kind.
    pub(crate) fn into_ingestion(self) -> Self {
        match self {
            Self::Validation(_) | Self::StoreUnavailable(_) | Self::Ingestion(_) => self,
            other => Self::Ingestion(other.message()),
        }
    }

    /// Re-tag an error raised by the reasoning engine or its tools
    pub(crate) fn into_generation(self) -> Self {
        match self {
            Self::Validation(_) | Self::StoreUnavailable(_) | Self::Generation(_) => self,
            other => Self::Generation(other.message()),
        }
    }
}

/// Result type alias for KnowVault operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::Validation("x".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            Error::Ingestion("x".into()).kind(),
            ErrorKind::IngestionFailure
        );
        assert_eq!(
            Error::StoreUnavailable("x".into()).kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            Error::Generation("x".into()).kind(),
            ErrorKind::GenerationFailure
        );
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_retagging_keeps_store_errors() {
        let err = Error::StoreUnavailable("db down".into()).into_ingestion();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

        let err = Error::Internal("boom".into()).into_generation();
        assert_eq!(err.kind(), ErrorKind::GenerationFailure);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_kind_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(json, "\"VALIDATION_ERROR\"");
        assert_eq!(ErrorKind::GenerationFailure.to_string(), "GENERATION_FAILURE");
    }
}
