//! Error types for asset retrieval
//!
//! Errors fall into a small taxonomy:
//! - [`ConfigurationError`] - fatal, raised before the first page is fetched
//! - [`NotFoundError`] - strict-mode field/adapter resolution failure
//! - [`RowProcessingError`] - a custom row callback failed
//! - [`TransportError`] - opaque transport failure, always fatal
//!
//! [`AssetError`] aggregates all of them for operations that can fail in
//! more than one way.

use crate::export::ExportError;
use crate::models::Row;
use thiserror::Error;

/// Invalid or conflicting configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Stage '{stage}' conflicts with {conflicts:?}")]
    StageConflict {
        stage: String,
        conflicts: Vec<String>,
    },

    #[error("Unknown stage '{name}', valid stages: {valid}")]
    UnknownStage { name: String, valid: String },

    #[error("Duplicate field '{name}' registered for adapter '{adapter}'")]
    DuplicateField { adapter: String, name: String },

    #[error("Duplicate qualified field name '{0}' in catalog")]
    DuplicateQualifiedName(String),

    #[error("Malformed field schema: {0}")]
    MalformedSchema(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Explode field '{field}' not found, valid fields: {valid}")]
    UnknownExplodeField { field: String, valid: String },

    #[error("Tags requested but no tag writer was supplied")]
    MissingTagWriter,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What kind of catalog entry a [`NotFoundError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Adapter,
    Field,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundKind::Adapter => write!(f, "adapter"),
            NotFoundKind::Field => write!(f, "field"),
        }
    }
}

/// A field or adapter reference that does not exist in the catalog.
///
/// The display form enumerates every valid name so the caller can correct
/// the request without another round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("No {kind} found matching '{value}'{scope}, valid {kind}s:\n  {}", .valid.join("\n  "))]
pub struct NotFoundError {
    pub kind: NotFoundKind,
    pub value: String,
    pub scope: String,
    pub valid: Vec<String>,
}

impl NotFoundError {
    pub fn adapter(value: impl Into<String>, valid: Vec<String>) -> Self {
        Self {
            kind: NotFoundKind::Adapter,
            value: value.into(),
            scope: String::new(),
            valid,
        }
    }

    pub fn field(value: impl Into<String>, adapter: &str, valid: Vec<String>) -> Self {
        Self {
            kind: NotFoundKind::Field,
            value: value.into(),
            scope: format!(" in adapter '{}'", adapter),
            valid,
        }
    }
}

/// A custom row callback failed.
///
/// Carries the row as it was when the callback returned its error.
#[derive(Debug, Error)]
#[error("Callback '{callback}' failed: {source}")]
pub struct RowProcessingError {
    pub callback: String,
    pub row: Row,
    #[source]
    pub source: anyhow::Error,
}

/// Opaque transport failure. Never retried or wrapped further.
#[derive(Debug, Error)]
#[error("Transport error: {0}")]
pub struct TransportError(#[source] pub anyhow::Error);

impl TransportError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(err.into())
    }

    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(message))
    }
}

/// Any error produced while resolving, fetching or transforming assets.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    RowProcessing(#[from] RowProcessingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

pub type AssetResult<T> = Result<T, AssetError>;
