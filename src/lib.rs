//! Asset Pipeline SDK - Schema driven asset retrieval for asset-inventory clients
//!
//! Provides:
//! - Field schema catalog parsing and qualified field resolution
//! - Paged asset fetching behind a transport trait
//! - An ordered row transformation pipeline (exclude, null-fill, flatten,
//!   explode, join, title-rename, reports, tagging)
//! - Streaming CSV and JSON export
//! - TOML configuration with environment overrides

pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod import;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod validation;

// Re-export commonly used types
pub use config::{CallbackErrors, ExportFormat, FetchConfig, PipelineConfig, StageConfig};
pub use error::{
    AssetError, AssetResult, ConfigurationError, NotFoundError, RowProcessingError,
    TransportError,
};
pub use export::{CsvSink, ExportError, ExportTarget, JsonSink, Sink};
#[cfg(feature = "api-backend")]
pub use fetch::HttpTransport;
pub use fetch::{
    AssetTransport, MemoryTransport, PagedFetcher, PipelineState, RecordingTagWriter, StopReason,
    TagWriter,
};
pub use import::FieldSchemaImporter;
pub use models::{Catalog, FieldSchema, Row, RowEvent};
pub use pipeline::{PipelineBuilder, PipelineStatus, RunSummary, StagePipeline};
pub use runner::{ALWAYS_FIELDS, AssetRunner};
pub use validation::{FieldSpec, QualifiedFieldResolver, ResolveMode};
