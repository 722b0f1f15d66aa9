//! Export functionality
//!
//! Provides streaming sinks for finished rows:
//! - CSV (UTF-8 BOM, optional schema header rows)
//! - JSON (one array of row objects)
//!
//! A sink is opened once, written row by row and closed once, so at most
//! one output resource is held per export stage.

pub mod csv;
pub mod json;
pub mod target;

use crate::models::{FieldSchema, Row};
use std::path::PathBuf;

/// Error during export
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Export file exists and overwrite is disabled: {}", .0.display())]
    TargetExists(PathBuf),
    #[error("Sink used out of order: {0}")]
    NotOpen(String),
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::IoError(err.to_string())
    }
}

/// Streaming row writer.
///
/// `start` receives the schemas of the columns the rows will carry.
pub trait Sink {
    fn start(&mut self, schemas: &[FieldSchema]) -> Result<(), ExportError>;
    fn write(&mut self, row: &Row) -> Result<(), ExportError>;
    fn stop(&mut self) -> Result<(), ExportError>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn start(&mut self, schemas: &[FieldSchema]) -> Result<(), ExportError> {
        (**self).start(schemas)
    }

    fn write(&mut self, row: &Row) -> Result<(), ExportError> {
        (**self).write(row)
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        (**self).stop()
    }
}

pub use self::csv::{CsvSink, CsvSinkOptions};
pub use self::json::JsonSink;
pub use self::target::{ExportTarget, SharedBuffer};
