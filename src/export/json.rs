//! JSON sink
//!
//! Streams rows as the elements of a single JSON array, one row per line.

use super::target::ExportTarget;
use super::{ExportError, Sink};
use crate::models::{FieldSchema, Row};
use std::io::Write;
use tracing::debug;

/// Streaming JSON array writer.
pub struct JsonSink {
    target: Option<ExportTarget>,
    writer: Option<Box<dyn Write + Send>>,
    rows: u64,
}

impl JsonSink {
    pub fn new(target: ExportTarget) -> Self {
        Self {
            target: Some(target),
            writer: None,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }
}

impl Sink for JsonSink {
    fn start(&mut self, _schemas: &[FieldSchema]) -> Result<(), ExportError> {
        let target = self
            .target
            .take()
            .ok_or_else(|| ExportError::NotOpen("json sink already started".to_string()))?;
        let mut out = target.open()?;
        out.write_all(b"[")?;
        self.writer = Some(out);
        Ok(())
    }

    fn write(&mut self, row: &Row) -> Result<(), ExportError> {
        let out = self
            .writer
            .as_mut()
            .ok_or_else(|| ExportError::NotOpen("json sink not started".to_string()))?;
        let text = serde_json::to_string(row)
            .map_err(|e| ExportError::SerializationError(e.to_string()))?;
        let sep: &[u8] = if self.rows == 0 { b"\n" } else { b",\n" };
        out.write_all(sep)?;
        out.write_all(text.as_bytes())?;
        self.rows += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        if let Some(mut out) = self.writer.take() {
            out.write_all(b"\n]\n")?;
            out.flush()?;
            debug!("JSON sink closed after {} rows", self.rows);
        }
        Ok(())
    }
}
