//! CSV sink
//!
//! Writes a UTF-8 byte order mark, one column header row and, when schema
//! export is enabled, two more header rows so that titles, qualified names
//! and normalized types all appear above the data.

use super::target::ExportTarget;
use super::{ExportError, Sink};
use crate::models::{FieldSchema, Row, display_value};
use std::collections::HashSet;
use std::io::Write;
use tracing::{debug, warn};

const UTF8_BOM: &str = "\u{feff}";

/// CSV layout options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsvSinkOptions {
    /// Rows are keyed by column titles rather than qualified names
    pub titles: bool,
    /// Emit the extra name and type header rows
    pub export_schema: bool,
}

/// Streaming CSV writer.
pub struct CsvSink {
    target: Option<ExportTarget>,
    options: CsvSinkOptions,
    writer: Option<csv::Writer<Box<dyn Write + Send>>>,
    columns: Vec<String>,
    warned: HashSet<String>,
    rows: u64,
}

impl CsvSink {
    pub fn new(target: ExportTarget, options: CsvSinkOptions) -> Self {
        Self {
            target: Some(target),
            options,
            writer: None,
            columns: Vec::new(),
            warned: HashSet::new(),
            rows: 0,
        }
    }

    /// Column keys in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    fn column_key(&self, schema: &FieldSchema) -> String {
        if self.options.titles {
            schema.column_title.clone()
        } else {
            schema.name_qual.clone()
        }
    }

    fn write_record(&mut self, record: &[String]) -> Result<(), ExportError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ExportError::NotOpen("csv sink not started".to_string()))?;
        writer
            .write_record(record)
            .map_err(|e| ExportError::SerializationError(e.to_string()))
    }
}

impl Sink for CsvSink {
    fn start(&mut self, schemas: &[FieldSchema]) -> Result<(), ExportError> {
        let target = self
            .target
            .take()
            .ok_or_else(|| ExportError::NotOpen("csv sink already started".to_string()))?;
        let mut out = target.open()?;
        out.write_all(UTF8_BOM.as_bytes())?;
        self.writer = Some(csv::WriterBuilder::new().from_writer(out));

        let mut columns: Vec<String> = Vec::new();
        let mut kept: Vec<&FieldSchema> = Vec::new();
        for schema in schemas {
            let key = self.column_key(schema);
            if !columns.contains(&key) {
                columns.push(key);
                kept.push(schema);
            }
        }
        self.columns = columns.clone();
        self.write_record(&columns)?;

        if self.options.export_schema {
            let names: Vec<String> = kept
                .iter()
                .map(|s| {
                    if self.options.titles {
                        s.name_qual.clone()
                    } else {
                        s.column_title.clone()
                    }
                })
                .collect();
            let types: Vec<String> = kept.iter().map(|s| s.type_norm.clone()).collect();
            self.write_record(&names)?;
            self.write_record(&types)?;
        }
        debug!("CSV sink started with {} columns", self.columns.len());
        Ok(())
    }

    fn write(&mut self, row: &Row) -> Result<(), ExportError> {
        for key in row.keys() {
            if !self.columns.contains(key) && self.warned.insert(key.clone()) {
                warn!("Dropping unknown CSV column '{}'", key);
            }
        }
        let record: Vec<String> = self
            .columns
            .iter()
            .map(|c| row.get(c).map(display_value).unwrap_or_default())
            .collect();
        self.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("CSV sink closed after {} rows", self.rows);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::SharedBuffer;
    use serde_json::json;

    fn schemas() -> Vec<FieldSchema> {
        let mut host = FieldSchema::custom("specific_data.data.hostname");
        host.column_title = "Aggregated: Host Name".to_string();
        vec![host, FieldSchema::report("adapters_missing", "Adapters Missing")]
    }

    #[test]
    fn test_bom_header_and_rows() {
        let buffer = SharedBuffer::new();
        let mut sink = CsvSink::new(
            ExportTarget::Writer(Box::new(buffer.clone())),
            CsvSinkOptions::default(),
        );
        sink.start(&schemas()).unwrap();
        let row = json!({"specific_data.data.hostname": "h1", "adapters_missing": null})
            .as_object()
            .cloned()
            .unwrap();
        sink.write(&row).unwrap();
        sink.stop().unwrap();

        let text = buffer.to_string_lossy();
        assert!(text.starts_with('\u{feff}'));
        let lines: Vec<&str> = text.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(lines, vec!["specific_data.data.hostname,adapters_missing", "h1,"]);
    }

    #[test]
    fn test_schema_rows_with_titles() {
        let buffer = SharedBuffer::new();
        let mut sink = CsvSink::new(
            ExportTarget::Writer(Box::new(buffer.clone())),
            CsvSinkOptions {
                titles: true,
                export_schema: true,
            },
        );
        sink.start(&schemas()).unwrap();
        sink.stop().unwrap();

        let text = buffer.to_string_lossy();
        let lines: Vec<&str> = text.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(
            lines,
            vec![
                "Aggregated: Host Name,Report: Adapters Missing",
                "specific_data.data.hostname,adapters_missing",
                "string,list_string",
            ]
        );
    }

    #[test]
    fn test_write_before_start_fails() {
        let mut sink = CsvSink::new(ExportTarget::Stdout, CsvSinkOptions::default());
        assert!(matches!(
            sink.write(&Row::new()),
            Err(ExportError::NotOpen(_))
        ));
    }
}
