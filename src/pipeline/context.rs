//! Mutable state shared by the stage handlers of one pipeline

use super::transform;
use crate::config::StageConfig;
use crate::error::RowProcessingError;
use crate::export::Sink;
use crate::fetch::{PipelineState, TagWriter};
use crate::models::{FieldSchema, Row, TagBatch, TagOp};
use crate::validation::ExcludeSet;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A named per-row callback supplied by the caller.
pub type RowCallback = Box<dyn FnMut(&mut Row) -> anyhow::Result<()>>;

/// Everything the stage handlers read and write.
pub struct StageContext {
    pub config: StageConfig,
    /// Schemas of the requested fields
    pub schemas: Vec<FieldSchema>,
    /// Schemas of the report fields that will be added
    pub reports: Vec<FieldSchema>,
    /// Columns of the transformed rows
    pub final_schemas: Vec<FieldSchema>,
    /// Row key → schema, including nested sub-fields
    pub lookup: HashMap<String, FieldSchema>,
    pub excludes: ExcludeSet,
    pub explode: Option<FieldSchema>,
    /// Flatten every complex field
    pub flatten: bool,
    /// Rename keys to titles in the terminal export
    pub titles: bool,
    /// Raw names of every adapter specific namespace
    pub adapter_names: Vec<String>,
    pub whitelist: Vec<Regex>,
    pub filter: Option<String>,
    pub fields: Vec<String>,
    pub callbacks: Vec<(String, RowCallback)>,
    pub failures: Vec<RowProcessingError>,
    pub tags_add: TagBatch,
    pub tags_remove: TagBatch,
    pub tag_writer: Option<Box<dyn TagWriter>>,
    pub tags_added: usize,
    pub tags_removed: usize,
    pub sink: Option<Box<dyn Sink>>,
    warned: HashSet<String>,
}

impl StageContext {
    pub fn new(config: StageConfig, schemas: Vec<FieldSchema>, excludes: ExcludeSet) -> Self {
        let tags_add = TagBatch::new(TagOp::Add, &config.tags_add);
        let tags_remove = TagBatch::new(TagOp::Remove, &config.tags_remove);
        Self {
            config,
            lookup: transform::schema_lookup(&schemas, &[]),
            schemas,
            reports: Vec::new(),
            final_schemas: Vec::new(),
            excludes,
            explode: None,
            flatten: false,
            titles: false,
            adapter_names: Vec::new(),
            whitelist: Vec::new(),
            filter: None,
            fields: Vec::new(),
            callbacks: Vec::new(),
            failures: Vec::new(),
            tags_add,
            tags_remove,
            tag_writer: None,
            tags_added: 0,
            tags_removed: 0,
            sink: None,
            warned: HashSet::new(),
        }
    }

    /// Warn once per key for the life of the pipeline.
    pub fn warn_once(&mut self, key: &str, message: &str) {
        if self.warned.insert(key.to_string()) {
            warn!("{}", message);
        }
    }

    /// Drop rows past the `max_rows` budget.
    pub fn cap(rows: &mut Vec<Row>, state: &PipelineState) {
        if let Some(remaining) = state.rows_remaining() {
            rows.truncate(remaining as usize);
        }
    }

    pub fn null_fill(&self, row: &mut Row) {
        transform::null_fill(
            row,
            &self.schemas,
            &self.excludes,
            &self.config.field_null_value,
        );
    }

    /// Flatten every present complex field except the explode target.
    pub fn flatten(&mut self, row: &mut Row) {
        let mut collisions = Vec::new();
        for schema in &self.schemas {
            let is_target = self
                .explode
                .as_ref()
                .is_some_and(|e| e.name_qual == schema.name_qual);
            if !schema.is_complex
                || is_target
                || self.excludes.is_excluded(schema)
                || !row.contains_key(&schema.name_qual)
            {
                continue;
            }
            collisions.extend(transform::flatten_field(
                row,
                schema,
                &self.excludes,
                &self.config.field_null_value,
            ));
        }
        for key in collisions {
            let message = format!("Flattened field '{}' overwrote an existing value", key);
            self.warn_once(&key, &message);
        }
    }

    pub fn explode(&self, row: Row) -> Vec<Row> {
        match &self.explode {
            Some(schema) => transform::explode(
                row,
                schema,
                &self.excludes,
                &self.config.field_null_value,
            ),
            None => vec![row],
        }
    }

    pub fn join(&self, row: &mut Row) {
        transform::join_values(
            row,
            &self.config.field_join_value,
            self.config.field_join_trim,
        );
    }

    /// Rename keys to column titles, warning once per colliding title.
    pub fn rename_titles(&mut self, row: Row) -> Row {
        let (row, collisions) = transform::rename_titles(row, &self.lookup);
        for title in collisions {
            let message = format!(
                "Column title '{}' is shared by several fields, keeping the last",
                title
            );
            self.warn_once(&format!("title:{}", title), &message);
        }
        row
    }
}
