//! Asset runner
//!
//! Wires the pieces together for one run: fetch the field schemas, build
//! the catalog, resolve the requested fields, build the stage pipeline and
//! hand it to a [`PagedFetcher`]. Every configuration problem is reported
//! before the first page is requested.

use crate::config::PipelineConfig;
use crate::error::AssetError;
use crate::export::{ExportTarget, Sink};
use crate::fetch::{AssetTransport, PagedFetcher, TagWriter};
use crate::import::FieldSchemaImporter;
use crate::models::{INSTALLED_SOFTWARE_FIELD, Row};
use crate::pipeline::{RowCallback, RunSummary, StagePipeline};
use crate::validation::{FieldSpec, QualifiedFieldResolver, ResolveMode};
use std::io::Write;
use tracing::{Span, info, info_span};

/// Fields requested on every run, ahead of the caller's fields.
pub const ALWAYS_FIELDS: &[&str] = &["internal_axon_id", "adapters", "adapter_list_length"];

/// Runs a configured retrieval against a transport.
pub struct AssetRunner {
    config: PipelineConfig,
    callbacks: Vec<(String, RowCallback)>,
    tag_writer: Option<Box<dyn TagWriter>>,
    sink: Option<Box<dyn Sink>>,
    target: Option<ExportTarget>,
    span: Span,
}

impl AssetRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            callbacks: Vec::new(),
            tag_writer: None,
            sink: None,
            target: None,
            span: info_span!("asset_runner"),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn with_callback<F>(mut self, name: &str, callback: F) -> Self
    where
        F: FnMut(&mut Row) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.push((name.to_string(), Box::new(callback)));
        self
    }

    pub fn with_tag_writer(mut self, writer: impl TagWriter + 'static) -> Self {
        self.tag_writer = Some(Box::new(writer));
        self
    }

    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn with_export_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.target = Some(ExportTarget::Writer(Box::new(writer)));
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Field specs for the run: the always-selected fields, the configured
    /// fields, and the installed software field when a whitelist is set.
    pub fn field_specs(&self) -> Result<Vec<FieldSpec>, AssetError> {
        let mut specs: Vec<FieldSpec> = ALWAYS_FIELDS
            .iter()
            .map(|f| FieldSpec::Manual(f.to_string()))
            .collect();
        for field in &self.config.fetch.fields {
            specs.push(FieldSpec::parse(field)?);
        }
        if !self.config.stages.report_software_whitelist.is_empty() {
            specs.push(FieldSpec::Manual(INSTALLED_SOFTWARE_FIELD.to_string()));
        }
        Ok(specs)
    }

    /// Resolve everything and return a fetcher ready to iterate.
    ///
    /// Only the field schemas are fetched here; no page is requested.
    pub fn prepare<T: AssetTransport>(self, mut transport: T) -> Result<PagedFetcher<T>, AssetError> {
        let span = self.span.clone();
        let _enter = span.enter();

        let raw = transport.fetch_field_schemas()?;
        let catalog = FieldSchemaImporter::new().parse(&raw)?;
        info!(
            "Loaded {} fields across {} adapters",
            catalog.len(),
            catalog.adapters().len()
        );

        let mode = if self.config.fetch.fields_lenient {
            ResolveMode::Lenient
        } else {
            ResolveMode::Strict
        };
        let resolver = QualifiedFieldResolver::new(&catalog)
            .with_mode(mode)
            .with_span(info_span!(parent: &span, "field_resolver"));
        let names = resolver.resolve(&self.field_specs()?)?;
        let schemas = resolver.schemas(&names);

        let mut builder = StagePipeline::builder(self.config.stages.clone(), schemas)
            .with_adapter_names(catalog.adapter_raw_names())
            .with_query(self.config.fetch.filter.clone(), names.clone())
            .with_span(info_span!(parent: &span, "stage_pipeline"));
        for (name, callback) in self.callbacks {
            builder = builder.with_callback(&name, callback);
        }
        if let Some(writer) = self.tag_writer {
            builder = builder.with_tag_writer(writer);
        }
        if let Some(sink) = self.sink {
            builder = builder.with_sink(sink);
        }
        if let Some(target) = self.target {
            builder = builder.with_export_target(target);
        }
        let pipeline = builder.build()?;

        let fetcher = PagedFetcher::new(transport, pipeline, &self.config.fetch, names)
            .with_page_progress(self.config.stages.page_progress)
            .with_span(info_span!(parent: &span, "paged_fetcher"));
        Ok(fetcher)
    }

    /// Run to completion and return the summary.
    pub fn run<T: AssetTransport>(self, transport: T) -> Result<RunSummary, AssetError> {
        self.prepare(transport)?.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportFormat, FetchConfig, StageConfig};
    use crate::error::ConfigurationError;
    use crate::fetch::MemoryTransport;
    use serde_json::json;

    fn schemas() -> serde_json::Value {
        json!({
            "generic": [
                {"name": "specific_data.data.hostname", "title": "Host Name", "type": "string"}
            ],
            "specific": {}
        })
    }

    #[test]
    fn test_always_fields_come_first() {
        let config = PipelineConfig {
            fetch: FetchConfig {
                fields: vec!["hostname".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let fetcher = AssetRunner::new(config)
            .prepare(MemoryTransport::new(schemas(), vec![]))
            .unwrap();
        let pipeline_fields: Vec<String> = fetcher
            .pipeline()
            .final_schemas()
            .iter()
            .map(|s| s.name_qual.clone())
            .collect();
        assert_eq!(
            pipeline_fields,
            vec![
                "internal_axon_id",
                "adapters",
                "adapter_list_length",
                "specific_data.data.hostname"
            ]
        );
        assert!(fetcher.transport().requests().is_empty());
    }

    #[test]
    fn test_unknown_field_fails_before_fetch() {
        let config = PipelineConfig {
            fetch: FetchConfig {
                fields: vec!["hostnme".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let err = AssetRunner::new(config)
            .prepare(MemoryTransport::new(schemas(), vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, AssetError::NotFound(_)));
    }

    #[test]
    fn test_export_conflict_fails_before_fetch() {
        let config = PipelineConfig {
            stages: StageConfig {
                export: Some(ExportFormat::Csv),
                stages: vec!["export_json".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let err = AssetRunner::new(config)
            .prepare(MemoryTransport::new(schemas(), vec![]))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            AssetError::Configuration(ConfigurationError::StageConflict { .. })
        ));
    }
}
