//! Stage pipeline
//!
//! Transforms rows one at a time through an ordered set of named stages
//! selected from the [`registry`]. The schedule, export target and explode
//! field are all validated by [`PipelineBuilder::build`], so configuration
//! mistakes surface before the first page is fetched.
//!
//! # Lifecycle
//!
//! `NotStarted → Running → Stopped`. [`StagePipeline::start`] runs the start
//! bookends, rows are accepted only while running, and
//! [`RowEvent::EndOfStream`] (or [`StagePipeline::stop`]) runs the stop
//! bookends exactly once.

pub mod context;
pub mod registry;
pub mod stages;
pub mod transform;

pub use context::{RowCallback, StageContext};
pub use registry::{BookendDescriptor, STAGES, Schedule, StageDescriptor, stage_names};
pub use stages::{ADAPTERS_FIELD, ASSET_ID_FIELD};

use crate::config::StageConfig;
use crate::error::{AssetError, ConfigurationError, RowProcessingError};
use crate::export::{CsvSink, CsvSinkOptions, ExportTarget, JsonSink, Sink};
use crate::fetch::{PipelineState, TagWriter};
use crate::models::{FieldSchema, Row, RowEvent, adapters_missing_schema, software_whitelist_schemas};
use crate::validation::{ExcludeSet, compile_search};
use std::collections::HashSet;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span, warn};

/// Where the pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    NotStarted,
    Running,
    Stopped,
}

/// Totals reported when the pipeline stops.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Rows handed to the pipeline
    pub rows_in: u64,
    /// Rows that came out of the last stage
    pub rows_out: u64,
    /// Callback failures skipped in lenient mode
    pub failures: Vec<RowProcessingError>,
    pub tags_added: usize,
    pub tags_removed: usize,
    pub duration: Duration,
    /// Per-row stages that ran, in order
    pub stages: Vec<String>,
}

/// Builder for a [`StagePipeline`].
pub struct PipelineBuilder {
    config: StageConfig,
    schemas: Vec<FieldSchema>,
    callbacks: Vec<(String, RowCallback)>,
    tag_writer: Option<Box<dyn TagWriter>>,
    sink: Option<Box<dyn Sink>>,
    target: Option<ExportTarget>,
    adapter_names: Vec<String>,
    filter: Option<String>,
    fields: Vec<String>,
    span: Option<Span>,
}

impl PipelineBuilder {
    /// Register a per-row callback. Callbacks run in registration order.
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

    /// Use a custom sink instead of the configured CSV or JSON one.
    ///
    /// Selects the JSON export stage when no export is configured.
    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Write the configured export to `writer` instead of a file or stdout.
    pub fn with_export_writer(self, writer: impl Write + Send + 'static) -> Self {
        self.with_export_target(ExportTarget::Writer(Box::new(writer)))
    }

    pub fn with_export_target(mut self, target: ExportTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Raw names of every adapter, for the missing adapters report.
    pub fn with_adapter_names(mut self, names: Vec<String>) -> Self {
        self.adapter_names = names;
        self
    }

    /// Query details logged by the first page stage.
    pub fn with_query(mut self, filter: Option<String>, fields: Vec<String>) -> Self {
        self.filter = filter;
        self.fields = fields;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    fn stage_selection(&self) -> Vec<String> {
        let config = &self.config;
        let mut names: Vec<&str> = vec!["first_page"];
        if !self.callbacks.is_empty() {
            names.push("custom_cbs");
        }
        if !config.tags_add.is_empty() {
            names.push("tags_add");
        }
        if !config.tags_remove.is_empty() {
            names.push("tags_remove");
        }
        if config.report_adapters_missing {
            names.push("report_adapters_missing");
        }
        if !config.report_software_whitelist.is_empty() {
            names.push("report_software_whitelist");
        }
        if !config.field_excludes.is_empty() {
            names.push("field_excludes");
        }
        if config.field_null {
            names.push("field_null");
        }
        if config.field_flatten {
            names.push("field_flatten");
        }
        if config.field_explode.is_some() {
            names.push("field_explode");
        }
        if config.field_join {
            names.push("field_join");
        }
        if config.field_titles == Some(true) {
            names.push("field_titles");
        }
        match config.export {
            Some(format) => names.push(format.stage_name()),
            None if self.sink.is_some() => names.push("export_json"),
            None => {}
        }
        let mut names: Vec<String> = names.into_iter().map(str::to_string).collect();
        names.extend(config.stages.iter().cloned());
        names
    }

    fn resolve_explode(&self) -> Result<Option<FieldSchema>, ConfigurationError> {
        let Some(field) = self.config.field_explode.as_deref() else {
            return Ok(None);
        };
        let found = self.schemas.iter().find(|s| {
            s.match_keys().iter().any(|k| k.eq_ignore_ascii_case(field)) || s.column_name == field
        });
        match found {
            Some(schema) => Ok(Some(schema.clone())),
            None => Err(ConfigurationError::UnknownExplodeField {
                field: field.to_string(),
                valid: self
                    .schemas
                    .iter()
                    .map(|s| s.name_qual.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Validate the configuration and build the pipeline.
    pub fn build(mut self) -> Result<StagePipeline, ConfigurationError> {
        let span = self.span.take().unwrap_or_else(|| info_span!("stage_pipeline"));
        let _enter = span.enter();

        let schedule = Schedule::resolve(&self.stage_selection())?;
        let tagging = schedule.is_selected("tags_add") || schedule.is_selected("tags_remove");
        if tagging && self.tag_writer.is_none() {
            return Err(ConfigurationError::MissingTagWriter);
        }

        let excludes = ExcludeSet::new(&self.config.field_excludes)?;
        let whitelist = self
            .config
            .report_software_whitelist
            .iter()
            .map(|p| compile_search(p))
            .collect::<Result<Vec<_>, _>>()?;
        let explode = if schedule.is_selected("field_explode") {
            self.resolve_explode()?
        } else {
            None
        };

        let mut reports = Vec::new();
        if schedule.is_selected("report_adapters_missing") {
            reports.push(adapters_missing_schema());
        }
        if schedule.is_selected("report_software_whitelist") {
            reports.extend(software_whitelist_schemas());
        }

        let csv = schedule.is_selected("export_csv");
        let flatten = csv || schedule.is_selected("field_flatten");
        let titles = if csv {
            self.config.field_titles != Some(false)
        } else {
            schedule.is_selected("field_titles")
        };

        let sink: Option<Box<dyn Sink>> = match self.sink.take() {
            Some(sink) => Some(sink),
            None if csv || schedule.is_selected("export_json") => {
                let target = match self.target.take() {
                    Some(target) => target,
                    None => ExportTarget::from_settings(
                        self.config.export_file.as_deref(),
                        &self.config.export_path,
                        self.config.export_overwrite,
                    ),
                };
                target.check()?;
                debug!("Exporting to {}", target.describe());
                if csv {
                    let options = CsvSinkOptions {
                        titles,
                        export_schema: self.config.export_schema,
                    };
                    Some(Box::new(CsvSink::new(target, options)))
                } else {
                    Some(Box::new(JsonSink::new(target)))
                }
            }
            None => None,
        };

        for line in self.config.describe() {
            debug!("{}", line);
        }
        info!("Pipeline stages: {:?}", schedule.stage_names());

        let mut ctx = StageContext::new(self.config, self.schemas, excludes);
        ctx.final_schemas =
            transform::final_schemas(&ctx.schemas, &ctx.excludes, explode.as_ref(), flatten, &reports);
        ctx.lookup = transform::schema_lookup(&ctx.schemas, &reports);
        ctx.reports = reports;
        ctx.explode = explode;
        ctx.flatten = flatten;
        ctx.titles = titles;
        ctx.whitelist = whitelist;
        ctx.adapter_names = self.adapter_names;
        ctx.filter = self.filter;
        ctx.fields = self.fields;
        ctx.callbacks = self.callbacks;
        ctx.tag_writer = self.tag_writer;
        ctx.sink = sink;

        drop(_enter);
        Ok(StagePipeline {
            schedule,
            ctx,
            status: PipelineStatus::NotStarted,
            ran_once: HashSet::new(),
            summary: None,
            rows_in: 0,
            rows_out: 0,
            started: None,
            span,
        })
    }
}

/// Ordered row transformation pipeline.
pub struct StagePipeline {
    schedule: Schedule,
    ctx: StageContext,
    status: PipelineStatus,
    ran_once: HashSet<&'static str>,
    summary: Option<RunSummary>,
    rows_in: u64,
    rows_out: u64,
    started: Option<Instant>,
    span: Span,
}

impl StagePipeline {
    /// Start building a pipeline over the selected field schemas.
    pub fn builder(config: StageConfig, schemas: Vec<FieldSchema>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            schemas,
            callbacks: Vec::new(),
            tag_writer: None,
            sink: None,
            target: None,
            adapter_names: Vec::new(),
            filter: None,
            fields: Vec::new(),
            span: None,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Per-row stages in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.schedule.stage_names()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Columns the transformed rows carry.
    pub fn final_schemas(&self) -> &[FieldSchema] {
        &self.ctx.final_schemas
    }

    /// Callback failures recorded so far in lenient mode.
    pub fn failures(&self) -> &[RowProcessingError] {
        &self.ctx.failures
    }

    /// Run the start bookends.
    pub fn start(&mut self, state: &PipelineState) -> Result<(), AssetError> {
        let _enter = self.span.enter();
        if self.status != PipelineStatus::NotStarted {
            return Err(AssetError::Lifecycle(format!(
                "cannot start a pipeline that is {:?}",
                self.status
            )));
        }
        self.started = Some(Instant::now());
        for bookend in &self.schedule.starts {
            debug!("Running start bookend {}", bookend.name);
            if let Err(err) = (bookend.handler)(&mut self.ctx, state) {
                self.status = PipelineStatus::Stopped;
                return Err(err);
            }
        }
        self.status = PipelineStatus::Running;
        Ok(())
    }

    /// Dispatch one event.
    ///
    /// A row runs through every scheduled stage and comes out as zero or
    /// more rows, never more than the `max_rows` budget left in `state`.
    /// The end of stream stops the pipeline and yields nothing.
    pub fn process(&mut self, event: RowEvent, state: &PipelineState) -> Result<Vec<Row>, AssetError> {
        match self.status {
            PipelineStatus::Running => {}
            status => {
                return Err(AssetError::Lifecycle(format!(
                    "cannot process rows while {:?}",
                    status
                )));
            }
        }
        let row = match event {
            RowEvent::Row(row) => row,
            RowEvent::EndOfStream => {
                self.stop(state)?;
                return Ok(Vec::new());
            }
        };

        let _enter = self.span.enter();
        self.rows_in += 1;
        let mut rows = vec![row];
        for stage in &self.schedule.stages {
            if stage.run_once && !self.ran_once.insert(stage.name) {
                continue;
            }
            let mut next = Vec::with_capacity(rows.len());
            for row in rows {
                next.extend((stage.handler)(&mut self.ctx, row, state)?);
            }
            StageContext::cap(&mut next, state);
            rows = next;
            if rows.is_empty() {
                break;
            }
        }
        self.rows_out += rows.len() as u64;
        Ok(rows)
    }

    /// Run the stop bookends and build the run summary.
    ///
    /// Every stop bookend runs even if an earlier one fails; the first
    /// failure is returned.
    pub fn stop(&mut self, state: &PipelineState) -> Result<&RunSummary, AssetError> {
        let _enter = self.span.enter();
        match self.status {
            PipelineStatus::Running => {}
            status => {
                return Err(AssetError::Lifecycle(format!(
                    "cannot stop a pipeline that is {:?}",
                    status
                )));
            }
        }
        self.status = PipelineStatus::Stopped;

        let mut first_err = None;
        for bookend in &self.schedule.stops {
            debug!("Running stop bookend {}", bookend.name);
            if let Err(err) = (bookend.handler)(&mut self.ctx, state) {
                warn!("Stop bookend {} failed: {}", bookend.name, err);
                first_err.get_or_insert(err);
            }
        }

        let summary = RunSummary {
            rows_in: self.rows_in,
            rows_out: self.rows_out,
            failures: std::mem::take(&mut self.ctx.failures),
            tags_added: self.ctx.tags_added,
            tags_removed: self.ctx.tags_removed,
            duration: self.started.map(|t| t.elapsed()).unwrap_or_default(),
            stages: self.stage_names().iter().map(|s| s.to_string()).collect(),
        };
        info!(
            "Pipeline stopped: {} rows in, {} rows out, {} failures in {:?}",
            summary.rows_in,
            summary.rows_out,
            summary.failures.len(),
            summary.duration
        );
        let summary = self.summary.insert(summary);
        match first_err {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Take the summary of a stopped pipeline.
    pub fn take_summary(&mut self) -> Option<RunSummary> {
        self.summary.take()
    }
}
