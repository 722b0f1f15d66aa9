//! Paged asset fetcher
//!
//! Pulls pages from an [`AssetTransport`] and pushes each row through a
//! [`StagePipeline`], yielding the rows that come out the other end. The
//! next page is only requested once every row of the current one has been
//! consumed.

use super::state::{PipelineState, StopReason};
use super::transport::{AssetTransport, PageRequest};
use crate::config::FetchConfig;
use crate::error::AssetError;
use crate::models::{Row, RowEvent};
use crate::pipeline::{PipelineStatus, RunSummary, StagePipeline};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{Span, debug, info, info_span, warn};

/// Iterator over processed rows.
///
/// Stops on an empty page, after `max_pages` pages or after `max_rows`
/// rows. However it stops, including by being dropped, the pipeline sees
/// the end of stream exactly once.
///
/// `max_rows` is exact: once it is reached the rest of the current page,
/// and of an explode fan-out, is discarded without being processed.
pub struct PagedFetcher<T: AssetTransport> {
    transport: T,
    pipeline: StagePipeline,
    state: PipelineState,
    filter: Option<String>,
    fields: Vec<String>,
    page: VecDeque<Value>,
    pending: VecDeque<Row>,
    page_progress: Option<u64>,
    finished: bool,
    span: Span,
}

impl<T: AssetTransport> PagedFetcher<T> {
    pub fn new(transport: T, pipeline: StagePipeline, config: &FetchConfig, fields: Vec<String>) -> Self {
        let state = PipelineState::new(config);
        let span = info_span!("paged_fetcher", run_id = %state.run_id);
        Self {
            transport,
            pipeline,
            state,
            filter: config.filter.clone(),
            fields,
            page: VecDeque::new(),
            pending: VecDeque::new(),
            page_progress: None,
            finished: false,
            span,
        }
    }

    /// Log a progress line every `rows` processed rows.
    pub fn with_page_progress(mut self, rows: Option<u64>) -> Self {
        self.page_progress = rows.filter(|r| *r > 0);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn pipeline(&self) -> &StagePipeline {
        &self.pipeline
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Summary of a finished run.
    pub fn take_summary(&mut self) -> Option<RunSummary> {
        self.pipeline.take_summary()
    }

    /// Consume every row and return the run summary.
    pub fn run(mut self) -> Result<RunSummary, AssetError> {
        for row in &mut self {
            row?;
        }
        self.take_summary()
            .ok_or_else(|| AssetError::Lifecycle("run finished without a summary".to_string()))
    }

    fn finish(&mut self, reason: StopReason) -> Option<Result<Row, AssetError>> {
        self.state.stop(reason);
        self.finished = true;
        info!("Fetch stopped: {}", self.state);
        if self.pipeline.status() != PipelineStatus::Running {
            return None;
        }
        match self.pipeline.process(RowEvent::EndOfStream, &self.state) {
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        }
    }

    fn fail(&mut self, reason: StopReason, err: AssetError) -> Option<Result<Row, AssetError>> {
        self.state.stop(reason);
        self.finished = true;
        warn!("Fetch aborted: {}: {}", reason, err);
        if self.pipeline.status() == PipelineStatus::Running
            && let Err(stop_err) = self.pipeline.process(RowEvent::EndOfStream, &self.state)
        {
            warn!("Pipeline stop after failure also failed: {}", stop_err);
        }
        Some(Err(err))
    }

    fn emit(&mut self, row: Row) -> Row {
        self.state.rows_processed += 1;
        if let Some(every) = self.page_progress
            && self.state.rows_processed % every == 0
        {
            info!("Progress: {}", self.state);
        }
        row
    }

    fn fetch_page(&mut self) -> Result<usize, AssetError> {
        if self.state.pages_fetched > 0 && !self.state.page_sleep.is_zero() {
            debug!("Sleeping {:?} between pages", self.state.page_sleep);
            std::thread::sleep(self.state.page_sleep);
        }
        let request = PageRequest {
            filter: self.filter.clone(),
            fields: self.fields.clone(),
            skip: self.state.skip(),
            limit: self.state.page_size,
        };
        self.state.page_start();
        let response = self.transport.fetch_page(&request)?;
        let rows = response.assets.len();
        self.state
            .page_end(rows, response.page.total_resources, response.page.total_pages);
        debug!(
            "Fetched page {} with {} rows in {:?}",
            self.state.page_number,
            rows,
            self.state.last_page_duration.unwrap_or_default()
        );
        self.page.extend(response.assets);
        Ok(rows)
    }
}

impl<T: AssetTransport> Iterator for PagedFetcher<T> {
    type Item = Result<Row, AssetError>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.span.clone();
        let _enter = span.enter();
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(self.emit(row)));
            }
            if self.finished {
                return None;
            }
            if self.pipeline.status() == PipelineStatus::NotStarted {
                self.state.start();
                if let Err(err) = self.pipeline.start(&self.state) {
                    return self.fail(StopReason::RowError, err);
                }
            }
            if self.state.max_rows_reached() {
                return self.finish(StopReason::MaxRows);
            }

            if let Some(value) = self.page.pop_front() {
                let row = match value {
                    Value::Object(row) => row,
                    other => {
                        let err = AssetError::InvalidRow(format!("expected an object, got {}", other));
                        return self.fail(StopReason::RowError, err);
                    }
                };
                match self.pipeline.process(RowEvent::Row(row), &self.state) {
                    Ok(rows) => self.pending.extend(rows),
                    Err(err) => return self.fail(StopReason::RowError, err),
                }
                continue;
            }

            if self.state.max_pages_reached() {
                return self.finish(StopReason::MaxPages);
            }
            match self.fetch_page() {
                Ok(0) => return self.finish(StopReason::EmptyPage),
                Ok(_) => {}
                Err(err) => return self.fail(StopReason::TransportError, err),
            }
        }
    }
}

impl<T: AssetTransport> Drop for PagedFetcher<T> {
    fn drop(&mut self) {
        if self.finished || self.pipeline.status() != PipelineStatus::Running {
            return;
        }
        let _enter = self.span.enter();
        self.state.stop(StopReason::Dropped);
        self.finished = true;
        debug!("Fetcher dropped before the end of the stream");
        if let Err(err) = self.pipeline.process(RowEvent::EndOfStream, &self.state) {
            warn!("Pipeline stop on drop failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::fetch::MemoryTransport;
    use crate::models::FieldSchema;
    use serde_json::json;

    fn fetcher(assets: Vec<Value>, config: FetchConfig) -> PagedFetcher<MemoryTransport> {
        let pipeline = StagePipeline::builder(StageConfig::default(), vec![FieldSchema::custom("id")])
            .build()
            .unwrap();
        PagedFetcher::new(MemoryTransport::new(json!({}), assets), pipeline, &config, vec!["id".to_string()])
    }

    fn assets(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "id": i })).collect()
    }

    #[test]
    fn test_pages_until_empty() {
        let mut fetcher = fetcher(
            assets(5),
            FetchConfig {
                page_size: 2,
                ..Default::default()
            },
        );
        let rows: Vec<Row> = fetcher.by_ref().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4]["id"], json!(4));
        let skips: Vec<usize> = fetcher.transport().requests().iter().map(|r| r.skip).collect();
        assert_eq!(skips, vec![0, 2, 4, 6]);
        assert_eq!(fetcher.state().stop_reason, Some(StopReason::EmptyPage));
        assert_eq!(fetcher.take_summary().unwrap().rows_out, 5);
    }

    #[test]
    fn test_max_pages() {
        let mut fetcher = fetcher(
            assets(10),
            FetchConfig {
                page_size: 3,
                max_pages: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(fetcher.by_ref().count(), 6);
        assert_eq!(fetcher.state().stop_reason, Some(StopReason::MaxPages));
        assert_eq!(fetcher.transport().requests().len(), 2);
    }

    #[test]
    fn test_max_rows_shrinks_page() {
        let mut fetcher = fetcher(
            assets(10),
            FetchConfig {
                page_size: 4,
                max_rows: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(fetcher.by_ref().count(), 3);
        assert_eq!(fetcher.state().stop_reason, Some(StopReason::MaxRows));
        assert_eq!(fetcher.transport().requests()[0].limit, 3);
    }

    #[test]
    fn test_zero_limits_fetch_everything() {
        let mut fetcher = fetcher(
            assets(5),
            FetchConfig {
                page_size: 2,
                max_rows: Some(0),
                max_pages: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(fetcher.by_ref().count(), 5);
        assert_eq!(fetcher.state().stop_reason, Some(StopReason::EmptyPage));
        assert_eq!(fetcher.transport().requests()[0].limit, 2);
    }

    #[test]
    fn test_row_start_sets_skip() {
        let mut fetcher = fetcher(
            assets(5),
            FetchConfig {
                page_size: 10,
                row_start: 3,
                ..Default::default()
            },
        );
        assert_eq!(fetcher.by_ref().count(), 2);
        assert_eq!(fetcher.transport().requests()[0].skip, 3);
    }

    #[test]
    fn test_non_object_row_is_invalid() {
        let mut fetcher = fetcher(vec![json!([1, 2])], FetchConfig::default());
        assert!(matches!(fetcher.next(), Some(Err(AssetError::InvalidRow(_)))));
        assert!(fetcher.next().is_none());
        assert_eq!(fetcher.pipeline().status(), PipelineStatus::Stopped);
    }

    #[test]
    fn test_transport_error_stops_pipeline() {
        let pipeline = StagePipeline::builder(StageConfig::default(), vec![])
            .build()
            .unwrap();
        let transport = MemoryTransport::new(json!({}), assets(3)).fail_on_page(1, "timeout");
        let config = FetchConfig {
            page_size: 2,
            ..Default::default()
        };
        let mut fetcher = PagedFetcher::new(transport, pipeline, &config, vec![]);
        let results: Vec<_> = fetcher.by_ref().collect();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[2], Err(AssetError::Transport(_))));
        assert_eq!(fetcher.state().stop_reason, Some(StopReason::TransportError));
        assert_eq!(fetcher.pipeline().status(), PipelineStatus::Stopped);
    }
}
