//! Paging state of one run
//!
//! Owned by the [`PagedFetcher`](super::PagedFetcher); the stage pipeline
//! only ever sees it by shared reference.

use crate::config::{FetchConfig, MAX_PAGE_SIZE};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page came back with no rows
    EmptyPage,
    /// `max_pages` pages were fetched
    MaxPages,
    /// `max_rows` rows were processed
    MaxRows,
    /// The transport failed
    TransportError,
    /// A row could not be processed
    RowError,
    /// The fetcher was dropped before the run finished
    Dropped,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::EmptyPage => "no more rows",
            StopReason::MaxPages => "max_pages reached",
            StopReason::MaxRows => "max_rows reached",
            StopReason::TransportError => "transport error",
            StopReason::RowError => "row processing error",
            StopReason::Dropped => "fetcher dropped",
        };
        f.write_str(reason)
    }
}

/// Counters, limits and timers of a paged run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub page_size: usize,
    /// Server page number of the last fetched page (1-based)
    pub page_number: usize,
    /// Pages fetched by this run
    pub pages_fetched: usize,
    pub rows_fetched: u64,
    pub rows_processed: u64,
    /// Rows of the last fetched page
    pub rows_page: usize,
    pub row_start: usize,
    pub max_rows: Option<u64>,
    pub max_pages: Option<usize>,
    pub page_sleep: Duration,
    pub rows_total: Option<u64>,
    pub pages_total: Option<u64>,
    pub done: bool,
    pub stop_reason: Option<StopReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_page_duration: Option<Duration>,
    started: Option<Instant>,
    page_started: Option<Instant>,
}

impl PipelineState {
    /// Build the state for a new run.
    ///
    /// The page size is clamped to `1..=2000` and shrinks to `max_rows` when
    /// that is smaller. A `row_start` offset moves the page number forward.
    /// A limit of 0 means no limit.
    pub fn new(config: &FetchConfig) -> Self {
        let max_rows = config.max_rows.filter(|max| *max > 0);
        let max_pages = config.max_pages.filter(|max| *max > 0);
        let mut page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);
        if let Some(max_rows) = max_rows
            && (max_rows as usize) < page_size
        {
            page_size = max_rows as usize;
        }
        let page_number = if config.row_start >= 1 {
            config.row_start.div_ceil(page_size)
        } else {
            0
        };
        Self {
            run_id: Uuid::new_v4(),
            page_size,
            page_number,
            pages_fetched: 0,
            rows_fetched: 0,
            rows_processed: 0,
            rows_page: 0,
            row_start: config.row_start,
            max_rows,
            max_pages,
            page_sleep: Duration::from_millis(config.page_sleep_ms),
            rows_total: None,
            pages_total: None,
            done: false,
            stop_reason: None,
            started_at: None,
            stopped_at: None,
            last_page_duration: None,
            started: None,
            page_started: None,
        }
    }

    /// Server side offset of the next page.
    pub fn skip(&self) -> usize {
        self.row_start + self.rows_fetched as usize
    }

    /// Rows that may still be processed, if limited.
    pub fn rows_remaining(&self) -> Option<u64> {
        self.max_rows
            .map(|max| max.saturating_sub(self.rows_processed))
    }

    pub fn max_rows_reached(&self) -> bool {
        matches!(self.rows_remaining(), Some(0))
    }

    pub fn max_pages_reached(&self) -> bool {
        self.max_pages
            .is_some_and(|max| self.pages_fetched >= max)
    }

    pub(crate) fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
    }

    pub(crate) fn page_start(&mut self) {
        self.page_started = Some(Instant::now());
    }

    pub(crate) fn page_end(&mut self, rows: usize, rows_total: Option<u64>, pages_total: Option<u64>) {
        self.pages_fetched += 1;
        self.page_number += 1;
        self.rows_page = rows;
        self.rows_fetched += rows as u64;
        if rows_total.is_some() {
            self.rows_total = rows_total;
        }
        if pages_total.is_some() {
            self.pages_total = pages_total;
        }
        self.last_page_duration = self.page_started.take().map(|t| t.elapsed());
    }

    /// Mark the run finished. The first reason wins.
    pub(crate) fn stop(&mut self, reason: StopReason) {
        if self.done {
            return;
        }
        self.done = true;
        self.stop_reason = Some(reason);
        self.stopped_at = Some(Utc::now());
    }

    /// Time since the run started, or until it stopped.
    pub fn duration(&self) -> Duration {
        match (self.started, self.started_at, self.stopped_at) {
            (Some(_), Some(start), Some(stop)) => (stop - start).to_std().unwrap_or_default(),
            (Some(started), _, _) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} ({} fetched), rows fetched {}, rows processed {}",
            self.page_number, self.pages_fetched, self.rows_fetched, self.rows_processed
        )?;
        if let Some(total) = self.rows_total {
            write!(f, " of {}", total)?;
        }
        if let Some(reason) = self.stop_reason {
            write!(f, ", stopped: {}", reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_shrinks_to_max_rows() {
        let state = PipelineState::new(&FetchConfig {
            page_size: 100,
            max_rows: Some(7),
            ..Default::default()
        });
        assert_eq!(state.page_size, 7);
        assert_eq!(state.rows_remaining(), Some(7));
    }

    #[test]
    fn test_zero_limits_mean_unlimited() {
        let state = PipelineState::new(&FetchConfig {
            page_size: 50,
            max_rows: Some(0),
            max_pages: Some(0),
            ..Default::default()
        });
        assert_eq!(state.max_rows, None);
        assert_eq!(state.max_pages, None);
        assert_eq!(state.page_size, 50);
        assert_eq!(state.rows_remaining(), None);
        assert!(!state.max_rows_reached());
        assert!(!state.max_pages_reached());
    }

    #[test]
    fn test_page_size_clamped() {
        let state = PipelineState::new(&FetchConfig {
            page_size: 5000,
            ..Default::default()
        });
        assert_eq!(state.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_row_start_moves_page_number_and_skip() {
        let state = PipelineState::new(&FetchConfig {
            page_size: 10,
            row_start: 25,
            ..Default::default()
        });
        assert_eq!(state.page_number, 3);
        assert_eq!(state.skip(), 25);
    }

    #[test]
    fn test_limits() {
        let mut state = PipelineState::new(&FetchConfig {
            page_size: 2,
            max_rows: Some(3),
            max_pages: Some(1),
            ..Default::default()
        });
        assert!(!state.max_pages_reached());
        state.page_start();
        state.page_end(2, Some(10), Some(5));
        assert!(state.max_pages_reached());
        assert_eq!(state.skip(), 2);
        state.rows_processed = 3;
        assert!(state.max_rows_reached());
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let mut state = PipelineState::new(&FetchConfig::default());
        state.stop(StopReason::MaxRows);
        state.stop(StopReason::Dropped);
        assert_eq!(state.stop_reason, Some(StopReason::MaxRows));
        assert!(state.done);
    }
}
