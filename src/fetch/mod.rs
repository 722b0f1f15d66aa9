//! Paged retrieval
//!
//! The transport boundary, the per-run paging state and the fetcher that
//! drives rows through the stage pipeline.

pub mod pager;
pub mod state;
pub mod transport;

pub use pager::PagedFetcher;
pub use state::{PipelineState, StopReason};
#[cfg(feature = "api-backend")]
pub use transport::HttpTransport;
pub use transport::{
    AssetTransport, MemoryTransport, PageInfo, PageRequest, PageResponse, RecordingTagWriter,
    TagCall, TagWriter,
};
