//! Transport boundary
//!
//! The fetcher talks to the asset service only through [`AssetTransport`]
//! and the tag stages only through [`TagWriter`]. Authentication and the
//! HTTP details live behind these traits.

use crate::error::TransportError;
use crate::models::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One paged asset query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub fields: Vec<String>,
    pub skip: usize,
    pub limit: usize,
}

/// Server page metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub total_resources: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One page of assets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub assets: Vec<Value>,
    #[serde(default)]
    pub page: PageInfo,
}

/// Access to the asset service.
pub trait AssetTransport {
    /// Raw field schema metadata for the asset type.
    fn fetch_field_schemas(&mut self) -> Result<Value, TransportError>;

    /// Fetch one page of assets.
    fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, TransportError>;
}

impl<T: AssetTransport + ?Sized> AssetTransport for &mut T {
    fn fetch_field_schemas(&mut self) -> Result<Value, TransportError> {
        (**self).fetch_field_schemas()
    }

    fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        (**self).fetch_page(request)
    }
}

impl<T: AssetTransport + ?Sized> AssetTransport for Box<T> {
    fn fetch_field_schemas(&mut self) -> Result<Value, TransportError> {
        (**self).fetch_field_schemas()
    }

    fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        (**self).fetch_page(request)
    }
}

/// Bulk tag writes.
pub trait TagWriter {
    /// Add `tags` to the assets with `ids`. Returns the number of assets tagged.
    fn add_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError>;

    /// Remove `tags` from the assets with `ids`.
    fn remove_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError>;
}

impl<T: TagWriter + ?Sized> TagWriter for Box<T> {
    fn add_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
        (**self).add_tags(ids, tags)
    }

    fn remove_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
        (**self).remove_tags(ids, tags)
    }
}

/// In-memory asset service serving a fixed set of assets.
///
/// Pages are sliced from the asset list by `skip`/`limit`. Every request is
/// recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    schemas: Value,
    assets: Vec<Value>,
    requests: Vec<PageRequest>,
    failures: VecDeque<(usize, String)>,
}

impl MemoryTransport {
    pub fn new(schemas: Value, assets: Vec<Value>) -> Self {
        Self {
            schemas,
            assets,
            requests: Vec::new(),
            failures: VecDeque::new(),
        }
    }

    /// Build from rows instead of raw values.
    pub fn from_rows(schemas: Value, rows: Vec<Row>) -> Self {
        Self::new(schemas, rows.into_iter().map(Value::Object).collect())
    }

    /// Fail the page request with this zero-based index.
    pub fn fail_on_page(mut self, page: usize, message: &str) -> Self {
        self.failures.push_back((page, message.to_string()));
        self
    }

    /// Every page request made so far.
    pub fn requests(&self) -> &[PageRequest] {
        &self.requests
    }
}

impl AssetTransport for MemoryTransport {
    fn fetch_field_schemas(&mut self) -> Result<Value, TransportError> {
        Ok(self.schemas.clone())
    }

    fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        let index = self.requests.len();
        self.requests.push(request.clone());
        if let Some(pos) = self.failures.iter().position(|(page, _)| *page == index) {
            let message = self
                .failures
                .remove(pos)
                .map(|(_, m)| m)
                .unwrap_or_default();
            return Err(TransportError::msg(message));
        }

        let total = self.assets.len() as u64;
        let limit = request.limit.max(1) as u64;
        let assets: Vec<Value> = self
            .assets
            .iter()
            .skip(request.skip)
            .take(request.limit)
            .cloned()
            .collect();
        Ok(PageResponse {
            page: PageInfo {
                total_resources: Some(total),
                total_pages: Some(total.div_ceil(limit)),
                size: Some(assets.len() as u64),
            },
            assets,
        })
    }
}

/// A recorded tag write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub add: bool,
    pub ids: Vec<String>,
    pub tags: Vec<String>,
}

/// Tag writer that records calls. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingTagWriter {
    calls: Arc<Mutex<Vec<TagCall>>>,
}

impl RecordingTagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TagCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, add: bool, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| TransportError::msg("tag record lock poisoned"))?;
        calls.push(TagCall {
            add,
            ids: ids.to_vec(),
            tags: tags.to_vec(),
        });
        Ok(ids.len())
    }
}

impl TagWriter for RecordingTagWriter {
    fn add_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
        self.record(true, ids, tags)
    }

    fn remove_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
        self.record(false, ids, tags)
    }
}

#[cfg(feature = "api-backend")]
pub use http::HttpTransport;

#[cfg(feature = "api-backend")]
mod http {
    use super::{AssetTransport, PageRequest, PageResponse, TagWriter};
    use crate::error::TransportError;
    use reqwest::blocking::Client;
    use reqwest::header::HeaderMap;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tracing::debug;

    /// Blocking HTTP implementation of the transport traits.
    ///
    /// Endpoints are relative to `{base_url}/api/{asset_type}`. Credentials
    /// are passed in as default headers.
    pub struct HttpTransport {
        client: Client,
        base: String,
    }

    impl HttpTransport {
        pub fn new(
            base_url: &str,
            asset_type: &str,
            headers: HeaderMap,
            timeout: Duration,
        ) -> Result<Self, TransportError> {
            let client = Client::builder()
                .default_headers(headers)
                .timeout(timeout)
                .build()
                .map_err(TransportError::new)?;
            Ok(Self {
                client,
                base: format!("{}/api/{}", base_url.trim_end_matches('/'), asset_type),
            })
        }

        fn tags(&self, add: bool, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
            let url = format!("{}/labels", self.base);
            let body = json!({"entities": {"ids": ids}, "labels": tags});
            let request = if add {
                self.client.put(&url)
            } else {
                self.client.delete(&url)
            };
            let value: Value = request
                .json(&body)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json())
                .map_err(TransportError::new)?;
            Ok(value
                .get("count")
                .and_then(Value::as_u64)
                .map(|c| c as usize)
                .unwrap_or(ids.len()))
        }
    }

    impl AssetTransport for HttpTransport {
        fn fetch_field_schemas(&mut self) -> Result<Value, TransportError> {
            let url = format!("{}/fields", self.base);
            debug!("GET {}", url);
            self.client
                .get(&url)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json())
                .map_err(TransportError::new)
        }

        fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, TransportError> {
            debug!("POST {} skip={} limit={}", self.base, request.skip, request.limit);
            self.client
                .post(&self.base)
                .json(request)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json())
                .map_err(TransportError::new)
        }
    }

    impl TagWriter for HttpTransport {
        fn add_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
            self.tags(true, ids, tags)
        }

        fn remove_tags(&mut self, ids: &[String], tags: &[String]) -> Result<usize, TransportError> {
            self.tags(false, ids, tags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_transport_slices_pages() {
        let assets = (0..5).map(|i| json!({"internal_axon_id": i})).collect();
        let mut transport = MemoryTransport::new(json!({}), assets);
        let page = transport
            .fetch_page(&PageRequest {
                filter: None,
                fields: vec![],
                skip: 4,
                limit: 2,
            })
            .unwrap();
        assert_eq!(page.assets, vec![json!({"internal_axon_id": 4})]);
        assert_eq!(page.page.total_resources, Some(5));
        assert_eq!(page.page.total_pages, Some(3));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_memory_transport_injected_failure() {
        let mut transport = MemoryTransport::new(json!({}), vec![]).fail_on_page(0, "boom");
        let request = PageRequest {
            filter: None,
            fields: vec![],
            skip: 0,
            limit: 1,
        };
        let err = transport.fetch_page(&request).unwrap_err();
        assert_eq!(err.to_string(), "Transport error: boom");
        assert!(transport.fetch_page(&request).is_ok());
    }

    #[test]
    fn test_page_response_wire_names() {
        let response: PageResponse = serde_json::from_value(json!({
            "assets": [{"a": 1}],
            "page": {"totalResources": 10, "totalPages": 5, "size": 1}
        }))
        .unwrap();
        assert_eq!(response.page.total_resources, Some(10));
        assert_eq!(response.page.total_pages, Some(5));
    }

    #[test]
    fn test_recording_writer_shares_calls() {
        let writer = RecordingTagWriter::new();
        let mut handle = writer.clone();
        handle
            .add_tags(&["1".to_string()], &["t".to_string()])
            .unwrap();
        assert_eq!(writer.calls().len(), 1);
        assert!(writer.calls()[0].add);
    }
}
