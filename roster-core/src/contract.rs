//! # contract: trait seams between the pipeline and the outside world
//!
//! Two collaborators sit behind traits so tests can swap them for mocks:
//! - [`Transport`]: one authenticated HTTP GET. The pipeline never talks to `reqwest`
//!   directly; [`crate::fetch::ReqwestTransport`] is the production implementation.
//! - [`Publisher`]: the sink for finished tables (the spreadsheet integration in
//!   production, a directory of CSV files locally, see [`crate::publish`]).
//!
//! Both traits are annotated for `mockall`, so `MockTransport` and `MockPublisher`
//! are available to tests and, behind the `test-export-mocks` feature, to downstream crates.

use async_trait::async_trait;
use mockall::automock;

use crate::error::FetchError;

/// A single GET request: absolute URL plus query and header pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Value of a query parameter, if present.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The raw response: status code and body text. Status checking is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// One row of a delimited table.
pub type Row = Vec<String>;

/// A header row plus data rows, as persisted in a cache file or published as a sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Row,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new<S: Into<String>>(header: impl IntoIterator<Item = S>) -> Self {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Error type for the publisher seam (boxed, like the transport adapters it wraps).
pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

/// Issues one GET and returns whatever the server said.
///
/// Implementations must not retry and must not interpret the status code.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// Destination for finished tables, addressed by sheet name.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Replace the contents of `sheet` with `table`.
    async fn publish(&self, sheet: &str, table: &Table) -> Result<(), PublishError>;
}
