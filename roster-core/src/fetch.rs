//! Paginated GET over a [`Transport`].
//!
//! Both upstream APIs answer with `{ "<collection>": [...], "next_page": n | null }`.
//! [`PagedFetcher::fetch`] starts at page 1, follows `next_page` until it is null or
//! absent, and returns the union of all pages. Any non-2xx status aborts the whole
//! fetch; nothing partial is returned and nothing is retried.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::contract::{HttpRequest, HttpResponse, Transport};
use crate::error::FetchError;

/// Auth and identification headers shared by every request to one API.
#[derive(Debug, Clone)]
pub struct ApiAuth {
    pub token: String,
    /// Header carrying the account id, e.g. `Harvest-Account-ID`.
    pub account_header: String,
    pub account_id: String,
    pub user_agent: String,
}

impl ApiAuth {
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
            (self.account_header.clone(), self.account_id.clone()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ]
    }
}

pub struct PagedFetcher<T> {
    transport: T,
}

impl<T: Transport> PagedFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch every page of `url`, collecting the records found under `collection`.
    pub async fn fetch(
        &self,
        url: &str,
        collection: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<Vec<Value>, FetchError> {
        let mut records = Vec::new();
        let mut page: u64 = 1;

        loop {
            info!(url = %url, page, "Fetching page");

            let mut page_query: Vec<(String, String)> = query
                .iter()
                .filter(|(k, _)| k != "page")
                .cloned()
                .collect();
            page_query.push(("page".to_string(), page.to_string()));

            let request = HttpRequest {
                url: url.to_string(),
                query: page_query,
                headers: headers.to_vec(),
            };
            let HttpResponse { status, body } = self.transport.get(request).await?;

            if !(200..300).contains(&status) {
                error!(url = %url, page, status, "Upstream returned an error status");
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                    body,
                });
            }

            let data: Value = serde_json::from_str(&body).map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            let batch = data
                .get(collection)
                .and_then(Value::as_array)
                .ok_or_else(|| FetchError::MissingCollection {
                    url: url.to_string(),
                    collection: collection.to_string(),
                })?;
            debug!(url = %url, page, records = batch.len(), "Page received");
            records.extend(batch.iter().cloned());

            match next_page(&data, url)? {
                Some(next) if next <= page => {
                    return Err(FetchError::PageCursor {
                        url: url.to_string(),
                        page,
                        next_page: next,
                    });
                }
                Some(next) => page = next,
                None => break,
            }
        }

        info!(url = %url, pages = page, records = records.len(), "Fetch complete");
        Ok(records)
    }
}

fn next_page(data: &Value, url: &str) -> Result<Option<u64>, FetchError> {
    match data.get("next_page") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| FetchError::Decode {
            url: url.to_string(),
            message: format!("next_page is not a page number: {v}"),
        }),
    }
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            error!(error = ?e, url = %request.url, "Failed to send request");
            FetchError::Transport {
                url: request.url.clone(),
                message: e.to_string(),
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: request.url.clone(),
            message: format!("failed to read response body: {e}"),
        })?;

        Ok(HttpResponse { status, body })
    }
}
