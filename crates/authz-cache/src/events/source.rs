//! Event stream connections
//!
//! An [`EventSource`] opens one stream session. The subscriber owns the
//! reconnect loop; a source only knows how to connect once.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::provider::header_map;
use crate::request::AppId;

/// Raw body chunks of one stream session
pub type EventStream = BoxStream<'static, Result<Vec<u8>>>;

/// Something that can open a text event stream
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Establish a session; the returned stream ends when the session does
    async fn connect(&self) -> Result<EventStream>;

    /// Where the source connects, for logging
    fn describe(&self) -> String;
}

/// Event stream over HTTP
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpEventSource {
    /// Create a source for `url`, filtered to `app_id` when given
    ///
    /// Only the connect phase is bounded by `connect_timeout`; the body is
    /// meant to stay open indefinitely.
    pub fn new(
        url: &str,
        app_id: Option<AppId>,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let url = match app_id {
            Some(app_id) => format!("{url}?app_id={app_id}"),
            None => url.to_string(),
        };
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CacheError::invalid_config("events", e.to_string()))?;
        Ok(Self {
            client,
            url,
            headers: header_map(headers)?,
        })
    }

    /// Reuse an existing HTTP client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Full subscription URL including the filter
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self) -> Result<EventStream> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| CacheError::stream_disconnected(format!("connect failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::stream_disconnected(format!(
                "server answered {status}"
            )));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| CacheError::stream_disconnected(format!("read failed: {e}")))
        });
        Ok(stream.boxed())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
