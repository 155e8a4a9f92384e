//! reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use rag_common::ClientError;
use reqwest::header::ACCEPT;
use tracing::debug;

use super::handle::{StreamHandle, StreamOutcome};
use super::{Method, Transport};
use crate::streaming::parse_sse_response;

/// HTTP transport against one backend base URL.
pub struct HttpTransport {
    base_url: String,
    /// Single-shot calls: bounded by the whole-request timeout.
    http: reqwest::Client,
    /// Streams: connect timeout only, the body may stay open indefinitely.
    stream_http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {e}")))?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            stream_http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// POST a multipart form and read the JSON acknowledgement.
    pub async fn upload(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<serde_json::Value, ClientError> {
        let url = self.url(path);
        debug!(%url, "multipart upload");

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        read_json(check_status(response).await?).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let url = self.url(path);
        debug!(?method, %url, "backend request");

        let mut builder = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Delete => self.http.delete(&url),
        };
        if let Some(ref body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;
        read_json(check_status(response).await?).await
    }

    async fn open_stream(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<StreamHandle, ClientError> {
        let url = self.url(path);
        debug!(%url, "opening event stream");

        let response = self
            .stream_http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let response = check_status(response).await?;
        Ok(spawn_reader(response))
    }
}

/// Pump the response body into a new handle until it ends or the handle closes.
///
/// Closing drops the response, which releases the connection.
fn spawn_reader(response: reqwest::Response) -> StreamHandle {
    let (feed, handle) = StreamHandle::channel();

    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = feed.closed() => StreamOutcome::Closed,
            result = parse_sse_response(response, |event| {
                let _ = feed.send(event);
            }) => match result {
                Ok(()) => StreamOutcome::Completed,
                Err(e) => StreamOutcome::Failed(e.to_string()),
            },
        };
        debug!(?outcome, "event stream finished");
        feed.finish(outcome);
    });

    handle
}

fn network_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Network(format!("request timed out: {err}"))
    } else {
        ClientError::Network(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = text.chars().take(200).collect::<String>();
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Empty bodies read as `null`.
async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ClientError> {
    let text = response.text().await.map_err(network_error)?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
