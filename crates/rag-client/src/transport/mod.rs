//! Transport adapter: single-shot JSON calls and long-lived event streams.
//!
//! [`Transport`] is the seam between conversation logic and the network.
//! [`HttpTransport`] is the reqwest implementation; tests substitute their
//! own.

mod handle;
mod http;

pub use handle::{StreamFeed, StreamHandle, StreamOutcome};
pub use http::HttpTransport;

use async_trait::async_trait;
use rag_common::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One request, one JSON response. Non-2xx statuses are errors.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError>;

    /// POST `body` to `path` and hand back the response as an event stream.
    async fn open_stream(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<StreamHandle, ClientError>;
}
