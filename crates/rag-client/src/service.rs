//! Endpoints outside the conversation flow: document upload, one-shot
//! query and health check.

use std::path::Path;
use std::sync::Arc;

use rag_common::{ClientError, RetrievalMethod};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::transport::{HttpTransport, Method, Transport};
use crate::types::Source;

pub const UPLOAD_PATH: &str = "/documents/upload";
pub const QUERY_PATH: &str = "/query";
pub const HEALTH_PATH: &str = "/health";

/// Backend acknowledgement of an uploaded document.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct UploadAck {
    pub status: String,
    pub message: Option<String>,
    pub document_id: Option<String>,
    pub chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub question: String,
    pub top_k: u32,
    pub method: RetrievalMethod,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: 3,
            method: RetrievalMethod::default(),
        }
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn method(mut self, method: RetrievalMethod) -> Self {
        self.method = method;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    /// Kept as the backend formats it.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "healthy" | "ok")
    }
}

pub struct ServiceClient {
    transport: Arc<HttpTransport>,
}

impl ServiceClient {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }

    /// Upload a file for indexing as the multipart `file` field.
    pub async fn upload_document(&self, path: &Path) -> Result<UploadAck, ClientError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let mime = mime_for(&filename);

        debug!(%filename, size = bytes.len(), mime, "uploading document");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(mime)
            .map_err(|e| ClientError::InvalidRequest(format!("content type {mime}: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let value = self.transport.upload(UPLOAD_PATH, form).await?;
        let ack: UploadAck = serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("upload ack: {e}")))?;
        info!(%filename, chunks = ack.chunks, "document uploaded");
        Ok(ack)
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryAnswer, ClientError> {
        if request.question.trim().is_empty() {
            return Err(ClientError::EmptyQuestion);
        }
        let body = serde_json::to_value(request)
            .map_err(|e| ClientError::InvalidRequest(format!("query body: {e}")))?;
        let value = self
            .transport
            .request(Method::Post, QUERY_PATH, Some(body))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("query answer: {e}")))
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let value = self
            .transport
            .request(Method::Get, HEALTH_PATH, None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("health: {e}")))
    }
}

fn mime_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
