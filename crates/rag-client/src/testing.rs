//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use rag_common::ClientError;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::streaming::SseEvent;
use crate::transport::{Method, StreamHandle, Transport};

/// A data-only SSE event carrying `json`.
pub(crate) fn sse(json: Value) -> SseEvent {
    SseEvent::data(json.to_string())
}

/// A named SSE event carrying `json`.
pub(crate) fn named(event: &str, json: Value) -> SseEvent {
    SseEvent::new(Some(event), json.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

pub(crate) enum Reply {
    Json(Value),
    Error(ClientError),
    /// Never resolves.
    Pending,
    /// Resolves with whatever the test sends through the gate.
    Gate(oneshot::Receiver<Result<Value, ClientError>>),
}

pub(crate) enum StreamScript {
    Handle(StreamHandle),
    Error(ClientError),
}

/// Transport that answers from queued scripts and records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_json(&self, json: Value) {
        self.push_reply(Reply::Json(json));
    }

    pub fn push_error(&self, err: ClientError) {
        self.push_reply(Reply::Error(err));
    }

    pub fn push_stream(&self, handle: StreamHandle) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Handle(handle));
    }

    pub fn push_stream_error(&self, err: ClientError) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Error(err));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, method: Method, path: &str, body: Option<Value>) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.record(method, path, body);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Json(json)) => Ok(json),
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::Pending) => std::future::pending().await,
            Some(Reply::Gate(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(ClientError::Network("gate dropped".into()))),
            None => Err(ClientError::Network(format!("no scripted reply for {path}"))),
        }
    }

    async fn open_stream(&self, path: &str, body: Value) -> Result<StreamHandle, ClientError> {
        self.record(Method::Post, path, Some(body));
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Handle(handle)) => Ok(handle),
            Some(StreamScript::Error(err)) => Err(err),
            None => Err(ClientError::Network(format!("no scripted stream for {path}"))),
        }
    }
}

/// A raw HTTP/1.1 response with `Connection: close`.
pub(crate) fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serve one canned response on a fresh local port.
///
/// The join handle yields the raw request the server received.
pub(crate) async fn serve_once(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });
    (format!("http://{addr}"), server)
}

/// Start an event-stream response, send `body`, then hold the connection
/// open until the client hangs up.
pub(crate) async fn serve_stream_then_wait(body: &'static str) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        let mut buf = [0u8; 256];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });
    (format!("http://{addr}"), server)
}

/// Read the request head plus its body, sized or chunked.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let chunked = head.to_ascii_lowercase().contains("transfer-encoding: chunked");
            if chunked {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
            } else if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}
