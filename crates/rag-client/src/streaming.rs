//! Server-Sent Events (SSE) parser.
//!
//! The backend streams answers as `text/event-stream`. This module turns a
//! byte stream into [`SseEvent`]s without interpreting their payloads.

use futures_util::StreamExt;
use rag_common::ClientError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server sent one.
    pub event: Option<String>,
    /// The `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(String::from),
            data: data.into(),
        }
    }

    /// A data-only event, which is what the reference backend emits.
    pub fn data(data: impl Into<String>) -> Self {
        Self::new(None, data)
    }
}

/// Parse an SSE stream from a reqwest response, calling `on_event` for each event.
pub async fn parse_sse_response(
    response: reqwest::Response,
    on_event: impl FnMut(SseEvent),
) -> Result<(), ClientError> {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
    parse_sse_stream(reader, on_event).await
}

/// Parse SSE framing from any buffered reader.
///
/// A blank line ends an event. Events with neither data nor an event name
/// are skipped. `id:`, `retry:` and comment lines are ignored.
pub async fn parse_sse_stream<R>(reader: R, mut on_event: impl FnMut(SseEvent)) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    let mut current_event: Option<String> = None;
    let mut current_data = String::new();
    let mut has_data = false;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ClientError::Network(e.to_string()))?
    {
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if line.is_empty() {
            if has_data || current_event.is_some() {
                on_event(SseEvent {
                    event: current_event.take(),
                    data: std::mem::take(&mut current_data),
                });
            }
            current_event = None;
            has_data = false;
            continue;
        }

        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => current_event = Some(value.to_string()).filter(|v| !v.is_empty()),
            "data" => {
                if has_data {
                    current_data.push('\n');
                }
                current_data.push_str(value);
                has_data = true;
            }
            _ => {}
        }
    }

    // Flush any remaining event
    if has_data || current_event.is_some() {
        on_event(SseEvent {
            event: current_event,
            data: current_data,
        });
    }

    Ok(())
}
