//! Message assembler: folds the raw events of one streamed answer into text
//! plus citations.
//!
//! The assembler knows nothing about connections or sessions. It is fed
//! [`SseEvent`]s in delivery order and reports after each one whether the
//! answer is still growing, finished, or failed.

use rag_common::{ClientError, SessionId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::streaming::SseEvent;
use crate::types::Source;

/// Consecutive undecodable payloads tolerated before the exchange fails.
pub const DEFAULT_MAX_DECODE_ERRORS: u32 = 3;

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A text fragment to append.
    Delta(String),
    /// The full citation list so far. Replaces any earlier list.
    Sources(Vec<Source>),
    Done,
    /// The backend gave up on the answer.
    Error(String),
    /// A kind this client does not handle.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub kind: StreamEvent,
    /// Session id carried by the payload, if any.
    pub session_id: Option<SessionId>,
}

/// Decode one raw event.
///
/// The kind comes from the SSE `event:` name when present, otherwise from the
/// payload's `type` field.
pub fn decode_event(raw: &SseEvent) -> Result<DecodedEvent, ClientError> {
    let data = raw.data.trim();
    if data == "[DONE]" {
        return Ok(DecodedEvent {
            kind: StreamEvent::Done,
            session_id: None,
        });
    }

    let payload: Value = if data.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(data)
            .map_err(|e| ClientError::StreamDecode(format!("{e}: {}", truncate(data))))?
    };

    let session_id = payload
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(SessionId::from);

    let named = raw
        .event
        .as_deref()
        .filter(|name| !name.is_empty() && *name != "message");
    let kind = match named {
        Some(name) => name.to_string(),
        None => match payload.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => match &payload {
                Value::Object(map) if map.len() == 1 && map.contains_key("error") => {
                    "error".to_string()
                }
                _ => {
                    return Err(ClientError::StreamDecode(format!(
                        "event has no type: {}",
                        truncate(data)
                    )))
                }
            },
        },
    };

    let kind = match kind.as_str() {
        "delta" | "content" => {
            let text = payload
                .get("text")
                .or_else(|| payload.get("content"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ClientError::StreamDecode(format!("{kind} event without text"))
                })?;
            StreamEvent::Delta(text.to_string())
        }
        "sources" | "metadata" => {
            let list = if payload.is_array() {
                Some(&payload)
            } else {
                payload.get("sources")
            };
            match list {
                Some(list) => StreamEvent::Sources(
                    serde_json::from_value(list.clone())
                        .map_err(|e| ClientError::StreamDecode(format!("bad sources: {e}")))?,
                ),
                None if kind == "metadata" => StreamEvent::Unknown(kind),
                None => {
                    return Err(ClientError::StreamDecode(
                        "sources event without a list".to_string(),
                    ))
                }
            }
        }
        "done" | "end" => StreamEvent::Done,
        "error" => {
            let message = ["message", "error", "detail"]
                .iter()
                .find_map(|key| payload.get(*key).and_then(Value::as_str))
                .unwrap_or("unknown backend error");
            StreamEvent::Error(message.to_string())
        }
        _ => StreamEvent::Unknown(kind),
    };

    Ok(DecodedEvent { kind, session_id })
}

fn truncate(data: &str) -> String {
    data.chars().take(120).collect()
}

/// What a single event did to the answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerStep {
    /// Text or citations changed.
    Progress,
    Completed,
    Failed(ClientError),
    /// Nothing visible changed.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
enum Terminal {
    Done,
    Failed(String),
}

/// Accumulates one in-flight answer.
#[derive(Debug)]
pub struct MessageAssembler {
    text: String,
    sources: Vec<Source>,
    session_id: Option<SessionId>,
    terminal: Option<Terminal>,
    decode_errors: u32,
    max_decode_errors: u32,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::with_max_decode_errors(DEFAULT_MAX_DECODE_ERRORS)
    }

    pub fn with_max_decode_errors(max_decode_errors: u32) -> Self {
        Self {
            text: String::new(),
            sources: Vec::new(),
            session_id: None,
            terminal: None,
            decode_errors: 0,
            max_decode_errors: max_decode_errors.max(1),
        }
    }

    /// Fold one raw event into the answer. Events after a terminal one are ignored.
    pub fn on_event(&mut self, raw: &SseEvent) -> AssemblerStep {
        if self.terminal.is_some() {
            debug!("event after terminal state ignored");
            return AssemblerStep::Ignored;
        }

        let decoded = match decode_event(raw) {
            Ok(decoded) => {
                self.decode_errors = 0;
                decoded
            }
            Err(err) => {
                self.decode_errors += 1;
                warn!(
                    error = %err,
                    consecutive = self.decode_errors,
                    "dropping undecodable stream event"
                );
                if self.decode_errors >= self.max_decode_errors {
                    self.terminal = Some(Terminal::Failed(err.to_string()));
                    return AssemblerStep::Failed(err);
                }
                return AssemblerStep::Ignored;
            }
        };

        if self.session_id.is_none() {
            self.session_id = decoded.session_id;
        }

        match decoded.kind {
            StreamEvent::Delta(text) => {
                if text.is_empty() {
                    return AssemblerStep::Ignored;
                }
                self.text.push_str(&text);
                AssemblerStep::Progress
            }
            StreamEvent::Sources(sources) => {
                self.sources = sources;
                AssemblerStep::Progress
            }
            StreamEvent::Done => {
                self.terminal = Some(Terminal::Done);
                AssemblerStep::Completed
            }
            StreamEvent::Error(message) => {
                self.terminal = Some(Terminal::Failed(message.clone()));
                AssemblerStep::Failed(ClientError::StreamFailed(message))
            }
            StreamEvent::Unknown(kind) => {
                debug!(%kind, "ignoring unknown stream event");
                AssemblerStep::Ignored
            }
        }
    }

    /// Mark the answer failed from outside, e.g. when the stream ends early.
    /// No effect once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.terminal.is_none() {
            self.terminal = Some(Terminal::Failed(reason.into()));
        }
    }

    pub fn current_text(&self) -> &str {
        &self.text
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.terminal == Some(Terminal::Done)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.terminal {
            Some(Terminal::Failed(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}
