//! Controller state and the events it reports.

use rag_common::ClientError;

use crate::assembler::DEFAULT_MAX_DECODE_ERRORS;

/// How an exchange talks to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// One request, one complete answer.
    SingleShot,
    /// The answer arrives incrementally over an event stream.
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    /// A single-shot request is in flight.
    Sending,
    /// A stream is open and the answer is growing.
    Streaming,
    /// The last exchange failed. Dismiss to return to `Idle`.
    Error,
}

impl ControllerState {
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// What applying one update did, as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The pending answer changed. `text` is its full current content.
    Progress { generation: u64, text: String },
    /// The stream could not be opened; the exchange was re-issued single-shot.
    FellBack { generation: u64, reason: String },
    /// The answer was appended to the transcript.
    Completed { generation: u64 },
    Failed { generation: u64, error: ClientError },
}

impl ControllerEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Progress { generation, .. }
            | Self::FellBack { generation, .. }
            | Self::Completed { generation }
            | Self::Failed { generation, .. } => *generation,
        }
    }

    /// Whether the exchange is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Re-issue a streaming exchange single-shot when the stream cannot be opened.
    pub fallback_to_single_shot: bool,
    /// Consecutive undecodable stream events that fail an exchange.
    pub max_decode_errors: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            fallback_to_single_shot: true,
            max_decode_errors: DEFAULT_MAX_DECODE_ERRORS,
        }
    }
}
