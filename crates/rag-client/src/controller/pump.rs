//! Background tasks that drive one exchange's network I/O.
//!
//! Tasks never touch controller state. They report back over the update
//! channel, tagged with the generation they were started for, and stop as
//! soon as the exchange's cancellation token fires.

use std::sync::Arc;

use rag_common::ClientError;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::streaming::SseEvent;
use crate::transport::{Method, StreamOutcome, Transport};
use crate::types::ConversationReply;

pub const CONVERSATION_PATH: &str = "/conversation";
pub const CONVERSATION_STREAM_PATH: &str = "/conversation/stream";

pub(super) struct ExchangeUpdate {
    pub generation: u64,
    pub kind: UpdateKind,
}

pub(super) enum UpdateKind {
    Reply(Result<ConversationReply, ClientError>),
    StreamOpenFailed(ClientError),
    Event(SseEvent),
    StreamEnded(StreamOutcome),
}

pub(super) type UpdateSender = mpsc::UnboundedSender<ExchangeUpdate>;

pub(super) fn spawn_single_shot(
    runtime: &Handle,
    transport: Arc<dyn Transport>,
    body: Value,
    generation: u64,
    cancel: CancellationToken,
    updates: UpdateSender,
) {
    runtime.spawn(async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(generation, "single-shot request abandoned");
                return;
            }
            result = transport.request(Method::Post, CONVERSATION_PATH, Some(body)) => result,
        };

        let reply = result.and_then(|value| {
            serde_json::from_value::<ConversationReply>(value)
                .map_err(|e| ClientError::InvalidResponse(format!("conversation reply: {e}")))
        });
        let _ = updates.send(ExchangeUpdate {
            generation,
            kind: UpdateKind::Reply(reply),
        });
    });
}

pub(super) fn spawn_stream(
    runtime: &Handle,
    transport: Arc<dyn Transport>,
    body: Value,
    generation: u64,
    cancel: CancellationToken,
    updates: UpdateSender,
) {
    runtime.spawn(async move {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(generation, "stream open abandoned");
                return;
            }
            opened = transport.open_stream(CONVERSATION_STREAM_PATH, body) => opened,
        };

        let mut handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                let _ = updates.send(ExchangeUpdate {
                    generation,
                    kind: UpdateKind::StreamOpenFailed(err),
                });
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(generation, "closing stream for finished exchange");
                    handle.close();
                    return;
                }
                event = handle.next_event() => match event {
                    Some(event) => {
                        let update = ExchangeUpdate {
                            generation,
                            kind: UpdateKind::Event(event),
                        };
                        if updates.send(update).is_err() {
                            handle.close();
                            return;
                        }
                    }
                    None => {
                        let outcome = handle.outcome().unwrap_or(StreamOutcome::Completed);
                        let _ = updates.send(ExchangeUpdate {
                            generation,
                            kind: UpdateKind::StreamEnded(outcome),
                        });
                        return;
                    }
                },
            }
        }
    });
}
