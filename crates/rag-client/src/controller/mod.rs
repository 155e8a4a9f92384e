//! Session controller: one conversation, one exchange at a time.
//!
//! The controller owns the transcript and the state machine
//! (`Idle -> Sending | Streaming -> Idle | Error`). [`SessionController::send`]
//! appends the question immediately and starts the network work on the tokio
//! runtime; results come back through [`SessionController::next_update`],
//! which applies them in delivery order.
//!
//! Every exchange gets a generation number. Updates from any generation other
//! than the active one (a cancelled stream, a reply that raced a
//! `new_session`) are dropped.

mod pump;
mod state;

#[cfg(test)]
mod tests;

pub use pump::{CONVERSATION_PATH, CONVERSATION_STREAM_PATH};
pub use state::{ControllerEvent, ControllerOptions, ControllerState, ExchangeMode};

use std::sync::Arc;

use chrono::Utc;
use rag_common::{new_correlation_id, ClientError, SessionId};
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{AssemblerStep, MessageAssembler};
use crate::directory::SessionDirectory;
use crate::streaming::SseEvent;
use crate::transport::{StreamOutcome, Transport};
use crate::types::{ConversationReply, Message, MessageStatus, Session, Source};

use pump::{ExchangeUpdate, UpdateKind};

/// The one in-flight question.
struct Exchange {
    generation: u64,
    /// Ties the log lines of this exchange together.
    correlation: String,
    question: String,
    session_id: Option<SessionId>,
    mode: ExchangeMode,
    cancel: CancellationToken,
    /// Present while the answer is streaming.
    assembler: Option<MessageAssembler>,
    runtime: Handle,
}

pub struct SessionController {
    transport: Arc<dyn Transport>,
    directory: SessionDirectory,
    options: ControllerOptions,
    session: Session,
    state: ControllerState,
    generation: u64,
    exchange: Option<Exchange>,
    pending: Option<Message>,
    last_failure: Option<ClientError>,
    stale_updates: u64,
    updates_tx: mpsc::UnboundedSender<ExchangeUpdate>,
    updates_rx: mpsc::UnboundedReceiver<ExchangeUpdate>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>, options: ControllerOptions) -> Self {
        let directory = SessionDirectory::new(transport.clone());
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            directory,
            options,
            session: Session::default(),
            state: ControllerState::Idle,
            generation: 0,
            exchange: None,
            pending: None,
            last_failure: None,
            stale_updates: 0,
            updates_tx,
            updates_rx,
        }
    }

    /// Ask `question` in the current session and return the exchange's generation.
    ///
    /// The question is in [`messages`](Self::messages) as soon as this
    /// returns. Fails with [`ClientError::Busy`] unless the controller is
    /// idle, in which case nothing is appended. Must be called from within a
    /// tokio runtime.
    pub fn send(
        &mut self,
        question: impl Into<String>,
        mode: ExchangeMode,
    ) -> Result<u64, ClientError> {
        if self.state != ControllerState::Idle {
            return Err(ClientError::Busy);
        }
        let question = question.into();
        if question.trim().is_empty() {
            return Err(ClientError::EmptyQuestion);
        }
        let runtime = Handle::try_current()
            .map_err(|e| ClientError::Network(format!("no async runtime available: {e}")))?;

        self.generation += 1;
        let generation = self.generation;
        let session_id = self.session.id.clone();
        self.session.messages.push(Message::user(question.clone()));
        self.last_failure = None;

        let assembler = (mode == ExchangeMode::Streaming)
            .then(|| MessageAssembler::with_max_decode_errors(self.options.max_decode_errors));
        let exchange = Exchange {
            generation,
            correlation: new_correlation_id(),
            question,
            session_id,
            mode,
            cancel: CancellationToken::new(),
            assembler,
            runtime,
        };

        info!(
            generation,
            cid = %exchange.correlation,
            session_id = ?exchange.session_id,
            ?mode,
            "sending question"
        );

        match mode {
            ExchangeMode::SingleShot => {
                self.state = ControllerState::Sending;
                self.start_single_shot(&exchange);
            }
            ExchangeMode::Streaming => {
                self.state = ControllerState::Streaming;
                self.pending = Some(Message::assistant(String::new(), Vec::new()));
                pump::spawn_stream(
                    &exchange.runtime,
                    self.transport.clone(),
                    request_body(&exchange),
                    generation,
                    exchange.cancel.clone(),
                    self.updates_tx.clone(),
                );
            }
        }

        self.exchange = Some(exchange);
        Ok(generation)
    }

    fn start_single_shot(&self, exchange: &Exchange) {
        pump::spawn_single_shot(
            &exchange.runtime,
            self.transport.clone(),
            request_body(exchange),
            exchange.generation,
            exchange.cancel.clone(),
            self.updates_tx.clone(),
        );
    }

    /// Wait for and apply the next update of the active exchange.
    ///
    /// Returns `None` when no exchange is active. Cancel-safe: if the
    /// future is dropped before it resolves, no update is lost.
    pub async fn next_update(&mut self) -> Option<ControllerEvent> {
        while self.exchange.is_some() {
            let update = self.updates_rx.recv().await?;
            if let Some(event) = self.apply(update) {
                return Some(event);
            }
        }
        None
    }

    /// Apply updates that have already arrived, up to the first visible one.
    pub fn try_next_update(&mut self) -> Option<ControllerEvent> {
        while let Ok(update) = self.updates_rx.try_recv() {
            if let Some(event) = self.apply(update) {
                return Some(event);
            }
        }
        None
    }

    /// Send `question` and pump updates until the exchange ends.
    ///
    /// `on_progress` sees the full pending text after every change. On
    /// failure the controller is left in [`ControllerState::Error`].
    pub async fn ask(
        &mut self,
        question: impl Into<String>,
        mode: ExchangeMode,
        mut on_progress: impl FnMut(&str),
    ) -> Result<Message, ClientError> {
        self.send(question, mode)?;
        loop {
            match self.next_update().await {
                Some(ControllerEvent::Progress { text, .. }) => on_progress(&text),
                Some(ControllerEvent::FellBack { .. }) => {}
                Some(ControllerEvent::Completed { .. }) => {
                    return self
                        .session
                        .messages
                        .last()
                        .cloned()
                        .ok_or(ClientError::IncompleteStream);
                }
                Some(ControllerEvent::Failed { error, .. }) => return Err(error),
                None => return Err(ClientError::IncompleteStream),
            }
        }
    }

    /// Abandon the active exchange and return to `Idle`.
    ///
    /// The question stays in the transcript; the pending answer is discarded.
    /// From `Error` this clears the failure. Returns whether an exchange was
    /// in flight.
    pub fn cancel(&mut self) -> bool {
        self.pending = None;
        self.state = ControllerState::Idle;
        self.last_failure = None;

        match self.exchange.take() {
            Some(exchange) => {
                exchange.cancel.cancel();
                info!(
                    generation = exchange.generation,
                    cid = %exchange.correlation,
                    "exchange cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Leave `Error` and hand back the failure that caused it.
    pub fn dismiss_error(&mut self) -> Option<ClientError> {
        if self.state != ControllerState::Error {
            return None;
        }
        self.state = ControllerState::Idle;
        self.last_failure.take()
    }

    /// Start an empty, unbound session. Cancels any active exchange.
    pub fn new_session(&mut self) {
        self.cancel();
        self.session = Session::default();
        debug!("started new session");
    }

    /// Replace the transcript with a stored session.
    ///
    /// Fails with [`ClientError::Busy`] while an exchange is in flight. On any
    /// failure the current transcript is left unchanged.
    pub async fn load_session(&mut self, id: &SessionId) -> Result<(), ClientError> {
        if self.state.is_busy() {
            return Err(ClientError::Busy);
        }
        let session = self.directory.fetch(id).await?;

        info!(session_id = %id, messages = session.messages.len(), "loaded session");
        self.session = session;
        self.pending = None;
        self.last_failure = None;
        self.state = ControllerState::Idle;
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.id.as_ref()
    }

    /// Finalized messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.session.messages
    }

    /// The streaming answer being assembled, if any.
    pub fn pending_message(&self) -> Option<&Message> {
        self.pending.as_ref()
    }

    /// Finalized messages followed by the pending answer.
    pub fn transcript(&self) -> Vec<Message> {
        self.session
            .messages
            .iter()
            .chain(self.pending.as_ref())
            .cloned()
            .collect()
    }

    pub fn last_failure(&self) -> Option<&ClientError> {
        self.last_failure.as_ref()
    }

    /// Generation of the most recent exchange, `0` before the first send.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Updates dropped because they belonged to an exchange that is no longer active.
    pub fn stale_updates(&self) -> u64 {
        self.stale_updates
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut SessionDirectory {
        &mut self.directory
    }

    fn apply(&mut self, update: ExchangeUpdate) -> Option<ControllerEvent> {
        let active = self.exchange.as_ref().map(|exchange| exchange.generation);
        if active != Some(update.generation) {
            self.stale_updates += 1;
            debug!(
                generation = update.generation,
                active = ?active,
                "dropping update from inactive exchange"
            );
            return None;
        }

        match update.kind {
            UpdateKind::Reply(Ok(reply)) => Some(self.complete_reply(reply)),
            UpdateKind::Reply(Err(err)) => self.fail(err),
            UpdateKind::StreamOpenFailed(err) => self.stream_open_failed(err),
            UpdateKind::Event(raw) => self.stream_event(&raw),
            UpdateKind::StreamEnded(outcome) => self.stream_ended(outcome),
        }
    }

    fn complete_reply(&mut self, reply: ConversationReply) -> ControllerEvent {
        self.complete(reply.answer, reply.sources, reply.session_id)
    }

    fn stream_open_failed(&mut self, err: ClientError) -> Option<ControllerEvent> {
        let fallback = self.options.fallback_to_single_shot && err.is_transport();
        if !fallback {
            return self.fail(err);
        }

        let exchange = self.exchange.as_mut()?;
        exchange.assembler = None;
        exchange.mode = ExchangeMode::SingleShot;
        let generation = exchange.generation;
        self.pending = None;
        self.state = ControllerState::Sending;
        warn!(generation, error = %err, "stream unavailable, retrying single-shot");

        if let Some(exchange) = self.exchange.as_ref() {
            self.start_single_shot(exchange);
        }
        Some(ControllerEvent::FellBack {
            generation,
            reason: err.to_string(),
        })
    }

    fn stream_event(&mut self, raw: &SseEvent) -> Option<ControllerEvent> {
        let exchange = self.exchange.as_mut()?;
        let generation = exchange.generation;
        let assembler = exchange.assembler.as_mut()?;
        let step = assembler.on_event(raw);

        if exchange.session_id.is_none() && self.session.id.is_none() {
            if let Some(id) = assembler.session_id() {
                debug!(generation, session_id = %id, "session bound from stream");
                self.session.id = Some(id.clone());
            }
        }

        match step {
            AssemblerStep::Progress => {
                let text = assembler.current_text().to_string();
                let sources = assembler.sources().to_vec();
                if let Some(pending) = self.pending.as_mut() {
                    pending.content = text.clone();
                    pending.sources = sources;
                }
                Some(ControllerEvent::Progress { generation, text })
            }
            AssemblerStep::Completed => {
                let text = assembler.current_text().to_string();
                let sources = assembler.sources().to_vec();
                let session_id = assembler.session_id().cloned();
                Some(self.complete(text, sources, session_id))
            }
            AssemblerStep::Failed(err) => self.fail(err),
            AssemblerStep::Ignored => None,
        }
    }

    fn stream_ended(&mut self, outcome: StreamOutcome) -> Option<ControllerEvent> {
        let exchange = self.exchange.as_mut()?;
        let assembler = exchange.assembler.as_mut()?;
        let err = match outcome {
            StreamOutcome::Failed(reason) => ClientError::Network(reason),
            StreamOutcome::Completed | StreamOutcome::Closed => ClientError::IncompleteStream,
        };
        assembler.fail(err.to_string());
        self.fail(err)
    }

    fn complete(
        &mut self,
        content: String,
        sources: Vec<Source>,
        session_id: Option<SessionId>,
    ) -> ControllerEvent {
        let exchange = self.exchange.take();
        let generation = exchange.as_ref().map_or(self.generation, |e| e.generation);
        if let Some(exchange) = exchange {
            exchange.cancel.cancel();
            debug!(
                generation,
                cid = %exchange.correlation,
                mode = ?exchange.mode,
                "exchange finished"
            );
        }

        if self.session.id.is_none() {
            self.session.id = session_id;
        }
        self.pending = None;
        self.session.messages.push(Message::assistant(content, sources));

        let now = Utc::now();
        self.session.created_at.get_or_insert(now);
        self.session.updated_at = Some(now);
        self.directory.invalidate();
        self.state = ControllerState::Idle;

        info!(generation, session_id = ?self.session.id, "answer received");
        ControllerEvent::Completed { generation }
    }

    /// End the active exchange in `Error`, keeping any partial answer as incomplete.
    fn fail(&mut self, err: ClientError) -> Option<ControllerEvent> {
        let exchange = self.exchange.take()?;
        exchange.cancel.cancel();

        if let Some(mut partial) = self.pending.take() {
            if !partial.content.is_empty() {
                partial.status = MessageStatus::Incomplete;
                self.session.messages.push(partial);
            }
        }

        warn!(
            generation = exchange.generation,
            cid = %exchange.correlation,
            error = %err,
            "exchange failed"
        );
        self.last_failure = Some(err.clone());
        self.state = ControllerState::Error;
        Some(ControllerEvent::Failed {
            generation: exchange.generation,
            error: err,
        })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.cancel.cancel();
            debug!(
                generation = exchange.generation,
                cid = %exchange.correlation,
                "controller dropped with exchange in flight"
            );
        }
    }
}

fn request_body(exchange: &Exchange) -> serde_json::Value {
    json!({
        "question": exchange.question,
        "session_id": exchange.session_id,
    })
}
