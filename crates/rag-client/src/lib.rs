//! Conversation client for the RAG assistant backend.
//!
//! Provides:
//! - A transport seam with a reqwest implementation (JSON calls and SSE streams)
//! - Incremental answer assembly from stream events
//! - A session controller with cancellation and single-shot fallback
//! - Session listing, fetching and deletion with an in-memory cache
//! - Document upload, one-shot query and health endpoints

pub mod assembler;
pub mod controller;
pub mod directory;
pub mod service;
pub mod streaming;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{AssemblerStep, MessageAssembler, StreamEvent};
pub use controller::{
    ControllerEvent, ControllerOptions, ControllerState, ExchangeMode, SessionController,
};
pub use directory::SessionDirectory;
pub use service::{HealthStatus, QueryAnswer, QueryRequest, ServiceClient, UploadAck};
pub use streaming::SseEvent;
pub use transport::{HttpTransport, Method, StreamFeed, StreamHandle, StreamOutcome, Transport};
pub use types::{Message, MessageStatus, Role, Session, SessionSummary, Source};

pub use rag_common::{ClientError, SessionId};
