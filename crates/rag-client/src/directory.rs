//! Session directory: past sessions on the backend, with a read-through cache.

use std::collections::HashMap;
use std::sync::Arc;

use rag_common::{ClientError, SessionId};
use tracing::{debug, info};

use crate::transport::{Method, Transport};
use crate::types::{Session, SessionSummary};

pub const SESSIONS_PATH: &str = "/sessions";

pub struct SessionDirectory {
    transport: Arc<dyn Transport>,
    summaries: Option<Vec<SessionSummary>>,
    sessions: HashMap<SessionId, Session>,
}

impl SessionDirectory {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            summaries: None,
            sessions: HashMap::new(),
        }
    }

    /// Snapshot of every stored session. Refreshes [`cached_list`](Self::cached_list).
    pub async fn list(&mut self) -> Result<Vec<SessionSummary>, ClientError> {
        let value = self
            .transport
            .request(Method::Get, SESSIONS_PATH, None)
            .await?;
        let summaries: Vec<SessionSummary> = if value.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(value)
                .map_err(|e| ClientError::InvalidResponse(format!("session list: {e}")))?
        };

        debug!(count = summaries.len(), "listed sessions");
        self.summaries = Some(summaries.clone());
        Ok(summaries)
    }

    /// Full transcript of one session. Replaces any cached copy.
    pub async fn fetch(&mut self, id: &SessionId) -> Result<Session, ClientError> {
        let path = session_path(id);
        let value = self
            .transport
            .request(Method::Get, &path, None)
            .await
            .map_err(|e| not_found(e, id))?;
        if value.is_null() {
            return Err(ClientError::NotFound(id.to_string()));
        }

        let mut session: Session = serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("session {id}: {e}")))?;
        if session.id.is_none() {
            session.id = Some(id.clone());
        }

        debug!(session_id = %id, messages = session.messages.len(), "fetched session");
        self.sessions.insert(id.clone(), session.clone());
        Ok(session)
    }

    pub async fn delete(&mut self, id: &SessionId) -> Result<(), ClientError> {
        self.transport
            .request(Method::Delete, &session_path(id), None)
            .await
            .map_err(|e| not_found(e, id))?;

        info!(session_id = %id, "deleted session");
        self.sessions.remove(id);
        if let Some(summaries) = self.summaries.as_mut() {
            summaries.retain(|summary| &summary.id != id);
        }
        Ok(())
    }

    /// Result of the last successful [`list`](Self::list), unless invalidated since.
    pub fn cached_list(&self) -> Option<&[SessionSummary]> {
        self.summaries.as_deref()
    }

    pub fn cached(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Drop the cached list so the next caller re-lists.
    pub fn invalidate(&mut self) {
        self.summaries = None;
    }
}

/// `/sessions/<id>` with the id as a single encoded path segment.
fn session_path(id: &SessionId) -> String {
    format!("{SESSIONS_PATH}/{}", urlencoding::encode(id.as_str()))
}

fn not_found(err: ClientError, id: &SessionId) -> ClientError {
    match err.status() {
        Some(404) => ClientError::NotFound(id.to_string()),
        _ => err,
    }
}
