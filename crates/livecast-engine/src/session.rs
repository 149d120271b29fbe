use bytes::Bytes;
use chrono::{DateTime, Utc};
use livecast_core::StreamId;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Stopped,
}

/// Server-side record of one broadcast: its id and every chunk received so
/// far, in arrival order.
///
/// Sessions in the store are always `Active`; a stopped session only exists as
/// the value handed back by [`crate::SessionStore::remove`].
#[derive(Clone, Debug)]
pub struct Session {
    id: StreamId,
    chunks: Vec<Bytes>,
    state: SessionState,
    started_at: DateTime<Utc>,
    total_bytes: u64,
}

impl Session {
    pub fn new(id: StreamId) -> Self {
        Self {
            id,
            chunks: Vec::new(),
            state: SessionState::Active,
            started_at: Utc::now(),
            total_bytes: 0,
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append a chunk and return its position in the sequence.
    pub fn append(&mut self, chunk: Bytes) -> usize {
        self.total_bytes += chunk.len() as u64;
        self.chunks.push(chunk);
        self.chunks.len() - 1
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn into_stopped(mut self) -> Self {
        self.state = SessionState::Stopped;
        self
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            stream_id: self.id.clone(),
            chunks: self.chunks.len(),
            bytes: self.total_bytes,
            started_at: self.started_at,
        }
    }
}

/// Lightweight view of a session for health and listing endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub stream_id: StreamId,
    pub chunks: usize,
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
}
