use std::sync::Arc;

use bytes::Bytes;
use livecast_core::{ConnectionId, Frame, RelayError, ServerEvent, StreamId};
use livecast_telemetry::MetricsRecorder;
use parking_lot::Mutex;

use crate::outbox::Outbox;
use crate::session::Session;
use crate::store::SessionStore;

/// Tunables for the relay engine.
#[derive(Clone, Debug, Default)]
pub struct RelayConfig {
    /// Log a warning once a single stream's buffer reaches this many bytes.
    /// Buffers are never trimmed; this only makes growth visible.
    pub buffer_warn_bytes: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartOutcome {
    /// A session already existed at this id and its buffer was discarded.
    pub replaced: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Relayed { index: usize, recipients: usize },
    /// No session at this id; the chunk was discarded without notifying anyone.
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopOutcome {
    pub existed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// `chunks` were buffered; `delivered` of them were queued for the requester.
    Replayed { chunks: usize, delivered: usize },
    NotFound,
}

/// Stream lifecycle and fan-out.
///
/// Appends and replays for one id run under that session's entry lock, so a
/// replay always observes exactly the chunk order that was broadcast live.
/// Active-stream announcements are serialized separately so clients never see
/// an older snapshot after a newer one.
pub struct RelayEngine {
    store: SessionStore,
    outbox: Arc<dyn Outbox>,
    metrics: Arc<MetricsRecorder>,
    config: RelayConfig,
    announce_lock: Mutex<()>,
}

impl RelayEngine {
    pub fn new(outbox: Arc<dyn Outbox>, metrics: Arc<MetricsRecorder>, config: RelayConfig) -> Self {
        Self {
            store: SessionStore::new(),
            outbox,
            metrics,
            config,
            announce_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn active_stream_ids(&self) -> Vec<StreamId> {
        self.store.ids()
    }

    /// Create (or reset) the session at `id`, announce the new stream set to
    /// everyone, and tell everyone except `origin` that the stream started.
    pub fn start_stream(&self, id: StreamId, origin: Option<&ConnectionId>) -> StartOutcome {
        let replaced = self.store.insert_or_replace(Session::new(id.clone()));
        match &replaced {
            Some(old) => tracing::info!(
                stream_id = %id,
                discarded_chunks = old.len(),
                "Stream restarted, buffer reset"
            ),
            None => tracing::info!(stream_id = %id, "Stream started"),
        }
        self.metrics.counter_inc("streams_started", &[], 1);

        self.announce_active_streams();
        self.emit_all(&ServerEvent::started(id), origin);

        StartOutcome {
            replaced: replaced.is_some(),
        }
    }

    /// Buffer `chunk` and broadcast it to every connection, sender included.
    pub fn append_chunk(&self, id: &StreamId, chunk: Bytes) -> AppendOutcome {
        let len = chunk.len() as u64;
        // Encoding does not depend on session state, so keep it outside the lock.
        let Some(frame) = self.encode(&ServerEvent::data(id.clone(), chunk.clone())) else {
            return AppendOutcome::Dropped;
        };

        let relayed = self.store.with_session(id, |session| {
            let before = session.total_bytes();
            let index = session.append(chunk);
            let recipients = self.outbox.broadcast(frame, None);
            (index, recipients, before, session.total_bytes())
        });

        let Some((index, recipients, before, after)) = relayed else {
            self.metrics.counter_inc("chunks_dropped", &[], 1);
            tracing::debug!(stream_id = %id, bytes = len, "Chunk for unknown stream dropped");
            return AppendOutcome::Dropped;
        };

        self.metrics.counter_inc("chunks_relayed", &[], 1);
        self.metrics.counter_inc("chunk_bytes", &[], len);
        if let Some(limit) = self.config.buffer_warn_bytes {
            if before < limit && after >= limit {
                tracing::warn!(
                    stream_id = %id,
                    buffered_bytes = after,
                    limit,
                    chunks = index + 1,
                    "Stream buffer exceeded warning threshold"
                );
            }
        }
        tracing::debug!(stream_id = %id, index, bytes = len, recipients, "Chunk relayed");

        AppendOutcome::Relayed { index, recipients }
    }

    /// Remove the session at `id`, announce the new stream set and broadcast
    /// `streamStopped`. The notification goes out even if nothing was removed.
    pub fn stop_stream(&self, id: &StreamId) -> StopOutcome {
        let removed = self.store.remove(id);
        match &removed {
            Some(session) => {
                self.metrics.counter_inc("streams_stopped", &[], 1);
                tracing::info!(
                    stream_id = %id,
                    chunks = session.len(),
                    bytes = session.total_bytes(),
                    "Stream stopped"
                );
            }
            None => tracing::info!(stream_id = %id, "Stop requested for unknown stream"),
        }

        self.announce_active_streams();
        self.emit_all(&ServerEvent::stopped(id.clone()), None);

        StopOutcome {
            existed: removed.is_some(),
        }
    }

    /// Send every buffered chunk of `id`, in arrival order, to `requester`
    /// only. A missing stream yields a single `streamError`.
    pub fn replay_stream(&self, id: &StreamId, requester: &ConnectionId) -> ReplayOutcome {
        let replayed = self.store.with_session(id, |session| {
            let frames: Vec<Frame> = session
                .chunks()
                .iter()
                .filter_map(|chunk| self.encode(&ServerEvent::data(id.clone(), chunk.clone())))
                .collect();
            let encoded = frames.len();
            // One queue entry for the whole backlog, so the requester's queue
            // length never truncates a replay.
            let delivered = if encoded > 0 && self.outbox.send_batch_to(requester, frames) {
                encoded
            } else {
                0
            };
            (session.len(), delivered)
        });

        match replayed {
            Some((chunks, delivered)) => {
                self.metrics.counter_inc("replays", &[], 1);
                if delivered < chunks {
                    tracing::warn!(
                        stream_id = %id,
                        client_id = %requester,
                        chunks,
                        delivered,
                        "Replay not delivered, client is gone or its queue is closed"
                    );
                } else {
                    tracing::info!(stream_id = %id, client_id = %requester, chunks, "Stream replayed");
                }
                ReplayOutcome::Replayed { chunks, delivered }
            }
            None => {
                tracing::info!(stream_id = %id, client_id = %requester, "Replay requested for unknown stream");
                self.send_error(requester, &RelayError::NotFound(id.clone()));
                ReplayOutcome::NotFound
            }
        }
    }

    /// Send the current active-stream set to one connection.
    pub fn send_active_streams(&self, to: &ConnectionId) -> bool {
        let _guard = self.announce_lock.lock();
        self.emit_to(to, &ServerEvent::ActiveStreams(self.store.ids()))
    }

    /// Report a failure to the connection that caused it.
    pub fn send_error(&self, to: &ConnectionId, err: &RelayError) -> bool {
        self.metrics
            .counter_inc("relay_errors", &[("kind", err.error_kind())], 1);
        self.emit_to(to, &err.to_event())
    }

    fn announce_active_streams(&self) {
        let _guard = self.announce_lock.lock();
        let ids = self.store.ids();
        self.metrics.gauge_set("active_streams", &[], ids.len() as i64);
        self.emit_all(&ServerEvent::ActiveStreams(ids), None);
    }

    fn emit_to(&self, to: &ConnectionId, event: &ServerEvent) -> bool {
        match self.encode(event) {
            Some(frame) => self.outbox.send_to(to, frame),
            None => false,
        }
    }

    fn emit_all(&self, event: &ServerEvent, except: Option<&ConnectionId>) -> usize {
        match self.encode(event) {
            Some(frame) => self.outbox.broadcast(frame, except),
            None => 0,
        }
    }

    fn encode(&self, event: &ServerEvent) -> Option<Frame> {
        match event.encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "Failed to encode server event");
                None
            }
        }
    }
}
