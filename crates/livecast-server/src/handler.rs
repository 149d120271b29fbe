use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use livecast_core::{ClientEvent, ConnectionId, RelayError, StreamId};
use livecast_engine::RelayEngine;

use crate::client::{ClientRegistry, InboundFrame};

/// Maps one connection's inbound frames onto relay operations and keeps the
/// join/leave bookkeeping.
pub struct ConnectionHandler {
    engine: Arc<RelayEngine>,
    registry: Arc<ClientRegistry>,
    /// Streams each connection has started, for orphan reporting on leave.
    started: DashMap<ConnectionId, BTreeSet<StreamId>>,
}

impl ConnectionHandler {
    pub fn new(engine: Arc<RelayEngine>, registry: Arc<ClientRegistry>) -> Self {
        Self {
            engine,
            registry,
            started: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Greet a freshly registered connection with the current stream set.
    pub fn on_connect(&self, client_id: &ConnectionId) {
        self.update_client_gauge();
        self.engine.send_active_streams(client_id);
        tracing::info!(client_id = %client_id, "Client connected");
    }

    /// Forget a connection. Streams it started stay active.
    pub fn on_disconnect(&self, client_id: &ConnectionId) {
        self.registry.unregister(client_id);
        self.update_client_gauge();

        let orphaned: Vec<StreamId> = self
            .started
            .remove(client_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default()
            .into_iter()
            .filter(|id| self.engine.store().contains(id))
            .collect();

        if orphaned.is_empty() {
            tracing::info!(client_id = %client_id, "Client disconnected");
        } else {
            let streams: Vec<&str> = orphaned.iter().map(StreamId::as_str).collect();
            tracing::warn!(
                client_id = %client_id,
                streams = ?streams,
                "Client disconnected without stopping its streams"
            );
        }
    }

    /// Handle one inbound frame from `client_id`.
    pub fn dispatch(&self, client_id: &ConnectionId, frame: InboundFrame) {
        let raw = match frame {
            InboundFrame::Text(raw) => raw,
            InboundFrame::Binary(data) => {
                tracing::debug!(client_id = %client_id, bytes = data.len(), "Rejected binary frame");
                self.reject(
                    client_id,
                    RelayError::InvalidMessage("binary frames are not supported".into()),
                );
                return;
            }
        };

        let event = match ClientEvent::parse(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "Rejected malformed message");
                self.reject(client_id, e.into());
                return;
            }
        };

        tracing::trace!(
            client_id = %client_id,
            event = event.name(),
            stream_id = %event.stream_id(),
            "Dispatching client event"
        );

        match event {
            ClientEvent::StartStream(r) => {
                // Frames queued before a disconnect are dispatched after it.
                if self.registry.contains(client_id) {
                    self.started
                        .entry(client_id.clone())
                        .or_default()
                        .insert(r.stream_id.clone());
                } else {
                    tracing::warn!(
                        client_id = %client_id,
                        stream_id = %r.stream_id,
                        "Stream started by a client that already disconnected"
                    );
                }
                self.engine.start_stream(r.stream_id, Some(client_id));
            }
            ClientEvent::StreamChunk(p) => {
                self.engine.append_chunk(&p.stream_id, p.chunk);
            }
            ClientEvent::StopStream(r) => {
                if let Some(mut ids) = self.started.get_mut(client_id) {
                    ids.remove(&r.stream_id);
                }
                self.engine.stop_stream(&r.stream_id);
            }
            ClientEvent::GetStream(r) => {
                self.engine.replay_stream(&r.stream_id, client_id);
            }
        }
    }

    fn reject(&self, client_id: &ConnectionId, err: RelayError) {
        self.engine.send_error(client_id, &err);
    }

    fn update_client_gauge(&self) {
        self.engine
            .metrics()
            .gauge_set("connected_clients", &[], self.registry.count() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use livecast_core::ServerEvent;
    use livecast_engine::RelayConfig;
    use livecast_telemetry::MetricsRecorder;
    use tokio::sync::mpsc;

    use crate::client::Outbound;

    fn setup() -> ConnectionHandler {
        setup_with_queue(64)
    }

    fn setup_with_queue(max_send_queue: usize) -> ConnectionHandler {
        let registry = Arc::new(ClientRegistry::new(max_send_queue, Duration::from_secs(90)));
        let engine = Arc::new(RelayEngine::new(
            registry.clone(),
            Arc::new(MetricsRecorder::new()),
            RelayConfig::default(),
        ));
        ConnectionHandler::new(engine, registry)
    }

    fn connect(handler: &ConnectionHandler) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (id, rx) = handler.registry().register();
        handler.on_connect(&id);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            let frames = match entry {
                Outbound::Frame(frame) => vec![frame],
                Outbound::Batch(frames) => frames,
            };
            for frame in frames {
                out.push(ServerEvent::decode(&frame).unwrap());
            }
        }
        out
    }

    fn send(handler: &ConnectionHandler, id: &ConnectionId, event: ClientEvent) {
        let raw = serde_json::to_string(&event).unwrap();
        handler.dispatch(id, InboundFrame::Text(raw));
    }

    #[test]
    fn connect_receives_active_streams() {
        let handler = setup();
        let (producer, _prx) = connect(&handler);
        send(&handler, &producer, ClientEvent::start("cam"));

        let (_viewer, mut vrx) = connect(&handler);
        assert_eq!(
            drain(&mut vrx),
            vec![ServerEvent::ActiveStreams(vec![StreamId::from("cam")])]
        );
    }

    #[test]
    fn full_session_over_handler() {
        let handler = setup();
        let (producer, mut prx) = connect(&handler);
        let (viewer, mut vrx) = connect(&handler);
        drain(&mut prx);
        drain(&mut vrx);

        send(&handler, &producer, ClientEvent::start("a"));
        send(&handler, &producer, ClientEvent::chunk("a", Bytes::from_static(b"c1")));
        send(&handler, &viewer, ClientEvent::get("a"));
        send(&handler, &producer, ClientEvent::stop("a"));

        let a = StreamId::from("a");
        assert_eq!(
            drain(&mut prx),
            vec![
                ServerEvent::ActiveStreams(vec![a.clone()]),
                ServerEvent::data(a.clone(), Bytes::from_static(b"c1")),
                ServerEvent::ActiveStreams(vec![]),
                ServerEvent::stopped(a.clone()),
            ]
        );
        assert_eq!(
            drain(&mut vrx),
            vec![
                ServerEvent::ActiveStreams(vec![a.clone()]),
                ServerEvent::started(a.clone()),
                ServerEvent::data(a.clone(), Bytes::from_static(b"c1")),
                ServerEvent::data(a.clone(), Bytes::from_static(b"c1")),
                ServerEvent::ActiveStreams(vec![]),
                ServerEvent::stopped(a),
            ]
        );
    }

    #[test]
    fn malformed_json_yields_error_to_sender_only() {
        let handler = setup();
        let (sender, mut srx) = connect(&handler);
        let (_other, mut orx) = connect(&handler);
        drain(&mut srx);
        drain(&mut orx);

        handler.dispatch(&sender, InboundFrame::Text("{nope".into()));

        let events = drain(&mut srx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::StreamError(e) => assert!(e.message.starts_with("Invalid message: ")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(drain(&mut orx).is_empty());
    }

    #[test]
    fn missing_stream_id_is_rejected() {
        let handler = setup();
        let (sender, mut srx) = connect(&handler);
        drain(&mut srx);

        handler.dispatch(
            &sender,
            InboundFrame::Text(r#"{"event":"startStream","data":{}}"#.into()),
        );

        assert!(handler.engine().store().is_empty());
        assert!(matches!(drain(&mut srx).as_slice(), [ServerEvent::StreamError(_)]));
    }

    #[test]
    fn binary_frames_are_rejected() {
        let handler = setup();
        let (sender, mut srx) = connect(&handler);
        drain(&mut srx);

        handler.dispatch(&sender, InboundFrame::Binary(Bytes::from_static(&[1, 2, 3])));

        assert_eq!(
            drain(&mut srx),
            vec![ServerEvent::error("Invalid message: binary frames are not supported")]
        );
    }

    #[test]
    fn get_missing_stream_yields_not_found() {
        let handler = setup();
        let (viewer, mut vrx) = connect(&handler);
        drain(&mut vrx);

        send(&handler, &viewer, ClientEvent::get("missing"));
        assert_eq!(drain(&mut vrx), vec![ServerEvent::error("Stream not found")]);
    }

    #[test]
    fn disconnect_does_not_stop_streams() {
        let handler = setup();
        let (producer, _prx) = connect(&handler);
        send(&handler, &producer, ClientEvent::start("a"));
        send(&handler, &producer, ClientEvent::start("b"));
        send(&handler, &producer, ClientEvent::stop("b"));

        handler.on_disconnect(&producer);

        assert!(!handler.registry().contains(&producer));
        assert_eq!(handler.engine().active_stream_ids(), vec![StreamId::from("a")]);
        assert!(handler.started.get(&producer).is_none());
    }

    #[test]
    fn client_gauge_tracks_connections() {
        let handler = setup();
        let (a, _arx) = connect(&handler);
        let (_b, _brx) = connect(&handler);
        assert_eq!(handler.engine().metrics().gauge_get("connected_clients", &[]), 2);

        handler.on_disconnect(&a);
        assert_eq!(handler.engine().metrics().gauge_get("connected_clients", &[]), 1);
    }

    #[test]
    fn replay_longer_than_send_queue_arrives_complete() {
        let handler = setup_with_queue(16);
        let (producer, mut prx) = connect(&handler);
        send(&handler, &producer, ClientEvent::start("long"));
        drain(&mut prx);
        for i in 0u32..500 {
            handler
                .engine()
                .append_chunk(&StreamId::from("long"), Bytes::from(i.to_be_bytes().to_vec()));
        }

        let (late, mut lrx) = connect(&handler);
        send(&handler, &late, ClientEvent::get("long"));

        let events = drain(&mut lrx);
        assert_eq!(events[0], ServerEvent::ActiveStreams(vec![StreamId::from("long")]));
        let chunks: Vec<Bytes> = events[1..]
            .iter()
            .map(|e| match e {
                ServerEvent::StreamData(p) => p.chunk.clone(),
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        let expected: Vec<Bytes> = (0u32..500)
            .map(|i| Bytes::from(i.to_be_bytes().to_vec()))
            .collect();
        assert_eq!(chunks, expected);
    }

    #[test]
    fn start_dispatched_after_disconnect_leaves_no_bookkeeping() {
        let handler = setup();
        let (client, _rx) = connect(&handler);
        handler.on_disconnect(&client);

        send(&handler, &client, ClientEvent::start("x"));

        assert!(handler.started.get(&client).is_none());
        assert!(handler.started.is_empty());
        assert_eq!(handler.engine().active_stream_ids(), vec![StreamId::from("x")]);
    }
}
