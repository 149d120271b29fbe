use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use livecast_core::{ConnectionId, Frame};
use livecast_engine::Outbox;
use tokio::sync::mpsc;

/// A frame received from a client, before parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
}

/// One entry in a client's outbound queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Replay backlog, written to the socket in order as one unit.
    Batch(Vec<Frame>),
}

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Queue a frame without waiting. A full queue drops the frame.
    fn try_send(&self, frame: Frame) -> bool {
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client_id = %self.id, "Send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a replay batch without blocking the caller. When the queue is
    /// full the batch is handed to a task that waits for room.
    fn send_batch(&self, frames: Vec<Frame>) -> bool {
        match self.tx.try_send(Outbound::Batch(frames)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(batch)) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(client_id = %self.id, "Send queue full outside runtime, dropping replay");
                    return false;
                };
                tracing::debug!(client_id = %self.id, "Send queue full, deferring replay");
                let tx = self.tx.clone();
                let client_id = self.id.clone();
                runtime.spawn(async move {
                    if tx.send(batch).await.is_err() {
                        tracing::debug!(client_id = %client_id, "Client left before deferred replay");
                    }
                });
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            client_timeout,
        }
    }

    /// Register a new client and return its ID + outbound receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a client by ID. Dropping the client closes its outbound queue,
    /// which ends the connection's writer task.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.remove(id).map(|(_, client)| {
            client.mark_disconnected();
            client
        })
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(self.client_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            if self.unregister(&id).is_some() {
                removed += 1;
                tracing::info!(client_id = %id, "Cleaned up dead client");
            }
        }
        removed
    }
}

impl Outbox for ClientRegistry {
    fn send_to(&self, connection: &ConnectionId, frame: Frame) -> bool {
        match self.clients.get(connection) {
            Some(client) if client.is_connected() => client.try_send(frame),
            _ => false,
        }
    }

    fn send_batch_to(&self, connection: &ConnectionId, frames: Vec<Frame>) -> bool {
        match self.clients.get(connection) {
            Some(client) if client.is_connected() => client.send_batch(frames),
            _ => false,
        }
    }

    fn broadcast(&self, frame: Frame, except: Option<&ConnectionId>) -> usize {
        let mut sent = 0;
        for entry in self.clients.iter() {
            if Some(entry.key()) == except || !entry.value().is_connected() {
                continue;
            }
            if entry.value().try_send(Frame::clone(&frame)) {
                sent += 1;
            }
        }
        sent
    }
}

/// Heartbeat timing for one connection.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    pub interval: Duration,
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle
/// with heartbeat. Returns when either side closes.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ConnectionId,
    mut rx: mpsc::Receiver<Outbound>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ConnectionId, InboundFrame)>,
    heartbeat: Heartbeat,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued frames to the socket + periodic ping
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let frames = match msg {
                        Some(Outbound::Frame(frame)) => vec![frame],
                        Some(Outbound::Batch(frames)) => frames,
                        None => break,
                    };
                    if write_frames(&mut ws_tx, frames).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
            }
        }

        if let Some(client) = writer_registry.get(&writer_cid) {
            client.mark_disconnected();
        }
    });

    // Reader task: forward frames to the dispatcher, track pongs
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let inbound = match msg {
                WsMessage::Text(text) => InboundFrame::Text(text.to_string()),
                WsMessage::Binary(data) => InboundFrame::Binary(data),
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                    continue;
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => continue, // axum answers pings itself
            };
            if on_message.send((reader_cid.clone(), inbound)).await.is_err() {
                break;
            }
        }
    });

    // Wait for either task to finish, then stop the other
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
}

async fn write_frames<S>(ws_tx: &mut S, frames: Vec<Frame>) -> Result<(), axum::Error>
where
    S: futures::Sink<WsMessage, Error = axum::Error> + Unpin,
{
    for frame in frames {
        ws_tx.send(WsMessage::Text(frame.to_string().into())).await?;
    }
    Ok(())
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "Dead client cleanup");
            }
        }
    })
}
