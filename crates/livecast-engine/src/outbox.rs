use livecast_core::{ConnectionId, Frame};

/// Outbound side of the transport, as seen by the relay engine.
///
/// All methods are called while the engine holds a session's entry lock, so
/// implementations must enqueue without blocking. Delivery is best-effort:
/// what happens when a connection cannot accept more frames is up to the
/// implementation.
pub trait Outbox: Send + Sync {
    /// Queue `frame` for one connection. Returns `false` if it was not queued.
    fn send_to(&self, connection: &ConnectionId, frame: Frame) -> bool;

    /// Queue `frames` for one connection as a single unit, delivered in order.
    /// The batch is not limited by the connection's queue length. Returns
    /// `false` if it was not queued.
    fn send_batch_to(&self, connection: &ConnectionId, frames: Vec<Frame>) -> bool;

    /// Queue `frame` for every connected client except `except`. Returns the
    /// number of connections it was queued for.
    fn broadcast(&self, frame: Frame, except: Option<&ConnectionId>) -> usize;
}
