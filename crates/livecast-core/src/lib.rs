pub mod chunk;
pub mod errors;
pub mod events;
pub mod ids;

pub use errors::RelayError;
pub use events::{ChunkPayload, ClientEvent, ErrorPayload, Frame, ServerEvent, StreamRef};
pub use ids::{ConnectionId, StreamId};
