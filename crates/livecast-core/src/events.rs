use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::StreamId;

/// An encoded server event, ready to be queued for one or more connections.
///
/// Encoding happens once per event; broadcasts clone the `Arc`, not the text.
pub type Frame = Arc<str>;

/// Payload carrying only a stream id: `{ "streamId": "..." }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRef {
    pub stream_id: StreamId,
}

/// Payload carrying one media chunk: `{ "streamId": "...", "chunk": "<base64>" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub stream_id: StreamId,
    #[serde(with = "crate::chunk::base64_bytes")]
    pub chunk: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Messages a client sends to the relay.
///
/// Wire shape: `{ "event": "startStream", "data": { "streamId": "a" } }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    StartStream(StreamRef),
    StreamChunk(ChunkPayload),
    StopStream(StreamRef),
    GetStream(StreamRef),
}

impl ClientEvent {
    pub fn start(stream_id: impl Into<StreamId>) -> Self {
        Self::StartStream(StreamRef {
            stream_id: stream_id.into(),
        })
    }

    pub fn chunk(stream_id: impl Into<StreamId>, chunk: impl Into<Bytes>) -> Self {
        Self::StreamChunk(ChunkPayload {
            stream_id: stream_id.into(),
            chunk: chunk.into(),
        })
    }

    pub fn stop(stream_id: impl Into<StreamId>) -> Self {
        Self::StopStream(StreamRef {
            stream_id: stream_id.into(),
        })
    }

    pub fn get(stream_id: impl Into<StreamId>) -> Self {
        Self::GetStream(StreamRef {
            stream_id: stream_id.into(),
        })
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartStream(_) => "startStream",
            Self::StreamChunk(_) => "streamChunk",
            Self::StopStream(_) => "stopStream",
            Self::GetStream(_) => "getStream",
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::StartStream(r) | Self::StopStream(r) | Self::GetStream(r) => &r.stream_id,
            Self::StreamChunk(p) => &p.stream_id,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Messages the relay sends to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ActiveStreams(Vec<StreamId>),
    StreamStarted(StreamRef),
    StreamData(ChunkPayload),
    StreamStopped(StreamRef),
    StreamError(ErrorPayload),
}

impl ServerEvent {
    pub fn data(stream_id: StreamId, chunk: Bytes) -> Self {
        Self::StreamData(ChunkPayload { stream_id, chunk })
    }

    pub fn started(stream_id: StreamId) -> Self {
        Self::StreamStarted(StreamRef { stream_id })
    }

    pub fn stopped(stream_id: StreamId) -> Self {
        Self::StreamStopped(StreamRef { stream_id })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::StreamError(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ActiveStreams(_) => "activeStreams",
            Self::StreamStarted(_) => "streamStarted",
            Self::StreamData(_) => "streamData",
            Self::StreamStopped(_) => "streamStopped",
            Self::StreamError(_) => "streamError",
        }
    }

    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
