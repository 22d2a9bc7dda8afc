//! Watcher error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors raised while turning a raw log into a typed event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The log carries fewer topics than the event signature requires.
    #[error("expected at least {expected} topics, got {got}")]
    MissingTopics { expected: usize, got: usize },

    /// The ABI-encoded data payload is shorter than the event layout.
    #[error("data payload too short: expected {expected} bytes, got {got}")]
    DataTooShort { expected: usize, got: usize },

    /// A numeric field does not fit its declared ABI width.
    #[error("field `{field}` out of range")]
    OutOfRange { field: &'static str },
}

/// Errors that can occur anywhere in the ingestion pipeline.
#[derive(Debug, Error)]
pub enum WatchError {
    /// WebSocket connect/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection was closed by the peer or the stream ended.
    #[error("connection closed: {0}")]
    Disconnected(String),

    /// Connecting (or waiting for a subscribe reply) took too long.
    #[error("timed out after {ms}ms")]
    ConnectTimeout { ms: u64 },

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Provider-side throttling (`-32007`).
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// The admission controller refused the request.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// A message could not be interpreted.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// JSON (de)serialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A log could not be decoded into a typed event.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// HTTP collaborator failure (trust check, factory validation).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Unrecoverable configuration fault. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The event buffer was shut down while a push was pending.
    #[error("event buffer closed")]
    BufferClosed,

    /// The retry orchestrator hit its configured attempt cap.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<WatchError>,
    },
}

impl WatchError {
    /// Returns `true` for transport faults that warrant a reconnect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::Disconnected(_) | Self::ConnectTimeout { .. }
        )
    }

    /// Returns `true` if the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }

    /// Returns `true` for faults that must cross the process boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::RetriesExhausted { .. })
    }
}
