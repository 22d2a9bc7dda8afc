//! pairwatch-ws: WebSocket log subscription with reconnect and admission control.
//!
//! # Features
//! - One multiplexed `eth_subscribe("logs")` covering every factory
//! - Admission-gated subscribe attempts (rate window + circuit breaker)
//! - Provider throttling (`-32007`) handled without tearing down the socket
//! - Reconnect with fixed or exponential-jitter backoff
//! - Cooperative shutdown through a `CancellationToken`

pub mod supervisor;
pub mod transport;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use supervisor::{ConnectionSupervisor, SupervisorState};
pub use transport::{Connection, Connector, WsConnector};
pub use watcher::Watcher;
