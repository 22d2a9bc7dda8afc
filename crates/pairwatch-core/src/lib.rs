//! pairwatch-core: event pipeline for factory-log watchers.
//!
//! # Overview
//!
//! The core crate holds everything that does not touch a socket:
//!
//! - [`request`]: JSON-RPC wire types and inbound message parsing
//! - [`event`]: raw logs, decoded pair events, subscription filters
//! - [`policy`]: admission control (rate window + circuit breaker) and reconnect backoff
//! - [`buffer`]: bounded event queue with backpressure
//! - [`dispatch`]: batch dispatcher feeding an [`EventHandler`]
//! - [`router`] / [`decode`]: per-factory routing and decoding
//! - [`trust`] / [`sink`]: token trust checks and event output
//! - [`config`] / [`network`]: TOML configuration and network profiles

pub mod buffer;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod network;
pub mod policy;
pub mod request;
pub mod router;
pub mod sink;
pub mod trust;

pub use buffer::{BufferConfig, BufferReceiver, BufferSender};
pub use config::WatcherConfig;
pub use decode::{FactoryKind, PairCreatedHandler};
pub use dispatch::{BatchConfig, BatchDispatcher, EventHandler};
pub use error::{DecodeError, WatchError};
pub use event::{DecodedEvent, RawEvent, Subscription, SubscriptionSpec};
pub use network::Network;
pub use request::{Inbound, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam, SubscriptionId};
pub use router::EventRouter;
pub use sink::{EventRecord, EventSink, TracingSink};
pub use trust::{CachedTrustCheck, TrustCheck};
