//! Log and event types flowing through the pipeline.

use alloy_primitives::{Address, Bytes, B256, U64};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::request::{JsonRpcRequest, SubscriptionId};

/// A log exactly as delivered by `eth_subscribe("logs")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub log_index: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    /// Set by the node when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawEvent {
    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }

    pub fn log_index(&self) -> Option<u64> {
        self.log_index.map(|n| n.to::<u64>())
    }
}

/// A factory creation event decoded from a [`RawEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum DecodedEvent {
    V2PairCreated {
        token0: Address,
        token1: Address,
        pair: Address,
    },
    V3PoolCreated {
        token0: Address,
        token1: Address,
        fee: u32,
        tick_spacing: i32,
        pool: Address,
    },
}

impl DecodedEvent {
    pub fn token0(&self) -> Address {
        match self {
            Self::V2PairCreated { token0, .. } | Self::V3PoolCreated { token0, .. } => *token0,
        }
    }

    pub fn token1(&self) -> Address {
        match self {
            Self::V2PairCreated { token1, .. } | Self::V3PoolCreated { token1, .. } => *token1,
        }
    }

    /// The pair (V2) or pool (V3) contract address.
    pub fn address(&self) -> Address {
        match self {
            Self::V2PairCreated { pair, .. } => *pair,
            Self::V3PoolCreated { pool, .. } => *pool,
        }
    }

    /// Fee tier in hundredths of a basis point (V3 only).
    pub fn fee_tier(&self) -> Option<u32> {
        match self {
            Self::V2PairCreated { .. } => None,
            Self::V3PoolCreated { fee, .. } => Some(*fee),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::V2PairCreated { .. } => "V2 PairCreated",
            Self::V3PoolCreated { .. } => "V3 PoolCreated",
        }
    }
}

/// The log filter sent with `eth_subscribe`.
///
/// All addresses and topics share one subscription: `topics` is sent as a
/// single OR-set in position 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub addresses: Vec<Address>,
    pub topics: Vec<B256>,
}

impl SubscriptionSpec {
    /// Build the `eth_subscribe` request carrying this filter.
    pub fn to_request(&self, id: u64) -> JsonRpcRequest {
        JsonRpcRequest::new(
            id,
            "eth_subscribe",
            vec![Value::String("logs".into()), self.filter()],
        )
    }

    fn filter(&self) -> Value {
        json!({
            "address": self.addresses,
            "topics": [self.topics],
        })
    }
}

/// An acknowledged subscription. Lives for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub spec: SubscriptionSpec,
}
