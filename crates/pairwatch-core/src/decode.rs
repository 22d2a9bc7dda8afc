//! Uniswap factory event decoders.
//!
//! ```text
//! PairCreated(address indexed token0, address indexed token1, address pair, uint256)
//! PoolCreated(address indexed token0, address indexed token1, uint24 indexed fee,
//!             int24 tickSpacing, address pool)
//! ```

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dispatch::EventHandler;
use crate::error::{DecodeError, WatchError};
use crate::event::{DecodedEvent, RawEvent};
use crate::sink::{EventRecord, EventSink};
use crate::trust::TrustCheck;

const WORD: usize = 32;
const MAX_UINT24: u32 = 0x00ff_ffff;

/// Which factory generation emitted a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactoryKind {
    V2,
    V3,
}

impl FactoryKind {
    pub fn decode(self, log: &RawEvent) -> Result<DecodedEvent, DecodeError> {
        match self {
            Self::V2 => decode_v2(log),
            Self::V3 => decode_v3(log),
        }
    }
}

impl std::fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V2 => write!(f, "v2"),
            Self::V3 => write!(f, "v3"),
        }
    }
}

/// Decode a V2 `PairCreated` log.
pub fn decode_v2(log: &RawEvent) -> Result<DecodedEvent, DecodeError> {
    let (token0, token1) = token_pair(&log.topics, 3)?;
    let pair = address_word(&log.data, 0)?;
    Ok(DecodedEvent::V2PairCreated {
        token0,
        token1,
        pair,
    })
}

/// Decode a V3 `PoolCreated` log.
pub fn decode_v3(log: &RawEvent) -> Result<DecodedEvent, DecodeError> {
    let (token0, token1) = token_pair(&log.topics, 4)?;

    let fee = U256::from_be_bytes(log.topics[3].0);
    if fee > U256::from(MAX_UINT24) {
        return Err(DecodeError::OutOfRange { field: "fee" });
    }
    let fee = fee.to::<u32>();

    let tick_spacing = int24_word(&log.data, 0)?;
    let pool = address_word(&log.data, 1)?;
    Ok(DecodedEvent::V3PoolCreated {
        token0,
        token1,
        fee,
        tick_spacing,
        pool,
    })
}

fn token_pair(topics: &[B256], expected: usize) -> Result<(Address, Address), DecodeError> {
    if topics.len() < expected {
        return Err(DecodeError::MissingTopics {
            expected,
            got: topics.len(),
        });
    }
    Ok((Address::from_word(topics[1]), Address::from_word(topics[2])))
}

fn word(data: &[u8], index: usize) -> Result<&[u8], DecodeError> {
    let end = (index + 1) * WORD;
    data.get(index * WORD..end).ok_or(DecodeError::DataTooShort {
        expected: end,
        got: data.len(),
    })
}

fn address_word(data: &[u8], index: usize) -> Result<Address, DecodeError> {
    Ok(Address::from_slice(&word(data, index)?[12..]))
}

fn int24_word(data: &[u8], index: usize) -> Result<i32, DecodeError> {
    let w = word(data, index)?;
    let mut tail = [0u8; 4];
    tail.copy_from_slice(&w[28..]);
    let value = i32::from_be_bytes(tail);
    if !(-(1 << 23)..(1 << 23)).contains(&value) {
        return Err(DecodeError::OutOfRange {
            field: "tickSpacing",
        });
    }
    Ok(value)
}

/// Decodes one factory's logs, checks both tokens and reports the result.
///
/// In clean mode a record is emitted only when both tokens pass the trust
/// check, without the raw log. Otherwise every event is emitted with full
/// diagnostic detail.
pub struct PairCreatedHandler {
    kind: FactoryKind,
    trust: Arc<dyn TrustCheck>,
    sink: Arc<dyn EventSink>,
    clean_mode: bool,
}

impl PairCreatedHandler {
    pub fn new(
        kind: FactoryKind,
        trust: Arc<dyn TrustCheck>,
        sink: Arc<dyn EventSink>,
        clean_mode: bool,
    ) -> Self {
        Self {
            kind,
            trust,
            sink,
            clean_mode,
        }
    }
}

#[async_trait]
impl EventHandler for PairCreatedHandler {
    async fn handle(&self, log: &RawEvent) -> Result<(), WatchError> {
        let event = self.kind.decode(log)?;

        let (token0_trusted, token1_trusted) = futures::join!(
            self.trust.check_token_security(event.token0()),
            self.trust.check_token_security(event.token1()),
        );

        let record = EventRecord {
            event,
            token0_trusted,
            token1_trusted,
            block_number: log.block_number(),
            raw: if self.clean_mode {
                None
            } else {
                Some(serde_json::to_value(log)?)
            },
        };

        if self.clean_mode && !record.trusted() {
            tracing::debug!(
                kind = %self.kind,
                address = %record.event.address(),
                token0_trusted,
                token1_trusted,
                "skipping untrusted pair"
            );
            return Ok(());
        }
        self.sink.emit(&record);
        Ok(())
    }
}
