//! Network profiles: factory deployments and event topics.

use alloy_primitives::{address, b256, Address, B256};
use serde::{Deserialize, Serialize};

use crate::decode::FactoryKind;

/// `keccak256("PairCreated(address,address,address,uint256)")`
pub const V2_PAIR_CREATED_TOPIC: B256 =
    b256!("0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9");

/// `keccak256("PoolCreated(address,address,uint24,int24,address)")`
pub const V3_POOL_CREATED_TOPIC: B256 =
    b256!("783cca1c0412dd0d695e784568c96da2087fba7ca78f2288a3f1f3100f367fc8");

const UNISWAP_V2_FACTORY: Address = address!("5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f");
const UNISWAP_V3_FACTORY: Address = address!("1f98431c8ad98523631ae4a59f267346ea31f984");
const POLYGON_V2_FACTORY: Address = address!("5757371414417b8c6caad45baef941abc7d3ab32");

/// Supported networks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Goerli,
    Arbitrum,
    Optimism,
    Polygon,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Self::Mainnet,
        Self::Goerli,
        Self::Arbitrum,
        Self::Optimism,
        Self::Polygon,
    ];

    pub fn chain_id(self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Goerli => 5,
            Self::Arbitrum => 42_161,
            Self::Optimism => 10,
            Self::Polygon => 137,
        }
    }

    /// Canonical factory for `kind`, if deployed on this network.
    pub fn factory(self, kind: FactoryKind) -> Option<Address> {
        match (self, kind) {
            (Self::Mainnet | Self::Goerli, FactoryKind::V2) => Some(UNISWAP_V2_FACTORY),
            (Self::Polygon, FactoryKind::V2) => Some(POLYGON_V2_FACTORY),
            (Self::Arbitrum | Self::Optimism, FactoryKind::V2) => None,
            (_, FactoryKind::V3) => Some(UNISWAP_V3_FACTORY),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mainnet => "mainnet",
            Self::Goerli => "goerli",
            Self::Arbitrum => "arbitrum",
            Self::Optimism => "optimism",
            Self::Polygon => "polygon",
        };
        f.write_str(name)
    }
}
