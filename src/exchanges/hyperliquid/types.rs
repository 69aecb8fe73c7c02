use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of the `hyperliquidChain` field in signed user actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HyperliquidChain {
    Mainnet,
    Testnet,
}

impl HyperliquidChain {
    pub const fn from_testnet(testnet: bool) -> Self {
        if testnet {
            Self::Testnet
        } else {
            Self::Mainnet
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "Mainnet",
            Self::Testnet => "Testnet",
        }
    }
}

impl fmt::Display for HyperliquidChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Info endpoint request types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum InfoRequest {
    #[serde(rename = "allMids")]
    AllMids,
    #[serde(rename = "spotClearinghouseState")]
    SpotClearinghouseState { user: String },
    #[serde(rename = "clearinghouseState")]
    ClearinghouseState { user: String },
    #[serde(rename = "userRole")]
    UserRole { user: String },
    #[serde(rename = "allPerpMetas")]
    AllPerpMetas,
    #[serde(rename = "spotMetaAndAssetCtxs")]
    SpotMetaAndAssetCtxs,
    #[serde(rename = "portfolio")]
    Portfolio { user: String },
}

// Info endpoint response types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpotBalance {
    pub coin: String,
    pub total: Decimal,
    #[serde(default)]
    pub hold: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpotClearinghouseState {
    #[serde(default)]
    pub balances: Vec<SpotBalance>,
}

impl SpotClearinghouseState {
    pub fn balance_of(&self, coin: &str) -> Option<Decimal> {
        self.balances.iter().find(|b| b.coin == coin).map(|b| b.total)
    }
}

// Authentication and signing types

/// User-signed actions accepted by `/exchange`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "usdClassTransfer", rename_all = "camelCase")]
    UsdClassTransfer {
        hyperliquid_chain: String,
        signature_chain_id: String,
        amount: String,
        to_perp: bool,
        nonce: u64,
    },
    #[serde(rename = "withdraw3", rename_all = "camelCase")]
    Withdraw3 {
        hyperliquid_chain: String,
        signature_chain_id: String,
        amount: String,
        time: u64,
        destination: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionSignature {
    pub r: String,
    pub s: String,
    pub v: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub action: Action,
    pub nonce: u64,
    pub signature: ActionSignature,
}
