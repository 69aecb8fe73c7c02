use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::TradeError;

/// 20-byte account address. Always displayed as lowercase `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Left-pad to a 32-byte ABI word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

/// Lowercase, strip any `0x`, keep the last 40 characters and left-pad with
/// zeros, then re-prefix.
///
/// Characters are not validated: non-hex input is lowercased, padded and
/// truncated exactly like digits, so the result is always 42 characters.
pub fn normalize_address_hex(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    let count = digits.chars().count();
    let tail: String = digits.chars().skip(count.saturating_sub(40)).collect();
    format!("0x{:0>40}", tail)
}

impl FromStr for Address {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 40 {
            return Err(TradeError::Other(format!("invalid address length: {}", s)));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out)
            .map_err(|e| TradeError::Other(format!("invalid address {}: {}", s, e)))?;
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How the recovery id is folded into the `v` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    /// Legacy transaction replay protection: `v = chain_id * 2 + 35 + recid`
    Eip155 { chain_id: u64 },
    /// Exchange envelope: `v = 27 + (recid & 1)`
    Parity,
}

/// ECDSA signature over secp256k1 with its recovery id.
///
/// `s` is always in the lower half of the curve order for signatures produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recid: u8,
}

impl Signature {
    pub fn v(&self, mode: SignatureMode) -> u64 {
        match mode {
            SignatureMode::Eip155 { chain_id } => chain_id * 2 + 35 + u64::from(self.recid & 1),
            SignatureMode::Parity => 27 + u64::from(self.recid & 1),
        }
    }

    pub fn r_hex(&self) -> String {
        format!("0x{}", hex::encode(self.r))
    }

    pub fn s_hex(&self) -> String {
        format!("0x{}", hex::encode(self.s))
    }

    pub fn to_compact(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }
}

/// On-chain wallet view written by the wallet service, replaced wholesale on every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletOnchainData {
    /// ETH balance, formatted
    pub eth_balance: String,
    /// USDC balance, formatted
    pub usdc_balance: String,
    /// "GAS: <gwei> GWEI"
    pub gas: String,
    pub eth_balance_wei: u128,
    pub usdc_balance_raw: u128,
    pub gas_price_wei: u128,
    pub rpc_ok: bool,
}

impl WalletOnchainData {
    /// Placeholder shown while the node cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            eth_balance: "UNKNOWN".to_string(),
            usdc_balance: "UNKNOWN".to_string(),
            gas: "GAS: UNKNOWN".to_string(),
            ..Self::default()
        }
    }
}

/// One perp listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerpMarket {
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
}

/// A USDC-quoted spot pair with its day context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotMarket {
    /// Symbol shown to the user, e.g. `BTC` for the `UBTC` token
    pub symbol: String,
    /// Key the pair is priced under in `allMids`: the pair name when
    /// canonical, `@<index>` otherwise
    pub price_key: String,
    pub mid_px: Option<Decimal>,
    pub prev_day_px: Option<Decimal>,
    pub day_ntl_vlm: Decimal,
    pub day_base_vlm: Decimal,
    pub price_decimals: u32,
}

/// Account totals from the `portfolio` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    /// Change over the last 24h of the pnl history; `None` with fewer than two points
    pub pnl_24h: Option<Decimal>,
    pub pnl_24h_pct: Option<Decimal>,
}

/// Raw payload cached from the market feed together with the time it arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketCacheEntry {
    pub payload: String,
    pub timestamp_ms: i64,
}

impl MarketCacheEntry {
    pub fn new(payload: String, timestamp_ms: i64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    /// The payload, or `None` when it is missing or older than `max_age_ms`.
    pub fn fresh(&self, now_ms: i64, max_age_ms: i64) -> Option<&str> {
        if self.payload.is_empty() || self.timestamp_ms == 0 {
            return None;
        }
        if now_ms - self.timestamp_ms > max_age_ms {
            return None;
        }
        Some(&self.payload)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a JSON-RPC hex quantity (`0x1a2b`) into an unsigned integer.
///
/// Leading zeros are accepted (ABI return words are 64 digits wide); values that
/// do not fit in 128 bits are rejected.
pub fn parse_hex_quantity(s: &str) -> Result<u128, TradeError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| TradeError::ProtocolError(format!("not a hex quantity: {}", s)))?;
    if digits.is_empty() {
        return Err(TradeError::ProtocolError("empty hex quantity".to_string()));
    }
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Err(TradeError::ProtocolError(format!(
            "hex quantity exceeds 128 bits: {}",
            s
        )));
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| TradeError::ProtocolError(format!("bad hex quantity {}: {}", s, e)))
}

pub fn to_hex_quantity(v: u128) -> String {
    format!("0x{:x}", v)
}
