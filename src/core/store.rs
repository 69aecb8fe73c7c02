use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::types::{PerpMarket, PortfolioSummary, SpotMarket, WalletOnchainData};

/// Wallet aggregate as seen by readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletState {
    pub data: WalletOnchainData,
    /// Number of failure episodes seen so far. Bumped once per ok -> not-ok edge.
    pub rpc_alerts: u64,
    pub updated_ms: i64,
    pub last_error: Option<String>,
    seen_ok: Option<bool>,
}

/// Market aggregate as seen by readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketState {
    pub mids: BTreeMap<String, Decimal>,
    pub mids_updated_ms: i64,
    /// Spot `total` per coin
    pub spot_balances: BTreeMap<String, Decimal>,
    pub spot_usdc: Option<Decimal>,
    pub account_updated_ms: i64,
    /// Perp `marginSummary.accountValue`
    pub perp_account_value: Option<Decimal>,
    pub perp_updated_ms: i64,
    pub perp_markets: Vec<PerpMarket>,
    /// Most traded USDC pairs first
    pub spot_markets: Vec<SpotMarket>,
    pub portfolio: Option<PortfolioSummary>,
    pub portfolio_updated_ms: i64,
    pub last_error: Option<String>,
}

/// Shared state written by the background services and read by the UI.
///
/// Each aggregate sits behind its own mutex. Readers only ever receive a full
/// copy taken under a short lock.
#[derive(Debug, Default)]
pub struct TradeStore {
    wallet: Mutex<WalletState>,
    market: Mutex<MarketState>,
}

// A panicking writer cannot leave a half-written snapshot: every write replaces
// whole fields. Recover the guard instead of propagating the poison.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet_snapshot(&self) -> WalletState {
        lock(&self.wallet).clone()
    }

    pub fn market_snapshot(&self) -> MarketState {
        lock(&self.market).clone()
    }

    /// Replace the wallet snapshot.
    ///
    /// Returns `true` when this write starts a new failure episode, in which case
    /// `rpc_alerts` has been incremented.
    pub fn publish_wallet(&self, data: WalletOnchainData, now_ms: i64) -> bool {
        Self::write_wallet(&mut lock(&self.wallet), data, now_ms)
    }

    fn write_wallet(state: &mut WalletState, data: WalletOnchainData, now_ms: i64) -> bool {
        let raise = !data.rpc_ok && state.seen_ok != Some(false);
        if raise {
            state.rpc_alerts += 1;
        }
        state.seen_ok = Some(data.rpc_ok);
        if data.rpc_ok {
            state.last_error = None;
        }
        state.data = data;
        state.updated_ms = now_ms;
        raise
    }

    /// Mark the wallet unreachable, keeping the error for display.
    pub fn publish_wallet_failure(&self, error: String, now_ms: i64) -> bool {
        let mut state = lock(&self.wallet);
        let raise = Self::write_wallet(&mut state, WalletOnchainData::unavailable(), now_ms);
        state.last_error = Some(error);
        raise
    }

    pub fn publish_mids(&self, mids: BTreeMap<String, Decimal>, now_ms: i64) {
        let mut state = lock(&self.market);
        state.mids = mids;
        state.mids_updated_ms = now_ms;
    }

    /// Replace the spot balances; `spot_usdc` follows the `USDC` entry.
    pub fn publish_spot_balances(&self, balances: BTreeMap<String, Decimal>, now_ms: i64) {
        let mut state = lock(&self.market);
        state.spot_usdc = balances.get("USDC").copied();
        state.spot_balances = balances;
        state.account_updated_ms = now_ms;
    }

    pub fn publish_perp_account_value(&self, value: Option<Decimal>, now_ms: i64) {
        let mut state = lock(&self.market);
        state.perp_account_value = value;
        state.perp_updated_ms = now_ms;
    }

    pub fn publish_perp_markets(&self, markets: Vec<PerpMarket>) {
        lock(&self.market).perp_markets = markets;
    }

    pub fn publish_spot_markets(&self, markets: Vec<SpotMarket>) {
        lock(&self.market).spot_markets = markets;
    }

    pub fn publish_portfolio(&self, summary: PortfolioSummary, now_ms: i64) {
        let mut state = lock(&self.market);
        state.portfolio = Some(summary);
        state.portfolio_updated_ms = now_ms;
    }

    pub fn set_market_error(&self, error: Option<String>) {
        lock(&self.market).last_error = error;
    }
}
