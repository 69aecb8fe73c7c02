use anyhow::Context;
use pocket_trader::core::config::{ServiceConfig, WalletConfig};
use pocket_trader::core::stop::StopFlag;
use pocket_trader::exchanges::hyperliquid::{create_rest_feed, create_ws_feed};
use pocket_trader::{ArbitrumWallet, MarketDataService, TradeStore, WalletService};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "env-file")]
fn load_config() -> anyhow::Result<WalletConfig> {
    Ok(WalletConfig::from_env_file("ARB")?)
}

#[cfg(not(feature = "env-file"))]
fn load_config() -> anyhow::Result<WalletConfig> {
    Ok(WalletConfig::from_env("ARB")?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().context("loading wallet configuration")?;
    let service_config = ServiceConfig::default();
    let store = Arc::new(TradeStore::new());

    let mut wallet_service = WalletService::new(Arc::clone(&store), service_config.clone());
    let wallet = match ArbitrumWallet::from_config(&config, &service_config) {
        Ok(wallet) => Some(wallet),
        Err(e) => {
            warn!(error = %e, "wallet refresh disabled");
            None
        }
    };
    wallet_service.start(wallet)?;

    let mut market_service = MarketDataService::new(Arc::clone(&store), service_config.clone());
    if std::env::var("POCKET_REST_FEED").is_ok_and(|v| v == "1") {
        market_service.start(create_rest_feed(&config, &service_config)?)?;
    } else {
        market_service.start(create_ws_feed(&config, &service_config)?)?;
    }

    // Enter on stdin, or the optional demo timer, ends the run.
    let quit = StopFlag::new();
    let on_enter = quit.clone();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        on_enter.stop();
    });
    let deadline = std::env::var("POCKET_DEMO_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    info!("running, press Enter to quit");
    while !quit.sleep(Duration::from_secs(2), service_config.stop_poll_slice) {
        let wallet = store.wallet_snapshot();
        let market = store.market_snapshot();
        info!(
            eth = %wallet.data.eth_balance,
            usdc = %wallet.data.usdc_balance,
            gas = %wallet.data.gas,
            rpc_ok = wallet.data.rpc_ok,
            btc = ?market.mids.get("BTC"),
            eth_mid = ?market.mids.get("ETH"),
            hl_spot_usdc = ?market.spot_usdc,
            hl_perp_value = ?market.perp_account_value,
            hl_total = ?market.portfolio.as_ref().map(|p| p.total_value),
            hl_pnl_24h_pct = ?market.portfolio.as_ref().and_then(|p| p.pnl_24h_pct),
            top_spot = ?market.spot_markets.first().map(|m| m.symbol.as_str()),
            market_error = ?market.last_error,
            "snapshot"
        );
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    market_service.stop();
    wallet_service.stop();
    info!("shutdown complete");
    Ok(())
}
