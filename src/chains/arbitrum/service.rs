use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chains::arbitrum::wallet::ArbitrumWallet;
use crate::core::config::ServiceConfig;
use crate::core::errors::TradeError;
use crate::core::kernel::rest::RestClient;
use crate::core::stop::StopFlag;
use crate::core::store::TradeStore;
use crate::core::types::{now_ms, WalletOnchainData};

const HEARTBEAT_EVERY: Duration = Duration::from_secs(5);

/// Anything that can produce a fresh wallet snapshot.
pub trait WalletSource: Send + 'static {
    fn fetch(&self) -> Result<WalletOnchainData, TradeError>;
}

impl<R: RestClient + 'static> WalletSource for ArbitrumWallet<R> {
    fn fetch(&self) -> Result<WalletOnchainData, TradeError> {
        ArbitrumWallet::fetch(self)
    }
}

/// Result of one refresh, as far as logging cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ok,
    /// First failure of an episode; an alert was raised
    FailureRaised(String),
    /// Failure inside an episode that already alerted
    FailureRepeated(String),
}

/// Run one refresh and publish it. A missing source counts as a failure.
pub fn poll_once<S: WalletSource>(source: Option<&S>, store: &TradeStore) -> PollOutcome {
    let result = source.map_or_else(|| Err(TradeError::MissingRpcOrAddress), WalletSource::fetch);
    match result {
        Ok(data) => {
            store.publish_wallet(data, now_ms());
            PollOutcome::Ok
        }
        Err(e) => {
            let code = e.code();
            if store.publish_wallet_failure(code.clone(), now_ms()) {
                PollOutcome::FailureRaised(code)
            } else {
                PollOutcome::FailureRepeated(code)
            }
        }
    }
}

/// Background wallet-balance refresher on its own thread.
pub struct WalletService {
    store: Arc<TradeStore>,
    config: ServiceConfig,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl WalletService {
    pub fn new(store: Arc<TradeStore>, config: ServiceConfig) -> Self {
        Self {
            store,
            config,
            stop: StopFlag::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the loop. Calling `start` on a running service is a no-op.
    pub fn start<S: WalletSource>(&mut self, source: Option<S>) -> Result<(), TradeError> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.stop.reset();
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("wallet-service".to_string())
            .spawn(move || run(source, &store, &config, &stop))
            .map_err(|e| TradeError::Other(format!("failed to spawn wallet service: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Raise the stop flag and join. Returns within one poll slice plus any
    /// in-flight RPC timeout.
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("wallet service thread panicked");
            }
        }
    }
}

impl Drop for WalletService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: WalletSource>(source: Option<S>, store: &TradeStore, config: &ServiceConfig, stop: &StopFlag) {
    info!("wallet service started");
    let mut last_heartbeat = Instant::now();
    let mut was_ok = true;
    let mut ticks: u64 = 0;

    while !stop.is_stopped() {
        ticks += 1;
        match poll_once(source.as_ref(), store) {
            PollOutcome::Ok => {
                if !was_ok {
                    info!("wallet rpc recovered");
                }
                was_ok = true;
            }
            PollOutcome::FailureRaised(code) => {
                warn!(error = %code, "wallet rpc unavailable");
                was_ok = false;
            }
            PollOutcome::FailureRepeated(code) => {
                debug!(error = %code, "wallet rpc still unavailable");
                was_ok = false;
            }
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
            let snap = store.wallet_snapshot();
            debug!(ticks, rpc_ok = snap.data.rpc_ok, alerts = snap.rpc_alerts, "wallet service heartbeat");
            last_heartbeat = Instant::now();
        }

        if stop.sleep(config.wallet_poll_interval, config.stop_poll_slice) {
            break;
        }
    }
    info!("wallet service stopped");
}
