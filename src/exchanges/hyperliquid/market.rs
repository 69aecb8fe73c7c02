use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::conversions::{
    parse_all_mids, perp_account_value, perp_markets, portfolio_summary, spot_balances, spot_markets,
};
use crate::core::config::ServiceConfig;
use crate::core::errors::TradeError;
use crate::core::stop::StopFlag;
use crate::core::store::TradeStore;
use crate::core::traits::{MarketDataSource, MarketStream};
use crate::core::types::now_ms;

const HEARTBEAT_EVERY: Duration = Duration::from_secs(5);

fn unavailable(stream: MarketStream) -> TradeError {
    TradeError::Other(format!("{}_unavailable", stream.name()))
}

/// Fetch one stream from `source`, parse it and publish it into `store`.
///
/// A source answering `None` counts as a failure, the same as a payload that
/// does not parse.
pub fn poll_stream<S: MarketDataSource + ?Sized>(
    stream: MarketStream,
    source: &S,
    store: &TradeStore,
) -> Result<(), TradeError> {
    match stream {
        MarketStream::Mids => {
            let raw = source.all_mids_raw()?.ok_or_else(|| unavailable(stream))?;
            let mids = parse_all_mids(&raw)?;
            if mids.is_empty() {
                return Err(unavailable(stream));
            }
            store.publish_mids(mids, now_ms());
        }
        MarketStream::Spot => {
            let raw = source
                .spot_clearinghouse_state_raw()?
                .ok_or_else(|| unavailable(stream))?;
            store.publish_spot_balances(spot_balances(&raw)?, now_ms());
        }
        MarketStream::Perp => {
            let raw = source
                .perp_clearinghouse_state_raw()?
                .ok_or_else(|| unavailable(stream))?;
            let value = perp_account_value(&raw)?.ok_or_else(|| unavailable(stream))?;
            store.publish_perp_account_value(Some(value), now_ms());
        }
        MarketStream::PerpMeta => {
            let raw = source.perp_metas_raw()?.ok_or_else(|| unavailable(stream))?;
            store.publish_perp_markets(perp_markets(&raw)?);
        }
        MarketStream::SpotMeta => {
            let raw = source.spot_meta_raw()?.ok_or_else(|| unavailable(stream))?;
            let markets = spot_markets(&raw)?;
            info!(markets = markets.len(), "spot markets loaded");
            store.publish_spot_markets(markets);
        }
        MarketStream::Portfolio => {
            let raw = source.portfolio_raw()?.ok_or_else(|| unavailable(stream))?;
            let now = now_ms();
            store.publish_portfolio(portfolio_summary(&raw, now)?, now);
        }
    }
    Ok(())
}

fn interval_for(stream: MarketStream, config: &ServiceConfig) -> Duration {
    match stream {
        MarketStream::Mids => config.mids_interval,
        MarketStream::Spot => config.account_interval,
        MarketStream::Perp => config.perp_interval,
        MarketStream::Portfolio => config.portfolio_interval,
        // Never polled again once they succeed.
        MarketStream::PerpMeta | MarketStream::SpotMeta => Duration::ZERO,
    }
}

/// Per-stream cadence: a fixed interval while healthy, a doubling backoff
/// while failing.
#[derive(Debug, Clone)]
struct Schedule {
    stream: MarketStream,
    interval: Duration,
    backoff: Option<Duration>,
    last_run: Option<Instant>,
    /// A one-shot stream that has succeeded
    done: bool,
}

impl Schedule {
    fn new(stream: MarketStream, interval: Duration) -> Self {
        Self {
            stream,
            interval,
            backoff: None,
            last_run: None,
            done: false,
        }
    }

    fn period(&self) -> Duration {
        self.backoff.unwrap_or(self.interval)
    }

    fn is_due(&self, now: Instant) -> bool {
        !self.done
            && self
                .last_run
                .map_or(true, |last| now.duration_since(last) >= self.period())
    }

    fn is_failing(&self) -> bool {
        self.backoff.is_some()
    }

    /// Returns `true` if this ends a failure episode.
    fn succeeded(&mut self, now: Instant) -> bool {
        self.last_run = Some(now);
        self.done = self.stream.is_one_shot();
        self.backoff.take().is_some()
    }

    /// The source cannot serve this stream right now. Whatever failure
    /// episode was running ends without a recovery.
    fn suspend(&mut self) {
        if self.backoff.take().is_some() {
            debug!(stream = self.stream.name(), "market stream no longer served");
        }
    }

    /// Returns `true` if this starts a failure episode.
    fn failed(&mut self, now: Instant, initial: Duration, max: Duration) -> bool {
        self.last_run = Some(now);
        match self.backoff {
            None => {
                self.backoff = Some(initial);
                true
            }
            Some(current) => {
                self.backoff = Some((current * 2).min(max));
                false
            }
        }
    }
}

/// Background market refresher: polls a `MarketDataSource` for every stream
/// it supports and publishes the results into the store.
///
/// `last_error` holds the latest failure and is cleared once no supported
/// stream is failing. Reference data is fetched until it succeeds once.
pub struct MarketDataService {
    store: Arc<TradeStore>,
    config: ServiceConfig,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl MarketDataService {
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
    pub fn start<S: MarketDataSource + 'static>(&mut self, source: S) -> Result<(), TradeError> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.stop.reset();
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("market-service".to_string())
            .spawn(move || run(&source, &store, &config, &stop))
            .map_err(|e| TradeError::Other(format!("failed to spawn market service: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("market service thread panicked");
            }
        }
    }
}

impl Drop for MarketDataService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: MarketDataSource>(source: &S, store: &TradeStore, config: &ServiceConfig, stop: &StopFlag) {
    info!("market service started");
    let mut schedules = MarketStream::ALL.map(|stream| Schedule::new(stream, interval_for(stream, config)));
    let mut last_heartbeat = Instant::now();
    let mut polls: u64 = 0;

    while !stop.is_stopped() {
        let now = Instant::now();
        for schedule in schedules.iter_mut() {
            if !source.supports(schedule.stream) {
                schedule.suspend();
                continue;
            }
            if !schedule.is_due(now) {
                continue;
            }
            polls += 1;
            let name = schedule.stream.name();
            match poll_stream(schedule.stream, source, store) {
                Ok(()) => {
                    if schedule.succeeded(now) {
                        info!(stream = name, "market stream recovered");
                    }
                }
                Err(e) => {
                    let code = e.code();
                    let detail = match &e {
                        TradeError::Other(msg) => msg.clone(),
                        _ => format!("{}_{}", name, code),
                    };
                    if schedule.failed(now, config.failure_backoff_initial, config.failure_backoff_max) {
                        warn!(stream = name, error = %e, "market stream unavailable");
                    } else {
                        debug!(
                            stream = name,
                            error = %e,
                            backoff_ms = schedule.period().as_millis() as u64,
                            "market stream still unavailable"
                        );
                    }
                    store.set_market_error(Some(detail));
                }
            }
        }
        if schedules.iter().all(|s| !s.is_failing()) && store.market_snapshot().last_error.is_some() {
            store.set_market_error(None);
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
            let snap = store.market_snapshot();
            debug!(
                polls,
                mids = snap.mids.len(),
                spot_usdc = ?snap.spot_usdc,
                perp_value = ?snap.perp_account_value,
                spot_markets = snap.spot_markets.len(),
                portfolio = ?snap.portfolio.as_ref().map(|p| p.total_value),
                "market service heartbeat"
            );
            last_heartbeat = Instant::now();
        }

        if stop.sleep(config.stop_poll_slice, config.stop_poll_slice) {
            break;
        }
    }
    info!("market service stopped");
}
