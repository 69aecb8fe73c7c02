use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument};

use super::codec::{HyperliquidCodec, HyperliquidWsMessage, Subscription};
use super::conversions::web_data_clearinghouse_state;
use super::rest::HyperliquidRest;
use super::types::InfoRequest;
use crate::core::errors::TradeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::rest::RestClient;
use crate::core::kernel::ws::{WsClient, WsConfig, WsHandler, WsSink, WsState};
use crate::core::traits::{MarketDataSource, MarketStream};
use crate::core::types::{now_ms, Address, MarketCacheEntry};

/// Cached payloads older than this are reported unavailable.
pub const DEFAULT_MAX_AGE_MS: i64 = 15_000;

const SPOT_STATE_KIND: &str = "spotClearinghouseState";

#[derive(Debug)]
struct FeedCache {
    mids: MarketCacheEntry,
    web_data: MarketCacheEntry,
    spot: MarketCacheEntry,
    user: Option<Address>,
    spot_request_pending: bool,
    next_id: u64,
    /// Id of the `post` still waiting for its reply; 0 when none is
    last_sent_id: u64,
    reconnect_requested: bool,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self {
            mids: MarketCacheEntry::default(),
            web_data: MarketCacheEntry::default(),
            spot: MarketCacheEntry::default(),
            user: None,
            spot_request_pending: false,
            next_id: 1,
            last_sent_id: 0,
            reconnect_requested: false,
        }
    }
}

type SharedCache = Arc<Mutex<FeedCache>>;

fn lock(cache: &SharedCache) -> MutexGuard<'_, FeedCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session-side half of the feed: subscribes, issues spot-state posts and
/// files whatever arrives into the shared cache.
#[derive(Debug)]
pub struct FeedHandler {
    codec: HyperliquidCodec,
    cache: SharedCache,
}

impl FeedHandler {
    fn send_subscription(&self, sink: &mut dyn WsSink, subscription: &Subscription) -> Result<(), TradeError> {
        sink.send_text(&self.codec.encode_subscription(subscription)?)
    }

    fn accept(&self, message: HyperliquidWsMessage, now: i64) {
        let mut cache = lock(&self.cache);
        match message {
            HyperliquidWsMessage::AllMids(mids) => cache.mids = MarketCacheEntry::new(mids, now),
            HyperliquidWsMessage::WebData3(data) => cache.web_data = MarketCacheEntry::new(data, now),
            HyperliquidWsMessage::PostResponse { id, kind, data } => {
                let expected = cache.last_sent_id;
                if expected != 0 && id == expected && kind.as_deref() == Some(SPOT_STATE_KIND) {
                    cache.spot = MarketCacheEntry::new(data, now);
                    cache.last_sent_id = 0;
                } else {
                    debug!(id, expected, kind = ?kind, "dropping uncorrelated post response");
                }
            }
        }
    }
}

impl WsHandler for FeedHandler {
    fn on_connected(&mut self, sink: &mut dyn WsSink) -> Result<(), TradeError> {
        let user = {
            let mut cache = lock(&self.cache);
            // An unanswered post from the previous connection never will be.
            if cache.last_sent_id != 0 {
                cache.last_sent_id = 0;
                cache.spot_request_pending = true;
            }
            cache.user
        };
        self.send_subscription(sink, &Subscription::AllMids)?;
        if let Some(user) = user {
            self.send_subscription(sink, &Subscription::WebData3 { user: user.to_string() })?;
            info!(%user, "subscribed to allMids and webData3");
        } else {
            info!("subscribed to allMids");
        }
        Ok(())
    }

    fn on_tick(&mut self, sink: &mut dyn WsSink) -> Result<(), TradeError> {
        let (id, user) = {
            let mut cache = lock(&self.cache);
            let Some(user) = cache.user.filter(|_| cache.spot_request_pending) else {
                return Ok(());
            };
            let id = cache.next_id;
            cache.next_id += 1;
            (id, user)
        };

        let text = self.codec.encode_post(
            id,
            &InfoRequest::SpotClearinghouseState {
                user: user.to_string(),
            },
        )?;
        sink.send_text(&text)?;

        let mut cache = lock(&self.cache);
        cache.last_sent_id = id;
        cache.spot_request_pending = false;
        debug!(id, "spot state requested");
        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        match self.codec.decode_message(text) {
            Ok(Some(message)) => self.accept(message, now_ms()),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "undecodable websocket message"),
        }
    }

    fn should_reconnect(&mut self) -> bool {
        std::mem::take(&mut lock(&self.cache).reconnect_requested)
    }
}

/// Streaming market source backed by one WebSocket session.
///
/// Streamed reads never block on the network: they return whatever the
/// session thread last cached, or `None` once it is older than `max_age_ms`.
/// A stale spot read also queues a correlated `post` for the session to send.
/// The perp account comes out of the `webData3` push.
///
/// Reference data and the portfolio have no stream. They are fetched over
/// `/info` when an info client is attached, and reported unsupported
/// otherwise.
pub struct HyperliquidWsFeed {
    cache: SharedCache,
    max_age_ms: i64,
    client: Mutex<Option<WsClient>>,
    info: Option<HyperliquidRest<Arc<dyn RestClient>>>,
}

impl Default for HyperliquidWsFeed {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_MS)
    }
}

impl HyperliquidWsFeed {
    pub fn new(max_age_ms: i64) -> Self {
        Self {
            cache: SharedCache::default(),
            max_age_ms,
            client: Mutex::new(None),
            info: None,
        }
    }

    /// Serve the non-streamed requests through `client`.
    pub fn with_info_client(mut self, client: Arc<dyn RestClient>) -> Self {
        self.info = Some(HyperliquidRest::new(client, None, false));
        self
    }

    /// A handler writing into this feed's cache. `start` uses one; tests can
    /// drive another directly.
    pub fn handler(&self) -> FeedHandler {
        FeedHandler {
            codec: HyperliquidCodec::new(),
            cache: Arc::clone(&self.cache),
        }
    }

    /// Spawn the session thread. A second call while running is a no-op.
    #[instrument(skip(self, config), fields(exchange = "hyperliquid"))]
    pub fn start(&self, url: &str, config: WsConfig) -> Result<(), TradeError> {
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if client.is_some() {
            return Ok(());
        }
        *client = Some(WsClient::spawn(url.to_string(), config, self.handler())?);
        Ok(())
    }

    pub fn stop(&self) {
        let client = self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut client) = client {
            client.stop();
        }
    }

    pub fn state(&self) -> WsState {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(WsState::Disconnected, WsClient::state)
    }

    fn mids_at(&self, now: i64) -> Option<String> {
        lock(&self.cache).mids.fresh(now, self.max_age_ms).map(str::to_string)
    }

    fn web_data_at(&self, now: i64) -> Option<String> {
        lock(&self.cache).web_data.fresh(now, self.max_age_ms).map(str::to_string)
    }

    fn user(&self) -> Option<Address> {
        lock(&self.cache).user
    }

    /// Perp state from a fresh `webData3`, else one `/info` round trip.
    fn perp_at(&self, now: i64) -> Result<Option<String>, TradeError> {
        if let Some(web_data) = self.web_data_at(now) {
            if let Some(state) = web_data_clearinghouse_state(&web_data)? {
                return Ok(Some(state));
            }
        }
        match (&self.info, self.user()) {
            (Some(info), Some(user)) => info
                .info_raw(&InfoRequest::ClearinghouseState {
                    user: user.to_string(),
                })
                .map(Some),
            _ => Ok(None),
        }
    }

    fn info_request(&self, request: InfoRequest) -> Result<Option<String>, TradeError> {
        match &self.info {
            Some(info) => info.info_raw(&request).map(Some),
            None => Ok(None),
        }
    }

    fn spot_at(&self, now: i64) -> Option<String> {
        let mut cache = lock(&self.cache);
        if let Some(payload) = cache.spot.fresh(now, self.max_age_ms) {
            return Some(payload.to_string());
        }
        cache.spot_request_pending = true;
        None
    }
}

impl MarketDataSource for HyperliquidWsFeed {
    fn all_mids_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(self.mids_at(now_ms()))
    }

    fn supports(&self, stream: MarketStream) -> bool {
        let has_user = self.user().is_some();
        match stream {
            MarketStream::Mids => true,
            MarketStream::Spot | MarketStream::Perp => has_user,
            MarketStream::PerpMeta | MarketStream::SpotMeta => self.info.is_some(),
            MarketStream::Portfolio => has_user && self.info.is_some(),
        }
    }

    fn set_user_address(&self, address: Option<Address>) {
        let mut cache = lock(&self.cache);
        if cache.user == address {
            return;
        }
        info!(user = ?address, "feed user changed, resubscribing");
        cache.user = address;
        cache.web_data = MarketCacheEntry::default();
        cache.spot = MarketCacheEntry::default();
        cache.reconnect_requested = true;
    }

    fn user_web_data_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(self.web_data_at(now_ms()))
    }

    fn spot_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(self.spot_at(now_ms()))
    }

    fn perp_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        self.perp_at(now_ms())
    }

    fn perp_metas_raw(&self) -> Result<Option<String>, TradeError> {
        self.info_request(InfoRequest::AllPerpMetas)
    }

    fn spot_meta_raw(&self) -> Result<Option<String>, TradeError> {
        self.info_request(InfoRequest::SpotMetaAndAssetCtxs)
    }

    fn portfolio_raw(&self) -> Result<Option<String>, TradeError> {
        match self.user() {
            Some(user) => self.info_request(InfoRequest::Portfolio {
                user: user.to_string(),
            }),
            None => Ok(None),
        }
    }
}

impl Drop for HyperliquidWsFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polling source: every read is one `/info` round trip.
pub struct HyperliquidRestFeed<R: RestClient> {
    rest: HyperliquidRest<R>,
    user: Mutex<Option<Address>>,
}

impl<R: RestClient> HyperliquidRestFeed<R> {
    pub fn new(rest: HyperliquidRest<R>) -> Self {
        let user = rest.wallet_address().copied();
        Self {
            rest,
            user: Mutex::new(user),
        }
    }

    fn user(&self) -> Option<Address> {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn info_for_user(&self, request: impl FnOnce(String) -> InfoRequest) -> Result<Option<String>, TradeError> {
        match self.user() {
            Some(user) => self.rest.info_raw(&request(user.to_string())).map(Some),
            None => Ok(None),
        }
    }
}

impl<R: RestClient> MarketDataSource for HyperliquidRestFeed<R> {
    fn all_mids_raw(&self) -> Result<Option<String>, TradeError> {
        self.rest.info_raw(&InfoRequest::AllMids).map(Some)
    }

    fn supports(&self, stream: MarketStream) -> bool {
        match stream {
            MarketStream::Mids | MarketStream::PerpMeta | MarketStream::SpotMeta => true,
            MarketStream::Spot | MarketStream::Perp | MarketStream::Portfolio => self.user().is_some(),
        }
    }

    fn set_user_address(&self, address: Option<Address>) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = address;
    }

    fn spot_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        self.info_for_user(|user| InfoRequest::SpotClearinghouseState { user })
    }

    fn perp_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        self.info_for_user(|user| InfoRequest::ClearinghouseState { user })
    }

    fn perp_metas_raw(&self) -> Result<Option<String>, TradeError> {
        self.rest.info_raw(&InfoRequest::AllPerpMetas).map(Some)
    }

    fn spot_meta_raw(&self) -> Result<Option<String>, TradeError> {
        self.rest.info_raw(&InfoRequest::SpotMetaAndAssetCtxs).map(Some)
    }

    fn portfolio_raw(&self) -> Result<Option<String>, TradeError> {
        self.info_for_user(|user| InfoRequest::Portfolio { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[derive(Default)]
    struct Recorder {
        sent: Vec<String>,
        fail: bool,
    }

    impl WsSink for Recorder {
        fn send_text(&mut self, text: &str) -> Result<(), TradeError> {
            if self.fail {
                return Err(TradeError::TransportError("closed".to_string()));
            }
            self.sent.push(text.to_string());
            Ok(())
        }
    }

    struct Canned {
        reply: &'static str,
        sent: Mutex<Vec<String>>,
    }

    impl RestClient for Canned {
        fn post_raw(&self, _endpoint: &str, body: &str) -> Result<String, TradeError> {
            self.sent.lock().unwrap().push(body.to_string());
            Ok(self.reply.to_string())
        }
    }

    fn user() -> Address {
        USER.parse().unwrap()
    }

    fn post_reply(id: u64, kind: &str) -> String {
        format!(
            r#"{{"channel":"post","data":{{"id":{},"response":{{"type":"info","payload":{{"type":"{}","data":{{"balances":[{{"coin":"USDC","total":"3"}}]}}}}}}}}}}"#,
            id, kind
        )
    }

    #[test]
    fn test_subscribes_user_channel_only_with_address() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        let mut sink = Recorder::default();
        handler.on_connected(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), 1);

        feed.set_user_address(Some(user()));
        assert!(handler.should_reconnect());
        assert!(!handler.should_reconnect());

        let mut sink = Recorder::default();
        handler.on_connected(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), 2);
        assert!(sink.sent[1].contains(r#""type":"webData3""#));
        assert!(sink.sent[1].contains(USER));
    }

    #[test]
    fn test_same_address_does_not_reconnect() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        feed.set_user_address(Some(user()));
        assert!(handler.should_reconnect());
        feed.set_user_address(Some(user()));
        assert!(!handler.should_reconnect());
    }

    #[test]
    fn test_mids_cached_and_expire() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        handler.accept(HyperliquidWsMessage::AllMids(r#"{"BTC":"1"}"#.to_string()), 1_000);

        assert_eq!(feed.mids_at(1_000 + 14_999).as_deref(), Some(r#"{"BTC":"1"}"#));
        assert_eq!(feed.mids_at(1_000 + 15_000).as_deref(), Some(r#"{"BTC":"1"}"#));
        assert_eq!(feed.mids_at(1_000 + 15_001), None);

        handler.on_text(r#"{"channel":"allMids","data":{"mids":{"ETH":"2"}}}"#);
        assert_eq!(feed.all_mids_raw().unwrap().as_deref(), Some(r#"{"ETH":"2"}"#));
    }

    #[test]
    fn test_spot_post_is_correlated() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        let mut sink = Recorder::default();

        // No user yet: stale read queues a request but nothing is sent.
        assert_eq!(feed.spot_at(10_000), None);
        handler.on_tick(&mut sink).unwrap();
        assert!(sink.sent.is_empty());

        feed.set_user_address(Some(user()));
        assert_eq!(feed.spot_at(10_000), None);
        handler.on_tick(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), 1);
        assert!(sink.sent[0].starts_with(r#"{"method":"post","id":1,"#));
        handler.on_tick(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), 1);

        // A second request orphans the first.
        assert_eq!(feed.spot_at(10_000), None);
        handler.on_tick(&mut sink).unwrap();
        assert!(sink.sent[1].contains(r#""id":2"#));

        handler.accept(
            HyperliquidCodec::new().decode_message(&post_reply(1, SPOT_STATE_KIND)).unwrap().unwrap(),
            10_000,
        );
        assert_eq!(feed.spot_at(10_001), None);

        handler.accept(
            HyperliquidCodec::new().decode_message(&post_reply(2, "clearinghouseState")).unwrap().unwrap(),
            10_000,
        );
        assert_eq!(feed.spot_at(10_001), None);

        handler.accept(
            HyperliquidCodec::new().decode_message(&post_reply(2, SPOT_STATE_KIND)).unwrap().unwrap(),
            10_000,
        );
        let spot = feed.spot_at(10_001).unwrap();
        assert_eq!(
            super::super::conversions::spot_usdc_balance(&spot).unwrap(),
            Some(rust_decimal::Decimal::from(3))
        );
    }

    #[test]
    fn test_failed_post_stays_pending() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        feed.set_user_address(Some(user()));
        feed.spot_at(0);

        let mut broken = Recorder {
            fail: true,
            ..Recorder::default()
        };
        assert!(handler.on_tick(&mut broken).is_err());

        let mut sink = Recorder::default();
        handler.on_tick(&mut sink).unwrap();
        assert!(sink.sent[0].contains(r#""id":2"#));
    }

    #[test]
    fn test_reconnect_requeues_outstanding_post() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        feed.set_user_address(Some(user()));
        feed.spot_at(0);
        let mut sink = Recorder::default();
        handler.on_tick(&mut sink).unwrap();

        handler.on_connected(&mut sink).unwrap();
        handler.on_tick(&mut sink).unwrap();
        assert!(sink.sent.last().unwrap().contains(r#""id":2"#));
    }

    #[test]
    fn test_answered_post_is_not_requeued_on_reconnect() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        feed.set_user_address(Some(user()));
        feed.spot_at(0);
        let mut sink = Recorder::default();
        handler.on_tick(&mut sink).unwrap();
        handler.on_text(&post_reply(1, SPOT_STATE_KIND));

        handler.on_connected(&mut sink).unwrap();
        let sent = sink.sent.len();
        handler.on_tick(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), sent);
        assert_eq!(sink.sent.iter().filter(|m| m.contains(r#""method":"post""#)).count(), 1);

        // A duplicate of the answered reply is no longer correlated.
        lock(&feed.cache).spot = MarketCacheEntry::default();
        handler.on_text(&post_reply(1, SPOT_STATE_KIND));
        assert!(lock(&feed.cache).spot.payload.is_empty());
    }

    #[test]
    fn test_perp_state_comes_from_web_data() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        feed.set_user_address(Some(user()));
        assert_eq!(feed.perp_clearinghouse_state_raw().unwrap(), None);

        handler.on_text(
            r#"{"channel":"webData3","data":{"perpDexStates":[{"clearinghouseState":{"marginSummary":{"accountValue":"12.5"}}}]}}"#,
        );
        let state = feed.perp_clearinghouse_state_raw().unwrap().unwrap();
        assert_eq!(
            super::super::conversions::perp_account_value(&state).unwrap(),
            Some(rust_decimal::Decimal::new(125, 1))
        );
        assert!(feed.user_web_data_raw().unwrap().is_some());
    }

    #[test]
    fn test_supported_streams_follow_user_and_info_client() {
        let feed = HyperliquidWsFeed::default();
        let supported = |feed: &HyperliquidWsFeed| -> Vec<MarketStream> {
            MarketStream::ALL.into_iter().filter(|s| feed.supports(*s)).collect()
        };
        assert_eq!(supported(&feed), vec![MarketStream::Mids]);
        assert_eq!(feed.perp_metas_raw().unwrap(), None);

        feed.set_user_address(Some(user()));
        assert_eq!(
            supported(&feed),
            vec![MarketStream::Mids, MarketStream::Spot, MarketStream::Perp]
        );

        let canned = Arc::new(Canned {
            reply: r#"[{"universe":[]}]"#,
            sent: Mutex::new(Vec::new()),
        });
        let feed = HyperliquidWsFeed::default().with_info_client(canned.clone());
        assert_eq!(
            supported(&feed),
            vec![MarketStream::Mids, MarketStream::PerpMeta, MarketStream::SpotMeta]
        );
        assert_eq!(feed.portfolio_raw().unwrap(), None);
        feed.set_user_address(Some(user()));
        assert!(feed.supports(MarketStream::Portfolio));

        assert!(feed.perp_metas_raw().unwrap().is_some());
        feed.portfolio_raw().unwrap();
        // No webData3 yet, so perp falls back to one request.
        feed.perp_clearinghouse_state_raw().unwrap();
        let sent = canned.sent.lock().unwrap();
        assert_eq!(sent[0], r#"{"type":"allPerpMetas"}"#);
        assert_eq!(sent[1], format!(r#"{{"type":"portfolio","user":"{}"}}"#, USER));
        assert_eq!(sent[2], format!(r#"{{"type":"clearinghouseState","user":"{}"}}"#, USER));
    }
}
