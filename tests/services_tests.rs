use pocket_trader::chains::arbitrum::service::{poll_once, PollOutcome, WalletSource};
use pocket_trader::chains::arbitrum::{fetch_wallet_data, ArbitrumWallet, JsonRpcClient, SignedTransaction, USDC_CONTRACT};
use pocket_trader::core::config::ServiceConfig;
use pocket_trader::core::errors::TradeError;
use pocket_trader::core::kernel::rest::RestClient;
use pocket_trader::core::kernel::ws::{WsHandler, WsSink};
use pocket_trader::core::store::TradeStore;
use pocket_trader::core::traits::MarketDataSource;
use pocket_trader::core::types::{Address, MarketCacheEntry, WalletOnchainData};
use pocket_trader::exchanges::hyperliquid::HyperliquidWsFeed;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

const DEV_KEY: [u8; 32] = [
    0xac, 0x09, 0x74, 0xbe, 0xc3, 0x9a, 0x17, 0xe3, 0x6b, 0xa4, 0xa6, 0xb4, 0xd2, 0x38, 0xff, 0x94, 0x4b, 0xac,
    0xb4, 0x78, 0xcb, 0xed, 0x5e, 0xfc, 0xae, 0x78, 0x4d, 0x7b, 0xf4, 0xf2, 0xff, 0x80,
];
const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const RECIPIENT: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

/// JSON-RPC node stand-in answering by method name.
#[derive(Default)]
struct FakeNode {
    results: HashMap<&'static str, Value>,
    /// Methods that fail at the transport level
    down: Vec<&'static str>,
    calls: Mutex<Vec<String>>,
    sent_raw: Mutex<Option<String>>,
}

impl FakeNode {
    fn healthy() -> Self {
        let mut results = HashMap::new();
        results.insert("eth_getBalance", Value::from("0x16345785d8a0000")); // 0.1 ETH
        results.insert("eth_gasPrice", Value::from("0x989680")); // 0.01 gwei
        results.insert(
            "eth_call",
            Value::from("0x0000000000000000000000000000000000000000000000000000000001312d00"),
        ); // 20 USDC
        results.insert("eth_getTransactionCount", Value::from("0x7"));
        results.insert("eth_getBlockByNumber", serde_json::json!({ "baseFeePerGas": "0x5f5e100" }));
        results.insert(
            "eth_sendRawTransaction",
            Value::from("0x1111111111111111111111111111111111111111111111111111111111111111"),
        );
        Self {
            results,
            ..Self::default()
        }
    }

    fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }
}

impl RestClient for FakeNode {
    fn post_raw(&self, _endpoint: &str, body: &str) -> Result<String, TradeError> {
        let request: Value = serde_json::from_str(body)?;
        let method = request["method"].as_str().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(method.clone());

        if self.down.iter().any(|m| *m == method) {
            return Err(TradeError::TransportError("connection refused".to_string()));
        }
        if method == "eth_sendRawTransaction" {
            *self.sent_raw.lock().unwrap() = request["params"][0].as_str().map(str::to_string);
        }
        let result = self.results.get(method.as_str()).cloned().unwrap_or(Value::Null);
        Ok(serde_json::json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }).to_string())
    }
}

fn wallet(node: FakeNode) -> ArbitrumWallet<FakeNode> {
    ArbitrumWallet::new(
        JsonRpcClient::new(node, &ServiceConfig::immediate()),
        DEV_ADDRESS.parse().unwrap(),
    )
}

#[cfg(test)]
mod wallet_tests {
    use super::*;

    #[test]
    fn test_fetch_formats_balances() {
        let wallet = wallet(FakeNode::healthy());
        let data = wallet.fetch().unwrap();
        assert!(data.rpc_ok);
        assert_eq!(data.eth_balance_wei, 100_000_000_000_000_000);
        assert_eq!(data.usdc_balance_raw, 20_000_000);
        assert_eq!(data.gas_price_wei, 10_000_000);
    }

    #[test]
    fn test_nonce_lookup_retried_then_reported() {
        let mut node = FakeNode::healthy();
        node.down.push("eth_getTransactionCount");
        let wallet = wallet(node);
        let recipient: Address = RECIPIENT.parse().unwrap();

        let err = wallet.send_usdc_transfer(&DEV_KEY, &recipient, 6_000_000).unwrap_err();
        assert_eq!(err.code(), "eth_getTransactionCount_failed");
        assert_eq!(wallet.rpc().transport().calls_to("eth_getTransactionCount"), 3);
        assert_eq!(wallet.rpc().transport().calls_to("eth_sendRawTransaction"), 0);
    }

    #[test]
    fn test_transfer_submits_signed_usdc_call() {
        let wallet = wallet(FakeNode::healthy());
        let recipient: Address = RECIPIENT.parse().unwrap();
        let hash = wallet.send_usdc_transfer(&DEV_KEY, &recipient, 6_000_000).unwrap();
        assert!(hash.starts_with("0x1111"));

        let raw_hex = wallet.rpc().transport().sent_raw.lock().unwrap().clone().unwrap();
        let raw = hex::decode(raw_hex.trim_start_matches("0x")).unwrap();
        let tx = SignedTransaction::decode(&raw).unwrap();
        assert_eq!(tx.tx.nonce, 7);
        assert_eq!(tx.tx.to, USDC_CONTRACT);
        assert_eq!(hex::encode(&tx.tx.data[..4]), "a9059cbb");
        // base fee (0.1 gwei) above the quoted price: 1.5x + 1
        assert_eq!(tx.tx.gas_price, 150_000_001);
    }

    #[test]
    fn test_transfer_refuses_more_than_balance() {
        let wallet = wallet(FakeNode::healthy());
        let recipient: Address = RECIPIENT.parse().unwrap();
        let err = wallet.send_usdc_transfer(&DEV_KEY, &recipient, 20_000_001).unwrap_err();
        assert!(matches!(
            err,
            TradeError::AmountExceedsAvailable {
                have: 20_000_000,
                want: 20_000_001
            }
        ));
    }

    #[test]
    fn test_gas_preflight_runs_before_submit() {
        let mut node = FakeNode::healthy();
        node.results.insert("eth_getBalance", Value::from("0x1"));
        let wallet = wallet(node);
        let recipient: Address = RECIPIENT.parse().unwrap();
        let err = wallet.send_usdc_transfer(&DEV_KEY, &recipient, 1).unwrap_err();
        assert_eq!(err.code(), "insufficient_eth_for_gas");
        assert_eq!(wallet.rpc().transport().calls_to("eth_sendRawTransaction"), 0);
    }

    #[test]
    fn test_failing_step_is_named() {
        let mut node = FakeNode::healthy();
        node.down.push("eth_gasPrice");
        let rpc = JsonRpcClient::new(node, &ServiceConfig::immediate());
        let err = fetch_wallet_data(&rpc, &DEV_ADDRESS.parse().unwrap()).unwrap_err();
        assert_eq!(err.code(), "eth_gasPrice_failed");
    }
}

#[cfg(test)]
mod alert_tests {
    use super::*;

    struct Toggle(Mutex<Vec<bool>>);

    impl WalletSource for Toggle {
        fn fetch(&self) -> Result<WalletOnchainData, TradeError> {
            let ok = self.0.lock().unwrap().remove(0);
            if ok {
                Ok(WalletOnchainData {
                    rpc_ok: true,
                    ..WalletOnchainData::default()
                })
            } else {
                Err(TradeError::MissingRpcOrAddress)
            }
        }
    }

    #[test]
    fn test_alert_counts_failure_episodes() {
        let store = TradeStore::new();
        let source = Toggle(Mutex::new(vec![true, false, false, true, false]));
        let outcomes: Vec<PollOutcome> = (0..5).map(|_| poll_once(Some(&source), &store)).collect();

        assert_eq!(outcomes[0], PollOutcome::Ok);
        assert!(matches!(outcomes[1], PollOutcome::FailureRaised(_)));
        assert!(matches!(outcomes[2], PollOutcome::FailureRepeated(_)));
        assert_eq!(outcomes[3], PollOutcome::Ok);
        assert!(matches!(outcomes[4], PollOutcome::FailureRaised(_)));
        assert_eq!(store.wallet_snapshot().rpc_alerts, 2);
    }
}

#[cfg(test)]
mod market_cache_tests {
    use super::*;

    #[derive(Default)]
    struct Sink(Vec<String>);

    impl WsSink for Sink {
        fn send_text(&mut self, text: &str) -> Result<(), TradeError> {
            self.0.push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_staleness_boundary() {
        let entry = MarketCacheEntry::new(r#"{"BTC":"1"}"#.to_string(), 1_000_000);
        assert_eq!(entry.fresh(1_000_000 + 14_999, 15_000), Some(r#"{"BTC":"1"}"#));
        assert_eq!(entry.fresh(1_000_000 + 15_001, 15_000), None);
        assert_eq!(MarketCacheEntry::default().fresh(1, 15_000), None);
    }

    #[test]
    fn test_only_latest_post_is_honored() {
        let feed = HyperliquidWsFeed::default();
        let mut handler = feed.handler();
        let mut sink = Sink::default();
        feed.set_user_address(Some(DEV_ADDRESS.parse().unwrap()));

        assert_eq!(feed.spot_clearinghouse_state_raw().unwrap(), None);
        handler.on_tick(&mut sink).unwrap();
        assert_eq!(feed.spot_clearinghouse_state_raw().unwrap(), None);
        handler.on_tick(&mut sink).unwrap();
        assert_eq!(sink.0.len(), 2);

        let reply = |id: u64| {
            format!(
                r#"{{"channel":"post","data":{{"id":{},"response":{{"type":"info","payload":{{"type":"spotClearinghouseState","data":{{"balances":[]}}}}}}}}}}"#,
                id
            )
        };
        handler.on_text(&reply(1));
        assert_eq!(feed.spot_clearinghouse_state_raw().unwrap(), None);

        handler.on_text(&reply(2));
        let spot = feed.spot_clearinghouse_state_raw().unwrap().unwrap();
        assert!(spot.contains(r#""id":2"#));
    }
}

/// Live checks against public endpoints; opt in with `RUN_INTEGRATION_TESTS=true`.
#[cfg(test)]
mod live_tests {
    use pocket_trader::core::config::WalletConfig;
    use pocket_trader::exchanges::hyperliquid::HyperliquidRest;

    fn enabled() -> bool {
        std::env::var("RUN_INTEGRATION_TESTS").is_ok_and(|v| v == "true")
    }

    #[test]
    fn test_live_all_mids() {
        if !enabled() {
            return;
        }
        let config = WalletConfig::new(String::new(), String::new(), String::new());
        let rest = HyperliquidRest::from_config(&config, &pocket_trader::core::config::ServiceConfig::default())
            .expect("rest client");
        let mids = rest.all_mids().expect("allMids");
        assert!(mids.contains_key("BTC"));
    }
}
