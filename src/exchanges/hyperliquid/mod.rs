pub mod codec;
pub mod conversions;
pub mod eip712;
pub mod feed;
pub mod market;
pub mod rest;
pub mod signer;
pub mod types;

use std::sync::Arc;

use crate::core::{
    config::{ServiceConfig, WalletConfig},
    errors::TradeError,
    kernel::{ReqwestRest, RestClientBuilder, RestClientConfig, WsConfig},
    traits::MarketDataSource,
};

// Re-export main types for easier importing
pub use codec::{HyperliquidCodec, HyperliquidWsMessage, Subscription};
pub use conversions::*;
pub use eip712::{Eip712Message, UsdClassTransfer, Withdraw3};
pub use feed::{HyperliquidRestFeed, HyperliquidWsFeed};
pub use crate::core::traits::MarketStream;
pub use market::MarketDataService;
pub use rest::{check_exchange_response, HyperliquidRest};
pub use signer::{generate_nonce, HyperliquidSigner};
pub use types::{
    Action, ActionSignature, ExchangeRequest, HyperliquidChain, InfoRequest, SpotBalance,
    SpotClearinghouseState,
};

/// Start a streaming feed against the network `config` points at, already
/// tracking the configured wallet. Requests with no stream go to `/info`.
pub fn create_ws_feed(config: &WalletConfig, service: &ServiceConfig) -> Result<HyperliquidWsFeed, TradeError> {
    let info = RestClientBuilder::new(
        RestClientConfig::new(config.api_url().to_string(), "hyperliquid".to_string())
            .with_timeout(service.http_timeout),
    )
    .build()?;
    let feed = HyperliquidWsFeed::new(service.market_max_age.as_millis() as i64).with_info_client(Arc::new(info));
    if let Ok(address) = config.wallet_address.parse() {
        feed.set_user_address(Some(address));
    }
    feed.start(config.ws_url(), WsConfig::from(service))?;
    Ok(feed)
}

/// Polling feed over `/info`, for when the WebSocket endpoint is unreachable.
pub fn create_rest_feed(
    config: &WalletConfig,
    service: &ServiceConfig,
) -> Result<HyperliquidRestFeed<ReqwestRest>, TradeError> {
    let feed = HyperliquidRestFeed::new(HyperliquidRest::from_config(config, service)?);
    if let Ok(address) = config.wallet_address.parse() {
        feed.set_user_address(Some(address));
    }
    Ok(feed)
}
