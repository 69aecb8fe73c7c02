use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use super::conversions::parse_all_mids;
use super::eip712::{Eip712Message, UsdClassTransfer, Withdraw3};
use super::signer::HyperliquidSigner;
use super::types::{ExchangeRequest, HyperliquidChain, InfoRequest, SpotClearinghouseState};
use crate::core::config::{ServiceConfig, WalletConfig};
use crate::core::errors::{preview, CryptoError, TradeError, PREVIEW_LEN};
use crate::core::kernel::rest::{RestClientBuilder, RestClientConfig};
use crate::core::kernel::{ReqwestRest, RestClient};
use crate::core::types::Address;

/// Thin typed wrapper around `RestClient` for the Hyperliquid API
#[derive(Clone)]
pub struct HyperliquidRest<R: RestClient> {
    client: R,
    signer: Option<HyperliquidSigner>,
    chain: HyperliquidChain,
}

impl HyperliquidRest<ReqwestRest> {
    /// REST client for the network `config` points at. A signer is attached
    /// only when a private key is configured.
    pub fn from_config(config: &WalletConfig, service: &ServiceConfig) -> Result<Self, TradeError> {
        let rest_config = RestClientConfig::new(config.api_url().to_string(), "hyperliquid".to_string())
            .with_timeout(service.http_timeout);
        let client = RestClientBuilder::new(rest_config).build()?;
        let signer = if config.has_private_key() {
            Some(HyperliquidSigner::from_config(config)?)
        } else {
            None
        };
        Ok(Self::new(client, signer, config.testnet))
    }
}

impl<R: RestClient> HyperliquidRest<R> {
    pub fn new(client: R, signer: Option<HyperliquidSigner>, is_testnet: bool) -> Self {
        Self {
            client,
            signer,
            chain: HyperliquidChain::from_testnet(is_testnet),
        }
    }

    pub fn wallet_address(&self) -> Option<&Address> {
        self.signer.as_ref().map(HyperliquidSigner::address)
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    pub fn chain(&self) -> HyperliquidChain {
        self.chain
    }

    /// POST an `/info` request and hand back the body untouched.
    #[instrument(skip(self), fields(exchange = "hyperliquid"))]
    pub fn info_raw(&self, request: &InfoRequest) -> Result<String, TradeError> {
        let body = serde_json::to_string(request)?;
        self.client.post_raw("/info", &body)
    }

    /// Mid prices for every listed coin
    pub fn all_mids(&self) -> Result<BTreeMap<String, Decimal>, TradeError> {
        parse_all_mids(&self.info_raw(&InfoRequest::AllMids)?)
    }

    pub fn spot_clearinghouse_state(&self, user: &Address) -> Result<SpotClearinghouseState, TradeError> {
        let text = self.info_raw(&InfoRequest::SpotClearinghouseState {
            user: user.to_string(),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Perp account summary, returned as the venue sends it
    pub fn clearinghouse_state(&self, user: &Address) -> Result<Value, TradeError> {
        let text = self.info_raw(&InfoRequest::ClearinghouseState {
            user: user.to_string(),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Account role (`user`, `agent`, `vault`, `subAccount` or `missing`)
    pub fn user_role(&self, user: &Address) -> Result<Value, TradeError> {
        let text = self.info_raw(&InfoRequest::UserRole {
            user: user.to_string(),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn signer(&self) -> Result<&HyperliquidSigner, TradeError> {
        self.signer
            .as_ref()
            .ok_or(TradeError::CryptoError(CryptoError::InvalidPrivateKey))
    }

    /// Move `amount` USDC between the spot and perp balances.
    #[instrument(skip(self), fields(exchange = "hyperliquid"))]
    pub fn usd_class_transfer(&self, amount: &str, to_perp: bool, nonce_ms: u64) -> Result<Value, TradeError> {
        let message = UsdClassTransfer {
            hyperliquid_chain: self.chain,
            amount: amount.to_string(),
            to_perp,
            nonce: nonce_ms,
        };
        self.sign_and_submit(&message)
    }

    /// Withdraw `amount` USDC to `destination` on Arbitrum.
    #[instrument(skip(self), fields(exchange = "hyperliquid"))]
    pub fn withdraw3(&self, destination: &str, amount: &str, time_ms: u64) -> Result<Value, TradeError> {
        let message = Withdraw3::new(self.chain, destination, amount.to_string(), time_ms);
        info!(destination = %message.destination, amount, time_ms, "withdraw requested");
        self.sign_and_submit(&message)
    }

    fn sign_and_submit<M: Eip712Message>(&self, message: &M) -> Result<Value, TradeError> {
        let request = self.signer()?.sign_action(message)?;
        self.submit(&request)
    }

    /// POST a signed envelope to `/exchange`.
    ///
    /// A 4xx reply with a body is the venue refusing the action and surfaces
    /// as `ExchangeError`; 5xx and bodiless failures stay transport errors.
    pub fn submit(&self, request: &ExchangeRequest) -> Result<Value, TradeError> {
        let body = serde_json::to_string(request)?;
        match self.client.post_raw("/exchange", &body) {
            Ok(text) => check_exchange_response(&text),
            Err(TradeError::HttpStatus { status, body })
                if (400..500).contains(&status) && !body.trim().is_empty() =>
            {
                let shown = preview(&body, PREVIEW_LEN);
                warn!(status, response = %shown, "exchange rejected action");
                Err(TradeError::ExchangeError(shown.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Any `"error"` key or a `"status":"err"` marks a rejected action.
pub fn check_exchange_response(text: &str) -> Result<Value, TradeError> {
    let value: Value = serde_json::from_str(text)?;
    let status_err = value.get("status").and_then(Value::as_str) == Some("err");
    if status_err || text.contains("\"error\"") {
        let shown = preview(text, PREVIEW_LEN);
        warn!(response = %shown, "exchange rejected action");
        return Err(TradeError::ExchangeError(shown.to_string()));
    }
    Ok(value)
}
