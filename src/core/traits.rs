use crate::core::errors::TradeError;
use crate::core::types::Address;

/// Which payload a poll refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketStream {
    Mids,
    Spot,
    Perp,
    /// Perp listings, fetched once
    PerpMeta,
    /// Spot pairs with their day contexts, fetched once
    SpotMeta,
    Portfolio,
}

impl MarketStream {
    pub const ALL: [MarketStream; 6] = [
        Self::Mids,
        Self::Spot,
        Self::Perp,
        Self::PerpMeta,
        Self::SpotMeta,
        Self::Portfolio,
    ];

    /// Venue name of the request behind the stream.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mids => "allMids",
            Self::Spot => "spotClearinghouseState",
            Self::Perp => "clearinghouseState",
            Self::PerpMeta => "allPerpMetas",
            Self::SpotMeta => "spotMetaAndAssetCtxs",
            Self::Portfolio => "portfolio",
        }
    }

    /// Streams that only need to succeed once per run.
    pub const fn is_one_shot(self) -> bool {
        matches!(self, Self::PerpMeta | Self::SpotMeta)
    }
}

/// Read side of a market/account data feed.
///
/// Every read returns `Ok(None)` when the value is missing or older than the
/// feed's freshness window, so callers back off instead of showing stale data.
/// `Err` is reserved for failures the feed could observe directly.
///
/// A source only answers the streams it reports through `supports`. Pollers
/// skip the rest, so a stream a source can never serve is not an outage.
pub trait MarketDataSource: Send + Sync {
    /// Raw `{coin: px}` object
    fn all_mids_raw(&self) -> Result<Option<String>, TradeError>;

    /// Whether this source can currently serve `stream`. The answer may
    /// change, e.g. once a user address is set.
    fn supports(&self, stream: MarketStream) -> bool {
        matches!(stream, MarketStream::Mids)
    }

    /// Account the account-level reads refer to. `None` clears it.
    fn set_user_address(&self, _address: Option<Address>) {}

    fn user_web_data_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(None)
    }

    fn spot_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(None)
    }

    fn perp_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(None)
    }

    fn perp_metas_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(None)
    }

    fn spot_meta_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(None)
    }

    fn portfolio_raw(&self) -> Result<Option<String>, TradeError> {
        Ok(None)
    }
}

impl<T: MarketDataSource + ?Sized> MarketDataSource for std::sync::Arc<T> {
    fn all_mids_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).all_mids_raw()
    }

    fn supports(&self, stream: MarketStream) -> bool {
        (**self).supports(stream)
    }

    fn set_user_address(&self, address: Option<Address>) {
        (**self).set_user_address(address);
    }

    fn user_web_data_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).user_web_data_raw()
    }

    fn spot_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).spot_clearinghouse_state_raw()
    }

    fn perp_clearinghouse_state_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).perp_clearinghouse_state_raw()
    }

    fn perp_metas_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).perp_metas_raw()
    }

    fn spot_meta_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).spot_meta_raw()
    }

    fn portfolio_raw(&self) -> Result<Option<String>, TradeError> {
        (**self).portfolio_raw()
    }
}
