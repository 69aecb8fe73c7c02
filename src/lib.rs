pub mod chains;
pub mod core;
pub mod exchanges;
pub mod utils;

pub use chains::arbitrum::{ArbitrumWallet, WalletService};
pub use crate::core::{errors::TradeError, store::TradeStore, traits::MarketDataSource, types::*};
pub use exchanges::hyperliquid::{HyperliquidRest, HyperliquidWsFeed, MarketDataService};
