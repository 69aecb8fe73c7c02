//! Arbitrum One: legacy transaction encoding, the node's JSON-RPC surface and
//! the wallet flows built on top of them.

pub mod rlp;
pub mod rpc;
pub mod service;
pub mod transaction;
pub mod wallet;

pub use rpc::{JsonRpcClient, TxReceipt};
pub use service::{WalletService, WalletSource};
pub use transaction::{SignedTransaction, UnsignedTransaction, ARBITRUM_ONE_CHAIN_ID, USDC_CONTRACT};
pub use wallet::{fetch_wallet_data, ArbitrumWallet};
