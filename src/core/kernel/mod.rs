/// Kernel - exchange-agnostic transport and crypto primitives
///
/// Nothing in here knows about a particular chain or venue.
///
/// ## Transport Layer
/// - `RestClient`: blocking HTTP POST interface, `ReqwestRest` implementation
/// - `WsConnection` / `run_session` / `WsClient`: hand-built WebSocket client
///   with heartbeat, reconnect backoff and bounded shutdown
///
/// ## Crypto
/// - `keccak256`: Keccak-256 sponge
/// - `Secp256k1Signer`: low-s ECDSA with recovery-id search
///
/// ## Message Handling
/// - `WsCodec`: venue-specific message encoding/decoding
///
/// # Usage
/// ```rust,no_run
/// use pocket_trader::core::kernel::*;
///
/// # fn example() -> Result<(), pocket_trader::core::errors::TradeError> {
/// let rest = ReqwestRest::new("https://api.hyperliquid.xyz".to_string(), "hyperliquid".to_string())?;
/// let mids = rest.post_raw("/info", r#"{"type":"allMids"}"#)?;
/// println!("{}", mids);
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod keccak;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::WsCodec;
pub use keccak::{keccak256, Keccak256};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
pub use signer::{Secp256k1Signer, ADDRESS_TARGET_ATTEMPTS};
pub use ws::{Backoff, WsClient, WsConfig, WsConnection, WsHandler, WsSink, WsState};
