use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::core::errors::CryptoError;

pub const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";
pub const TESTNET_API_URL: &str = "https://api.hyperliquid-testnet.xyz";
pub const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
pub const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";

/// Wallet material handed over by the wallet store.
///
/// The private key is only ever held as a [`Secret`] and decoded into a
/// zeroizing buffer for the duration of one signing call.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub arb_rpc_url: String,
    pub wallet_address: String,
    pub private_key: Secret<String>,
    pub testnet: bool,
}

// Never expose the key in serialization
impl Serialize for WalletConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("WalletConfig", 4)?;
        state.serialize_field("arb_rpc_url", &self.arb_rpc_url)?;
        state.serialize_field("wallet_address", &self.wallet_address)?;
        state.serialize_field("private_key", "[REDACTED]")?;
        state.serialize_field("testnet", &self.testnet)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for WalletConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct WalletConfigHelper {
            arb_rpc_url: String,
            wallet_address: String,
            #[serde(default)]
            private_key: String,
            #[serde(default)]
            testnet: bool,
        }

        let helper = WalletConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            arb_rpc_url: helper.arb_rpc_url,
            wallet_address: helper.wallet_address,
            private_key: Secret::new(helper.private_key),
            testnet: helper.testnet,
        })
    }
}

impl WalletConfig {
    #[must_use]
    pub fn new(arb_rpc_url: String, wallet_address: String, private_key: String) -> Self {
        Self {
            arb_rpc_url,
            wallet_address,
            private_key: Secret::new(private_key),
            testnet: false,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_RPC_URL` (e.g., `ARB_RPC_URL`)
    /// - `{PREFIX}_WALLET_ADDRESS`
    /// - `{PREFIX}_PRIVATE_KEY` (optional, read-only wallets leave it empty)
    /// - `{PREFIX}_TESTNET` (optional, defaults to false)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let rpc_var = format!("{}_RPC_URL", prefix);
        let address_var = format!("{}_WALLET_ADDRESS", prefix);
        let key_var = format!("{}_PRIVATE_KEY", prefix);
        let testnet_var = format!("{}_TESTNET", prefix);

        let arb_rpc_url =
            env::var(&rpc_var).map_err(|_| ConfigError::MissingEnvironmentVariable(rpc_var))?;
        let wallet_address = env::var(&address_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(address_var))?;
        let private_key = env::var(&key_var).unwrap_or_default();
        let testnet = env::var(&testnet_var)
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Self {
            arb_rpc_url,
            wallet_address,
            private_key: Secret::new(private_key),
            testnet,
        })
    }

    /// Load a `.env` file (if present) and then read the environment.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn has_private_key(&self) -> bool {
        !self.private_key.expose_secret().trim().is_empty()
    }

    /// Decode the hex private key into raw bytes.
    pub fn private_key_bytes(&self) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        decode_private_key(self.private_key.expose_secret())
    }

    pub fn api_url(&self) -> &'static str {
        if self.testnet {
            TESTNET_API_URL
        } else {
            MAINNET_API_URL
        }
    }

    pub fn ws_url(&self) -> &'static str {
        if self.testnet {
            TESTNET_WS_URL
        } else {
            MAINNET_WS_URL
        }
    }
}

/// Decode a `0x`-optional hex string into exactly 32 bytes.
pub fn decode_private_key(hex_key: &str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let raw = Zeroizing::new(
        hex::decode(hex_key.trim().trim_start_matches("0x"))
            .map_err(|_| CryptoError::InvalidPrivateKey)?,
    );
    if raw.len() != 32 {
        return Err(CryptoError::InvalidPrivateKey);
    }
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Timing contract shared by the background services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Wallet balance refresh period
    pub wallet_poll_interval: Duration,
    /// Granularity at which sleeping loops observe the stop flag
    pub stop_poll_slice: Duration,
    /// Total attempts per JSON-RPC call on transport failure
    pub rpc_attempts: u32,
    /// Fixed delay between JSON-RPC attempts
    pub rpc_retry_delay: Duration,
    /// HTTP request timeout
    pub http_timeout: Duration,
    /// Per-poll read timeout on the WebSocket stream
    pub ws_read_timeout: Duration,
    /// Give up on a frame whose bytes stop arriving for this long
    pub ws_stall_timeout: Duration,
    /// Unsolicited ping period
    pub ws_ping_interval: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    /// How long `stop()` waits before tearing the socket down underneath a worker
    pub shutdown_grace: Duration,
    /// Cached market payloads older than this are reported unavailable
    pub market_max_age: Duration,
    pub mids_interval: Duration,
    /// Spot account refresh period
    pub account_interval: Duration,
    pub perp_interval: Duration,
    /// Portfolio totals refresh period
    pub portfolio_interval: Duration,
    pub failure_backoff_initial: Duration,
    pub failure_backoff_max: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            wallet_poll_interval: Duration::from_secs(2),
            stop_poll_slice: Duration::from_millis(100),
            rpc_attempts: 3,
            rpc_retry_delay: Duration::from_millis(250),
            http_timeout: Duration::from_secs(15),
            ws_read_timeout: Duration::from_secs(1),
            ws_stall_timeout: Duration::from_secs(30),
            ws_ping_interval: Duration::from_secs(20),
            reconnect_initial_backoff: Duration::from_secs(1),
            reconnect_max_backoff: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(1500),
            market_max_age: Duration::from_secs(15),
            mids_interval: Duration::from_millis(2500),
            account_interval: Duration::from_secs(2),
            perp_interval: Duration::from_secs(3),
            portfolio_interval: Duration::from_secs(30),
            failure_backoff_initial: Duration::from_secs(5),
            failure_backoff_max: Duration::from_secs(30),
        }
    }
}

impl ServiceConfig {
    /// Zero delays everywhere, for tests that drive loops by hand.
    pub fn immediate() -> Self {
        Self {
            wallet_poll_interval: Duration::from_millis(10),
            stop_poll_slice: Duration::from_millis(5),
            rpc_retry_delay: Duration::ZERO,
            ws_read_timeout: Duration::from_millis(20),
            ws_stall_timeout: Duration::from_millis(500),
            reconnect_initial_backoff: Duration::from_millis(1),
            reconnect_max_backoff: Duration::from_millis(8),
            shutdown_grace: Duration::from_millis(200),
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
