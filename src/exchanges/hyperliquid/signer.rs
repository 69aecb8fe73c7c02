use chrono::Utc;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::eip712::Eip712Message;
use super::types::{ActionSignature, ExchangeRequest};
use crate::core::config::WalletConfig;
use crate::core::errors::{CryptoError, TradeError};
use crate::core::kernel::signer::{Secp256k1Signer, ADDRESS_TARGET_ATTEMPTS};
use crate::core::types::{Address, SignatureMode};

/// Signs Hyperliquid user actions for one wallet.
///
/// Signatures are produced against the wallet address rather than the key's
/// own public key, so a key that does not control `address` fails with
/// `recover_mismatch` instead of producing an envelope the exchange rejects.
#[derive(Clone)]
pub struct HyperliquidSigner {
    private_key: Zeroizing<[u8; 32]>,
    address: Address,
    secp: Secp256k1Signer,
}

impl std::fmt::Debug for HyperliquidSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl HyperliquidSigner {
    pub fn new(private_key: Zeroizing<[u8; 32]>, address: Address) -> Self {
        Self {
            private_key,
            address,
            secp: Secp256k1Signer::new(),
        }
    }

    /// Build from wallet config. An empty `wallet_address` means "whatever the
    /// key controls".
    pub fn from_config(config: &WalletConfig) -> Result<Self, TradeError> {
        let private_key = config.private_key_bytes()?;
        let address = if config.wallet_address.trim().is_empty() {
            Address::from_private_key(&private_key)?
        } else {
            config.wallet_address.parse()?
        };
        Ok(Self::new(private_key, address))
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Sign a 32-byte digest with `v = 27 + parity`.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<ActionSignature, CryptoError> {
        let signature =
            self.secp
                .sign_for_address(digest, &self.private_key, &self.address, ADDRESS_TARGET_ATTEMPTS)?;
        Ok(ActionSignature {
            r: signature.r_hex(),
            s: signature.s_hex(),
            v: signature.v(SignatureMode::Parity),
        })
    }

    /// Hash `message` under the exchange domain and wrap it in an `/exchange` envelope.
    #[instrument(skip_all, fields(address = %self.address))]
    pub fn sign_action<M: Eip712Message>(&self, message: &M) -> Result<ExchangeRequest, TradeError> {
        let digest = message.digest();
        let signature = self.sign_digest(&digest)?;
        debug!(
            digest = %hex::encode(digest),
            v = signature.v,
            r = %&signature.r[..12],
            "action signed"
        );
        Ok(ExchangeRequest {
            action: message.to_action(),
            nonce: message.nonce(),
            signature,
        })
    }
}

/// Millisecond timestamp used as an action nonce.
pub fn generate_nonce() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
