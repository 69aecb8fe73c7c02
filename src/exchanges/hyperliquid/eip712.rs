//! EIP-712 typed-data hashing for Hyperliquid user-signed actions.
//!
//! Both supported actions share one domain: `HyperliquidSignTransaction`,
//! version `1`, a zero verifying contract and the signature chain id the
//! action declares in `signatureChainId`.

use crate::core::kernel::keccak::{keccak256, keccak256_concat, Keccak256};
use crate::core::types::normalize_address_hex;
use crate::exchanges::hyperliquid::types::{Action, HyperliquidChain};

/// Chain id carried in `signatureChainId` (Arbitrum Sepolia, 421614).
pub const SIGNATURE_CHAIN_ID: u64 = 0x66eee;
pub const SIGNATURE_CHAIN_ID_HEX: &str = "0x66eee";

pub const DOMAIN_NAME: &str = "HyperliquidSignTransaction";
pub const DOMAIN_VERSION: &str = "1";

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const USD_CLASS_TRANSFER_TYPE: &str =
    "HyperliquidTransaction:UsdClassTransfer(string hyperliquidChain,string amount,bool toPerp,uint64 nonce)";
pub const WITHDRAW_TYPE: &str =
    "HyperliquidTransaction:Withdraw(string hyperliquidChain,string destination,string amount,uint64 time)";

fn uint_word(v: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&v.to_be_bytes());
    word
}

fn bool_word(v: bool) -> [u8; 32] {
    uint_word(u64::from(v))
}

fn hash_words(words: &[[u8; 32]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for word in words {
        hasher.update(word);
    }
    hasher.finalize()
}

pub fn domain_separator(chain_id: u64) -> [u8; 32] {
    hash_words(&[
        keccak256(DOMAIN_TYPE),
        keccak256(DOMAIN_NAME),
        keccak256(DOMAIN_VERSION),
        uint_word(chain_id),
        [0u8; 32],
    ])
}

/// `keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash)`
pub fn typed_data_digest(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    keccak256_concat(&[&[0x19, 0x01], domain_separator, struct_hash])
}

/// A message that can be hashed under the Hyperliquid signing domain.
pub trait Eip712Message {
    fn struct_hash(&self) -> [u8; 32];

    /// The wire action this message signs for.
    fn to_action(&self) -> Action;

    /// Nonce placed next to the action in the `/exchange` envelope.
    fn nonce(&self) -> u64;

    fn digest(&self) -> [u8; 32] {
        typed_data_digest(&domain_separator(SIGNATURE_CHAIN_ID), &self.struct_hash())
    }
}

/// Move USDC between the spot and perp balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsdClassTransfer {
    pub hyperliquid_chain: HyperliquidChain,
    pub amount: String,
    pub to_perp: bool,
    pub nonce: u64,
}

impl Eip712Message for UsdClassTransfer {
    fn struct_hash(&self) -> [u8; 32] {
        hash_words(&[
            keccak256(USD_CLASS_TRANSFER_TYPE),
            keccak256(self.hyperliquid_chain.as_str()),
            keccak256(&self.amount),
            bool_word(self.to_perp),
            uint_word(self.nonce),
        ])
    }

    fn to_action(&self) -> Action {
        Action::UsdClassTransfer {
            hyperliquid_chain: self.hyperliquid_chain.to_string(),
            signature_chain_id: SIGNATURE_CHAIN_ID_HEX.to_string(),
            amount: self.amount.clone(),
            to_perp: self.to_perp,
            nonce: self.nonce,
        }
    }

    fn nonce(&self) -> u64 {
        self.nonce
    }
}

/// Withdraw USDC from the exchange to an Arbitrum address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdraw3 {
    pub hyperliquid_chain: HyperliquidChain,
    /// Lowercase `0x` + 40 hex digits
    pub destination: String,
    pub amount: String,
    pub time: u64,
}

impl Withdraw3 {
    pub fn new(hyperliquid_chain: HyperliquidChain, destination: &str, amount: String, time: u64) -> Self {
        Self {
            hyperliquid_chain,
            destination: normalize_address_hex(destination),
            amount,
            time,
        }
    }
}

impl Eip712Message for Withdraw3 {
    fn struct_hash(&self) -> [u8; 32] {
        hash_words(&[
            keccak256(WITHDRAW_TYPE),
            keccak256(self.hyperliquid_chain.as_str()),
            keccak256(&self.destination),
            keccak256(&self.amount),
            uint_word(self.time),
        ])
    }

    fn to_action(&self) -> Action {
        Action::Withdraw3 {
            hyperliquid_chain: self.hyperliquid_chain.to_string(),
            signature_chain_id: SIGNATURE_CHAIN_ID_HEX.to_string(),
            amount: self.amount.clone(),
            time: self.time,
            destination: self.destination.clone(),
        }
    }

    fn nonce(&self) -> u64 {
        self.time
    }
}
