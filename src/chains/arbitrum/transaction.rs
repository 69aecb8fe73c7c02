//! Legacy (EIP-155) transactions and the ERC-20 calldata they carry.

use crate::chains::arbitrum::rlp::{self, RlpItem};
use crate::core::errors::{CryptoError, TradeError};
use crate::core::kernel::keccak::keccak256;
use crate::core::kernel::signer::Secp256k1Signer;
use crate::core::types::{Address, Signature, SignatureMode};

pub const ARBITRUM_ONE_CHAIN_ID: u64 = 42161;

/// Native USDC on Arbitrum One, `0xaf88d065e77c8cC2239327C5EDb3A432268e5831`.
pub const USDC_CONTRACT: Address = Address([
    0xaf, 0x88, 0xd0, 0x65, 0xe7, 0x7c, 0x8c, 0xc2, 0x23, 0x93, 0x27, 0xc5, 0xed, 0xb3, 0xa4, 0x32,
    0x26, 0x8e, 0x58, 0x31,
]);
pub const USDC_DECIMALS: u32 = 6;

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// `balanceOf(address)`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Gas limit for a plain ERC-20 transfer on Arbitrum, with headroom for L1 data cost.
pub const DEFAULT_ERC20_GAS_LIMIT: u128 = 250_000;

fn u128_word(v: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&v.to_be_bytes());
    word
}

pub fn erc20_transfer_data(to: &Address, amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&to.to_word());
    data.extend_from_slice(&u128_word(amount));
    data
}

pub fn erc20_balance_of_data(owner: &Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&owner.to_word());
    data
}

/// Raise `gas_price` to `1.5 * base_fee + 1` when the network base fee has overtaken it.
pub fn bump_gas_price(gas_price: u128, base_fee: Option<u128>) -> u128 {
    match base_fee {
        Some(base) if base > gas_price => base.saturating_mul(3) / 2 + 1,
        _ => gas_price,
    }
}

/// Reject before submitting when the account cannot cover `gas_price * gas_limit`.
pub fn preflight_gas(balance_wei: u128, gas_price: u128, gas_limit: u128) -> Result<(), TradeError> {
    let want = gas_price.saturating_mul(gas_limit);
    if balance_wei < want {
        return Err(TradeError::InsufficientEthForGas {
            have: balance_wei,
            want,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub nonce: u128,
    pub gas_price: u128,
    pub gas_limit: u128,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl UnsignedTransaction {
    /// USDC `transfer` with no ETH value attached.
    pub fn usdc_transfer(
        nonce: u128,
        gas_price: u128,
        gas_limit: u128,
        recipient: &Address,
        amount: u128,
    ) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit,
            to: USDC_CONTRACT,
            value: 0,
            data: erc20_transfer_data(recipient, amount),
            chain_id: ARBITRUM_ONE_CHAIN_ID,
        }
    }

    fn common_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(self.nonce),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(self.gas_limit),
            rlp::encode_bytes(self.to.as_bytes()),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// `keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))`
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut fields = self.common_fields();
        fields.push(rlp::encode_uint(u128::from(self.chain_id)));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        keccak256(rlp::encode_list(&fields))
    }

    pub fn with_signature(self, signature: &Signature) -> SignedTransaction {
        SignedTransaction {
            v: signature.v(SignatureMode::Eip155 {
                chain_id: self.chain_id,
            }),
            r: signature.r,
            s: signature.s,
            tx: self,
        }
    }

    pub fn sign(
        self,
        signer: &Secp256k1Signer,
        private_key: &[u8; 32],
    ) -> Result<SignedTransaction, CryptoError> {
        let signature = signer.sign(&self.signing_hash(), private_key)?;
        Ok(self.with_signature(&signature))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignedTransaction {
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])`
    pub fn raw(&self) -> Vec<u8> {
        let mut fields = self.tx.common_fields();
        fields.push(rlp::encode_uint(u128::from(self.v)));
        fields.push(rlp::encode_uint_be(&self.r));
        fields.push(rlp::encode_uint_be(&self.s));
        rlp::encode_list(&fields)
    }

    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(self.raw()))
    }

    pub fn hash(&self) -> [u8; 32] {
        keccak256(self.raw())
    }

    pub fn recid(&self) -> u8 {
        ((self.v - 35) % 2) as u8
    }

    pub fn signature(&self) -> Signature {
        Signature {
            r: self.r,
            s: self.s,
            recid: self.recid(),
        }
    }

    /// Parse a raw legacy transaction carrying an EIP-155 `v`.
    pub fn decode(raw: &[u8]) -> Result<Self, TradeError> {
        let item = rlp::decode(raw)?;
        let fields = item.as_list()?;
        if fields.len() != 9 {
            return Err(TradeError::ProtocolError(format!(
                "legacy transaction has {} fields",
                fields.len()
            )));
        }

        let to_bytes = fields[3].as_bytes()?;
        if to_bytes.len() != 20 {
            return Err(TradeError::ProtocolError(
                "transaction recipient is not 20 bytes".to_string(),
            ));
        }
        let mut to = [0u8; 20];
        to.copy_from_slice(to_bytes);

        let v = u64::try_from(fields[6].as_uint()?)
            .map_err(|_| TradeError::ProtocolError("v out of range".to_string()))?;
        if v < 35 {
            return Err(TradeError::ProtocolError(format!(
                "v={} is not an EIP-155 value",
                v
            )));
        }

        Ok(Self {
            tx: UnsignedTransaction {
                nonce: fields[0].as_uint()?,
                gas_price: fields[1].as_uint()?,
                gas_limit: fields[2].as_uint()?,
                to: Address(to),
                value: fields[4].as_uint()?,
                data: fields[5].as_bytes()?.to_vec(),
                chain_id: (v - 35) / 2,
            },
            v,
            r: scalar(&fields[7])?,
            s: scalar(&fields[8])?,
        })
    }
}

fn scalar(item: &RlpItem) -> Result<[u8; 32], TradeError> {
    let bytes = item.as_bytes()?;
    if bytes.len() > 32 {
        return Err(TradeError::ProtocolError("signature scalar over 32 bytes".to_string()));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}
