use rand::RngCore;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature as EcdsaSignature};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use tracing::{debug, warn};

use crate::core::errors::CryptoError;
use crate::core::kernel::keccak::keccak256;
use crate::core::types::{Address, Signature};

/// Re-sign bound for flows that only know the expected sender address.
pub const ADDRESS_TARGET_ATTEMPTS: u32 = 12;

/// `n / 2` for the secp256k1 group order, big-endian.
pub const HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// What a candidate recovered key has to match.
#[derive(Debug, Clone, Copy)]
pub enum RecoveryTarget<'a> {
    PublicKey(&'a PublicKey),
    Address(&'a Address),
}

/// `true` when `s` lies in the lower half of the group order.
pub fn is_low_s(s: &[u8; 32]) -> bool {
    s <= &HALF_ORDER
}

/// Address of a public key: low 20 bytes of `keccak256(x ‖ y)`.
pub fn derive_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}

/// ECDSA over secp256k1 producing low-s signatures with an Ethereum-encodable recovery id.
///
/// Signing is pure: the secret key is parsed for the duration of one call and
/// nothing is retained between calls.
#[derive(Clone)]
pub struct Secp256k1Signer {
    secp: Secp256k1<secp256k1::All>,
}

impl Default for Secp256k1Signer {
    fn default() -> Self {
        Self::new()
    }
}

impl Secp256k1Signer {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    pub fn public_key(&self, private_key: &[u8; 32]) -> Result<PublicKey, CryptoError> {
        let secret = SecretKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret))
    }

    pub fn address_of(&self, private_key: &[u8; 32]) -> Result<Address, CryptoError> {
        Ok(derive_address(&self.public_key(private_key)?))
    }

    /// Sign against the key's own public key. A signature whose recovery id cannot
    /// be encoded is terminal for this call.
    pub fn sign(&self, digest: &[u8; 32], private_key: &[u8; 32]) -> Result<Signature, CryptoError> {
        let secret = SecretKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let public_key = PublicKey::from_secret_key(&self.secp, &secret);
        self.sign_until_match(digest, &secret, RecoveryTarget::PublicKey(&public_key), 1)
            .map_err(|e| match e {
                CryptoError::RecoverMismatch => CryptoError::RecidNotFound,
                other => other,
            })
    }

    /// Sign on behalf of `expected`, re-signing with fresh nonce data when no
    /// candidate recovers to that address.
    ///
    /// The first attempt is deterministic (RFC 6979); later attempts mix random
    /// bytes into the nonce.
    ///
    /// Only recovery ids 0 and 1 are returned. Ids 2 and 3 (an `r` that
    /// overflowed the curve order) are treated as unusable and cost an attempt,
    /// even though `v = 27 + (recid & 1)` would still encode them. They occur
    /// with negligible probability.
    pub fn sign_for_address(
        &self,
        digest: &[u8; 32],
        private_key: &[u8; 32],
        expected: &Address,
        max_attempts: u32,
    ) -> Result<Signature, CryptoError> {
        let secret = SecretKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
        self.sign_until_match(digest, &secret, RecoveryTarget::Address(expected), max_attempts)
    }

    fn sign_until_match(
        &self,
        digest: &[u8; 32],
        secret: &SecretKey,
        target: RecoveryTarget<'_>,
        max_attempts: u32,
    ) -> Result<Signature, CryptoError> {
        let message = Message::from_digest(*digest);
        let mut rng = rand::thread_rng();

        for attempt in 0..max_attempts.max(1) {
            let raw = if attempt == 0 {
                self.secp.sign_ecdsa(&message, secret)
            } else {
                let mut noncedata = [0u8; 32];
                rng.fill_bytes(&mut noncedata);
                self.secp.sign_ecdsa_with_noncedata(&message, secret, &noncedata)
            };
            let (r, s, flipped) = normalize(raw);

            match self.find_recid(digest, &r, &s, flipped, target) {
                Some(recid) if recid < 2 => return Ok(Signature { r, s, recid }),
                Some(recid) => {
                    debug!(attempt, recid, "recovery id not encodable, re-signing");
                }
                None => {
                    debug!(attempt, "no recovery candidate matched, re-signing");
                }
            }
        }

        warn!(max_attempts, "recovery id search exhausted");
        Err(CryptoError::RecoverMismatch)
    }

    /// Try the four candidates, starting with the parity the normalization implies.
    fn find_recid(
        &self,
        digest: &[u8; 32],
        r: &[u8; 32],
        s: &[u8; 32],
        flipped: bool,
        target: RecoveryTarget<'_>,
    ) -> Option<u8> {
        let candidate = Signature { r: *r, s: *s, recid: 0 };
        (0u8..4).map(|c| c ^ u8::from(flipped)).find(|&recid| {
            let Ok(recovered) = self.recover(digest, &Signature { recid, ..candidate }) else {
                return false;
            };
            match target {
                RecoveryTarget::PublicKey(pk) => &recovered == pk,
                RecoveryTarget::Address(addr) => &derive_address(&recovered) == addr,
            }
        })
    }

    /// Recover the public key that produced `signature` over `digest`.
    pub fn recover(&self, digest: &[u8; 32], signature: &Signature) -> Result<PublicKey, CryptoError> {
        let recid = RecoveryId::from_i32(i32::from(signature.recid))
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let recoverable = RecoverableSignature::from_compact(&signature.to_compact(), recid)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        self.secp
            .recover_ecdsa(&Message::from_digest(*digest), &recoverable)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    pub fn recover_address(&self, digest: &[u8; 32], signature: &Signature) -> Result<Address, CryptoError> {
        Ok(derive_address(&self.recover(digest, signature)?))
    }
}

/// Split into `(r, s)` with `s` forced low; reports whether `s` was negated.
fn normalize(raw: EcdsaSignature) -> ([u8; 32], [u8; 32], bool) {
    let before = raw.serialize_compact();
    let mut low = raw;
    low.normalize_s();
    let after = low.serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&after[..32]);
    s.copy_from_slice(&after[32..]);
    (r, s, before[32..] != after[32..])
}

impl Address {
    /// Address controlled by a raw 32-byte private key.
    pub fn from_private_key(private_key: &[u8; 32]) -> Result<Self, CryptoError> {
        Secp256k1Signer::new().address_of(private_key)
    }
}
