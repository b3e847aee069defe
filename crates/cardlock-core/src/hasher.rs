//! PIN hashing with a per-card salt
//!
//! Digests are Argon2id outputs (memory-hard, iterated) rendered as 64
//! lower-case hex characters. The salt is derived from the card identifier so
//! the same PIN on two cards yields different digests while staying
//! deterministic for a given card.

use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::HashError;
use crate::types::{CardId, Pin, PinHash};

/// Raw digest length in bytes
pub const PIN_DIGEST_LEN: usize = 32;

/// Domain separation prefix for card salts
const SALT_DOMAIN: &[u8] = b"cardlock/pin-salt/v1:";

/// Hashes PINs for comparison against stored digests
pub trait PinHasher: Send + Sync {
    /// Deterministic digest of `pin` under `salt`
    fn hash(&self, pin: &Pin, salt: &[u8]) -> Result<PinHash, HashError>;

    /// Digest of `pin` under the salt for `card_id`
    fn hash_for_card(&self, pin: &Pin, card_id: &CardId) -> Result<PinHash, HashError> {
        self.hash(pin, &card_salt(card_id))
    }
}

/// Salt for a card: SHA-256 over a domain prefix and the card id
pub fn card_salt(card_id: &CardId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SALT_DOMAIN);
    hasher.update(card_id.as_bytes());
    hasher.finalize().into()
}

/// Compare two digests without branching on where they first differ
pub fn digests_equal(a: &PinHash, b: &PinHash) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Argon2 cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for HasherParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Argon2id PIN hasher
pub struct Argon2PinHasher {
    argon2: Argon2<'static>,
}

impl Argon2PinHasher {
    /// Create a hasher with the given cost parameters
    pub fn new(params: HasherParams) -> Result<Self, HashError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(PIN_DIGEST_LEN),
        )
        .map_err(|e| HashError::Params(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PinHasher for Argon2PinHasher {
    fn hash(&self, pin: &Pin, salt: &[u8]) -> Result<PinHash, HashError> {
        let mut digest = Zeroizing::new([0u8; PIN_DIGEST_LEN]);

        self.argon2
            .hash_password_into(pin.as_bytes(), salt, &mut digest[..])
            .map_err(|e| HashError::Hashing(e.to_string()))?;

        Ok(PinHash::from_digest(&digest[..]))
    }
}
