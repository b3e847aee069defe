//! Core value types: card identifiers, PINs, digests and card records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::error::{CardlockError, Result};
use crate::{MAX_CARD_ID_LEN, MAX_PIN_LENGTH, MIN_PIN_LENGTH};

/// Seconds since the Unix epoch
pub type Timestamp = u64;

/// Opaque card identifier
///
/// Printable ASCII, 1-19 bytes, never containing the `,` or `|` separators
/// used by the on-disk formats. Compared byte-wise.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardId(String);

impl CardId {
    /// Validate and wrap a card identifier
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() || id.len() > MAX_CARD_ID_LEN {
            return Err(CardlockError::InvalidCardId(format!(
                "length must be 1-{} bytes, got {}",
                MAX_CARD_ID_LEN,
                id.len()
            )));
        }

        if let Some(bad) = id
            .chars()
            .find(|c| !c.is_ascii_graphic() || *c == ',' || *c == '|')
        {
            return Err(CardlockError::InvalidCardId(format!(
                "unsupported character {:?}",
                bad
            )));
        }

        Ok(Self(id))
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Form suitable for diagnostic logs (last four characters only)
    pub fn masked(&self) -> String {
        let len = self.0.len();
        if len <= 4 {
            return self.0.clone();
        }
        format!("{}{}", "*".repeat(len - 4), &self.0[len - 4..])
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardId({})", self.0)
    }
}

impl FromStr for CardId {
    type Err = CardlockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CardId {
    type Error = CardlockError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<CardId> for String {
    fn from(id: CardId) -> Self {
        id.0
    }
}

/// A cardholder PIN
///
/// Digits only, zeroized on drop. Numeric conversions live outside the core.
pub struct Pin(Zeroizing<String>);

impl Pin {
    /// Validate and wrap a PIN
    pub fn new(pin: &str) -> Result<Self> {
        if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
            return Err(CardlockError::InvalidPinLength(MIN_PIN_LENGTH, MAX_PIN_LENGTH));
        }

        if !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CardlockError::InvalidPinFormat);
        }

        Ok(Self(Zeroizing::new(pin.to_string())))
    }

    /// PIN bytes for hashing
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

impl FromStr for Pin {
    type Err = CardlockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Printable digest of a salted PIN
///
/// Deliberately not `PartialEq`: compare with
/// [`digests_equal`](crate::hasher::digests_equal).
#[derive(Clone)]
pub struct PinHash(String);

impl PinHash {
    /// Wrap a stored digest (as read from a card record)
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Encode raw digest bytes as lower-case hex
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// The digest text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinHash(..)")
    }
}

/// Administrative card status held by the card record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardStatus {
    /// Card may be used
    Active,
    /// Card has been administratively blocked (separate from lockout)
    Blocked,
}

impl CardStatus {
    /// Interpret a status column. Anything other than `Active` blocks the card.
    pub fn from_column(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("active") {
            CardStatus::Active
        } else {
            CardStatus::Blocked
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Active => f.write_str("Active"),
            CardStatus::Blocked => f.write_str("Blocked"),
        }
    }
}

/// Card credential as returned by the card record store
#[derive(Debug, Clone)]
pub struct CardRecord {
    /// Card identifier
    pub card_id: CardId,
    /// Stored PIN digest
    pub pin_hash: PinHash,
    /// Administrative status
    pub status: CardStatus,
}

impl CardRecord {
    /// Create a card record
    pub fn new(card_id: CardId, pin_hash: PinHash, status: CardStatus) -> Self {
        Self {
            card_id,
            pin_hash,
            status,
        }
    }
}
