//! Card record lookups
//!
//! The core only ever reads card records. [`FileCardStore`] reads the ATM
//! card table:
//!
//! ```text
//! Card_ID | Account_ID | Card_Number | Card_Type | Expiry_Date | Status | PIN_Hash
//! --------|------------|-------------|-----------|-------------|--------|---------
//! 1       | 10001      | 4000123412341234 | Debit | 12/29 | Active | 5e884898...
//! ```
//!
//! Cards are keyed by the card number column.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::LookupError;
use crate::types::{CardId, CardRecord, CardStatus, PinHash};

const COLUMN_COUNT: usize = 7;
const CARD_NUMBER_COLUMN: usize = 2;
const STATUS_COLUMN: usize = 5;
const PIN_HASH_COLUMN: usize = 6;

/// Read-only source of card credentials
pub trait CardRecordStore: Send + Sync {
    /// Look up a card. Must not have side effects.
    fn find(&self, card_id: &CardId) -> Result<CardRecord, LookupError>;
}

/// Card records held in memory
#[derive(Debug, Default)]
pub struct MemoryCardStore {
    cards: RwLock<HashMap<CardId, CardRecord>>,
}

impl MemoryCardStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a card
    pub fn insert(&self, record: CardRecord) {
        self.cards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.card_id.clone(), record);
    }

    /// Change a card's administrative status. Returns false if the card is unknown.
    pub fn set_status(&self, card_id: &CardId, status: CardStatus) -> bool {
        let mut cards = self.cards.write().unwrap_or_else(PoisonError::into_inner);
        match cards.get_mut(card_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Remove a card
    pub fn remove(&self, card_id: &CardId) -> Option<CardRecord> {
        self.cards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(card_id)
    }
}

impl CardRecordStore for MemoryCardStore {
    fn find(&self, card_id: &CardId) -> Result<CardRecord, LookupError> {
        self.cards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(card_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(card_id.masked()))
    }
}

/// Pipe-separated card table, re-read on every lookup
#[derive(Debug, Clone)]
pub struct FileCardStore {
    path: PathBuf,
}

impl FileCardStore {
    /// Read cards from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the card table
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a card table. Header, separator, comment and malformed rows are skipped.
    pub fn parse_table(contents: &str) -> Vec<CardRecord> {
        contents
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let record = parse_row(line);
                if record.is_none() && !is_decoration(line) {
                    debug!("Skipping card table line {}", index + 1);
                }
                record
            })
            .collect()
    }
}

impl CardRecordStore for FileCardStore {
    fn find(&self, card_id: &CardId) -> Result<CardRecord, LookupError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| LookupError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        // Later rows override earlier ones
        Self::parse_table(&contents)
            .into_iter()
            .rev()
            .find(|record| &record.card_id == card_id)
            .ok_or_else(|| LookupError::NotFound(card_id.masked()))
    }
}

fn is_decoration(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed
            .chars()
            .all(|c| matches!(c, '-' | '=' | '+' | '|') || c.is_whitespace())
}

fn parse_row(line: &str) -> Option<CardRecord> {
    if is_decoration(line) {
        return None;
    }

    let columns: Vec<&str> = line.split('|').map(str::trim).collect();
    if columns.len() != COLUMN_COUNT {
        return None;
    }

    let number = columns[CARD_NUMBER_COLUMN];
    if number.eq_ignore_ascii_case("card_number") {
        return None;
    }

    let card_id = CardId::new(number).ok()?;
    let pin_hash = columns[PIN_HASH_COLUMN];
    if pin_hash.is_empty() {
        return None;
    }

    Some(CardRecord::new(
        card_id,
        PinHash::new(pin_hash),
        CardStatus::from_column(columns[STATUS_COLUMN]),
    ))
}
