//! Lockout records and their line format
//!
//! One record per line: `card_id,attempts,lock_time,unlock_time,reason`.

use std::fmt;

use crate::types::{CardId, Timestamp};
use crate::MAX_REASON_LEN;

/// Reason recorded when a card locks after too many bad PINs
pub const AUTO_LOCK_REASON: &str = "Too many failed PIN attempts";

/// Reason recorded for an administrative lock given without one
pub const ADMIN_LOCK_REASON: &str = "Administrative lock";

/// Per-card lockout state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutRecord {
    /// Card this record belongs to
    pub card_id: CardId,
    /// Consecutive failed PIN attempts
    pub failed_attempts: u32,
    /// When the card was locked (0 if not locked)
    pub lock_time: Timestamp,
    /// When the lock lifts (0 means permanent while locked)
    pub unlock_time: Timestamp,
    /// Why the card was locked (empty when not locked)
    pub reason: String,
}

/// Why a lockout line or record was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Fewer than four fields
    MissingFields(usize),
    /// Card id failed validation
    BadCardId(String),
    /// A numeric field did not parse
    BadNumber(&'static str, String),
    /// Unlocked record carrying an unlock time or reason
    StrayLockFields,
    /// Timed lock that ends before it starts
    UnlockBeforeLock,
    /// Reason contains a separator or exceeds the length limit
    BadReason(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::MissingFields(n) => write!(f, "expected at least 4 fields, found {}", n),
            RecordError::BadCardId(e) => write!(f, "bad card id: {}", e),
            RecordError::BadNumber(field, value) => write!(f, "bad {}: {:?}", field, value),
            RecordError::StrayLockFields => {
                f.write_str("unlocked record has an unlock time or reason")
            }
            RecordError::UnlockBeforeLock => f.write_str("unlock time is not after lock time"),
            RecordError::BadReason(e) => write!(f, "bad reason: {}", e),
        }
    }
}

impl std::error::Error for RecordError {}

impl LockoutRecord {
    /// Unlocked record counting failed attempts
    pub fn counting(card_id: CardId, failed_attempts: u32) -> Self {
        Self {
            card_id,
            failed_attempts,
            lock_time: 0,
            unlock_time: 0,
            reason: String::new(),
        }
    }

    /// Record locked from `lock_time` until `unlock_time`
    pub fn timed(
        card_id: CardId,
        failed_attempts: u32,
        lock_time: Timestamp,
        unlock_time: Timestamp,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            card_id,
            failed_attempts,
            lock_time,
            unlock_time,
            reason: reason.into(),
        }
    }

    /// Record locked until an administrator releases it
    pub fn permanent(
        card_id: CardId,
        failed_attempts: u32,
        lock_time: Timestamp,
        reason: impl Into<String>,
    ) -> Self {
        Self::timed(card_id, failed_attempts, lock_time, 0, reason)
    }

    /// Whether a lock (timed or permanent) is recorded
    pub fn is_locked(&self) -> bool {
        self.lock_time > 0
    }

    /// Whether the lock has no automatic end
    pub fn is_permanent(&self) -> bool {
        self.is_locked() && self.unlock_time == 0
    }

    /// Whether a timed lock has run out at `now`
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.is_locked() && self.unlock_time > 0 && now >= self.unlock_time
    }

    /// Check the record invariants
    pub fn validate(&self) -> Result<(), RecordError> {
        if !self.is_locked() && (self.unlock_time != 0 || !self.reason.is_empty()) {
            return Err(RecordError::StrayLockFields);
        }

        if self.is_locked() && self.unlock_time != 0 && self.unlock_time <= self.lock_time {
            return Err(RecordError::UnlockBeforeLock);
        }

        validate_reason(&self.reason)
    }

    /// Render as a lockout file line (without the trailing newline)
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.card_id, self.failed_attempts, self.lock_time, self.unlock_time, self.reason
        )
    }

    /// Parse a lockout file line. A missing reason field is accepted as empty.
    pub fn parse_line(line: &str) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.splitn(5, ',').collect();

        if fields.len() < 4 {
            return Err(RecordError::MissingFields(fields.len()));
        }

        let card_id = CardId::new(fields[0]).map_err(|e| RecordError::BadCardId(e.to_string()))?;
        let failed_attempts = parse_number::<u32>("attempts", fields[1])?;
        let lock_time = parse_number::<Timestamp>("lock_time", fields[2])?;
        let unlock_time = parse_number::<Timestamp>("unlock_time", fields[3])?;
        let reason = fields.get(4).copied().unwrap_or_default().to_string();

        let record = Self {
            card_id,
            failed_attempts,
            lock_time,
            unlock_time,
            reason,
        };
        record.validate()?;
        Ok(record)
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, RecordError> {
    value
        .trim()
        .parse()
        .map_err(|_| RecordError::BadNumber(field, value.to_string()))
}

/// Reasons must fit the line format
pub fn validate_reason(reason: &str) -> Result<(), RecordError> {
    if reason.len() > MAX_REASON_LEN {
        return Err(RecordError::BadReason(format!(
            "longer than {} bytes",
            MAX_REASON_LEN
        )));
    }

    if reason.contains([',', '\n', '\r']) {
        return Err(RecordError::BadReason(
            "must not contain commas or line breaks".to_string(),
        ));
    }

    Ok(())
}

/// Truncate `reason` to the length limit on a character boundary
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_LEN {
        return reason;
    }

    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> CardId {
        CardId::new("C1").unwrap()
    }

    #[test]
    fn test_line_format() {
        let record = LockoutRecord::timed(card(), 3, 1000, 2800, AUTO_LOCK_REASON);
        assert_eq!(record.to_line(), "C1,3,1000,2800,Too many failed PIN attempts");

        let counting = LockoutRecord::counting(card(), 2);
        assert_eq!(counting.to_line(), "C1,2,0,0,");
    }

    #[test]
    fn test_parse_line() {
        let record = LockoutRecord::parse_line("C1,3,1000,2800,Too many failed PIN attempts\n").unwrap();
        assert_eq!(record.failed_attempts, 3);
        assert_eq!(record.lock_time, 1000);
        assert_eq!(record.unlock_time, 2800);
        assert_eq!(record.reason, AUTO_LOCK_REASON);
    }

    #[test]
    fn test_parse_line_without_reason() {
        let record = LockoutRecord::parse_line("C1,1,0,0").unwrap();
        assert_eq!(record, LockoutRecord::counting(card(), 1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            LockoutRecord::parse_line("garbage"),
            Err(RecordError::MissingFields(1))
        ));
        assert!(matches!(
            LockoutRecord::parse_line("C1,-1,0,0,"),
            Err(RecordError::BadNumber("attempts", _))
        ));
        assert!(matches!(
            LockoutRecord::parse_line("C1,1,abc,0,"),
            Err(RecordError::BadNumber("lock_time", _))
        ));
        assert!(matches!(
            LockoutRecord::parse_line(",1,0,0,"),
            Err(RecordError::BadCardId(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invariant_violations() {
        // Not locked but has an unlock time
        assert_eq!(
            LockoutRecord::parse_line("C1,1,0,2800,"),
            Err(RecordError::StrayLockFields)
        );
        // Unlock before lock
        assert_eq!(
            LockoutRecord::parse_line("C1,3,2800,1000,x"),
            Err(RecordError::UnlockBeforeLock)
        );
        // Comma inside the reason
        assert!(matches!(
            LockoutRecord::parse_line("C1,3,1000,2800,a,b"),
            Err(RecordError::BadReason(_))
        ));
    }

    #[test]
    fn test_lock_predicates() {
        let timed = LockoutRecord::timed(card(), 3, 1000, 2800, AUTO_LOCK_REASON);
        assert!(timed.is_locked());
        assert!(!timed.is_permanent());
        assert!(!timed.is_expired(2799));
        assert!(timed.is_expired(2800));

        let permanent = LockoutRecord::permanent(card(), 0, 1000, ADMIN_LOCK_REASON);
        assert!(permanent.is_permanent());
        assert!(!permanent.is_expired(u64::MAX));
    }

    #[test]
    fn test_truncate_reason() {
        let long = "x".repeat(150);
        assert_eq!(truncate_reason(&long).len(), MAX_REASON_LEN);

        // Multi-byte characters are not split
        let accented = "é".repeat(60);
        let truncated = truncate_reason(&accented);
        assert!(truncated.len() <= MAX_REASON_LEN);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
