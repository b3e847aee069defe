//! Lockout policy state machine
//!
//! A card's lockout state is derived from its record and the current time:
//!
//! - no record, or zero attempts: `Clean`
//! - attempts below the limit: `Counting`
//! - locked with an unlock time in the future: `Timed`
//! - locked with no unlock time: `Permanent`
//! - locked with an unlock time that has passed: `Expired` (treated as clean)
//!
//! Transitions are pure. They describe the store write and audit events an
//! event causes; the caller applies them.

use std::time::Duration;

use super::record::{LockoutRecord, ADMIN_LOCK_REASON, AUTO_LOCK_REASON};
use crate::audit::{AuditEvent, AuditKind};
use crate::config::{ConfigReader, LOCKOUT_DURATION_SECONDS_KEY, MAX_FAILED_ATTEMPTS_KEY};
use crate::types::{CardId, Timestamp};
use crate::{DEFAULT_LOCKOUT_DURATION_SECS, DEFAULT_MAX_FAILED_ATTEMPTS};

/// Derived lockout state of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No failed attempts on record
    Clean,
    /// Failed attempts counted, not locked
    Counting {
        /// Consecutive failures so far
        attempts: u32,
    },
    /// Locked until a point in time
    Timed {
        /// When the lock lifts
        until: Timestamp,
    },
    /// Locked until an administrator releases it
    Permanent,
    /// Timed lock whose unlock time has passed
    Expired {
        /// When the lock lifted
        until: Timestamp,
    },
}

impl LockState {
    /// Whether attempts are currently refused
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Timed { .. } | LockState::Permanent)
    }

    /// Unlock time of an active timed lock
    pub fn unlock_at(&self) -> Option<Timestamp> {
        match self {
            LockState::Timed { until } => Some(*until),
            _ => None,
        }
    }
}

/// Store change requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    /// Leave the store as it is
    Keep,
    /// Insert or replace this record
    Upsert(LockoutRecord),
    /// Delete the card's record
    Remove(CardId),
}

/// Result of applying an event to a card's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State before the event
    pub from: LockState,
    /// State after the event
    pub to: LockState,
    /// Store change to apply
    pub write: StoreWrite,
    /// Audit events to emit, in order
    pub events: Vec<AuditEvent>,
}

impl Transition {
    fn new(from: LockState, to: LockState, write: StoreWrite) -> Self {
        Self {
            from,
            to,
            write,
            events: Vec::new(),
        }
    }

    fn event(mut self, event: AuditEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Failed-attempt limit and lockout length
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger a timed lock
    pub max_failed_attempts: u32,
    /// Length of a timed lock in seconds
    pub lockout_duration_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
        }
    }
}

impl LockoutPolicy {
    /// Create a policy. Values below 1 are raised to 1.
    pub fn new(max_failed_attempts: u32, lockout_duration_secs: u64) -> Self {
        Self {
            max_failed_attempts: max_failed_attempts.max(1),
            lockout_duration_secs: lockout_duration_secs.max(1),
        }
    }

    /// Resolve the policy from configuration. Missing values and values
    /// below 1 fall back to the defaults.
    pub fn from_config(config: &dyn ConfigReader) -> Self {
        let config = config.snapshot();
        let max_failed_attempts = config
            .get_int(MAX_FAILED_ATTEMPTS_KEY)
            .filter(|v| *v >= 1)
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_MAX_FAILED_ATTEMPTS);

        let lockout_duration_secs = config
            .get_int(LOCKOUT_DURATION_SECONDS_KEY)
            .filter(|v| *v >= 1)
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_LOCKOUT_DURATION_SECS);

        Self {
            max_failed_attempts,
            lockout_duration_secs,
        }
    }

    /// Length of a timed lock
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }

    /// Derive the state of a card from its record
    pub fn state_of(&self, record: Option<&LockoutRecord>, now: Timestamp) -> LockState {
        let Some(record) = record else {
            return LockState::Clean;
        };

        if !record.is_locked() {
            return match record.failed_attempts {
                0 => LockState::Clean,
                attempts => LockState::Counting { attempts },
            };
        }

        if record.is_permanent() {
            LockState::Permanent
        } else if now >= record.unlock_time {
            LockState::Expired {
                until: record.unlock_time,
            }
        } else {
            LockState::Timed {
                until: record.unlock_time,
            }
        }
    }

    /// Attempts left before a timed lock, in `[0, max_failed_attempts]`
    pub fn remaining_attempts(&self, state: &LockState) -> u32 {
        match state {
            LockState::Clean | LockState::Expired { .. } => self.max_failed_attempts,
            LockState::Counting { attempts } => self.max_failed_attempts.saturating_sub(*attempts),
            LockState::Timed { .. } | LockState::Permanent => 0,
        }
    }

    /// Human-readable description of a state
    pub fn describe(&self, state: &LockState, now: Timestamp) -> String {
        match state {
            LockState::Timed { until } => {
                format!("Locked for {}", describe_duration(until.saturating_sub(now)))
            }
            LockState::Permanent => "Locked until released by an administrator".to_string(),
            _ => format!("{} attempts remaining", self.remaining_attempts(state)),
        }
    }

    /// Clear an expired timed lock. `None` when the state is not `Expired`.
    pub fn normalize(
        &self,
        card_id: &CardId,
        record: Option<&LockoutRecord>,
        now: Timestamp,
    ) -> Option<Transition> {
        let from = self.state_of(record, now);
        let LockState::Expired { until } = from else {
            return None;
        };

        Some(
            Transition::new(from, LockState::Clean, StoreWrite::Remove(card_id.clone())).event(
                AuditEvent::new(
                    now,
                    AuditKind::CardAutoUnlocked,
                    Some(card_id),
                    format!("Lock expired at {}", until),
                ),
            ),
        )
    }

    /// A wrong PIN (or an externally verified failure) for `card_id`
    pub fn on_failure(
        &self,
        card_id: &CardId,
        record: Option<&LockoutRecord>,
        now: Timestamp,
    ) -> Transition {
        let from = self.state_of(record, now);

        let prior = match from {
            LockState::Timed { until } => {
                return Transition::new(from, from, StoreWrite::Keep).event(AuditEvent::new(
                    now,
                    AuditKind::AttemptWhileLocked,
                    Some(card_id),
                    format!("Attempt on card locked until {}", until),
                ));
            }
            LockState::Permanent => {
                return Transition::new(from, from, StoreWrite::Keep).event(AuditEvent::new(
                    now,
                    AuditKind::AttemptWhileLocked,
                    Some(card_id),
                    "Attempt on card locked by an administrator",
                ));
            }
            LockState::Clean => 0,
            LockState::Counting { attempts } => attempts,
            // An expired lock starts counting afresh
            LockState::Expired { .. } => 0,
        };

        let mut transition = Transition::new(from, from, StoreWrite::Keep);
        if let Some(cleared) = self.normalize(card_id, record, now) {
            transition.events.extend(cleared.events);
        }

        let attempts = prior.saturating_add(1);

        if attempts < self.max_failed_attempts {
            let remaining = self.max_failed_attempts - attempts;
            transition.to = LockState::Counting { attempts };
            transition.write = StoreWrite::Upsert(LockoutRecord::counting(card_id.clone(), attempts));
            return transition.event(AuditEvent::new(
                now,
                AuditKind::DeniedBadPin,
                Some(card_id),
                format!("Incorrect PIN, {} attempts remaining", remaining),
            ));
        }

        let lock_time = now.max(1);
        let unlock_time = lock_time.saturating_add(self.lockout_duration_secs);
        transition.to = LockState::Timed { until: unlock_time };
        transition.write = StoreWrite::Upsert(LockoutRecord::timed(
            card_id.clone(),
            attempts,
            lock_time,
            unlock_time,
            AUTO_LOCK_REASON,
        ));
        transition
            .event(AuditEvent::new(
                now,
                AuditKind::DeniedBadPin,
                Some(card_id),
                "Incorrect PIN, no attempts remaining",
            ))
            .event(AuditEvent::new(
                now,
                AuditKind::CardLocked,
                Some(card_id),
                format!(
                    "{} after {} failed attempts, locked until {}",
                    AUTO_LOCK_REASON, attempts, unlock_time
                ),
            ))
    }

    /// A correct PIN for `card_id`
    pub fn on_success(
        &self,
        card_id: &CardId,
        record: Option<&LockoutRecord>,
        now: Timestamp,
    ) -> Transition {
        let from = self.state_of(record, now);
        if from.is_locked() {
            return self.on_locked_attempt(card_id, &from, now);
        }

        let mut transition = match self.normalize(card_id, record, now) {
            Some(cleared) => cleared,
            None => Transition::new(from, LockState::Clean, StoreWrite::Keep),
        };

        if record.is_some() {
            transition.write = StoreWrite::Remove(card_id.clone());
        }
        transition.event(AuditEvent::new(
            now,
            AuditKind::Granted,
            Some(card_id),
            "PIN verified",
        ))
    }

    /// Any authentication attempt on a locked card. The PIN is not consulted.
    pub fn on_locked_attempt(
        &self,
        card_id: &CardId,
        state: &LockState,
        now: Timestamp,
    ) -> Transition {
        let detail = match state.unlock_at() {
            Some(until) => format!("Card locked until {}", until),
            None => "Card locked until released by an administrator".to_string(),
        };

        Transition::new(*state, *state, StoreWrite::Keep).event(AuditEvent::new(
            now,
            AuditKind::DeniedLocked,
            Some(card_id),
            detail,
        ))
    }

    /// Administrative lock: always ends `Permanent`, keeping the attempt count
    pub fn on_admin_lock(
        &self,
        card_id: &CardId,
        record: Option<&LockoutRecord>,
        now: Timestamp,
        reason: &str,
        actor: &str,
    ) -> Transition {
        let from = self.state_of(record, now);
        let reason = if reason.is_empty() {
            ADMIN_LOCK_REASON
        } else {
            reason
        };
        let attempts = record.map(|r| r.failed_attempts).unwrap_or(0);

        Transition::new(
            from,
            LockState::Permanent,
            StoreWrite::Upsert(LockoutRecord::permanent(
                card_id.clone(),
                attempts,
                now.max(1),
                reason,
            )),
        )
        .event(
            AuditEvent::new(now, AuditKind::AdminLock, Some(card_id), reason).with_actor(actor),
        )
    }

    /// Administrative unlock: clears any lock and the attempt count
    pub fn on_admin_unlock(
        &self,
        card_id: &CardId,
        record: Option<&LockoutRecord>,
        now: Timestamp,
        reason: &str,
        actor: &str,
    ) -> Transition {
        let from = self.state_of(record, now);
        let write = match record {
            Some(_) => StoreWrite::Remove(card_id.clone()),
            None => StoreWrite::Keep,
        };

        Transition::new(from, LockState::Clean, write).event(
            AuditEvent::new(now, AuditKind::AdminUnlock, Some(card_id), reason).with_actor(actor),
        )
    }

    /// Administrative attempt reset: forgets the attempt count and any lock
    pub fn on_admin_reset(
        &self,
        card_id: &CardId,
        record: Option<&LockoutRecord>,
        now: Timestamp,
        actor: &str,
    ) -> Transition {
        let from = self.state_of(record, now);
        let write = match record {
            Some(_) => StoreWrite::Remove(card_id.clone()),
            None => StoreWrite::Keep,
        };
        let attempts = record.map(|r| r.failed_attempts).unwrap_or(0);

        Transition::new(from, LockState::Clean, write).event(
            AuditEvent::new(
                now,
                AuditKind::AttemptsReset,
                Some(card_id),
                format!("Reset {} failed attempts", attempts),
            )
            .with_actor(actor),
        )
    }
}

fn describe_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{} seconds", secs)
    } else if secs < 3600 {
        format!("{} minutes", secs.div_ceil(60))
    } else if secs < 86400 {
        format!("{} hours", secs.div_ceil(3600))
    } else {
        format!("{} days", secs.div_ceil(86400))
    }
}
