//! Card + PIN authentication
//!
//! [`Authenticator`] owns the lockout store behind a mutex. Each
//! authentication holds that mutex from the first read of the card's record
//! to the last write, so attempts on one card are totally ordered.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink, AuditTrail};
use crate::card_store::CardRecordStore;
use crate::clock::{Clock, ClockGuard};
use crate::config::ConfigReader;
use crate::error::{LookupError, StoreError};
use crate::hasher::{digests_equal, PinHasher};
use crate::lockout::{
    LockState, LockoutPersistence, LockoutPolicy, LockoutRecord, LockoutStore, StoreWrite,
    Transition,
};
use crate::types::{CardId, CardStatus, Pin, Timestamp};
use crate::CLOCK_SKEW_TOLERANCE_SECS;

/// Why an authentication was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// No such card
    UnknownCard,
    /// Card is administratively blocked
    CardBlocked,
    /// Card is locked; `unlock_at` is `None` for a permanent lock
    Locked { unlock_at: Option<Timestamp> },
    /// Wrong PIN
    BadPin { remaining_attempts: u32 },
    /// A collaborator failed; nothing was counted
    Internal,
}

impl Denial {
    /// Stable code for this denial
    pub fn kind(&self) -> DenialKind {
        match self {
            Denial::UnknownCard => DenialKind::UnknownCard,
            Denial::CardBlocked => DenialKind::CardBlocked,
            Denial::Locked { .. } => DenialKind::Locked,
            Denial::BadPin { .. } => DenialKind::BadPin,
            Denial::Internal => DenialKind::Internal,
        }
    }
}

/// Denial codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialKind {
    /// `UNKNOWN_CARD`
    UnknownCard,
    /// `CARD_BLOCKED`
    CardBlocked,
    /// `LOCKED`
    Locked,
    /// `BAD_PIN`
    BadPin,
    /// `INTERNAL`
    Internal,
}

impl DenialKind {
    /// Wire name, e.g. `BAD_PIN`
    pub fn as_str(self) -> &'static str {
        match self {
            DenialKind::UnknownCard => "UNKNOWN_CARD",
            DenialKind::CardBlocked => "CARD_BLOCKED",
            DenialKind::Locked => "LOCKED",
            DenialKind::BadPin => "BAD_PIN",
            DenialKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`Authenticator::authenticate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// PIN verified
    Granted,
    /// Refused
    Denied(Denial),
}

impl AuthOutcome {
    /// Whether access was granted
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthOutcome::Granted)
    }

    /// The denial, if refused
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            AuthOutcome::Granted => None,
            AuthOutcome::Denied(denial) => Some(denial),
        }
    }

    /// Attempts left, reported only for a wrong PIN
    pub fn remaining_attempts(&self) -> Option<u32> {
        match self {
            AuthOutcome::Denied(Denial::BadPin { remaining_attempts }) => Some(*remaining_attempts),
            _ => None,
        }
    }

    /// Unlock time, reported only for a timed lock
    pub fn unlock_at(&self) -> Option<Timestamp> {
        match self {
            AuthOutcome::Denied(Denial::Locked { unlock_at }) => *unlock_at,
            _ => None,
        }
    }

    /// Report a blocked card as unknown, for front ends that must not reveal
    /// which card numbers exist
    pub fn masked(self) -> Self {
        match self {
            AuthOutcome::Denied(Denial::CardBlocked) => AuthOutcome::Denied(Denial::UnknownCard),
            other => other,
        }
    }
}

impl fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthOutcome::Granted => f.write_str("GRANTED"),
            AuthOutcome::Denied(Denial::BadPin { remaining_attempts }) => write!(
                f,
                "DENIED {} ({} attempts remaining)",
                DenialKind::BadPin,
                remaining_attempts
            ),
            AuthOutcome::Denied(Denial::Locked {
                unlock_at: Some(until),
            }) => write!(f, "DENIED {} (until {})", DenialKind::Locked, until),
            AuthOutcome::Denied(Denial::Locked { unlock_at: None }) => {
                write!(f, "DENIED {} (permanent)", DenialKind::Locked)
            }
            AuthOutcome::Denied(denial) => write!(f, "DENIED {}", denial.kind()),
        }
    }
}

/// External collaborators of the authenticator
#[derive(Clone)]
pub struct Services {
    /// Card credentials
    pub cards: Arc<dyn CardRecordStore>,
    /// Policy values
    pub config: Arc<dyn ConfigReader>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// PIN digests
    pub hasher: Arc<dyn PinHasher>,
    /// Audit destination
    pub audit: Arc<dyn AuditSink>,
}

/// State guarded by the authenticator's mutex
pub(crate) struct Guarded {
    pub(crate) store: LockoutStore,
    pub(crate) clock: ClockGuard,
}

/// Card authentication and lockout enforcement
pub struct Authenticator {
    cards: Arc<dyn CardRecordStore>,
    config: Arc<dyn ConfigReader>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PinHasher>,
    pub(crate) audit: AuditTrail,
    state: Mutex<Guarded>,
}

impl Authenticator {
    /// Load the lockout store and clear expired locks.
    ///
    /// Never fails: an unreadable store starts empty and is audited as
    /// `STORE_UNAVAILABLE`, corrupt lines are skipped and audited as
    /// `STORE_CORRUPTION`.
    pub fn open(services: Services, persistence: Box<dyn LockoutPersistence>) -> Self {
        let mut store = LockoutStore::new(persistence);
        let report = store.load();

        let mut clock = ClockGuard::new(CLOCK_SKEW_TOLERANCE_SECS);
        store.for_each(|record| clock.raise_floor(record.lock_time));

        let authenticator = Self {
            cards: services.cards,
            config: services.config,
            clock: services.clock,
            hasher: services.hasher,
            audit: AuditTrail::new(services.audit),
            state: Mutex::new(Guarded { store, clock }),
        };

        {
            let mut guarded = authenticator.lock();
            let now = authenticator.observe_clock(&mut guarded);

            if let Some(error) = &report.unavailable {
                authenticator.audit.record(AuditEvent::new(
                    now,
                    AuditKind::StoreUnavailable,
                    None,
                    format!("Lockout store unreadable, starting empty: {}", error),
                ));
            }

            for corrupt in &report.corrupt_lines {
                authenticator.audit.record(AuditEvent::new(
                    now,
                    AuditKind::StoreCorruption,
                    None,
                    format!("Skipped line {}: {}", corrupt.line_number, corrupt.error),
                ));
            }
        }

        match authenticator.cleanup_expired() {
            Ok(0) => {}
            Ok(n) => debug!("Cleared {} expired lockouts at startup", n),
            Err(e) => warn!("Startup lockout cleanup failed: {}", e),
        }

        authenticator
    }

    /// Authenticate `pin` for `card_id`
    pub fn authenticate(&self, card_id: &CardId, pin: &Pin) -> AuthOutcome {
        let policy = self.policy();
        let mut guarded = self.lock();
        let now = self.observe_clock(&mut guarded);
        let store = &mut guarded.store;
        self.retry_pending(store);

        let card = match self.cards.find(card_id) {
            Ok(card) => card,
            Err(LookupError::NotFound(_)) => {
                self.audit.record(AuditEvent::new(
                    now,
                    AuditKind::DeniedUnknownCard,
                    Some(card_id),
                    "Card not found",
                ));
                return AuthOutcome::Denied(Denial::UnknownCard);
            }
            Err(e @ LookupError::Unavailable(_)) => {
                return self.deny_internal(card_id, now, &e.to_string());
            }
        };

        if card.status == CardStatus::Blocked {
            self.audit.record(AuditEvent::new(
                now,
                AuditKind::DeniedBlocked,
                Some(card_id),
                "Card is blocked",
            ));
            return AuthOutcome::Denied(Denial::CardBlocked);
        }

        let record = store.get(card_id).cloned();
        if let Some(cleared) = policy.normalize(card_id, record.as_ref(), now) {
            if let Err(e) = self.commit(store, cleared) {
                return self.deny_internal(card_id, now, &e.to_string());
            }
        }

        let record = store.get(card_id).cloned();
        let state = policy.state_of(record.as_ref(), now);
        if state.is_locked() {
            self.audit
                .record_all(policy.on_locked_attempt(card_id, &state, now).events);
            return AuthOutcome::Denied(Denial::Locked {
                unlock_at: state.unlock_at(),
            });
        }

        let presented = match self.hasher.hash_for_card(pin, card_id) {
            Ok(digest) => digest,
            Err(e) => return self.deny_internal(card_id, now, &e.to_string()),
        };

        if digests_equal(&presented, &card.pin_hash) {
            let transition = policy.on_success(card_id, record.as_ref(), now);
            return match self.commit(store, transition) {
                Ok(()) => AuthOutcome::Granted,
                Err(e) => self.deny_internal(card_id, now, &e.to_string()),
            };
        }

        let transition = policy.on_failure(card_id, record.as_ref(), now);
        let to = transition.to;

        if to.is_locked() {
            self.commit_lock(store, transition);
            return AuthOutcome::Denied(Denial::Locked {
                unlock_at: to.unlock_at(),
            });
        }

        match self.commit(store, transition) {
            Ok(()) => AuthOutcome::Denied(Denial::BadPin {
                remaining_attempts: policy.remaining_attempts(&to),
            }),
            Err(e) => self.deny_internal(card_id, now, &e.to_string()),
        }
    }

    /// Count a failure verified outside [`authenticate`](Self::authenticate),
    /// such as a wrong current PIN during a PIN change. Returns the attempts
    /// left; a locked card is noted and left unchanged.
    pub fn record_failed_attempt(&self, card_id: &CardId) -> Result<u32, StoreError> {
        let policy = self.policy();
        let mut guarded = self.lock();
        let now = self.observe_clock(&mut guarded);
        let store = &mut guarded.store;
        self.retry_pending(store);

        let record = store.get(card_id).cloned();
        let transition = policy.on_failure(card_id, record.as_ref(), now);
        let to = transition.to;

        if to.is_locked() {
            self.commit_lock(store, transition);
        } else {
            self.commit(store, transition)?;
        }

        Ok(policy.remaining_attempts(&to))
    }

    /// Whether `card_id` is currently refused
    pub fn is_locked(&self, card_id: &CardId) -> bool {
        self.lock_state(card_id).is_locked()
    }

    /// Attempts left before a timed lock
    pub fn remaining_attempts(&self, card_id: &CardId) -> u32 {
        let state = self.lock_state(card_id);
        self.policy().remaining_attempts(&state)
    }

    /// Unlock time of an active timed lock
    pub fn unlock_at(&self, card_id: &CardId) -> Option<Timestamp> {
        self.lock_state(card_id).unlock_at()
    }

    /// Current lockout state. Read-only: an expired lock is reported as
    /// `Expired` but not cleared.
    pub fn lock_state(&self, card_id: &CardId) -> LockState {
        let guarded = self.lock();
        let now = self.peek_clock(&guarded);
        self.policy().state_of(guarded.store.get(card_id), now)
    }

    /// Human-readable lockout status for operators
    pub fn describe(&self, card_id: &CardId) -> String {
        let guarded = self.lock();
        let now = self.peek_clock(&guarded);
        let policy = self.policy();
        let state = policy.state_of(guarded.store.get(card_id), now);
        policy.describe(&state, now)
    }

    /// Snapshot of every lockout record
    pub fn lockout_records(&self) -> Vec<LockoutRecord> {
        self.lock().store.records()
    }

    /// Policy as currently configured
    pub fn policy(&self) -> LockoutPolicy {
        LockoutPolicy::from_config(self.config.as_ref())
    }

    /// Audit events the sink failed to accept
    pub fn audit_failures(&self) -> u64 {
        self.audit.failures()
    }

    /// Whether a lock decision is held in memory but not yet persisted
    pub fn has_pending_writes(&self) -> bool {
        self.lock().store.has_pending_writes()
    }

    /// Retry any pending persistence now
    pub fn flush(&self) -> Result<(), StoreError> {
        self.lock().store.flush_pending()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the clock through the regression guard, auditing large steps back
    pub(crate) fn observe_clock(&self, guarded: &mut Guarded) -> Timestamp {
        let observation = guarded.clock.observe(self.clock.now_seconds());

        if let Some(gap) = observation.regression {
            warn!("Clock moved back {} seconds", gap);
            self.audit.record(AuditEvent::new(
                observation.now,
                AuditKind::ClockAnomaly,
                None,
                format!(
                    "Clock moved back {} seconds, holding at {}",
                    gap, observation.now
                ),
            ));
        }

        observation.now
    }

    fn peek_clock(&self, guarded: &Guarded) -> Timestamp {
        self.clock.now_seconds().max(guarded.clock.high_water())
    }

    pub(crate) fn retry_pending(&self, store: &mut LockoutStore) {
        if let Err(e) = store.flush_pending() {
            warn!("Lockout store still not writable: {}", e);
        }
    }

    /// Apply a transition's write; audit its events only if the write succeeded
    pub(crate) fn commit(
        &self,
        store: &mut LockoutStore,
        transition: Transition,
    ) -> Result<(), StoreError> {
        match transition.write {
            StoreWrite::Keep => {}
            StoreWrite::Upsert(record) => store.upsert(record)?,
            StoreWrite::Remove(card_id) => {
                store.remove(&card_id)?;
            }
        }

        self.audit.record_all(transition.events);
        Ok(())
    }

    /// Apply a transition that locks a card. The lock holds in memory even
    /// if it cannot be persisted yet.
    pub(crate) fn commit_lock(
        &self,
        store: &mut LockoutStore,
        transition: Transition,
    ) -> Option<StoreError> {
        let failure = match transition.write {
            StoreWrite::Upsert(record) => store.upsert_deferred(record).err(),
            StoreWrite::Keep | StoreWrite::Remove(_) => None,
        };

        if let Some(e) = &failure {
            warn!("Lock held in memory, persistence deferred: {}", e);
        }

        self.audit.record_all(transition.events);
        failure
    }

    fn deny_internal(&self, card_id: &CardId, now: Timestamp, cause: &str) -> AuthOutcome {
        warn!("Authentication for card {} failed internally: {}", card_id.masked(), cause);
        self.audit.record(AuditEvent::new(
            now,
            AuditKind::DeniedInternal,
            Some(card_id),
            cause,
        ));
        AuthOutcome::Denied(Denial::Internal)
    }
}
