//! Property-based tests for cardlock-core using proptest
//!
//! These tests verify invariants that should hold for all valid inputs.

use std::sync::Arc;

use cardlock_core::{
    lockout::{LockState, LockoutPolicy, LockoutRecord, LockoutStore, StoreWrite},
    AuthOutcome, Authenticator, CardId, CardRecord, CardStatus, Clock, HashError, ManualClock,
    MemoryAuditSink, MemoryCardStore, MemoryLockoutPersistence, Pin, PinHash, PinHasher,
    Services, StaticConfig, MAX_REASON_LEN,
};
use proptest::prelude::*;

// ============================================
// Arbitrary Implementations
// ============================================

fn arb_card_id() -> impl Strategy<Value = CardId> {
    "[A-Za-z0-9]{1,19}".prop_map(|s| CardId::new(s).unwrap())
}

fn arb_reason() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,99}".prop_map(|s| s.trim().to_string())
}

fn arb_record() -> impl Strategy<Value = LockoutRecord> {
    prop_oneof![
        (arb_card_id(), 1u32..100).prop_map(|(id, n)| LockoutRecord::counting(id, n)),
        (arb_card_id(), 0u32..100, 1u64..1_000_000, 1u64..1_000_000, arb_reason()).prop_map(
            |(id, n, lock, len, reason)| LockoutRecord::timed(id, n, lock, lock + len, reason)
        ),
        (arb_card_id(), 0u32..100, 1u64..1_000_000, arb_reason())
            .prop_map(|(id, n, lock, reason)| LockoutRecord::permanent(id, n, lock, reason)),
    ]
}

/// Authentication events for the state machine
#[derive(Debug, Clone, Copy)]
enum Event {
    Correct,
    Wrong,
    Wait(u64),
    AdminLock,
    AdminUnlock,
    Reset,
    Cleanup,
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::Correct),
        6 => Just(Event::Wrong),
        3 => (0u64..4000).prop_map(Event::Wait),
        1 => Just(Event::AdminLock),
        1 => Just(Event::AdminUnlock),
        1 => Just(Event::Reset),
        1 => Just(Event::Cleanup),
    ]
}

/// Digest is the PIN itself, keeping the state machine fast
struct PlainHasher;

impl PinHasher for PlainHasher {
    fn hash(&self, pin: &Pin, _salt: &[u8]) -> Result<PinHash, HashError> {
        Ok(PinHash::new(String::from_utf8_lossy(pin.as_bytes()).into_owned()))
    }
}

fn authenticator(max: i64, clock: Arc<ManualClock>) -> Authenticator {
    authenticator_over(max, clock, MemoryLockoutPersistence::new())
}

fn authenticator_over(
    max: i64,
    clock: Arc<ManualClock>,
    persistence: MemoryLockoutPersistence,
) -> Authenticator {
    let cards = Arc::new(MemoryCardStore::new());
    cards.insert(CardRecord::new(
        CardId::new("C1").unwrap(),
        PinHash::new("1234"),
        CardStatus::Active,
    ));

    let services = Services {
        cards,
        config: Arc::new(StaticConfig::with_policy(max, 1800)),
        clock,
        hasher: Arc::new(PlainHasher),
        audit: Arc::new(MemoryAuditSink::new()),
    };
    Authenticator::open(services, Box::new(persistence))
}

// ============================================
// Property Tests
// ============================================

proptest! {
    // ----------------------------------------
    // Lockout Line Properties
    // ----------------------------------------

    #[test]
    fn lockout_line_roundtrip(record in arb_record()) {
        let line = record.to_line();
        prop_assert!(!line.contains('\n'));
        let recovered = LockoutRecord::parse_line(&line).unwrap();
        prop_assert_eq!(record, recovered);
    }

    #[test]
    fn lockout_line_parser_never_panics(line in "\\PC{0,200}") {
        let _ = LockoutRecord::parse_line(&line);
    }

    #[test]
    fn parsed_records_are_valid(line in "[A-Z0-9]{1,5},[0-9]{1,3},[0-9]{1,4},[0-9]{1,4},[a-z ]{0,10}") {
        if let Ok(record) = LockoutRecord::parse_line(&line) {
            prop_assert!(record.validate().is_ok());
            if record.lock_time == 0 {
                prop_assert_eq!(record.unlock_time, 0);
                prop_assert!(record.reason.is_empty());
            }
            if record.lock_time > 0 && record.unlock_time > 0 {
                prop_assert!(record.unlock_time > record.lock_time);
            }
            prop_assert!(record.reason.len() <= MAX_REASON_LEN);
        }
    }

    // ----------------------------------------
    // Store Properties
    // ----------------------------------------

    #[test]
    fn store_persist_reload_preserves_state(records in prop::collection::vec(arb_record(), 0..20)) {
        let persistence = MemoryLockoutPersistence::new();
        let mut store = LockoutStore::new(Box::new(persistence.clone()));
        for record in records {
            store.upsert(record).unwrap();
        }

        let mut reopened = LockoutStore::new(Box::new(persistence));
        let report = reopened.load();
        prop_assert!(report.corrupt_lines.is_empty());
        prop_assert_eq!(reopened.records(), store.records());
    }

    // ----------------------------------------
    // Policy Properties
    // ----------------------------------------

    #[test]
    fn remaining_attempts_bounded(max in 1u32..10, record in arb_record(), now in 0u64..3_000_000) {
        let policy = LockoutPolicy::new(max, 1800);
        let state = policy.state_of(Some(&record), now);
        let remaining = policy.remaining_attempts(&state);
        prop_assert!(remaining <= max);
        if state.is_locked() {
            prop_assert_eq!(remaining, 0);
        }
    }

    #[test]
    fn failure_never_unlocks(record in arb_record(), now in 0u64..3_000_000) {
        let policy = LockoutPolicy::default();
        let before = policy.state_of(Some(&record), now);
        let transition = policy.on_failure(&record.card_id, Some(&record), now);
        if before.is_locked() {
            prop_assert_eq!(transition.to, before);
            prop_assert_eq!(transition.write, StoreWrite::Keep);
        }
    }

    #[test]
    fn admin_lock_is_always_permanent(record in proptest::option::of(arb_record()), now in 1u64..3_000_000) {
        let policy = LockoutPolicy::default();
        let card_id = record
            .as_ref()
            .map(|r| r.card_id.clone())
            .unwrap_or_else(|| CardId::new("C1").unwrap());
        let transition = policy.on_admin_lock(&card_id, record.as_ref(), now, "", "admin");
        prop_assert_eq!(transition.to, LockState::Permanent);
    }

    // ----------------------------------------
    // Authenticator Properties
    // ----------------------------------------

    #[test]
    fn failures_then_success(max in 1i64..6, failures in 0u32..8) {
        let clock = Arc::new(ManualClock::new(1000));
        let auth = authenticator(max, clock);
        let card = CardId::new("C1").unwrap();

        for _ in 0..failures {
            auth.authenticate(&card, &Pin::new("0000").unwrap());
        }

        let outcome = auth.authenticate(&card, &Pin::new("1234").unwrap());
        prop_assert_eq!(outcome.is_granted(), (failures as i64) < max);
    }

    #[test]
    fn state_machine_invariants(events in prop::collection::vec(arb_event(), 1..40)) {
        let clock = Arc::new(ManualClock::new(1000));
        let persistence = MemoryLockoutPersistence::new();
        let auth = authenticator_over(3, clock.clone(), persistence.clone());
        let card = CardId::new("C1").unwrap();

        for event in events {
            match event {
                Event::Correct => {
                    let locked_before = auth.is_locked(&card);
                    let outcome = auth.authenticate(&card, &Pin::new("1234").unwrap());
                    prop_assert_eq!(outcome.is_granted(), !locked_before);
                    if outcome.is_granted() {
                        prop_assert!(auth.lockout_records().is_empty());
                    }
                }
                Event::Wrong => {
                    let outcome = auth.authenticate(&card, &Pin::new("0000").unwrap());
                    prop_assert_ne!(outcome, AuthOutcome::Granted);
                }
                Event::Wait(secs) => clock.advance(secs),
                Event::AdminLock => auth.admin_lock(&card, "", "admin").unwrap(),
                Event::AdminUnlock => auth.admin_unlock(&card, "admin", "").unwrap(),
                Event::Reset => auth.admin_reset(&card, "admin").unwrap(),
                Event::Cleanup => {
                    auth.cleanup_expired().unwrap();
                    prop_assert_eq!(auth.cleanup_expired().unwrap(), 0);
                    let now = clock.now_seconds();
                    for record in auth.lockout_records() {
                        prop_assert!(!(record.unlock_time > 0 && record.unlock_time <= now));
                    }
                }
            }

            let records = auth.lockout_records();
            prop_assert!(records.len() <= 1);
            for record in &records {
                prop_assert!(record.validate().is_ok());
            }
            prop_assert!(auth.remaining_attempts(&card) <= 3);
        }

        // Reopening over the same storage restores the same state. Opening
        // clears expired locks, so clear them here first.
        auth.cleanup_expired().unwrap();
        let records = auth.lockout_records();
        let state = auth.lock_state(&card);
        drop(auth);

        let reopened = authenticator_over(3, clock, persistence);
        prop_assert_eq!(reopened.lockout_records(), records);
        prop_assert_eq!(reopened.lock_state(&card), state);
    }
}
