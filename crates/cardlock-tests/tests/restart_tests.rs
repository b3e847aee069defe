//! Persistence across restarts and storage failures

mod common;

use std::fs;
use std::sync::Arc;

use cardlock_core::{
    AuditKind, AuthOutcome, Authenticator, CardlockPaths, Denial, FileAuditSink, FileCardStore,
    FileConfig, FileLockoutPersistence, MemoryLockoutPersistence, PinHasher, Services,
};
use common::{card, pin, test_hasher, FlakyPersistence, Fixture, UnreadablePersistence};
use tempfile::tempdir;

fn lock_c1(auth: &Authenticator) {
    for _ in 0..3 {
        auth.authenticate(&card("C1"), &pin("0000"));
    }
}

#[test]
fn test_lock_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("card_lockouts.txt");
    let fx = Fixture::new();

    let auth = fx.open_with(FileLockoutPersistence::new(&path));
    lock_c1(&auth);
    drop(auth);

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "C1,3,1000,2800,Too many failed PIN attempts\n"
    );

    fx.clock.set(1500);
    let auth = fx.open_with(FileLockoutPersistence::new(&path));
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("1234")),
        AuthOutcome::Denied(Denial::Locked {
            unlock_at: Some(2800)
        })
    );
}

#[test]
fn test_partial_count_survives_restart() {
    let fx = Fixture::new();
    let auth = fx.open();
    auth.authenticate(&card("C1"), &pin("0000"));
    auth.authenticate(&card("C1"), &pin("0000"));
    drop(auth);

    let auth = fx.open();
    assert_eq!(auth.remaining_attempts(&card("C1")), 1);
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("0000")),
        AuthOutcome::Denied(Denial::Locked {
            unlock_at: Some(2800)
        })
    );
}

#[test]
fn test_startup_clears_expired_locks() {
    let fx = Fixture::new();
    lock_c1(&fx.open());

    fx.clock.set(2800);
    fx.audit.clear();
    let auth = fx.open();
    assert!(auth.lockout_records().is_empty());
    assert_eq!(fx.stored(), "");
    assert_eq!(fx.audit.kinds(), vec![AuditKind::CardAutoUnlocked]);
}

#[test]
fn test_corrupt_lines_are_skipped() {
    let fx = Fixture::new();
    let persistence = MemoryLockoutPersistence::with_contents(
        "C1,3,1000,2800,Too many failed PIN attempts\nthis is not a record\nC2,x,0,0,\nC3,1,0,0,\n",
    );

    let auth = fx.open_with(persistence.clone());
    assert_eq!(
        fx.audit.kinds(),
        vec![AuditKind::StoreCorruption, AuditKind::StoreCorruption]
    );
    assert!(fx.audit.events()[0].detail.contains("line 2"));
    assert!(auth.is_locked(&card("C1")));
    assert_eq!(auth.remaining_attempts(&card("C3")), 2);

    // The next write drops the corrupt lines
    auth.admin_reset(&card("C3"), "adminA").unwrap();
    assert_eq!(
        persistence.contents().unwrap(),
        "C1,3,1000,2800,Too many failed PIN attempts\n"
    );
}

#[test]
fn test_unreadable_store_starts_empty() {
    let fx = Fixture::new();
    let auth = fx.open_with(UnreadablePersistence {
        inner: MemoryLockoutPersistence::new(),
    });

    assert_eq!(fx.audit.kinds(), vec![AuditKind::StoreUnavailable]);
    assert_eq!(auth.authenticate(&card("C1"), &pin("1234")), AuthOutcome::Granted);
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("0000")),
        AuthOutcome::Denied(Denial::BadPin {
            remaining_attempts: 2
        })
    );
}

#[test]
fn test_write_failure_while_counting_is_internal() {
    let fx = Fixture::new();
    let persistence = FlakyPersistence::default();
    let auth = fx.open_with(persistence.clone());

    persistence.set_failing(true);
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("0000")),
        AuthOutcome::Denied(Denial::Internal)
    );
    assert!(auth.lockout_records().is_empty());
    assert_eq!(fx.audit.kinds(), vec![AuditKind::DeniedInternal]);
}

#[test]
fn test_write_failure_on_success_is_not_granted() {
    let fx = Fixture::new();
    let persistence = FlakyPersistence::default();
    let auth = fx.open_with(persistence.clone());
    auth.authenticate(&card("C1"), &pin("0000"));

    persistence.set_failing(true);
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("1234")),
        AuthOutcome::Denied(Denial::Internal)
    );
    assert_eq!(auth.remaining_attempts(&card("C1")), 2);
}

#[test]
fn test_write_failure_while_locking_still_locks() {
    let fx = Fixture::new();
    let persistence = FlakyPersistence::default();
    let auth = fx.open_with(persistence.clone());

    auth.authenticate(&card("C1"), &pin("0000"));
    auth.authenticate(&card("C1"), &pin("0000"));

    persistence.set_failing(true);
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("0000")),
        AuthOutcome::Denied(Denial::Locked {
            unlock_at: Some(2800)
        })
    );
    assert!(auth.has_pending_writes());
    assert_eq!(persistence.inner.contents().unwrap(), "C1,2,0,0,\n");

    // Still locked, never granted, while the disk is failing
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("1234")),
        AuthOutcome::Denied(Denial::Locked {
            unlock_at: Some(2800)
        })
    );

    // The next event after recovery persists the lock
    persistence.set_failing(false);
    auth.authenticate(&card("C1"), &pin("1234"));
    assert!(!auth.has_pending_writes());
    assert_eq!(
        persistence.inner.contents().unwrap(),
        "C1,3,1000,2800,Too many failed PIN attempts\n"
    );
}

#[test]
fn test_clock_regression_across_restart() {
    let fx = Fixture::new();
    lock_c1(&fx.open());

    // Clock wound back before the recorded lock time
    fx.clock.set(500);
    fx.audit.clear();
    let auth = fx.open();
    assert!(fx.audit.kinds().contains(&AuditKind::ClockAnomaly));
    assert_eq!(
        auth.authenticate(&card("C1"), &pin("1234")),
        AuthOutcome::Denied(Denial::Locked {
            unlock_at: Some(2800)
        })
    );
}

#[test]
fn test_file_backed_deployment() {
    let temp_dir = tempdir().unwrap();
    let paths = CardlockPaths::in_dir(temp_dir.path());
    let fx = Fixture::new();
    let hasher = test_hasher();

    let digest = hasher
        .hash_for_card(&pin("4321"), &card("4000123412341234"))
        .unwrap();
    fs::write(
        &paths.cards,
        format!(
            "Card_ID | Account_ID | Card_Number | Card_Type | Expiry_Date | Status | PIN_Hash\n\
             --------|------------|-------------|-----------|-------------|--------|---------\n\
             1 | 10001 | 4000123412341234 | Debit | 12/29 | Active | {}\n",
            digest.as_str()
        ),
    )
    .unwrap();
    fs::write(
        &paths.config,
        "# ATM policy\nmax_failed_attempts = 2\nlockout_duration_seconds = 600\n",
    )
    .unwrap();

    let services = Services {
        cards: Arc::new(FileCardStore::new(&paths.cards)),
        config: Arc::new(FileConfig::new(&paths.config)),
        clock: fx.clock.clone(),
        hasher: Arc::new(hasher),
        audit: Arc::new(FileAuditSink::open(&paths.audit_log).unwrap()),
    };
    let auth = Authenticator::open(services, Box::new(FileLockoutPersistence::new(&paths.lockouts)));
    let c = card("4000123412341234");

    assert_eq!(auth.authenticate(&c, &pin("4321")), AuthOutcome::Granted);
    assert_eq!(
        auth.authenticate(&c, &pin("0000")),
        AuthOutcome::Denied(Denial::BadPin {
            remaining_attempts: 1
        })
    );
    assert_eq!(
        auth.authenticate(&c, &pin("0000")),
        AuthOutcome::Denied(Denial::Locked {
            unlock_at: Some(1600)
        })
    );

    let audit_log = fs::read_to_string(&paths.audit_log).unwrap();
    let lines: Vec<&str> = audit_log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].contains("\"kind\":\"GRANTED\""));
    assert!(lines[3].contains("\"kind\":\"CARD_LOCKED\""));
    assert!(lines[3].contains("\"category\":\"SECURITY\""));

    assert_eq!(
        fs::read_to_string(&paths.lockouts).unwrap(),
        "4000123412341234,2,1000,1600,Too many failed PIN attempts\n"
    );
}
