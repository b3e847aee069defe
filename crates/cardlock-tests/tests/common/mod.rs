//! Shared fixture for the end-to-end tests
//!
//! Defaults follow the reference scenario: max 3 attempts, 30 minute
//! lockouts, the clock at t=1000 and card `C1` with PIN `1234`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cardlock_core::{
    Argon2PinHasher, AuditError, AuditEvent, AuditSink, Authenticator, CardId, CardRecord,
    CardStatus, HasherParams, LockoutPersistence, ManualClock, MemoryAuditSink, MemoryCardStore,
    MemoryLockoutPersistence, Pin, PinHasher, Services, StaticConfig, StoreError,
};

pub const START: u64 = 1000;

pub fn card(id: &str) -> CardId {
    CardId::new(id).unwrap()
}

pub fn pin(p: &str) -> Pin {
    Pin::new(p).unwrap()
}

/// Cheap Argon2 parameters so tests stay fast
pub fn test_hasher() -> Argon2PinHasher {
    Argon2PinHasher::new(HasherParams {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
    pub cards: Arc<MemoryCardStore>,
    pub config: Arc<StaticConfig>,
    pub hasher: Arc<Argon2PinHasher>,
    pub persistence: MemoryLockoutPersistence,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Self {
            clock: Arc::new(ManualClock::new(START)),
            audit: Arc::new(MemoryAuditSink::new()),
            cards: Arc::new(MemoryCardStore::new()),
            config: Arc::new(StaticConfig::with_policy(3, 1800)),
            hasher: Arc::new(test_hasher()),
            persistence: MemoryLockoutPersistence::new(),
        };
        fixture.add_card("C1", "1234", CardStatus::Active);
        fixture
    }

    pub fn add_card(&self, id: &str, pin_digits: &str, status: CardStatus) {
        let card_id = card(id);
        let pin_hash = self.hasher.hash_for_card(&pin(pin_digits), &card_id).unwrap();
        self.cards.insert(CardRecord::new(card_id, pin_hash, status));
    }

    pub fn services(&self) -> Services {
        self.services_with_audit(self.audit.clone())
    }

    pub fn services_with_audit(&self, audit: Arc<dyn AuditSink>) -> Services {
        Services {
            cards: self.cards.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            hasher: self.hasher.clone(),
            audit,
        }
    }

    /// Open an authenticator over the shared in-memory store. Opening again
    /// simulates a process restart.
    pub fn open(&self) -> Authenticator {
        Authenticator::open(self.services(), Box::new(self.persistence.clone()))
    }

    /// Open with a different audit sink over the shared store
    pub fn open_with_audit(&self, audit: Arc<dyn AuditSink>) -> Authenticator {
        Authenticator::open(self.services_with_audit(audit), Box::new(self.persistence.clone()))
    }

    pub fn open_with(&self, persistence: impl LockoutPersistence + 'static) -> Authenticator {
        Authenticator::open(self.services(), Box::new(persistence))
    }

    pub fn stored(&self) -> String {
        self.persistence.contents().unwrap_or_default()
    }
}

/// Persistence whose writes can be made to fail
#[derive(Clone, Default)]
pub struct FlakyPersistence {
    pub inner: MemoryLockoutPersistence,
    failing: Arc<AtomicBool>,
}

impl FlakyPersistence {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl LockoutPersistence for FlakyPersistence {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.load()
    }

    fn store(&self, contents: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.store(contents)
    }
}

/// Persistence that cannot be read
pub struct UnreadablePersistence {
    pub inner: MemoryLockoutPersistence,
}

impl LockoutPersistence for UnreadablePersistence {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        )))
    }

    fn store(&self, contents: &str) -> Result<(), StoreError> {
        self.inner.store(contents)
    }
}

/// Audit sink that rejects every event
pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn emit(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "audit volume full",
        )))
    }
}
