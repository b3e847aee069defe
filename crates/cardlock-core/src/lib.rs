//! cardlock - card PIN authentication and lockout enforcement
//!
//! This crate is the security boundary of an ATM front end. It provides:
//! - Card + PIN authentication against an external card record store
//! - Failed-attempt counting with time-bounded automatic lockouts
//! - Administrative lock, unlock and attempt reset
//! - A persistent lockout store that survives process restarts
//! - An append-only audit trail of security decisions
//!
//! # Security Model
//!
//! - PINs are hashed with Argon2id using a per-card salt
//! - Digests are compared in constant time
//! - The whole authenticate operation runs under a single store lock
//! - A store write failure never grants access

pub mod admin;
pub mod audit;
pub mod authenticator;
pub mod card_store;
pub mod clock;
pub mod config;
pub mod error;
pub mod hasher;
pub mod lockout;
pub mod types;

pub use audit::{
    AuditCategory, AuditEvent, AuditKind, AuditSink, AuditTrail, FileAuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use authenticator::{AuthOutcome, Authenticator, Denial, DenialKind, Services};
pub use card_store::{CardRecordStore, FileCardStore, MemoryCardStore};
pub use clock::{Clock, ClockGuard, ManualClock, SystemClock};
pub use config::{CardlockPaths, ConfigReader, ConfigSnapshot, FileConfig, StaticConfig};
pub use error::{
    AdminError, AuditError, CardlockError, HashError, LookupError, Result, StoreError,
};
pub use hasher::{card_salt, digests_equal, Argon2PinHasher, HasherParams, PinHasher};
pub use lockout::{
    FileLockoutPersistence, LockState, LockoutPersistence, LockoutPolicy, LockoutRecord,
    LockoutStore, MemoryLockoutPersistence, StoreWrite, Transition,
};
pub use types::{CardId, CardRecord, CardStatus, Pin, PinHash, Timestamp};

/// Failed attempts allowed before a timed lockout
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 3;

/// Length of an automatic lockout in seconds (30 minutes)
pub const DEFAULT_LOCKOUT_DURATION_SECS: u64 = 1800;

/// Maximum length of a lockout reason in bytes
pub const MAX_REASON_LEN: usize = 99;

/// Maximum length of a card identifier in bytes
pub const MAX_CARD_ID_LEN: usize = 19;

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;

/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 12;

/// Backwards clock steps up to this many seconds are treated as no movement
pub const CLOCK_SKEW_TOLERANCE_SECS: u64 = 5;
