//! Failed-attempt tracking and lockout enforcement
//!
//! - [`record`]: the per-card record and its line format
//! - [`store`]: the persistent card id to record map
//! - [`policy`]: the state machine deciding what each event does

pub mod policy;
pub mod record;
pub mod store;

pub use policy::{LockState, LockoutPolicy, StoreWrite, Transition};
pub use record::{LockoutRecord, RecordError, ADMIN_LOCK_REASON, AUTO_LOCK_REASON};
pub use store::{
    CorruptLine, FileLockoutPersistence, LoadReport, LockoutPersistence, LockoutStore,
    MemoryLockoutPersistence,
};
