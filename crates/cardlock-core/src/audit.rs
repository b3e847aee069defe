//! Security audit trail
//!
//! Every authentication decision and lockout change produces an
//! [`AuditEvent`]. Sinks are append-only. Delivery is best effort: the
//! [`AuditTrail`] wrapper never lets a sink failure change a decision, and
//! reports such failures out of band through `tracing` and a counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use crate::error::AuditError;
use crate::types::{CardId, Timestamp};

/// Audit event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Lock changes and storage integrity
    Security,
    /// Authentication decisions
    Auth,
    /// Routine state changes
    Info,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditCategory::Security => "SECURITY",
            AuditCategory::Auth => "AUTH",
            AuditCategory::Info => "INFO",
        };
        f.write_str(s)
    }
}

/// Kind of security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    /// Correct PIN, access granted
    Granted,
    /// Wrong PIN, attempt counted
    DeniedBadPin,
    /// Refused because the card is locked
    DeniedLocked,
    /// No such card
    DeniedUnknownCard,
    /// Card administratively blocked
    DeniedBlocked,
    /// A collaborator failed during authentication
    DeniedInternal,
    /// Failed attempts reached the limit
    CardLocked,
    /// Timed lock expired and was cleared
    CardAutoUnlocked,
    /// Failure reported for a card that is already locked
    AttemptWhileLocked,
    /// Operator locked a card
    AdminLock,
    /// Operator released a card
    AdminUnlock,
    /// Operator cleared the failed attempts
    AttemptsReset,
    /// Lockout store could not be read at startup
    StoreUnavailable,
    /// Lockout store line skipped at startup
    StoreCorruption,
    /// Wall clock stepped backwards beyond the tolerance
    ClockAnomaly,
}

impl AuditKind {
    /// Category this kind is always filed under
    pub fn category(self) -> AuditCategory {
        match self {
            AuditKind::Granted
            | AuditKind::DeniedBadPin
            | AuditKind::DeniedLocked
            | AuditKind::DeniedUnknownCard
            | AuditKind::DeniedBlocked
            | AuditKind::DeniedInternal => AuditCategory::Auth,
            AuditKind::CardLocked
            | AuditKind::AdminLock
            | AuditKind::AdminUnlock
            | AuditKind::StoreUnavailable
            | AuditKind::StoreCorruption
            | AuditKind::ClockAnomaly => AuditCategory::Security,
            AuditKind::CardAutoUnlocked
            | AuditKind::AttemptWhileLocked
            | AuditKind::AttemptsReset => AuditCategory::Info,
        }
    }

    /// Wire name, e.g. `CARD_LOCKED`
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::Granted => "GRANTED",
            AuditKind::DeniedBadPin => "DENIED_BAD_PIN",
            AuditKind::DeniedLocked => "DENIED_LOCKED",
            AuditKind::DeniedUnknownCard => "DENIED_UNKNOWN_CARD",
            AuditKind::DeniedBlocked => "DENIED_BLOCKED",
            AuditKind::DeniedInternal => "DENIED_INTERNAL",
            AuditKind::CardLocked => "CARD_LOCKED",
            AuditKind::CardAutoUnlocked => "CARD_AUTO_UNLOCKED",
            AuditKind::AttemptWhileLocked => "ATTEMPT_WHILE_LOCKED",
            AuditKind::AdminLock => "ADMIN_LOCK",
            AuditKind::AdminUnlock => "ADMIN_UNLOCK",
            AuditKind::AttemptsReset => "ATTEMPTS_RESET",
            AuditKind::StoreUnavailable => "STORE_UNAVAILABLE",
            AuditKind::StoreCorruption => "STORE_CORRUPTION",
            AuditKind::ClockAnomaly => "CLOCK_ANOMALY",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Seconds since the Unix epoch
    pub timestamp: Timestamp,
    /// Category (derived from the kind)
    pub category: AuditCategory,
    /// What happened
    pub kind: AuditKind,
    /// Card concerned, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<CardId>,
    /// Operator responsible, for administrative events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Free-text detail
    pub detail: String,
}

impl AuditEvent {
    /// Create an event; the category follows from `kind`
    pub fn new(
        timestamp: Timestamp,
        kind: AuditKind,
        card_id: Option<&CardId>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            category: kind.category(),
            kind,
            card_id: card_id.cloned(),
            actor: None,
            detail: detail.into(),
        }
    }

    /// Attach the acting operator
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Encode as a single JSON line (without the trailing newline)
    pub fn to_json_line(&self) -> Result<String, AuditError> {
        let line = AuditLine {
            time: format_timestamp(self.timestamp),
            event: self,
        };
        Ok(serde_json::to_string(&line)?)
    }
}

/// On-disk form: the event plus a human-readable time
#[derive(Serialize)]
struct AuditLine<'a> {
    time: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

fn format_timestamp(timestamp: Timestamp) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    /// Append an event
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Appends JSON lines to a file
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open (creating if needed) an audit log for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = event.to_json_line()?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds of every event so far, in order
    pub fn kinds(&self) -> Vec<AuditKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    /// Events for one card, in order
    pub fn events_for(&self, card_id: &CardId) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.card_id.as_ref() == Some(card_id))
            .collect()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events to `tracing` under the `cardlock::audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "cardlock::audit",
            category = %event.category,
            kind = %event.kind,
            card = %event.card_id.as_ref().map(|c| c.masked()).unwrap_or_default(),
            actor = event.actor.as_deref().unwrap_or(""),
            "{}",
            event.detail
        );
        Ok(())
    }
}

/// Best-effort front end over an [`AuditSink`]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    failures: AtomicU64,
}

impl AuditTrail {
    /// Wrap a sink
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            failures: AtomicU64::new(0),
        }
    }

    /// Deliver an event. Failures are logged and counted, never returned.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.sink.emit(&event) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                target: "cardlock::audit",
                kind = %event.kind,
                "Audit sink rejected event: {}",
                e
            );
        }
    }

    /// Deliver several events in order
    pub fn record_all(&self, events: impl IntoIterator<Item = AuditEvent>) {
        for event in events {
            self.record(event);
        }
    }

    /// Number of events the sink failed to accept
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
