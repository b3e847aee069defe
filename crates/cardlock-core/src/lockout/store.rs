//! Persistent lockout store
//!
//! Records live in an ordered map keyed by card id. Every mutation rewrites
//! the whole backing file (temp file + rename) before it is reported as done.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::record::LockoutRecord;
use crate::error::StoreError;
use crate::types::CardId;

/// Backing storage for the rendered lockout file
pub trait LockoutPersistence: Send {
    /// Raw contents, or `None` if nothing has been stored yet
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the contents atomically
    fn store(&self, contents: &str) -> Result<(), StoreError>;
}

/// Lockout file on disk
#[derive(Debug, Clone)]
pub struct FileLockoutPersistence {
    path: PathBuf,
}

impl FileLockoutPersistence {
    /// Persist to `path`. The file and its directory are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the lockout file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LockoutPersistence for FileLockoutPersistence {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn store(&self, contents: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write atomically
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// In-memory persistence. Clones share contents, so a store can be reopened
/// over the same data to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockoutPersistence {
    contents: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryLockoutPersistence {
    /// Create empty persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Create persistence holding `contents`
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self::with_bytes(contents.into().into_bytes())
    }

    /// Create persistence holding raw bytes, which need not be UTF-8
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(bytes))),
        }
    }

    /// Snapshot of the stored text
    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl LockoutPersistence for MemoryLockoutPersistence {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn store(&self, contents: &str) -> Result<(), StoreError> {
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(contents.as_bytes().to_vec());
        Ok(())
    }
}

/// A line skipped while loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptLine {
    /// 1-based line number
    pub line_number: usize,
    /// Why the line was rejected
    pub error: String,
}

/// Outcome of [`LockoutStore::load`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records now held
    pub loaded: usize,
    /// Lines that were skipped
    pub corrupt_lines: Vec<CorruptLine>,
    /// Set when the backing storage could not be read at all
    pub unavailable: Option<String>,
}

/// Card id to lockout record map with write-through persistence
pub struct LockoutStore {
    records: BTreeMap<CardId, LockoutRecord>,
    persistence: Box<dyn LockoutPersistence>,
    dirty: bool,
}

impl LockoutStore {
    /// Create an empty store over `persistence`. Call [`load`](Self::load) to read it.
    pub fn new(persistence: Box<dyn LockoutPersistence>) -> Self {
        Self {
            records: BTreeMap::new(),
            persistence,
            dirty: false,
        }
    }

    /// Replace the in-memory map with the persisted contents.
    ///
    /// Never fails: unreadable storage leaves the store empty and unparseable
    /// lines are skipped. Both are reported for auditing.
    pub fn load(&mut self) -> LoadReport {
        let mut report = LoadReport::default();
        self.records.clear();
        self.dirty = false;

        let contents = match self.persistence.load() {
            Ok(Some(contents)) => contents,
            Ok(None) => return report,
            Err(e) => {
                warn!("Lockout store unavailable, starting empty: {}", e);
                report.unavailable = Some(e.to_string());
                return report;
            }
        };

        for (index, bytes) in contents.split(|b| *b == b'\n').enumerate() {
            let line = match std::str::from_utf8(bytes) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Skipping lockout line {}: not valid UTF-8", index + 1);
                    report.corrupt_lines.push(CorruptLine {
                        line_number: index + 1,
                        error: format!("not valid UTF-8: {}", e),
                    });
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match LockoutRecord::parse_line(line) {
                Ok(record) => {
                    if self.records.contains_key(&record.card_id) {
                        report.corrupt_lines.push(CorruptLine {
                            line_number: index + 1,
                            error: format!("duplicate record for card {}", record.card_id.masked()),
                        });
                    }
                    self.records.insert(record.card_id.clone(), record);
                }
                Err(e) => {
                    warn!("Skipping lockout line {}: {}", index + 1, e);
                    report.corrupt_lines.push(CorruptLine {
                        line_number: index + 1,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.loaded = self.records.len();
        debug!(
            "Loaded {} lockout records ({} corrupt lines)",
            report.loaded,
            report.corrupt_lines.len()
        );
        report
    }

    /// Record for `card_id`, if any
    pub fn get(&self, card_id: &CardId) -> Option<&LockoutRecord> {
        self.records.get(card_id)
    }

    /// Insert or replace a record and persist. On failure the change is undone.
    pub fn upsert(&mut self, record: LockoutRecord) -> Result<(), StoreError> {
        let card_id = record.card_id.clone();
        let previous = self.records.insert(card_id.clone(), record);

        if let Err(e) = self.persist_all() {
            match previous {
                Some(previous) => self.records.insert(card_id, previous),
                None => self.records.remove(&card_id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Insert or replace a record and persist. On failure the change is kept
    /// in memory and persistence is retried by the next write or
    /// [`flush_pending`](Self::flush_pending).
    pub fn upsert_deferred(&mut self, record: LockoutRecord) -> Result<(), StoreError> {
        self.records.insert(record.card_id.clone(), record);

        if let Err(e) = self.persist_all() {
            self.dirty = true;
            return Err(e);
        }
        Ok(())
    }

    /// Remove a record and persist. On failure the record is restored.
    pub fn remove(&mut self, card_id: &CardId) -> Result<Option<LockoutRecord>, StoreError> {
        let Some(previous) = self.records.remove(card_id) else {
            return Ok(None);
        };

        if let Err(e) = self.persist_all() {
            self.records.insert(card_id.clone(), previous);
            return Err(e);
        }
        Ok(Some(previous))
    }

    /// Remove several records with a single write. On failure all are restored.
    pub fn remove_many(&mut self, card_ids: &[CardId]) -> Result<Vec<LockoutRecord>, StoreError> {
        let removed: Vec<LockoutRecord> = card_ids
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect();

        if removed.is_empty() {
            return Ok(removed);
        }

        if let Err(e) = self.persist_all() {
            for record in removed {
                self.records.insert(record.card_id.clone(), record);
            }
            return Err(e);
        }
        Ok(removed)
    }

    /// Visit every record in card id order
    pub fn for_each(&self, mut f: impl FnMut(&LockoutRecord)) {
        for record in self.records.values() {
            f(record);
        }
    }

    /// Rewrite the backing storage from memory
    pub fn persist_all(&mut self) -> Result<(), StoreError> {
        let contents = self.render();
        self.persistence.store(&contents)?;
        self.dirty = false;
        Ok(())
    }

    /// Retry a write that previously failed. No-op when nothing is pending.
    pub fn flush_pending(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        self.persist_all()
    }

    /// Whether memory holds changes the backing storage does not
    pub fn has_pending_writes(&self) -> bool {
        self.dirty
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of all records in card id order
    pub fn records(&self) -> Vec<LockoutRecord> {
        self.records.values().cloned().collect()
    }

    /// Render the file contents: one LF-terminated line per record
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in self.records.values() {
            out.push_str(&record.to_line());
            out.push('\n');
        }
        out
    }
}
