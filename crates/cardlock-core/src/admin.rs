//! Administrative lockout operations
//!
//! Operators can lock a card until further notice, release a lock, reset the
//! failed-attempt count and sweep expired locks. Every action is audited with
//! the acting operator.

use tracing::info;

use crate::authenticator::Authenticator;
use crate::error::AdminError;
use crate::lockout::record::{truncate_reason, validate_reason};
use crate::types::CardId;

impl Authenticator {
    /// Lock `card_id` until an administrator unlocks it.
    ///
    /// An empty reason is recorded as "Administrative lock"; long reasons are
    /// truncated. If the lock cannot be persisted it still applies in memory
    /// and [`AdminError::NotPersisted`] is returned.
    pub fn admin_lock(&self, card_id: &CardId, reason: &str, actor: &str) -> Result<(), AdminError> {
        let reason = sanitize_reason(reason)?;
        let policy = self.policy();

        let mut guarded = self.lock();
        let now = self.observe_clock(&mut guarded);
        let store = &mut guarded.store;
        self.retry_pending(store);

        let record = store.get(card_id).cloned();
        let transition = policy.on_admin_lock(card_id, record.as_ref(), now, reason, actor);

        if let Some(e) = self.commit_lock(store, transition) {
            return Err(AdminError::NotPersisted(e));
        }

        info!("Card {} locked by {}", card_id.masked(), actor);
        Ok(())
    }

    /// Release any lock on `card_id` and clear its attempt count. Idempotent.
    pub fn admin_unlock(&self, card_id: &CardId, actor: &str, reason: &str) -> Result<(), AdminError> {
        let policy = self.policy();

        let mut guarded = self.lock();
        let now = self.observe_clock(&mut guarded);
        let store = &mut guarded.store;
        self.retry_pending(store);

        let record = store.get(card_id).cloned();
        let transition = policy.on_admin_unlock(card_id, record.as_ref(), now, reason, actor);
        self.commit(store, transition).map_err(AdminError::Store)?;

        info!("Card {} unlocked by {}", card_id.masked(), actor);
        Ok(())
    }

    /// Forget the failed attempts (and any lock) on `card_id`. Idempotent.
    pub fn admin_reset(&self, card_id: &CardId, actor: &str) -> Result<(), AdminError> {
        let policy = self.policy();

        let mut guarded = self.lock();
        let now = self.observe_clock(&mut guarded);
        let store = &mut guarded.store;
        self.retry_pending(store);

        let record = store.get(card_id).cloned();
        let transition = policy.on_admin_reset(card_id, record.as_ref(), now, actor);
        self.commit(store, transition).map_err(AdminError::Store)?;

        info!("Failed attempts reset for card {} by {}", card_id.masked(), actor);
        Ok(())
    }

    /// Remove every timed lock whose unlock time has passed. Returns how many
    /// were removed; running it again immediately removes none.
    pub fn cleanup_expired(&self) -> Result<usize, AdminError> {
        let policy = self.policy();

        let mut guarded = self.lock();
        let now = self.observe_clock(&mut guarded);
        let store = &mut guarded.store;
        self.retry_pending(store);

        let mut expired = Vec::new();
        store.for_each(|record| {
            if record.is_expired(now) {
                expired.push(record.card_id.clone());
            }
        });

        let removed = store.remove_many(&expired).map_err(AdminError::Store)?;
        for record in &removed {
            if let Some(cleared) = policy.normalize(&record.card_id, Some(record), now) {
                self.audit.record_all(cleared.events);
            }
        }

        Ok(removed.len())
    }
}

fn sanitize_reason(reason: &str) -> Result<&str, AdminError> {
    let reason = truncate_reason(reason.trim());
    validate_reason(reason).map_err(|e| AdminError::InvalidReason(e.to_string()))?;
    Ok(reason)
}
