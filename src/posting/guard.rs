//! Per-queue-item mutual exclusion for posting actions.
//!
//! At most one automated action runs for a queue item at a time. A second
//! attempt is turned away immediately instead of waiting. Within a process
//! each running action carries a cancel flag that a terminal operator action
//! can raise. Across processes the claim lives on the queue row itself.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::db::Database;

/// How long a claim holds before another process may take the item over.
pub const CLAIM_TIMEOUT_MINUTES: i64 = 15;

#[derive(Default)]
pub struct ActionGuards {
    active: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl ActionGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<i64, Arc<AtomicBool>>> {
        // A panic while holding the map cannot leave it half-updated.
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `queue_item_id`, or `None` when another action already holds it.
    /// The claim is released when the returned guard is dropped.
    pub fn try_acquire(&self, queue_item_id: i64) -> Option<ActionGuard<'_>> {
        let mut entries = self.entries();
        if entries.contains_key(&queue_item_id) {
            return None;
        }
        let cancel_flag = Arc::new(AtomicBool::new(false));
        entries.insert(queue_item_id, cancel_flag.clone());
        Some(ActionGuard {
            guards: self,
            queue_item_id,
            cancel_flag,
        })
    }

    /// Ask a running action on `queue_item_id` to stop.
    /// Returns true if there was one to signal.
    pub fn cancel(&self, queue_item_id: i64) -> bool {
        match self.entries().get(&queue_item_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, queue_item_id: i64) -> bool {
        self.entries().contains_key(&queue_item_id)
    }

    pub fn active_count(&self) -> usize {
        self.entries().len()
    }
}

pub struct ActionGuard<'a> {
    guards: &'a ActionGuards,
    queue_item_id: i64,
    cancel_flag: Arc<AtomicBool>,
}

impl ActionGuard<'_> {
    pub fn queue_item_id(&self) -> i64 {
        self.queue_item_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.guards.entries().remove(&self.queue_item_id);
    }
}

/// Claim recorded on the queue row, so the CLI and the daemon see each other.
/// Released on drop; a row deleted by resolution needs no release.
pub struct QueueClaim<'a> {
    db: &'a Database,
    queue_item_id: i64,
}

impl<'a> QueueClaim<'a> {
    /// `None` when the row is missing, not pending, or held by a live claim.
    pub fn acquire(db: &'a Database, queue_item_id: i64, now: DateTime<Utc>) -> Result<Option<Self>> {
        let stale_before = now - Duration::minutes(CLAIM_TIMEOUT_MINUTES);
        if !db.claim_queue_item(queue_item_id, now, stale_before)? {
            return Ok(None);
        }
        Ok(Some(Self { db, queue_item_id }))
    }
}

impl Drop for QueueClaim<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.db.release_queue_item(self.queue_item_id) {
            warn!(queue_item_id = self.queue_item_id, error = %e, "Failed to release queue claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::new_media;
    use crate::db::test_db;

    #[test]
    fn test_second_acquire_is_rejected() {
        let guards = ActionGuards::new();
        let first = guards.try_acquire(1).unwrap();
        assert!(guards.try_acquire(1).is_none());
        assert!(guards.try_acquire(2).is_some());
        assert_eq!(first.queue_item_id(), 1);
    }

    #[test]
    fn test_entry_released_on_drop() {
        let guards = ActionGuards::new();
        {
            let _guard = guards.try_acquire(1).unwrap();
            assert!(guards.is_active(1));
        }
        assert!(!guards.is_active(1));
        assert_eq!(guards.active_count(), 0);
        assert!(guards.try_acquire(1).is_some());
    }

    #[test]
    fn test_cancel_reaches_holder() {
        let guards = ActionGuards::new();
        assert!(!guards.cancel(1));

        let guard = guards.try_acquire(1).unwrap();
        assert!(!guard.is_cancelled());
        assert!(guards.cancel(1));
        assert!(guard.is_cancelled());
    }

    #[test]
    fn test_guards_across_threads() {
        let guards = Arc::new(ActionGuards::new());
        let held = guards.try_acquire(9).unwrap();

        let other = Arc::clone(&guards);
        let rejected = std::thread::spawn(move || other.try_acquire(9).is_none())
            .join()
            .unwrap();
        assert!(rejected);
        drop(held);
    }

    #[test]
    fn test_queue_claim_released_on_drop() {
        let db = test_db();
        let media = db.create_media(&new_media("p/a.jpg", "h1", None)).unwrap();
        let queue = db.create_queue_item(media, Utc::now(), None).unwrap();
        let now = Utc::now();

        let claim = QueueClaim::acquire(&db, queue, now).unwrap();
        assert!(claim.is_some());
        assert!(QueueClaim::acquire(&db, queue, now).unwrap().is_none());
        drop(claim);
        assert!(QueueClaim::acquire(&db, queue, now).unwrap().is_some());
    }
}
