//! TTL and permanent locks over media items.
//!
//! A locked item is never selected for scheduling. Posting creates a TTL
//! lock; rejecting creates a permanent one that only a manual unlock removes.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::db::{Database, LockReason, MediaLock};

/// Result of a lock request. Locking an already-locked item is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Created(i64),
    AlreadyLocked,
}

impl LockOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, LockOutcome::Created(_))
    }
}

pub struct LockEngine<'a> {
    db: &'a Database,
    default_ttl_days: u32,
}

impl<'a> LockEngine<'a> {
    pub fn new(db: &'a Database, default_ttl_days: u32) -> Self {
        Self {
            db,
            default_ttl_days,
        }
    }

    pub fn is_locked(&self, media_id: i64) -> Result<bool> {
        self.is_locked_at(media_id, Utc::now())
    }

    pub fn is_locked_at(&self, media_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.db.is_media_locked(media_id, now)
    }

    pub fn active_lock(&self, media_id: i64) -> Result<Option<MediaLock>> {
        self.db.get_active_lock(media_id, Utc::now())
    }

    /// Lock `media_id` unless it is already locked.
    ///
    /// `ttl_days = None` means permanent for `PermanentReject` and the default
    /// TTL for every other reason.
    pub fn create_lock(
        &self,
        media_id: i64,
        ttl_days: Option<u32>,
        reason: LockReason,
        created_by: Option<&str>,
    ) -> Result<LockOutcome> {
        self.create_lock_at(media_id, ttl_days, reason, created_by, Utc::now())
    }

    pub fn create_lock_at(
        &self,
        media_id: i64,
        ttl_days: Option<u32>,
        reason: LockReason,
        created_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        if self.is_locked_at(media_id, now)? {
            warn!(media_id, reason = reason.as_str(), "Media already locked, not stacking");
            return Ok(LockOutcome::AlreadyLocked);
        }

        let locked_until = match (ttl_days, reason) {
            (None, LockReason::PermanentReject) => None,
            (Some(days), _) => Some(now + Duration::days(days as i64)),
            (None, _) => Some(now + Duration::days(self.default_ttl_days as i64)),
        };

        let lock_id = self
            .db
            .create_lock_row(media_id, locked_until, reason, created_by)?;

        match locked_until {
            Some(until) => info!(media_id, lock_id, reason = reason.as_str(), %until, "Created lock"),
            None => info!(media_id, lock_id, reason = reason.as_str(), "Created permanent lock"),
        }
        Ok(LockOutcome::Created(lock_id))
    }

    pub fn create_permanent_lock(&self, media_id: i64, created_by: Option<&str>) -> Result<LockOutcome> {
        self.create_lock(media_id, None, LockReason::PermanentReject, created_by)
    }

    /// Remove expired TTL locks. Permanent locks are kept regardless of age.
    pub fn cleanup_expired(&self) -> Result<usize> {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self.db.delete_expired_locks(now)?;
        if deleted > 0 {
            info!(deleted, "Cleaned up expired locks");
        } else {
            debug!("No expired locks to clean up");
        }
        Ok(deleted)
    }

    pub fn remove_lock(&self, lock_id: i64) -> Result<bool> {
        let removed = self.db.delete_lock(lock_id)?;
        if removed {
            info!(lock_id, "Removed lock");
        }
        Ok(removed)
    }
}
