//! Lock rows. A media item is locked while any of its rows is permanent
//! (`locked_until IS NULL`) or not yet expired.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_ts, opt_ts_column, Database};

/// Correlated sub-select shared by every query that needs "is this item locked".
/// Expects the outer alias `m` and a `:now` named parameter.
pub(crate) const ACTIVE_LOCK_CLAUSE: &str = r#"
    SELECT 1 FROM media_locks l
    WHERE l.media_item_id = m.id
      AND (l.locked_until IS NULL OR l.locked_until > :now)
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    RecentPost,
    ManualHold,
    Seasonal,
    PermanentReject,
}

impl LockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockReason::RecentPost => "recent_post",
            LockReason::ManualHold => "manual_hold",
            LockReason::Seasonal => "seasonal",
            LockReason::PermanentReject => "permanent_reject",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "recent_post" => Some(LockReason::RecentPost),
            "manual_hold" => Some(LockReason::ManualHold),
            "seasonal" => Some(LockReason::Seasonal),
            "permanent_reject" => Some(LockReason::PermanentReject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaLock {
    pub id: i64,
    pub media_item_id: i64,
    /// `None` is a permanent lock.
    pub locked_until: Option<DateTime<Utc>>,
    pub reason: LockReason,
    pub created_by: Option<String>,
}

impl MediaLock {
    pub fn is_permanent(&self) -> bool {
        self.locked_until.is_none()
    }
}

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaLock> {
    let reason: String = row.get(3)?;
    Ok(MediaLock {
        id: row.get(0)?,
        media_item_id: row.get(1)?,
        locked_until: opt_ts_column(row, 2)?,
        // Unknown reasons from older rows still lock; treat them as holds.
        reason: LockReason::from_str(&reason).unwrap_or(LockReason::ManualHold),
        created_by: row.get(4)?,
    })
}

impl Database {
    pub fn create_lock_row(
        &self,
        media_item_id: i64,
        locked_until: Option<DateTime<Utc>>,
        reason: LockReason,
        created_by: Option<&str>,
    ) -> Result<i64> {
        self.conn().execute(
            r#"
            INSERT INTO media_locks (media_item_id, locked_until, lock_reason, created_by)
            VALUES (?, ?, ?, ?)
            "#,
            rusqlite::params![
                media_item_id,
                locked_until.as_ref().map(format_ts),
                reason.as_str(),
                created_by,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// The lock that currently holds the item, permanent locks first.
    pub fn get_active_lock(&self, media_item_id: i64, now: DateTime<Utc>) -> Result<Option<MediaLock>> {
        let lock = self
            .conn()
            .query_row(
                r#"
                SELECT id, media_item_id, locked_until, lock_reason, created_by
                FROM media_locks
                WHERE media_item_id = ?1
                  AND (locked_until IS NULL OR locked_until > ?2)
                ORDER BY locked_until IS NOT NULL, locked_until DESC
                LIMIT 1
                "#,
                rusqlite::params![media_item_id, format_ts(&now)],
                row_to_lock,
            )
            .optional()?;
        Ok(lock)
    }

    pub fn is_media_locked(&self, media_item_id: i64, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.get_active_lock(media_item_id, now)?.is_some())
    }

    pub fn get_lock(&self, lock_id: i64) -> Result<Option<MediaLock>> {
        let lock = self
            .conn()
            .query_row(
                "SELECT id, media_item_id, locked_until, lock_reason, created_by FROM media_locks WHERE id = ?",
                [lock_id],
                row_to_lock,
            )
            .optional()?;
        Ok(lock)
    }

    pub fn get_active_locks(&self, now: DateTime<Utc>) -> Result<Vec<MediaLock>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, media_item_id, locked_until, lock_reason, created_by
            FROM media_locks
            WHERE locked_until IS NULL OR locked_until > ?
            ORDER BY media_item_id, id
            "#,
        )?;
        let locks = stmt
            .query_map([format_ts(&now)], row_to_lock)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(locks)
    }

    /// Delete expired TTL locks. Permanent locks are never touched.
    pub fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM media_locks WHERE locked_until IS NOT NULL AND locked_until <= ?",
            [format_ts(&now)],
        )?;
        Ok(deleted)
    }

    pub fn delete_lock(&self, lock_id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM media_locks WHERE id = ?", [lock_id])?;
        Ok(deleted > 0)
    }
}
