//! Posting queue rows. Only `pending` is long-lived; resolving an item
//! deletes its row after history has been written.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_ts, ts_column, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    /// Set in place by the stale-item sweep before the row is purged.
    Skipped,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "skipped" => Some(QueueStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: i64,
    pub media_item_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub status: QueueStatus,
    pub tenant_id: Option<i64>,
    pub telegram_message_id: Option<i64>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, media_item_id, scheduled_for, status, tenant_id, telegram_message_id
    FROM posting_queue
"#;

fn row_to_queue_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let status: String = row.get(3)?;
    Ok(QueueItem {
        id: row.get(0)?,
        media_item_id: row.get(1)?,
        scheduled_for: ts_column(row, 2)?,
        status: QueueStatus::from_str(&status).unwrap_or(QueueStatus::Pending),
        tenant_id: row.get(4)?,
        telegram_message_id: row.get(5)?,
    })
}

impl Database {
    pub fn create_queue_item(
        &self,
        media_item_id: i64,
        scheduled_for: DateTime<Utc>,
        tenant_id: Option<i64>,
    ) -> Result<i64> {
        self.conn().execute(
            r#"
            INSERT INTO posting_queue (media_item_id, scheduled_for, status, tenant_id)
            VALUES (?, ?, 'pending', ?)
            "#,
            rusqlite::params![media_item_id, format_ts(&scheduled_for), tenant_id],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        Ok(self
            .conn()
            .query_row(&sql, [id], row_to_queue_item)
            .optional()?)
    }

    /// Queue rows with `status` for one tenant, earliest first.
    pub fn get_queue(&self, status: QueueStatus, tenant_id: Option<i64>) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "{} WHERE status = ? AND tenant_id IS ? ORDER BY scheduled_for ASC, id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map(rusqlite::params![status.as_str(), tenant_id], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Queue rows with `status` across every tenant.
    pub fn get_queue_all_tenants(&self, status: QueueStatus) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "{} WHERE status = ? ORDER BY scheduled_for ASC, id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map([status.as_str()], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Pending rows across all tenants whose slot has arrived.
    pub fn get_due_pending(&self, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "{} WHERE status = 'pending' AND scheduled_for <= ? ORDER BY scheduled_for ASC, id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map([format_ts(&now)], row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn get_earliest_pending(&self, tenant_id: Option<i64>) -> Result<Option<QueueItem>> {
        let sql = format!(
            "{} WHERE status = 'pending' AND tenant_id IS ? ORDER BY scheduled_for ASC, id ASC LIMIT 1",
            SELECT_COLUMNS
        );
        Ok(self
            .conn()
            .query_row(&sql, [tenant_id], row_to_queue_item)
            .optional()?)
    }

    pub fn get_last_scheduled(&self, tenant_id: Option<i64>) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> = self.conn().query_row(
            "SELECT MAX(scheduled_for) FROM posting_queue WHERE status = 'pending' AND tenant_id IS ?",
            [tenant_id],
            |row| row.get(0),
        )?;
        Ok(latest.map(|raw| super::parse_ts(&raw)).transpose()?)
    }

    pub fn update_scheduled_time(&self, id: i64, scheduled_for: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE posting_queue SET scheduled_for = ? WHERE id = ?",
            rusqlite::params![format_ts(&scheduled_for), id],
        )?;
        Ok(())
    }

    pub fn update_queue_status(&self, id: i64, status: QueueStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE posting_queue SET status = ? WHERE id = ?",
            rusqlite::params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn set_telegram_message(&self, id: i64, message_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE posting_queue SET telegram_message_id = ? WHERE id = ?",
            rusqlite::params![message_id, id],
        )?;
        Ok(())
    }

    /// Mark a pending row as being published. Returns false when the row is
    /// gone or another process claimed it at or after `stale_before`.
    pub fn claim_queue_item(
        &self,
        id: i64,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed = self.conn().execute(
            r#"
            UPDATE posting_queue SET claimed_at = ?
            WHERE id = ? AND status = 'pending'
              AND (claimed_at IS NULL OR claimed_at < ?)
            "#,
            rusqlite::params![format_ts(&now), id, format_ts(&stale_before)],
        )?;
        Ok(claimed > 0)
    }

    pub fn release_queue_item(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE posting_queue SET claimed_at = NULL WHERE id = ?",
            [id],
        )?;
        Ok(())
    }

    /// Returns whether a row was removed; `false` means someone else resolved it first.
    pub fn delete_queue_item(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM posting_queue WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    pub fn count_pending(&self, tenant_id: Option<i64>) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM posting_queue WHERE status = 'pending' AND tenant_id IS ?",
            [tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
