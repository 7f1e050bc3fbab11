//! Append-only posting history.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{format_ts, opt_ts_column, ts_column, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Posted,
    Skipped,
    Rejected,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Posted => "posted",
            HistoryStatus::Skipped => "skipped",
            HistoryStatus::Rejected => "rejected",
            HistoryStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "posted" => Some(HistoryStatus::Posted),
            "skipped" => Some(HistoryStatus::Skipped),
            "rejected" => Some(HistoryStatus::Rejected),
            "failed" => Some(HistoryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingMethod {
    TelegramManual,
    InstagramApi,
}

impl PostingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingMethod::TelegramManual => "telegram_manual",
            PostingMethod::InstagramApi => "instagram_api",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "telegram_manual" => Some(PostingMethod::TelegramManual),
            "instagram_api" => Some(PostingMethod::InstagramApi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewHistoryItem<'a> {
    pub media_item_id: i64,
    pub queue_item_id: Option<i64>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub posted_at: DateTime<Utc>,
    pub status: HistoryStatus,
    pub success: bool,
    pub posted_by: Option<&'a str>,
    pub posting_method: PostingMethod,
    pub instagram_story_id: Option<&'a str>,
    pub tenant_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub id: i64,
    pub media_item_id: i64,
    pub queue_item_id: Option<i64>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub posted_at: DateTime<Utc>,
    pub status: HistoryStatus,
    pub success: bool,
    pub posted_by: Option<String>,
    pub posting_method: PostingMethod,
    pub instagram_story_id: Option<String>,
    pub tenant_id: Option<i64>,
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryItem> {
    let status: String = row.get(5)?;
    let method: String = row.get(8)?;
    Ok(HistoryItem {
        id: row.get(0)?,
        media_item_id: row.get(1)?,
        queue_item_id: row.get(2)?,
        scheduled_for: opt_ts_column(row, 3)?,
        posted_at: ts_column(row, 4)?,
        status: HistoryStatus::from_str(&status).unwrap_or(HistoryStatus::Failed),
        success: row.get(6)?,
        posted_by: row.get(7)?,
        posting_method: PostingMethod::from_str(&method).unwrap_or(PostingMethod::TelegramManual),
        instagram_story_id: row.get(9)?,
        tenant_id: row.get(10)?,
    })
}

impl Database {
    pub fn create_history(&self, item: &NewHistoryItem<'_>) -> Result<i64> {
        self.conn().execute(
            r#"
            INSERT INTO posting_history (
                media_item_id, queue_item_id, scheduled_for, posted_at, status, success,
                posted_by, posting_method, instagram_story_id, tenant_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                item.media_item_id,
                item.queue_item_id,
                item.scheduled_for.as_ref().map(format_ts),
                format_ts(&item.posted_at),
                item.status.as_str(),
                item.success,
                item.posted_by,
                item.posting_method.as_str(),
                item.instagram_story_id,
                item.tenant_id,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_history_for_media(&self, media_item_id: i64) -> Result<Vec<HistoryItem>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, media_item_id, queue_item_id, scheduled_for, posted_at, status, success,
                   posted_by, posting_method, instagram_story_id, tenant_id
            FROM posting_history
            WHERE media_item_id = ?
            ORDER BY posted_at ASC, id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([media_item_id], row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_recent_history(&self, limit: usize) -> Result<Vec<HistoryItem>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, media_item_id, queue_item_id, scheduled_for, posted_at, status, success,
                   posted_by, posting_method, instagram_story_id, tenant_id
            FROM posting_history
            ORDER BY posted_at DESC, id DESC
            LIMIT ?
            "#,
        )?;
        let rows = stmt
            .query_map([limit as i64], row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
