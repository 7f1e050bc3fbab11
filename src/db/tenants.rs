//! Per-chat settings. A tenant scopes media, queue and history rows and may
//! override the global source and cadence configuration.

use anyhow::Result;

use super::Database;
use crate::config::check_cadence;
use crate::provider::SourceType;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub id: i64,
    pub telegram_chat_id: i64,
    pub display_name: Option<String>,
    pub media_source_type: Option<SourceType>,
    pub media_source_root: Option<String>,
    pub posts_per_day: Option<u32>,
    pub posting_window_start: Option<u32>,
    pub posting_window_end: Option<u32>,
    pub is_paused: bool,
    pub instagram_enabled: bool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, telegram_chat_id, display_name, media_source_type, media_source_root,
           posts_per_day, posting_window_start, posting_window_end,
           is_paused, instagram_enabled
    FROM chat_settings
"#;

fn row_to_chat_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSettings> {
    let source_type: Option<String> = row.get(3)?;
    Ok(ChatSettings {
        id: row.get(0)?,
        telegram_chat_id: row.get(1)?,
        display_name: row.get(2)?,
        media_source_type: source_type.as_deref().and_then(SourceType::from_str),
        media_source_root: row.get(4)?,
        posts_per_day: row.get(5)?,
        posting_window_start: row.get(6)?,
        posting_window_end: row.get(7)?,
        is_paused: row.get(8)?,
        instagram_enabled: row.get(9)?,
    })
}

impl Database {
    /// Insert or update the settings row for a Telegram chat, returning its id.
    pub fn upsert_chat_settings(&self, settings: &ChatSettings) -> Result<i64> {
        check_cadence(
            &format!("chat {}", settings.telegram_chat_id),
            settings.posts_per_day,
            settings.posting_window_start,
            settings.posting_window_end,
        )?;
        self.conn().execute(
            r#"
            INSERT INTO chat_settings (
                telegram_chat_id, display_name, media_source_type, media_source_root,
                posts_per_day, posting_window_start, posting_window_end,
                is_paused, instagram_enabled
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(telegram_chat_id) DO UPDATE SET
                display_name = excluded.display_name,
                media_source_type = excluded.media_source_type,
                media_source_root = excluded.media_source_root,
                posts_per_day = excluded.posts_per_day,
                posting_window_start = excluded.posting_window_start,
                posting_window_end = excluded.posting_window_end,
                is_paused = excluded.is_paused,
                instagram_enabled = excluded.instagram_enabled
            "#,
            rusqlite::params![
                settings.telegram_chat_id,
                settings.display_name,
                settings.media_source_type.map(|t| t.as_str()),
                settings.media_source_root,
                settings.posts_per_day,
                settings.posting_window_start,
                settings.posting_window_end,
                settings.is_paused,
                settings.instagram_enabled,
            ],
        )?;
        let id = self.conn().query_row(
            "SELECT id FROM chat_settings WHERE telegram_chat_id = ?",
            [settings.telegram_chat_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_chat_settings(&self, id: i64) -> Result<Option<ChatSettings>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let result = self.conn().query_row(&sql, [id], row_to_chat_settings);
        match result {
            Ok(settings) => Ok(Some(settings)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_all_chat_settings(&self) -> Result<Vec<ChatSettings>> {
        let sql = format!("{} ORDER BY id", SELECT_COLUMNS);
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_chat_settings)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
