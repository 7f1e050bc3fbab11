//! Media item records and the queries the sync and scheduling engines run.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{named_params, OptionalExtension};

use super::locks::ACTIVE_LOCK_CLAUSE;
use super::{format_ts, opt_ts_column, Database};
use crate::provider::SourceType;

/// A unique piece of content known to the system.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_hash: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub category: Option<String>,
    pub source_type: SourceType,
    pub source_identifier: String,
    pub is_active: bool,
    pub times_posted: i64,
    pub last_posted_at: Option<DateTime<Utc>>,
    pub tenant_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub file_path: String,
    pub file_name: String,
    pub file_hash: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub category: Option<String>,
    pub source_type: SourceType,
    pub source_identifier: String,
    pub tenant_id: Option<i64>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT m.id, m.file_path, m.file_name, m.file_hash, m.file_size, m.mime_type,
           m.category, m.source_type, m.source_identifier, m.is_active,
           m.times_posted, m.last_posted_at, m.tenant_id
    FROM media_items m
"#;

fn row_to_media_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaItem> {
    let source_type: String = row.get(7)?;
    let source_type = SourceType::from_str(&source_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown source type '{}'", source_type).into(),
        )
    })?;
    Ok(MediaItem {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_hash: row.get(3)?,
        file_size: row.get(4)?,
        mime_type: row.get(5)?,
        category: row.get(6)?,
        source_type,
        source_identifier: row.get(8)?,
        is_active: row.get(9)?,
        times_posted: row.get(10)?,
        last_posted_at: opt_ts_column(row, 11)?,
        tenant_id: row.get(12)?,
    })
}

impl Database {
    pub fn create_media(&self, item: &NewMediaItem) -> Result<i64> {
        self.conn().execute(
            r#"
            INSERT INTO media_items (
                file_path, file_name, file_hash, file_size, mime_type, category,
                source_type, source_identifier, is_active, tenant_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
            rusqlite::params![
                item.file_path,
                item.file_name,
                item.file_hash,
                item.file_size,
                item.mime_type,
                item.category,
                item.source_type.as_str(),
                item.source_identifier,
                item.tenant_id,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_media(&self, id: i64) -> Result<Option<MediaItem>> {
        let sql = format!("{} WHERE m.id = ?", SELECT_COLUMNS);
        Ok(self
            .conn()
            .query_row(&sql, [id], row_to_media_item)
            .optional()?)
    }

    /// Active items for one provider kind, in id order.
    pub fn get_active_by_source_type(
        &self,
        source_type: SourceType,
        tenant_id: Option<i64>,
    ) -> Result<Vec<MediaItem>> {
        let sql = format!(
            "{} WHERE m.is_active = 1 AND m.source_type = ? AND m.tenant_id IS ? ORDER BY m.id",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map(
                rusqlite::params![source_type.as_str(), tenant_id],
                row_to_media_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn get_by_source_identifier(
        &self,
        source_type: SourceType,
        identifier: &str,
        tenant_id: Option<i64>,
    ) -> Result<Option<MediaItem>> {
        let sql = format!(
            "{} WHERE m.source_type = ? AND m.source_identifier = ? AND m.tenant_id IS ?",
            SELECT_COLUMNS
        );
        Ok(self
            .conn()
            .query_row(
                &sql,
                rusqlite::params![source_type.as_str(), identifier, tenant_id],
                row_to_media_item,
            )
            .optional()?)
    }

    pub fn get_inactive_by_source_identifier(
        &self,
        source_type: SourceType,
        identifier: &str,
        tenant_id: Option<i64>,
    ) -> Result<Option<MediaItem>> {
        Ok(self
            .get_by_source_identifier(source_type, identifier, tenant_id)?
            .filter(|item| !item.is_active))
    }

    pub fn reactivate(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE media_items SET is_active = 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            [id],
        )?;
        Ok(())
    }

    pub fn deactivate(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE media_items SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            [id],
        )?;
        Ok(())
    }

    /// Rename or move in place. The content hash never changes here.
    pub fn update_source_info(
        &self,
        id: i64,
        file_name: &str,
        file_path: &str,
        source_identifier: &str,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE media_items
            SET file_name = ?, file_path = ?, source_identifier = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            rusqlite::params![file_name, file_path, source_identifier, id],
        )?;
        Ok(())
    }

    /// Free an inactive record's identifier so another record can take it.
    /// The record keeps its history but can no longer be matched or revived.
    pub fn retire_source_identifier(&self, id: i64) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE media_items
            SET source_identifier = 'retired:' || id || ':' || source_identifier,
                is_active = 0,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            [id],
        )?;
        Ok(())
    }

    pub fn record_media_posted(&self, id: i64, posted_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE media_items
            SET times_posted = times_posted + 1, last_posted_at = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            rusqlite::params![format_ts(&posted_at), id],
        )?;
        Ok(())
    }

    /// Active, unlocked media with no pending queue entry.
    ///
    /// `category = None` applies no category filter. Ranking is left to the
    /// caller; rows come back ordered by id for determinism.
    pub fn get_eligible_media(
        &self,
        tenant_id: Option<i64>,
        category: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MediaItem>> {
        let sql = format!(
            r#"
            {}
            WHERE m.is_active = 1
              AND m.tenant_id IS :tenant
              AND (:category IS NULL OR m.category = :category)
              AND NOT EXISTS (
                  SELECT 1 FROM posting_queue q
                  WHERE q.media_item_id = m.id AND q.status = 'pending'
              )
              AND NOT EXISTS ({})
            ORDER BY m.id
            "#,
            SELECT_COLUMNS, ACTIVE_LOCK_CLAUSE
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map(
                named_params! {
                    ":tenant": tenant_id,
                    ":category": category,
                    ":now": format_ts(&now),
                },
                row_to_media_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn list_media(&self, tenant_id: Option<i64>, active_only: bool, limit: usize) -> Result<Vec<MediaItem>> {
        let sql = format!(
            "{} WHERE m.tenant_id IS ? AND (? = 0 OR m.is_active = 1) ORDER BY m.id LIMIT ?",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map(
                rusqlite::params![tenant_id, active_only, limit as i64],
                row_to_media_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn count_active_media(&self, tenant_id: Option<i64>) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM media_items WHERE is_active = 1 AND tenant_id IS ?",
            [tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) fn new_media(identifier: &str, hash: &str, category: Option<&str>) -> NewMediaItem {
    NewMediaItem {
        file_path: identifier.to_string(),
        file_name: identifier.rsplit('/').next().unwrap_or(identifier).to_string(),
        file_hash: hash.to_string(),
        file_size: 10,
        mime_type: Some("image/jpeg".to_string()),
        category: category.map(str::to_string),
        source_type: SourceType::Local,
        source_identifier: identifier.to_string(),
        tenant_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_source_identifier_is_unique_per_tenant() {
        let db = test_db();
        db.create_media(&new_media("p/a.jpg", "h1", None)).unwrap();
        assert!(db.create_media(&new_media("p/a.jpg", "h1", None)).is_err());
    }

    #[test]
    fn test_deactivate_and_reactivate() {
        let db = test_db();
        let id = db.create_media(&new_media("p/a.jpg", "h1", None)).unwrap();

        db.deactivate(id).unwrap();
        assert!(db
            .get_active_by_source_type(SourceType::Local, None)
            .unwrap()
            .is_empty());
        let inactive = db
            .get_inactive_by_source_identifier(SourceType::Local, "p/a.jpg", None)
            .unwrap();
        assert_eq!(inactive.map(|m| m.id), Some(id));

        db.reactivate(id).unwrap();
        assert!(db.get_media(id).unwrap().unwrap().is_active);
        assert!(db
            .get_inactive_by_source_identifier(SourceType::Local, "p/a.jpg", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_eligible_media_filters_category() {
        let db = test_db();
        db.create_media(&new_media("p/a.jpg", "h1", Some("memes"))).unwrap();
        db.create_media(&new_media("p/b.jpg", "h2", Some("merch"))).unwrap();

        let now = Utc::now();
        assert_eq!(db.get_eligible_media(None, None, now).unwrap().len(), 2);
        let memes = db.get_eligible_media(None, Some("memes"), now).unwrap();
        assert_eq!(memes.len(), 1);
        assert_eq!(memes[0].source_identifier, "p/a.jpg");
    }

    #[test]
    fn test_record_media_posted_increments() {
        let db = test_db();
        let id = db.create_media(&new_media("p/a.jpg", "h1", None)).unwrap();
        db.record_media_posted(id, Utc::now()).unwrap();
        db.record_media_posted(id, Utc::now()).unwrap();
        let item = db.get_media(id).unwrap().unwrap();
        assert_eq!(item.times_posted, 2);
        assert!(item.last_posted_at.is_some());
    }
}
