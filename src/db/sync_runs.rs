//! Audit rows for reconciliation runs.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{format_ts, Database};
use crate::sync::SyncResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunRecord {
    pub id: i64,
    pub source_type: String,
    pub source_root: String,
    pub triggered_by: String,
    pub status: String,
    pub new_count: i64,
    pub error_count: i64,
}

impl Database {
    pub fn start_sync_run(
        &self,
        source_type: &str,
        source_root: &str,
        triggered_by: &str,
        tenant_id: Option<i64>,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn().execute(
            r#"
            INSERT INTO sync_runs (source_type, source_root, triggered_by, tenant_id, started_at, status)
            VALUES (?, ?, ?, ?, ?, 'running')
            "#,
            rusqlite::params![source_type, source_root, triggered_by, tenant_id, format_ts(&started_at)],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn complete_sync_run(&self, id: i64, result: &SyncResult, completed_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE sync_runs SET
                completed_at = ?, status = 'completed',
                new_count = ?, updated_count = ?, deactivated_count = ?,
                reactivated_count = ?, unchanged_count = ?, error_count = ?
            WHERE id = ?
            "#,
            rusqlite::params![
                format_ts(&completed_at),
                result.new as i64,
                result.updated as i64,
                result.deactivated as i64,
                result.reactivated as i64,
                result.unchanged as i64,
                result.errors as i64,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn fail_sync_run(&self, id: i64, completed_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE sync_runs SET completed_at = ?, status = 'failed' WHERE id = ?",
            rusqlite::params![format_ts(&completed_at), id],
        )?;
        Ok(())
    }

    pub fn get_recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRunRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, source_type, source_root, triggered_by, status, new_count, error_count
            FROM sync_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        let runs = stmt
            .query_map([limit as i64], |row| {
                Ok(SyncRunRecord {
                    id: row.get(0)?,
                    source_type: row.get(1)?,
                    source_root: row.get(2)?,
                    triggered_by: row.get(3)?,
                    status: row.get(4)?,
                    new_count: row.get(5)?,
                    error_count: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}
