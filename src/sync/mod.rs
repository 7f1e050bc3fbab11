pub mod engine;
pub mod result;

use anyhow::Result;
use chrono::Utc;
use tracing::error;

use crate::config::{Config, SyncSettings};
use crate::db::Database;
use crate::provider::{create_provider, SourceType};

pub use engine::SyncEngine;
pub use result::SyncResult;

/// A sync trigger from the CLI, the daemon or an operator.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub source_type: Option<SourceType>,
    pub source_root: Option<String>,
    pub triggered_by: String,
    pub tenant_id: Option<i64>,
}

/// Resolve where to read from, reconcile, and record the run.
///
/// An unconfigured provider fails before any row is written.
pub fn run_sync(db: &Database, config: &Config, request: &SyncRequest) -> Result<SyncResult> {
    let tenant = match request.tenant_id {
        Some(id) => db.get_chat_settings(id)?,
        None => None,
    };
    let settings = SyncSettings::resolve(
        request.source_type,
        request.source_root.as_deref(),
        tenant.as_ref(),
        config,
    );
    let provider = create_provider(&settings, config);
    let engine = SyncEngine::new(db, provider.as_ref(), request.tenant_id);
    engine.ensure_configured()?;

    let run_id = db.start_sync_run(
        settings.source_type.as_str(),
        &settings.source_root,
        &request.triggered_by,
        request.tenant_id,
        Utc::now(),
    )?;

    match engine.sync() {
        Ok(result) => {
            db.complete_sync_run(run_id, &result, Utc::now())?;
            Ok(result)
        }
        Err(e) => {
            error!(run_id, error = %e, "Media sync failed");
            db.fail_sync_run(run_id, Utc::now())?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::error::StorylineError;
    use std::fs::File;

    #[test]
    fn test_run_sync_records_audit_row() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.jpg")).unwrap();
        std::fs::create_dir(dir.path().join("memes")).unwrap();
        File::create(dir.path().join("memes/b.png")).unwrap();

        let db = test_db();
        let config = Config::default();
        let request = SyncRequest {
            source_type: Some(SourceType::Local),
            source_root: Some(dir.path().to_string_lossy().to_string()),
            triggered_by: "test".to_string(),
            tenant_id: None,
        };

        let result = run_sync(&db, &config, &request).unwrap();
        assert_eq!(result.new, 2);

        let runs = db.get_recent_sync_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].new_count, 2);
        assert_eq!(runs[0].triggered_by, "test");
    }

    #[test]
    fn test_run_sync_unconfigured_drive_writes_nothing() {
        let db = test_db();
        let config = Config::default();
        let request = SyncRequest {
            source_type: Some(SourceType::GoogleDrive),
            triggered_by: "test".to_string(),
            ..Default::default()
        };

        let err = run_sync(&db, &config, &request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorylineError>(),
            Some(StorylineError::ProviderNotConfigured { .. })
        ));
        assert!(db.get_recent_sync_runs(5).unwrap().is_empty());
    }
}
