//! Reconciles a provider listing against the indexed media.
//!
//! The provider identifier decides whether a file is the same record; the
//! content hash catches renames and moves, so post counts and locks follow
//! the content instead of the file name.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::SyncResult;
use crate::db::{Database, MediaItem, NewMediaItem};
use crate::error::StorylineError;
use crate::provider::{FileInfo, MediaProvider, SourceType};

/// What happened to one listed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Created,
    Updated,
    Unchanged,
    Reactivated,
}

/// Active records for the provider kind, indexed for one run.
struct RunState<'l> {
    by_identifier: HashMap<String, MediaItem>,
    by_hash: HashMap<String, Vec<MediaItem>>,
    listed: HashSet<&'l str>,
    seen: HashSet<i64>,
}

impl<'l> RunState<'l> {
    fn new(active: &[MediaItem], listing: &'l [FileInfo]) -> Self {
        let mut by_identifier = HashMap::new();
        let mut by_hash: HashMap<String, Vec<MediaItem>> = HashMap::new();
        for item in active {
            by_identifier.insert(item.source_identifier.clone(), item.clone());
            by_hash
                .entry(item.file_hash.clone())
                .or_default()
                .push(item.clone());
        }
        Self {
            by_identifier,
            by_hash,
            listed: listing.iter().map(|f| f.identifier.as_str()).collect(),
            seen: HashSet::new(),
        }
    }

    /// A record with `hash` whose own identifier has vanished from the
    /// listing. Records still listed under their identifier are duplicates,
    /// not renames, and are left alone.
    fn rename_candidate(&self, hash: &str) -> Option<&MediaItem> {
        self.by_hash.get(hash)?.iter().find(|item| {
            !self.seen.contains(&item.id) && !self.listed.contains(item.source_identifier.as_str())
        })
    }
}

pub struct SyncEngine<'a> {
    db: &'a Database,
    provider: &'a dyn MediaProvider,
    tenant_id: Option<i64>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(db: &'a Database, provider: &'a dyn MediaProvider, tenant_id: Option<i64>) -> Self {
        Self {
            db,
            provider,
            tenant_id,
        }
    }

    fn source_type(&self) -> SourceType {
        self.provider.source_type()
    }

    pub fn ensure_configured(&self) -> Result<(), StorylineError> {
        if self.provider.is_configured() {
            return Ok(());
        }
        Err(StorylineError::ProviderNotConfigured {
            provider: self.source_type().to_string(),
            reason: self
                .provider
                .configuration_problem()
                .unwrap_or_else(|| "missing configuration".to_string()),
        })
    }

    pub fn sync(&self) -> Result<SyncResult> {
        self.ensure_configured()?;

        let source_type = self.source_type();
        let listing = self.provider.list_files()?;
        let active = self.db.get_active_by_source_type(source_type, self.tenant_id)?;
        info!(
            source_type = %source_type,
            listed = listing.len(),
            active = active.len(),
            "Starting media sync"
        );

        let mut state = RunState::new(&active, &listing);
        let mut result = SyncResult::default();

        for file in &listing {
            match self.process_file(file, &mut state) {
                Ok(FileOutcome::Created) => result.new += 1,
                Ok(FileOutcome::Updated) => result.updated += 1,
                Ok(FileOutcome::Unchanged) => result.unchanged += 1,
                Ok(FileOutcome::Reactivated) => result.reactivated += 1,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Failed to sync file");
                    result.record_error(&file.name, &e);
                }
            }
        }

        for item in &active {
            if !state.seen.contains(&item.id) {
                self.db.deactivate(item.id)?;
                debug!(media_id = item.id, identifier = %item.source_identifier, "Deactivated");
                result.deactivated += 1;
            }
        }

        info!(source_type = %source_type, "Media sync finished: {}", result);
        Ok(result)
    }

    fn process_file(&self, file: &FileInfo, state: &mut RunState<'_>) -> Result<FileOutcome> {
        let path = self.display_path(&file.identifier);

        if let Some(item) = state.by_identifier.get(&file.identifier) {
            state.seen.insert(item.id);
            if item.file_name == file.name {
                return Ok(FileOutcome::Unchanged);
            }
            self.db
                .update_source_info(item.id, &file.name, &path, &file.identifier)?;
            debug!(media_id = item.id, from = %item.file_name, to = %file.name, "Renamed in place");
            return Ok(FileOutcome::Updated);
        }

        let hash = match &file.hash {
            Some(hash) => hash.clone(),
            None => self.provider.calculate_file_hash(&file.identifier)?,
        };

        if let Some(item) = state.rename_candidate(&hash) {
            let id = item.id;
            let tx = self.db.conn().unchecked_transaction()?;
            // A deactivated record may still own the target identifier.
            if let Some(stale) = self.db.get_inactive_by_source_identifier(
                self.source_type(),
                &file.identifier,
                self.tenant_id,
            )? {
                self.db.retire_source_identifier(stale.id)?;
                debug!(media_id = stale.id, identifier = %file.identifier, "Retired stale identifier");
            }
            self.db
                .update_source_info(id, &file.name, &path, &file.identifier)?;
            tx.commit()?;
            debug!(
                media_id = id,
                from = %item.source_identifier,
                to = %file.identifier,
                "Detected rename by content hash"
            );
            state.seen.insert(id);
            return Ok(FileOutcome::Updated);
        }

        if let Some(item) = self.db.get_inactive_by_source_identifier(
            self.source_type(),
            &file.identifier,
            self.tenant_id,
        )? {
            self.db.reactivate(item.id)?;
            debug!(media_id = item.id, identifier = %file.identifier, "Reactivated");
            return Ok(FileOutcome::Reactivated);
        }

        let id = self.db.create_media(&NewMediaItem {
            file_path: path,
            file_name: file.name.clone(),
            file_hash: hash,
            file_size: file.size_bytes as i64,
            mime_type: file.mime_type.clone(),
            category: file.folder.clone(),
            source_type: self.source_type(),
            source_identifier: file.identifier.clone(),
            tenant_id: self.tenant_id,
        })?;
        debug!(media_id = id, identifier = %file.identifier, "Indexed new media");
        Ok(FileOutcome::Created)
    }

    /// Local paths are real; cloud paths are display-only.
    fn display_path(&self, identifier: &str) -> String {
        match self.source_type() {
            SourceType::Local => identifier.to_string(),
            other => format!("{}://{}", other, identifier),
        }
    }
}
