use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{hashing, mime_from_name, FileInfo, MediaProvider, SourceType};

/// Media stored in a directory tree. The first directory beneath the root
/// is the file's category.
pub struct LocalProvider {
    root: PathBuf,
    extensions: Vec<String>,
}

impl LocalProvider {
    pub fn new(root: impl AsRef<Path>, extensions: Vec<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| self.extensions.iter().any(|e| *e == ext))
            .unwrap_or(false)
    }

    fn folder_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let first = components.next()?;
        // A bare file name directly under the root has no folder.
        components.next()?;
        Some(first.as_os_str().to_string_lossy().to_string())
    }
}

impl MediaProvider for LocalProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Local
    }

    fn is_configured(&self) -> bool {
        self.root.is_dir()
    }

    fn configuration_problem(&self) -> Option<String> {
        if self.is_configured() {
            None
        } else {
            Some(format!("media directory {} does not exist", self.root.display()))
        }
    }

    fn list_files(&self) -> Result<Vec<FileInfo>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && self.accepts(path) {
                paths.push(path.to_path_buf());
            }
        }

        // Sort by path for consistent ordering
        paths.sort();

        let files = paths
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                FileInfo {
                    mime_type: mime_from_name(&name),
                    folder: self.folder_of(&path),
                    identifier: path.to_string_lossy().to_string(),
                    name,
                    size_bytes,
                    hash: None,
                }
            })
            .collect();

        Ok(files)
    }

    fn calculate_file_hash(&self, identifier: &str) -> Result<String> {
        hashing::sha256_file(Path::new(identifier))
            .with_context(|| format!("failed to hash {}", identifier))
    }

    fn download_file(&self, identifier: &str) -> Result<Vec<u8>> {
        std::fs::read(identifier).with_context(|| format!("failed to read {}", identifier))
    }
}
