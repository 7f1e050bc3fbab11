//! Media providers: uniform listing, hashing and download over the local
//! filesystem or a Google Drive folder.

pub mod google_drive;
pub mod hashing;
pub mod local;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{Config, SyncSettings};

pub use google_drive::GoogleDriveProvider;
pub use local::LocalProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Local,
    GoogleDrive,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Local => "local",
            SourceType::GoogleDrive => "google_drive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(SourceType::Local),
            "google_drive" => Some(SourceType::GoogleDrive),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file as reported by a provider listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    /// Provider-native unique id: the path for local files, the file id for Drive.
    pub identifier: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    /// Grouping folder beneath the root, used as the media category.
    pub folder: Option<String>,
    /// Content hash when the listing already carries one.
    pub hash: Option<String>,
}

pub trait MediaProvider: Send + Sync {
    fn source_type(&self) -> SourceType;

    fn is_configured(&self) -> bool;

    /// Human-readable reason `is_configured` is false.
    fn configuration_problem(&self) -> Option<String> {
        None
    }

    fn list_files(&self) -> Result<Vec<FileInfo>>;

    fn calculate_file_hash(&self, identifier: &str) -> Result<String>;

    fn download_file(&self, identifier: &str) -> Result<Vec<u8>>;
}

pub fn create_provider(settings: &SyncSettings, config: &Config) -> Box<dyn MediaProvider> {
    match settings.source_type {
        SourceType::Local => Box::new(LocalProvider::new(
            &settings.source_root,
            config.media.extensions.clone(),
        )),
        SourceType::GoogleDrive => Box::new(GoogleDriveProvider::new(
            &settings.source_root,
            config.google_drive.access_token.clone(),
            config.google_drive.timeout_secs,
        )),
    }
}

/// Best-effort MIME type from a file extension.
pub fn mime_from_name(name: &str) -> Option<String> {
    let ext = name.rsplit_once('.')?.1.to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_roundtrip() {
        for t in [SourceType::Local, SourceType::GoogleDrive] {
            assert_eq!(SourceType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(SourceType::from_str("dropbox"), None);
    }

    #[test]
    fn test_mime_from_name() {
        assert_eq!(mime_from_name("a.JPG").as_deref(), Some("image/jpeg"));
        assert_eq!(mime_from_name("clip.mov").as_deref(), Some("video/quicktime"));
        assert_eq!(mime_from_name("notes"), None);
    }
}
