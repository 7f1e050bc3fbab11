//! Google Drive v3 provider.
//!
//! Lists the configured folder and its direct subfolders; a subfolder's name
//! becomes the category of the files inside it. Drive reports an MD5 for
//! every binary file, so listings normally carry their own hash.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

use super::{hashing, FileInfo, MediaProvider, SourceType};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const PAGE_SIZE: &str = "1000";

const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,md5Checksum)";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    md5_checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct GoogleDriveProvider {
    folder_id: String,
    access_token: Option<String>,
    agent: ureq::Agent,
}

impl GoogleDriveProvider {
    pub fn new(folder_id: &str, access_token: Option<String>, timeout_secs: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(timeout_secs))
            .build();
        Self {
            folder_id: folder_id.trim().to_string(),
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            agent,
        }
    }

    fn auth_header(&self) -> Result<String> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| anyhow!("Google Drive access token not configured"))?;
        Ok(format!("Bearer {}", token))
    }

    fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("'{}' in parents and trashed = false", folder_id);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .agent
                .get(&format!("{}/files", DRIVE_API_BASE))
                .set("Authorization", &self.auth_header()?)
                .query("q", &query)
                .query("pageSize", PAGE_SIZE)
                .query("fields", LIST_FIELDS)
                .query("orderBy", "name");
            if let Some(ref token) = page_token {
                request = request.query("pageToken", token);
            }

            let response: FilesListResponse = request
                .call()
                .map_err(|e| anyhow!("Drive files.list failed: {}", e))?
                .into_json()
                .context("Failed to parse Drive files.list response")?;

            debug!(folder_id, count = response.files.len(), "Listed Drive page");
            files.extend(response.files);

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    fn to_file_info(file: DriveFile, folder: Option<&str>) -> FileInfo {
        FileInfo {
            size_bytes: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            hash: file.md5_checksum,
            mime_type: Some(file.mime_type),
            folder: folder.map(str::to_string),
            identifier: file.id,
            name: file.name,
        }
    }
}

fn is_media(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type.starts_with("video/")
}

impl MediaProvider for GoogleDriveProvider {
    fn source_type(&self) -> SourceType {
        SourceType::GoogleDrive
    }

    fn is_configured(&self) -> bool {
        self.configuration_problem().is_none()
    }

    fn configuration_problem(&self) -> Option<String> {
        if self.folder_id.is_empty() {
            Some("no Drive folder id configured".to_string())
        } else if self.access_token.is_none() {
            Some("no Drive access token configured".to_string())
        } else {
            None
        }
    }

    fn list_files(&self) -> Result<Vec<FileInfo>> {
        info!(folder_id = %self.folder_id, "Listing Google Drive folder");

        let mut files = Vec::new();
        for entry in self.list_children(&self.folder_id)? {
            if entry.mime_type == FOLDER_MIME_TYPE {
                let category = entry.name.clone();
                for child in self.list_children(&entry.id)? {
                    if is_media(&child.mime_type) {
                        files.push(Self::to_file_info(child, Some(&category)));
                    }
                }
            } else if is_media(&entry.mime_type) {
                files.push(Self::to_file_info(entry, None));
            }
        }

        info!("Listed {} media files from Google Drive", files.len());
        Ok(files)
    }

    fn calculate_file_hash(&self, identifier: &str) -> Result<String> {
        let response: serde_json::Value = self
            .agent
            .get(&format!("{}/files/{}", DRIVE_API_BASE, identifier))
            .set("Authorization", &self.auth_header()?)
            .query("fields", "md5Checksum")
            .call()
            .map_err(|e| anyhow!("Drive metadata request for {} failed: {}", identifier, e))?
            .into_json()
            .context("Failed to parse Drive metadata response")?;

        if let Some(md5) = response["md5Checksum"].as_str() {
            return Ok(md5.to_string());
        }

        // Google-native documents carry no checksum; hash the exported bytes.
        let bytes = self.download_file(identifier)?;
        Ok(hashing::md5_bytes(&bytes))
    }

    fn download_file(&self, identifier: &str) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&format!("{}/files/{}", DRIVE_API_BASE, identifier))
            .set("Authorization", &self.auth_header()?)
            .query("alt", "media")
            .call()
            .map_err(|e| anyhow!("Drive download of {} failed: {}", identifier, e))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read Drive download of {}", identifier))?;
        Ok(bytes)
    }
}
