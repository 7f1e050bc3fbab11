//! Automated story publishing through the Instagram Graph API.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::config::InstagramConfig;
use crate::db::MediaItem;
use crate::error::StorylineError;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

pub trait StoryPublisher: Send + Sync {
    /// Publish `media` as a story and return the platform's story id.
    fn publish_story(&self, media: &MediaItem) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GraphIdResponse {
    id: String,
}

/// Two-step Graph API publish: create a `STORIES` container from a public
/// URL, then publish the container.
pub struct GraphApiPublisher {
    access_token: String,
    account_id: String,
    media_base_url: String,
    agent: ureq::Agent,
}

impl GraphApiPublisher {
    pub fn from_config(config: &InstagramConfig) -> Result<Self, StorylineError> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| StorylineError::InvalidConfig(format!("instagram.{} is not set", name)))
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Ok(Self {
            access_token: required(&config.access_token, "access_token")?,
            account_id: required(&config.account_id, "account_id")?,
            media_base_url: required(&config.media_base_url, "media_base_url")?,
            agent,
        })
    }

    /// Public URL the Graph API fetches the media from.
    pub fn media_url(&self, media: &MediaItem) -> String {
        format!("{}/{}", self.media_base_url.trim_end_matches('/'), media.file_name)
    }

    fn container_fields(&self, media: &MediaItem) -> Vec<(&'static str, String)> {
        let is_video = media
            .mime_type
            .as_deref()
            .map(|m| m.starts_with("video/"))
            .unwrap_or(false);
        let url_field = if is_video { "video_url" } else { "image_url" };
        vec![
            (url_field, self.media_url(media)),
            ("media_type", "STORIES".to_string()),
            ("access_token", self.access_token.clone()),
        ]
    }

    fn post_form(&self, path: &str, fields: &[(&str, String)]) -> Result<GraphIdResponse> {
        let url = format!("{}/{}/{}", GRAPH_API_BASE, self.account_id, path);
        let form: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.agent
            .post(&url)
            .send_form(&form)
            .map_err(|e| anyhow!("Graph API {} request failed: {}", path, e))?
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Graph API {} response: {}", path, e))
    }
}

impl StoryPublisher for GraphApiPublisher {
    fn publish_story(&self, media: &MediaItem) -> Result<String> {
        let container = self.post_form("media", &self.container_fields(media))?;
        let published = self.post_form(
            "media_publish",
            &[
                ("creation_id", container.id),
                ("access_token", self.access_token.clone()),
            ],
        )?;
        info!(media_id = media.id, story_id = %published.id, "Published story");
        Ok(published.id)
    }
}
