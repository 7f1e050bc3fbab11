//! Domain failures that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`; these variants are recovered
//! with `downcast_ref` where the distinction matters (CLI messages, tests).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorylineError {
    /// The media provider is missing a folder, root or credentials.
    #[error("media provider '{provider}' is not configured: {reason}")]
    ProviderNotConfigured { provider: String, reason: String },

    #[error("unknown media source type: {0}")]
    UnknownSourceType(String),

    #[error("media item {0} not found")]
    MediaNotFound(i64),

    /// The queue row is gone, usually because another action already resolved it.
    #[error("queue item {0} not found or already resolved")]
    QueueItemNotFound(i64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
