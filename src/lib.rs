//! Storyline: scheduled story posting with an operator approval loop.
//!
//! Media is indexed from a local directory or a Google Drive folder by the
//! [`sync`] engine, queued into future slots by the [`schedule`] engine and
//! resolved through the [`posting`] workflow. [`lock`] keeps recently posted
//! and rejected media out of the rotation.

pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod logging;
pub mod posting;
pub mod provider;
pub mod schedule;
pub mod sync;

pub use config::Config;
pub use db::Database;
pub use error::StorylineError;
