//! Operator CLI: sync media, build the schedule and resolve queue items.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use storyline::config::{ScheduleSettings, SyncSettings};
use storyline::db::{ChatSettings, LockReason, PostingMethod, QueueStatus};
use storyline::lock::{LockEngine, LockOutcome};
use storyline::posting::{
    ActionGuards, AutoPostOutcome, GraphApiPublisher, PostingWorkflow, TelegramNotifier,
};
use storyline::provider::{create_provider, SourceType};
use storyline::schedule::Scheduler;
use storyline::sync::{run_sync, SyncRequest};
use storyline::{logging, Config, Database, StorylineError};

/// Scheduled story posting with an operator approval loop.
#[derive(Parser, Debug)]
#[command(name = "storyline", version, about, long_about = None)]
struct Cli {
    /// Path to config file (overrides STORYLINE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the media library with its provider
    Sync {
        /// Media source: local or google_drive
        #[arg(long, value_parser = parse_source_type)]
        source: Option<SourceType>,
        /// Directory or Drive folder id
        #[arg(long)]
        root: Option<String>,
        #[command(flatten)]
        tenant: TenantArg,
    },
    /// Build or extend the posting queue
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Inspect or reorder the posting queue
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Mark a queue item as posted manually
    Post {
        queue_item_id: i64,
        #[arg(long)]
        by: Option<String>,
    },
    /// Drop a queue item; its media stays eligible
    Skip {
        queue_item_id: i64,
        #[arg(long)]
        by: Option<String>,
    },
    /// Drop a queue item and never post its media again
    Reject {
        queue_item_id: i64,
        #[arg(long)]
        by: Option<String>,
    },
    /// Publish a queue item through the Instagram Graph API
    AutoPost { queue_item_id: i64 },
    /// Manage media locks
    #[command(subcommand)]
    Locks(LocksCommand),
    /// Browse indexed media
    #[command(subcommand)]
    Media(MediaCommand),
    /// Manage per-chat settings
    #[command(subcommand)]
    Tenant(TenantCommand),
    /// Library, queue and lock counts
    Status {
        #[command(flatten)]
        tenant: TenantArg,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct TenantArg {
    /// Chat settings id to scope the command to
    #[arg(long)]
    tenant: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    /// Schedule the coming days, starting today
    Create {
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[command(flatten)]
        tenant: TenantArg,
    },
    /// Schedule more days after the last queued slot
    Extend {
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[command(flatten)]
        tenant: TenantArg,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List pending items
    List {
        #[command(flatten)]
        tenant: TenantArg,
    },
    /// Send the earliest item now and push the rest back one slot
    ForceNext {
        #[command(flatten)]
        tenant: TenantArg,
    },
}

#[derive(Subcommand, Debug)]
enum LocksCommand {
    /// List active locks
    List,
    /// Delete expired TTL locks
    Cleanup,
    /// Hold media out of the rotation for a number of days
    Hold {
        media_id: i64,
        #[arg(long)]
        days: u32,
        /// Mark the hold as seasonal instead of manual
        #[arg(long)]
        seasonal: bool,
        #[arg(long)]
        by: Option<String>,
    },
    /// Remove a lock by id
    Remove { lock_id: i64 },
}

#[derive(Subcommand, Debug)]
enum MediaCommand {
    /// List indexed media
    List {
        /// Include deactivated media
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[command(flatten)]
        tenant: TenantArg,
    },
    /// Download a media file from its provider
    Export { media_id: i64, dest: PathBuf },
}

#[derive(Subcommand, Debug)]
enum TenantCommand {
    /// Add or update the settings for a Telegram chat
    Add {
        #[arg(long, allow_hyphen_values = true)]
        chat_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = parse_source_type)]
        source: Option<SourceType>,
        #[arg(long)]
        root: Option<String>,
        #[arg(long)]
        posts_per_day: Option<u32>,
        #[arg(long)]
        window_start: Option<u32>,
        #[arg(long)]
        window_end: Option<u32>,
        #[arg(long)]
        paused: bool,
        #[arg(long)]
        instagram: bool,
    },
    /// List configured chats
    List,
}

fn parse_source_type(value: &str) -> Result<SourceType, String> {
    SourceType::from_str(&value.replace('-', "_"))
        .ok_or_else(|| StorylineError::UnknownSourceType(value.to_string()).to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    if let Err(e) = logging::init(None, "storyline") {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let db = Database::open(&config.database.sqlite_path)
        .with_context(|| format!("Failed to open database {:?}", config.database.sqlite_path))?;
    db.initialize()?;

    match cli.command {
        Commands::Sync { source, root, tenant } => {
            let request = SyncRequest {
                source_type: source,
                source_root: root,
                triggered_by: "cli".to_string(),
                tenant_id: tenant.tenant,
            };
            let result = run_sync(&db, &config, &request)?;
            println!("Sync complete: {}", result);
            for detail in &result.error_details {
                println!("  error: {}", detail);
            }
        }
        Commands::Schedule(command) => {
            let (days, tenant_id, extend) = match command {
                ScheduleCommand::Create { days, tenant } => (days, tenant.tenant, false),
                ScheduleCommand::Extend { days, tenant } => (days, tenant.tenant, true),
            };
            let tenant = load_tenant(&db, tenant_id)?;
            let settings = ScheduleSettings::resolve(tenant.as_ref(), &config);
            let scheduler = Scheduler::new(&db, settings, tenant_id);
            let result = if extend {
                scheduler.extend_schedule(days)
            } else {
                scheduler.create_schedule(days)
            };
            println!(
                "Scheduled {} of {} slots ({} skipped)",
                result.scheduled, result.total_slots, result.skipped
            );
            for (category, count) in &result.category_breakdown {
                println!("  {:<20} {}", category, count);
            }
            if let Some(error) = result.error {
                println!("Stopped early: {}", error);
            }
        }
        Commands::Queue(QueueCommand::List { tenant }) => {
            let items = db.get_queue(QueueStatus::Pending, tenant.tenant)?;
            if items.is_empty() {
                println!("Queue is empty");
            }
            for item in items {
                let name = db
                    .get_media(item.media_item_id)?
                    .map(|m| m.file_name)
                    .unwrap_or_else(|| "<missing>".to_string());
                let notified = if item.telegram_message_id.is_some() { "notified" } else { "" };
                println!(
                    "{:>6}  {}  {:<40} {}",
                    item.id,
                    item.scheduled_for.format("%Y-%m-%d %H:%M"),
                    name,
                    notified
                );
            }
        }
        Commands::Queue(QueueCommand::ForceNext { tenant }) => {
            let notifier = TelegramNotifier::from_config(&config.telegram)?;
            let guards = ActionGuards::new();
            let workflow = PostingWorkflow::new(&db, &config, &guards);
            let result = workflow.force_post_next(tenant.tenant, &notifier)?;
            if !result.success {
                println!("Nothing sent: {}", result.error.unwrap_or_default());
            } else {
                let name = result.media_item.map(|m| m.file_name).unwrap_or_default();
                println!(
                    "Sent queue item {} ({}), shifted {} item(s)",
                    result.queue_item_id.unwrap_or_default(),
                    name,
                    result.shifted_count
                );
                if !result.notified {
                    println!("Notification failed; the daemon will retry on its next sweep");
                }
            }
        }
        Commands::Post { queue_item_id, by } => {
            let guards = ActionGuards::new();
            let workflow = PostingWorkflow::new(&db, &config, &guards);
            report_resolution(
                queue_item_id,
                "posted",
                workflow.mark_posted(queue_item_id, by.as_deref(), PostingMethod::TelegramManual, None),
            )?;
        }
        Commands::Skip { queue_item_id, by } => {
            let guards = ActionGuards::new();
            let workflow = PostingWorkflow::new(&db, &config, &guards);
            report_resolution(queue_item_id, "skipped", workflow.skip(queue_item_id, by.as_deref()))?;
        }
        Commands::Reject { queue_item_id, by } => {
            let guards = ActionGuards::new();
            let workflow = PostingWorkflow::new(&db, &config, &guards);
            report_resolution(queue_item_id, "rejected", workflow.reject(queue_item_id, by.as_deref()))?;
        }
        Commands::AutoPost { queue_item_id } => {
            let publisher = GraphApiPublisher::from_config(&config.instagram)?;
            let guards = ActionGuards::new();
            let workflow = PostingWorkflow::new(&db, &config, &guards);
            match workflow.auto_post(queue_item_id, &publisher, Some("cli"))? {
                AutoPostOutcome::Posted { story_id, .. } => {
                    println!("Published queue item {} as story {}", queue_item_id, story_id)
                }
                AutoPostOutcome::AlreadyInProgress => {
                    println!("Queue item {} is already being posted", queue_item_id)
                }
                AutoPostOutcome::Cancelled => {
                    println!("Queue item {} was resolved while posting", queue_item_id)
                }
            }
        }
        Commands::Locks(command) => run_locks(&db, &config, command)?,
        Commands::Media(command) => run_media(&db, &config, command)?,
        Commands::Tenant(command) => run_tenant(&db, command)?,
        Commands::Status { tenant } => {
            let now = Utc::now();
            println!("Active media:  {}", db.count_active_media(tenant.tenant)?);
            println!("Pending queue: {}", db.count_pending(tenant.tenant)?);
            println!("Active locks:  {}", db.get_active_locks(now)?.len());
            if let Some(next) = db.get_earliest_pending(tenant.tenant)? {
                println!("Next slot:     {}", next.scheduled_for.format("%Y-%m-%d %H:%M UTC"));
            }
            if let Some(run) = db.get_recent_sync_runs(1)?.into_iter().next() {
                println!(
                    "Last sync:     {} ({}, {} new, {} errors)",
                    run.source_type, run.status, run.new_count, run.error_count
                );
            }
        }
    }

    Ok(())
}

fn load_tenant(db: &Database, tenant_id: Option<i64>) -> Result<Option<ChatSettings>> {
    match tenant_id {
        Some(id) => Ok(Some(
            db.get_chat_settings(id)?
                .with_context(|| format!("No chat settings with id {}", id))?,
        )),
        None => Ok(None),
    }
}

fn report_resolution(queue_item_id: i64, action: &str, result: Result<i64>) -> Result<()> {
    match result {
        Ok(history_id) => {
            println!("Queue item {} {} (history {})", queue_item_id, action, history_id);
            Ok(())
        }
        Err(e) => match e.downcast_ref::<StorylineError>() {
            Some(StorylineError::QueueItemNotFound(_)) => {
                println!("Queue item {} was already resolved", queue_item_id);
                Ok(())
            }
            _ => Err(e),
        },
    }
}

fn run_locks(db: &Database, config: &Config, command: LocksCommand) -> Result<()> {
    let engine = LockEngine::new(db, config.locks.ttl_days);
    match command {
        LocksCommand::List => {
            for lock in db.get_active_locks(Utc::now())? {
                let until = lock
                    .locked_until
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "permanent".to_string());
                println!(
                    "{:>6}  media {:>6}  {:<17} {:<16} {}",
                    lock.id,
                    lock.media_item_id,
                    lock.reason.as_str(),
                    until,
                    lock.created_by.unwrap_or_default()
                );
            }
        }
        LocksCommand::Cleanup => {
            let deleted = engine.cleanup_expired()?;
            println!("Removed {} expired lock(s)", deleted);
        }
        LocksCommand::Hold {
            media_id,
            days,
            seasonal,
            by,
        } => {
            if db.get_media(media_id)?.is_none() {
                return Err(StorylineError::MediaNotFound(media_id).into());
            }
            let reason = if seasonal {
                LockReason::Seasonal
            } else {
                LockReason::ManualHold
            };
            match engine.create_lock(media_id, Some(days), reason, by.as_deref())? {
                LockOutcome::Created(id) => println!("Created lock {} for {} day(s)", id, days),
                LockOutcome::AlreadyLocked => println!("Media {} is already locked", media_id),
            }
        }
        LocksCommand::Remove { lock_id } => {
            if engine.remove_lock(lock_id)? {
                println!("Removed lock {}", lock_id);
            } else {
                println!("No lock with id {}", lock_id);
            }
        }
    }
    Ok(())
}

fn run_media(db: &Database, config: &Config, command: MediaCommand) -> Result<()> {
    match command {
        MediaCommand::List { all, limit, tenant } => {
            for item in db.list_media(tenant.tenant, !all, limit)? {
                println!(
                    "{:>6}  {:<12} {:<14} posted {:>3}x  {}{}",
                    item.id,
                    item.source_type.as_str(),
                    item.category.as_deref().unwrap_or("-"),
                    item.times_posted,
                    item.file_name,
                    if item.is_active { "" } else { "  (inactive)" }
                );
            }
        }
        MediaCommand::Export { media_id, dest } => {
            let media = db
                .get_media(media_id)?
                .ok_or(StorylineError::MediaNotFound(media_id))?;
            let tenant = load_tenant(db, media.tenant_id)?;
            let settings = SyncSettings::resolve(Some(media.source_type), None, tenant.as_ref(), config);
            let provider = create_provider(&settings, config);

            let bytes = provider.download_file(&media.source_identifier)?;
            let target = if dest.is_dir() {
                dest.join(&media.file_name)
            } else {
                dest
            };
            std::fs::write(&target, &bytes)
                .with_context(|| format!("Failed to write {:?}", target))?;
            println!("Wrote {} bytes to {:?}", bytes.len(), target);
        }
    }
    Ok(())
}

fn run_tenant(db: &Database, command: TenantCommand) -> Result<()> {
    match command {
        TenantCommand::Add {
            chat_id,
            name,
            source,
            root,
            posts_per_day,
            window_start,
            window_end,
            paused,
            instagram,
        } => {
            let id = db.upsert_chat_settings(&ChatSettings {
                id: 0,
                telegram_chat_id: chat_id,
                display_name: name,
                media_source_type: source,
                media_source_root: root,
                posts_per_day,
                posting_window_start: window_start,
                posting_window_end: window_end,
                is_paused: paused,
                instagram_enabled: instagram,
            })?;
            println!("Saved chat settings {} for chat {}", id, chat_id);
        }
        TenantCommand::List => {
            for t in db.get_all_chat_settings()? {
                println!(
                    "{:>4}  chat {:<16} {:<20} {}{}",
                    t.id,
                    t.telegram_chat_id,
                    t.display_name.as_deref().unwrap_or("-"),
                    if t.is_paused { "paused " } else { "" },
                    if t.instagram_enabled { "instagram" } else { "" }
                );
            }
        }
    }
    Ok(())
}
