//! Storyline daemon for background posting work.
//!
//! This daemon runs two periodic sweeps against the shared SQLite database:
//! - Posting: announce due queue items over Telegram, auto-post for tenants
//!   with Instagram enabled, expire stale items and archive skipped ones
//! - Lock cleanup: delete expired TTL locks
//!
//! The posting sweep also applies Posted / Skip / Reject button presses from
//! Telegram before it looks at due items. Sweeps run on one blocking worker
//! thread; the async side only ticks the timers and waits for ctrl-c.
//!
//! The CLI and the daemon communicate only through the database.
//!
//! ## Usage
//!
//! ```bash
//! storyline-daemon              # Run in foreground
//! storyline-daemon --once       # Run both sweeps once and exit
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use storyline::lock::LockEngine;
use storyline::posting::{
    ActionGuards, GraphApiPublisher, Notifier, PostingWorkflow, StoryPublisher, TelegramNotifier,
};
use storyline::{logging, Config, Database};

/// Background posting sweeps for storyline.
#[derive(Parser, Debug)]
#[command(name = "storyline-daemon", version, about, long_about = None)]
struct DaemonArgs {
    /// Run both sweeps once and exit
    #[arg(short = '1', long)]
    once: bool,

    /// Path to config file (overrides STORYLINE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Outbound channels built from config; either may be absent.
struct Channels {
    notifier: Option<TelegramNotifier>,
    publisher: Option<GraphApiPublisher>,
}

impl Channels {
    fn from_config(config: &Config) -> Self {
        let notifier = match TelegramNotifier::from_config(&config.telegram) {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("Telegram notifications disabled: {}", e);
                None
            }
        };
        let publisher = if config.instagram.enabled {
            match GraphApiPublisher::from_config(&config.instagram) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Instagram auto-posting disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self { notifier, publisher }
    }

    fn notifier(&self) -> Option<&dyn Notifier> {
        self.notifier.as_ref().map(|n| n as &dyn Notifier)
    }

    fn publisher(&self) -> Option<&dyn StoryPublisher> {
        self.publisher.as_ref().map(|p| p as &dyn StoryPublisher)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();

    logging::init(None, "storyline-daemon")?;
    info!("Storyline daemon starting...");

    let config = match args.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;
    info!("Config loaded");

    let db = Database::open(&config.database.sqlite_path)?;
    db.initialize()?;
    info!("Database opened at {:?}", config.database.sqlite_path);

    let mut worker = Worker::new(db, config);

    if args.once {
        info!("Running in single-shot mode");
        tokio::task::spawn_blocking(move || {
            worker.run(Job::Posting)?;
            worker.run(Job::LockCleanup)
        })
        .await??;
    } else {
        run_daemon_loop(worker).await?;
    }

    info!("Storyline daemon stopped");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Posting,
    LockCleanup,
}

/// Owns the database and the HTTP clients. Every sweep blocks on SQLite or
/// ureq, so the worker lives on a blocking thread and the async side only
/// keeps time.
struct Worker {
    db: Database,
    config: Config,
    guards: ActionGuards,
    channels: Channels,
    /// Next Telegram update to fetch; earlier ones are confirmed.
    update_offset: i64,
}

impl Worker {
    fn new(db: Database, config: Config) -> Self {
        let channels = Channels::from_config(&config);
        Self {
            db,
            config,
            guards: ActionGuards::new(),
            channels,
            update_offset: 0,
        }
    }

    fn run(&mut self, job: Job) -> Result<()> {
        match job {
            Job::Posting => self.posting_sweep(),
            Job::LockCleanup => self.lock_sweep(),
        }
    }

    /// Run jobs until the sender is dropped.
    fn serve(mut self, mut jobs: mpsc::Receiver<Job>) {
        while let Some(job) = jobs.blocking_recv() {
            if let Err(e) = self.run(job) {
                error!(?job, "Sweep failed: {:#}", e);
            }
        }
        debug!("Worker drained");
    }

    fn posting_sweep(&mut self) -> Result<()> {
        let workflow = PostingWorkflow::new(&self.db, &self.config, &self.guards);

        // Operator presses go first so a resolved item is not auto-posted.
        if let Some(ref notifier) = self.channels.notifier {
            match workflow.process_callbacks(notifier, self.update_offset) {
                Ok(offset) => self.update_offset = offset,
                Err(e) => warn!("Polling Telegram buttons failed: {:#}", e),
            }
        }

        let now = Utc::now();
        workflow.process_due(now, self.channels.notifier(), self.channels.publisher())?;
        workflow.expire_stale(now)?;
        workflow.purge_skipped(now)?;
        Ok(())
    }

    fn lock_sweep(&self) -> Result<()> {
        let removed = LockEngine::new(&self.db, self.config.locks.ttl_days).cleanup_expired()?;
        if removed > 0 {
            info!(removed, "Removed expired locks");
        }
        Ok(())
    }
}

/// Hand a job to the worker. A tick that finds the previous one still
/// queued is dropped. Returns false once the worker has gone away.
fn dispatch(jobs: &mpsc::Sender<Job>, job: Job) -> bool {
    match jobs.try_send(job) {
        Ok(()) => true,
        Err(TrySendError::Full(job)) => {
            debug!(?job, "Worker busy, skipping tick");
            true
        }
        Err(TrySendError::Closed(_)) => {
            error!("Worker stopped unexpectedly");
            false
        }
    }
}

async fn run_daemon_loop(worker: Worker) -> Result<()> {
    info!(
        posting_secs = worker.config.posting.sweep_interval_secs,
        cleanup_secs = worker.config.locks.cleanup_interval_secs,
        "Running in daemon mode"
    );

    let mut posting_tick =
        tokio::time::interval(Duration::from_secs(worker.config.posting.sweep_interval_secs.max(1)));
    let mut cleanup_tick =
        tokio::time::interval(Duration::from_secs(worker.config.locks.cleanup_interval_secs.max(1)));
    posting_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    cleanup_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let (jobs, rx) = mpsc::channel(2);
    let handle = tokio::task::spawn_blocking(move || worker.serve(rx));

    loop {
        let running = tokio::select! {
            _ = posting_tick.tick() => dispatch(&jobs, Job::Posting),
            _ = cleanup_tick.tick() => dispatch(&jobs, Job::LockCleanup),
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                false
            }
        };
        if !running {
            break;
        }
    }

    // The worker finishes its current sweep before exiting.
    drop(jobs);
    handle.await.context("Worker thread panicked")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn worker() -> Worker {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        Worker::new(db, Config::default())
    }

    #[test]
    fn test_args_definition_is_valid() {
        DaemonArgs::command().debug_assert();
    }

    #[test]
    fn test_channels_absent_without_credentials() {
        let channels = Channels::from_config(&Config::default());
        assert!(channels.notifier().is_none());
        assert!(channels.publisher().is_none());
    }

    #[test]
    fn test_worker_can_leave_the_runtime_thread() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<Worker>();
    }

    #[test]
    fn test_sweeps_on_empty_database() {
        let mut worker = worker();
        worker.run(Job::Posting).unwrap();
        worker.run(Job::LockCleanup).unwrap();
        assert_eq!(worker.update_offset, 0);
    }

    #[test]
    fn test_busy_worker_drops_ticks() {
        let (jobs, mut rx) = mpsc::channel(1);
        assert!(dispatch(&jobs, Job::Posting));
        assert!(dispatch(&jobs, Job::LockCleanup));
        assert_eq!(rx.try_recv().unwrap(), Job::Posting);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!dispatch(&jobs, Job::Posting));
    }

    #[test]
    fn test_worker_drains_and_stops_when_sender_drops() {
        let (jobs, rx) = mpsc::channel(2);
        jobs.try_send(Job::Posting).unwrap();
        jobs.try_send(Job::LockCleanup).unwrap();
        drop(jobs);
        // Returns instead of waiting for more work.
        worker().serve(rx);
    }

    #[tokio::test]
    async fn test_worker_runs_off_the_async_task() {
        let (jobs, rx) = mpsc::channel(2);
        let handle = tokio::task::spawn_blocking(move || worker().serve(rx));
        assert!(dispatch(&jobs, Job::Posting));
        drop(jobs);
        handle.await.unwrap();
    }
}
