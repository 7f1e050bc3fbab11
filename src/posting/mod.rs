//! Queue resolution: the terminal actions on a pending item, force-post-next,
//! automated posting and the periodic sweeps the daemon runs.
//!
//! A resolved item leaves the queue. Its row is deleted and the outcome is
//! written to history in the same transaction, so a double click resolves
//! an item once and the second attempt sees `QueueItemNotFound`.

pub mod callbacks;
pub mod guard;
pub mod notifier;
pub mod publisher;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ScheduleSettings};
use crate::db::{
    ChatSettings, Database, HistoryStatus, LockReason, MediaItem, NewHistoryItem, PostingMethod,
    QueueItem, QueueStatus,
};
use crate::error::StorylineError;
use crate::lock::{LockEngine, LockOutcome};

pub use callbacks::{ActionReply, CallbackBatch, CallbackSource, OperatorAction, OperatorCallback};
pub use guard::{ActionGuard, ActionGuards, QueueClaim};
pub use notifier::{Notification, Notifier, TelegramNotifier};
pub use publisher::{GraphApiPublisher, StoryPublisher};

/// Actor recorded for actions taken by the daemon itself.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq)]
pub struct ForcePostResult {
    pub success: bool,
    pub queue_item_id: Option<i64>,
    pub media_item: Option<MediaItem>,
    pub shifted_count: usize,
    /// Whether the operator notification went out. When it did not, the
    /// item is still due and the next sweep announces it.
    pub notified: bool,
    pub error: Option<String>,
}

impl ForcePostResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            queue_item_id: None,
            media_item: None,
            shifted_count: 0,
            notified: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoPostOutcome {
    Posted { story_id: String, history_id: i64 },
    /// Another action holds this queue item.
    AlreadyInProgress,
    /// An operator resolved the item while the post was running.
    Cancelled,
}

/// Tally of one `process_due` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub notified: usize,
    pub auto_posted: usize,
    pub failed: usize,
    pub paused: usize,
}

pub struct PostingWorkflow<'a> {
    db: &'a Database,
    config: &'a Config,
    guards: &'a ActionGuards,
}

impl<'a> PostingWorkflow<'a> {
    pub fn new(db: &'a Database, config: &'a Config, guards: &'a ActionGuards) -> Self {
        Self { db, config, guards }
    }

    fn locks(&self) -> LockEngine<'a> {
        LockEngine::new(self.db, self.config.locks.ttl_days)
    }

    fn tenant(&self, tenant_id: Option<i64>) -> Result<Option<ChatSettings>> {
        match tenant_id {
            Some(id) => self.db.get_chat_settings(id),
            None => Ok(None),
        }
    }

    pub fn mark_posted(
        &self,
        queue_item_id: i64,
        actor: Option<&str>,
        method: PostingMethod,
        story_id: Option<&str>,
    ) -> Result<i64> {
        self.resolve(queue_item_id, HistoryStatus::Posted, actor, method, story_id, Utc::now())
    }

    /// Drop the item from the queue without locking; it stays eligible.
    pub fn skip(&self, queue_item_id: i64, actor: Option<&str>) -> Result<i64> {
        self.resolve(
            queue_item_id,
            HistoryStatus::Skipped,
            actor,
            PostingMethod::TelegramManual,
            None,
            Utc::now(),
        )
    }

    /// Drop the item and lock its media permanently.
    pub fn reject(&self, queue_item_id: i64, actor: Option<&str>) -> Result<i64> {
        self.resolve(
            queue_item_id,
            HistoryStatus::Rejected,
            actor,
            PostingMethod::TelegramManual,
            None,
            Utc::now(),
        )
    }

    /// Delete the queue row, write history and apply the lock for `status`,
    /// all in one transaction. Any running automated post is cancelled first.
    fn resolve(
        &self,
        queue_item_id: i64,
        status: HistoryStatus,
        actor: Option<&str>,
        method: PostingMethod,
        story_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        if self.guards.cancel(queue_item_id) {
            debug!(queue_item_id, "Cancelled in-flight automated post");
        }

        let item = self
            .db
            .get_queue_item(queue_item_id)?
            .ok_or(StorylineError::QueueItemNotFound(queue_item_id))?;

        let tx = self.db.conn().unchecked_transaction()?;
        if !self.db.delete_queue_item(queue_item_id)? {
            return Err(StorylineError::QueueItemNotFound(queue_item_id).into());
        }

        let history_id = self.db.create_history(&NewHistoryItem {
            media_item_id: item.media_item_id,
            queue_item_id: Some(item.id),
            scheduled_for: Some(item.scheduled_for),
            posted_at: now,
            status,
            success: status == HistoryStatus::Posted,
            posted_by: actor,
            posting_method: method,
            instagram_story_id: story_id,
            tenant_id: item.tenant_id,
        })?;

        let lock = match status {
            HistoryStatus::Posted => {
                self.db.record_media_posted(item.media_item_id, now)?;
                let ttl = self.config.locks.ttl_days;
                Some(self.locks().create_lock_at(
                    item.media_item_id,
                    Some(ttl),
                    LockReason::RecentPost,
                    actor,
                    now,
                )?)
            }
            HistoryStatus::Rejected => Some(self.locks().create_lock_at(
                item.media_item_id,
                None,
                LockReason::PermanentReject,
                actor,
                now,
            )?),
            HistoryStatus::Skipped | HistoryStatus::Failed => None,
        };
        tx.commit()?;

        if lock == Some(LockOutcome::AlreadyLocked) {
            debug!(media_id = item.media_item_id, "Media was already locked");
        }
        info!(
            queue_item_id,
            media_id = item.media_item_id,
            status = status.as_str(),
            actor = actor.unwrap_or("-"),
            "Resolved queue item"
        );
        Ok(history_id)
    }

    /// Move the earliest pending item to now and push every other pending
    /// item back by one slot interval, then notify the operator.
    pub fn force_post_next(
        &self,
        tenant_id: Option<i64>,
        notifier: &dyn Notifier,
    ) -> Result<ForcePostResult> {
        self.force_post_next_at(tenant_id, notifier, Utc::now())
    }

    pub fn force_post_next_at(
        &self,
        tenant_id: Option<i64>,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<ForcePostResult> {
        let tenant = self.tenant(tenant_id)?;
        let interval = ScheduleSettings::resolve(tenant.as_ref(), self.config).slot_interval();

        // Select and shift against the same snapshot.
        let tx = self.db.conn().unchecked_transaction()?;
        let Some(next) = self.db.get_earliest_pending(tenant_id)? else {
            return Ok(ForcePostResult::failure("No pending items in queue"));
        };
        let Some(media) = self.db.get_media(next.media_item_id)? else {
            return Ok(ForcePostResult::failure(
                StorylineError::MediaNotFound(next.media_item_id).to_string(),
            ));
        };

        let mut shifted_count = 0;
        for item in self.db.get_queue(QueueStatus::Pending, tenant_id)? {
            if item.id == next.id {
                continue;
            }
            self.db
                .update_scheduled_time(item.id, item.scheduled_for + interval)?;
            shifted_count += 1;
        }
        self.db.update_scheduled_time(next.id, now)?;
        tx.commit()?;

        info!(
            queue_item_id = next.id,
            media_id = media.id,
            shifted_count,
            interval_minutes = interval.num_minutes(),
            "Force-posting next item"
        );

        let chat_id = tenant.as_ref().map(|t| t.telegram_chat_id);
        let sent = QueueItem {
            scheduled_for: now,
            ..next.clone()
        };
        let notified = match notifier.notify(&Notification::new(&sent, &media, chat_id, true)) {
            Ok(message_id) => {
                self.db.set_telegram_message(next.id, message_id)?;
                true
            }
            Err(e) => {
                warn!(queue_item_id = next.id, error = %e, "Force-post notification failed");
                false
            }
        };

        Ok(ForcePostResult {
            success: true,
            queue_item_id: Some(next.id),
            media_item: Some(media),
            shifted_count,
            notified,
            error: None,
        })
    }

    /// Publish one queue item through the Graph API and resolve it as posted.
    ///
    /// The item is claimed in memory and on its queue row, so neither this
    /// process nor another one can publish it twice. A publish failure leaves
    /// the item pending and returns the error.
    pub fn auto_post(
        &self,
        queue_item_id: i64,
        publisher: &dyn StoryPublisher,
        actor: Option<&str>,
    ) -> Result<AutoPostOutcome> {
        let Some(guard) = self.guards.try_acquire(queue_item_id) else {
            info!(queue_item_id, "Automated post already in progress");
            return Ok(AutoPostOutcome::AlreadyInProgress);
        };

        let item = self
            .db
            .get_queue_item(queue_item_id)?
            .ok_or(StorylineError::QueueItemNotFound(queue_item_id))?;
        let Some(_claim) = QueueClaim::acquire(self.db, queue_item_id, Utc::now())? else {
            info!(queue_item_id, "Queue item claimed by another process");
            return Ok(AutoPostOutcome::AlreadyInProgress);
        };
        if guard.is_cancelled() {
            return Ok(AutoPostOutcome::Cancelled);
        }
        let media = self
            .db
            .get_media(item.media_item_id)?
            .ok_or(StorylineError::MediaNotFound(item.media_item_id))?;

        let story_id = publisher.publish_story(&media)?;

        // An operator in another process resolves by deleting the row.
        if guard.is_cancelled() || self.db.get_queue_item(queue_item_id)?.is_none() {
            warn!(queue_item_id, story_id = %story_id, "Queue item resolved while publishing");
            return Ok(AutoPostOutcome::Cancelled);
        }

        let history_id = self.resolve(
            queue_item_id,
            HistoryStatus::Posted,
            actor,
            PostingMethod::InstagramApi,
            Some(&story_id),
            Utc::now(),
        )?;
        drop(guard);
        Ok(AutoPostOutcome::Posted {
            story_id,
            history_id,
        })
    }

    /// Announce due items that have no bound message and auto-post those
    /// whose tenant has Instagram enabled. Paused tenants are left alone.
    pub fn process_due(
        &self,
        now: DateTime<Utc>,
        notifier: Option<&dyn Notifier>,
        publisher: Option<&dyn StoryPublisher>,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for item in self.db.get_due_pending(now)? {
            let tenant = self.tenant(item.tenant_id)?;
            if tenant.as_ref().map(|t| t.is_paused).unwrap_or(false) {
                report.paused += 1;
                continue;
            }
            let instagram_enabled = match tenant {
                Some(ref t) => t.instagram_enabled,
                None => self.config.instagram.enabled,
            };

            if let (true, Some(publisher)) = (instagram_enabled, publisher) {
                match self.auto_post(item.id, publisher, Some(SYSTEM_ACTOR)) {
                    Ok(AutoPostOutcome::Posted { .. }) => report.auto_posted += 1,
                    Ok(outcome) => debug!(queue_item_id = item.id, ?outcome, "Auto-post not applied"),
                    Err(e) => {
                        warn!(queue_item_id = item.id, error = %e, "Auto-post failed, item stays pending");
                        report.failed += 1;
                    }
                }
                continue;
            }

            if item.telegram_message_id.is_some() {
                continue;
            }
            let Some(notifier) = notifier else {
                continue;
            };
            let Some(media) = self.db.get_media(item.media_item_id)? else {
                warn!(queue_item_id = item.id, media_id = item.media_item_id, "Queued media is missing");
                report.failed += 1;
                continue;
            };
            let chat_id = tenant.as_ref().map(|t| t.telegram_chat_id);
            match notifier.notify(&Notification::new(&item, &media, chat_id, false)) {
                Ok(message_id) => {
                    self.db.set_telegram_message(item.id, message_id)?;
                    report.notified += 1;
                }
                Err(e) => {
                    warn!(queue_item_id = item.id, error = %e, "Notification failed");
                    report.failed += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(?report, "Posting sweep finished");
        }
        Ok(report)
    }

    /// Apply one button press from `chat_id`. Only the chat the item was
    /// announced to may act on it, and Reject needs a second press.
    pub fn handle_action(
        &self,
        action: OperatorAction,
        chat_id: Option<i64>,
        actor: Option<&str>,
    ) -> Result<ActionReply> {
        let queue_item_id = match action {
            OperatorAction::Posted(id)
            | OperatorAction::Skip(id)
            | OperatorAction::Reject(id)
            | OperatorAction::ConfirmReject(id)
            | OperatorAction::Keep(id) => id,
        };
        let Some(item) = self.db.get_queue_item(queue_item_id)? else {
            return Ok(ActionReply::AlreadyResolved);
        };
        let owner_chat = match item.tenant_id {
            Some(id) => self.db.get_chat_settings(id)?.map(|t| t.telegram_chat_id),
            None => self.config.telegram.default_chat_id,
        };
        if chat_id.is_none() || chat_id != owner_chat {
            warn!(queue_item_id, ?chat_id, "Ignoring button press from another chat");
            return Ok(ActionReply::Ignored);
        }

        let resolved = match action {
            OperatorAction::Reject(id) => return Ok(ActionReply::ConfirmReject(id)),
            OperatorAction::Keep(id) => return Ok(ActionReply::Restore(id)),
            OperatorAction::Posted(id) => self
                .mark_posted(id, actor, PostingMethod::TelegramManual, None)
                .map(|_| ActionReply::Resolved("Marked as posted")),
            OperatorAction::Skip(id) => self.skip(id, actor).map(|_| ActionReply::Resolved("Skipped")),
            OperatorAction::ConfirmReject(id) => self
                .reject(id, actor)
                .map(|_| ActionReply::Resolved("Rejected, media locked permanently")),
        };
        match resolved {
            Err(e) if matches!(
                e.downcast_ref::<StorylineError>(),
                Some(StorylineError::QueueItemNotFound(_))
            ) =>
            {
                Ok(ActionReply::AlreadyResolved)
            }
            other => other,
        }
    }

    /// Pull pending button presses, apply them and answer each one.
    /// Returns the offset for the next poll.
    pub fn process_callbacks(&self, source: &dyn CallbackSource, offset: i64) -> Result<i64> {
        let batch = source.poll_callbacks(offset)?;
        for callback in &batch.callbacks {
            let reply = match callback.data.as_deref().and_then(OperatorAction::parse) {
                Some(action) => {
                    match self.handle_action(action, callback.chat_id, callback.actor.as_deref()) {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!(?action, error = %e, "Button press failed");
                            continue;
                        }
                    }
                }
                None => {
                    debug!(data = ?callback.data, "Unrecognised button press");
                    ActionReply::Ignored
                }
            };
            if let Err(e) = source.reply(callback, &reply) {
                warn!(error = %e, "Failed to answer button press");
            }
        }
        Ok(batch.next_offset.unwrap_or(offset))
    }

    /// Mark pending items overdue by more than `stale_after_hours` as skipped.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::hours(self.config.posting.stale_after_hours);
        let mut expired = 0;
        for item in self.db.get_queue_all_tenants(QueueStatus::Pending)? {
            if item.scheduled_for < cutoff {
                self.db.update_queue_status(item.id, QueueStatus::Skipped)?;
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Expired stale queue items");
        }
        Ok(expired)
    }

    /// Move skipped queue rows into history.
    pub fn purge_skipped(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut purged = 0;
        for item in self.db.get_queue_all_tenants(QueueStatus::Skipped)? {
            let tx = self.db.conn().unchecked_transaction()?;
            if !self.db.delete_queue_item(item.id)? {
                continue;
            }
            self.db.create_history(&NewHistoryItem {
                media_item_id: item.media_item_id,
                queue_item_id: Some(item.id),
                scheduled_for: Some(item.scheduled_for),
                posted_at: now,
                status: HistoryStatus::Skipped,
                success: false,
                posted_by: Some(SYSTEM_ACTOR),
                posting_method: PostingMethod::TelegramManual,
                instagram_story_id: None,
                tenant_id: item.tenant_id,
            })?;
            tx.commit()?;
            purged += 1;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::new_media;
    use crate::db::test_db;
    use anyhow::bail;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, Option<i64>, bool)>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, n: &Notification<'_>) -> Result<i64> {
            if self.fail {
                bail!("telegram down");
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((n.queue_item_id, n.chat_id, n.forced));
            Ok(1000 + sent.len() as i64)
        }
    }

    struct FakePublisher {
        fail: bool,
    }

    impl StoryPublisher for FakePublisher {
        fn publish_story(&self, media: &MediaItem) -> Result<String> {
            if self.fail {
                bail!("graph api error");
            }
            Ok(format!("story-{}", media.id))
        }
    }

    /// Simulates an operator resolving the item while the publish call runs.
    struct CancellingPublisher<'g> {
        guards: &'g ActionGuards,
        queue_item_id: i64,
    }

    impl StoryPublisher for CancellingPublisher<'_> {
        fn publish_story(&self, _media: &MediaItem) -> Result<String> {
            self.guards.cancel(self.queue_item_id);
            Ok("story-late".to_string())
        }
    }

    /// Button presses queued up as if they came from the bot.
    #[derive(Default)]
    struct FakeCallbacks {
        pending: Mutex<Vec<OperatorCallback>>,
        next_offset: Option<i64>,
        replies: Mutex<Vec<(String, ActionReply)>>,
    }

    impl FakeCallbacks {
        fn press(&self, id: &str, chat_id: i64, data: &str) {
            self.pending.lock().unwrap().push(OperatorCallback {
                callback_id: id.to_string(),
                chat_id: Some(chat_id),
                message_id: Some(900),
                actor: Some("alice".to_string()),
                data: Some(data.to_string()),
            });
        }
    }

    impl CallbackSource for FakeCallbacks {
        fn poll_callbacks(&self, _offset: i64) -> Result<CallbackBatch> {
            Ok(CallbackBatch {
                next_offset: self.next_offset,
                callbacks: std::mem::take(&mut *self.pending.lock().unwrap()),
            })
        }

        fn reply(&self, callback: &OperatorCallback, reply: &ActionReply) -> Result<()> {
            self.replies
                .lock()
                .unwrap()
                .push((callback.callback_id.clone(), reply.clone()));
            Ok(())
        }
    }

    fn operator_config() -> Config {
        let mut config = Config::default();
        config.telegram.default_chat_id = Some(-1);
        config
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn queued(db: &Database, name: &str, at: DateTime<Utc>) -> (i64, i64) {
        let media = db
            .create_media(&new_media(&format!("p/{}.jpg", name), name, None))
            .unwrap();
        let queue = db.create_queue_item(media, at, None).unwrap();
        (media, queue)
    }

    #[test]
    fn test_mark_posted_locks_and_counts() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        workflow
            .mark_posted(queue, Some("alice"), PostingMethod::TelegramManual, None)
            .unwrap();

        assert!(db.get_queue_item(queue).unwrap().is_none());
        let item = db.get_media(media).unwrap().unwrap();
        assert_eq!(item.times_posted, 1);
        let lock = db.get_active_lock(media, Utc::now()).unwrap().unwrap();
        assert_eq!(lock.reason, LockReason::RecentPost);
        assert!(!lock.is_permanent());

        let history = db.get_history_for_media(media).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HistoryStatus::Posted);
        assert!(history[0].success);
        assert_eq!(history[0].posted_by.as_deref(), Some("alice"));
        assert_eq!(history[0].scheduled_for, Some(t0()));
    }

    #[test]
    fn test_skip_leaves_media_eligible() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        workflow.skip(queue, None).unwrap();

        assert!(!db.is_media_locked(media, Utc::now()).unwrap());
        let history = db.get_history_for_media(media).unwrap();
        assert_eq!(history[0].status, HistoryStatus::Skipped);
        assert!(!history[0].success);
        assert_eq!(db.get_eligible_media(None, None, Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_reject_locks_permanently() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        workflow.reject(queue, Some("bob")).unwrap();

        let lock = db.get_active_lock(media, Utc::now()).unwrap().unwrap();
        assert!(lock.is_permanent());
        assert_eq!(lock.reason, LockReason::PermanentReject);
        assert_eq!(db.get_history_for_media(media).unwrap()[0].status, HistoryStatus::Rejected);
    }

    #[test]
    fn test_double_resolution_is_rejected() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        workflow
            .mark_posted(queue, None, PostingMethod::TelegramManual, None)
            .unwrap();
        let err = workflow
            .mark_posted(queue, None, PostingMethod::TelegramManual, None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorylineError>(),
            Some(StorylineError::QueueItemNotFound(_))
        ));
        assert_eq!(db.get_media(media).unwrap().unwrap().times_posted, 1);
        assert_eq!(db.get_history_for_media(media).unwrap().len(), 1);
    }

    #[test]
    fn test_force_post_next_rebases_queue() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (_, q1) = queued(&db, "a", t0());
        let (_, q2) = queued(&db, "b", t0() + Duration::hours(4));
        let (_, q3) = queued(&db, "c", t0() + Duration::hours(8));
        let notifier = RecordingNotifier::default();
        let now = t0() - Duration::hours(2);

        let result = workflow.force_post_next_at(None, &notifier, now).unwrap();
        assert!(result.success);
        assert!(result.notified);
        assert_eq!(result.queue_item_id, Some(q1));
        assert_eq!(result.shifted_count, 2);

        let interval = ScheduleSettings::resolve(None, &config).slot_interval();
        let first = db.get_queue_item(q1).unwrap().unwrap();
        let second = db.get_queue_item(q2).unwrap().unwrap();
        let third = db.get_queue_item(q3).unwrap().unwrap();
        assert_eq!(first.scheduled_for, now);
        assert_eq!(first.telegram_message_id, Some(1001));
        assert_eq!(second.scheduled_for, t0() + Duration::hours(4) + interval);
        assert_eq!(third.scheduled_for, t0() + Duration::hours(8) + interval);
        assert!(second.scheduled_for < third.scheduled_for);

        assert_eq!(*notifier.sent.lock().unwrap(), vec![(q1, None, true)]);
    }

    #[test]
    fn test_force_post_next_on_empty_queue() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);

        let result = workflow
            .force_post_next(None, &RecordingNotifier::default())
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_force_post_notification_failure_keeps_item_due() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (_, q1) = queued(&db, "a", t0());
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };

        let result = workflow.force_post_next_at(None, &notifier, t0() - Duration::hours(1)).unwrap();
        assert!(result.success);
        assert!(!result.notified);
        let item = db.get_queue_item(q1).unwrap().unwrap();
        assert!(item.telegram_message_id.is_none());
    }

    #[test]
    fn test_auto_post_publishes_and_resolves() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        let outcome = workflow
            .auto_post(queue, &FakePublisher { fail: false }, Some(SYSTEM_ACTOR))
            .unwrap();
        let story_id = match outcome {
            AutoPostOutcome::Posted { story_id, .. } => story_id,
            other => panic!("expected a post, got {:?}", other),
        };
        assert_eq!(story_id, format!("story-{}", media));

        let history = db.get_history_for_media(media).unwrap();
        assert_eq!(history[0].posting_method, PostingMethod::InstagramApi);
        assert_eq!(history[0].instagram_story_id.as_deref(), Some(story_id.as_str()));
        assert_eq!(guards.active_count(), 0);
    }

    #[test]
    fn test_auto_post_failure_keeps_item_pending() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        assert!(workflow
            .auto_post(queue, &FakePublisher { fail: true }, None)
            .is_err());
        assert!(db.get_queue_item(queue).unwrap().is_some());
        assert!(!db.is_media_locked(media, Utc::now()).unwrap());
        assert!(!guards.is_active(queue));
    }

    #[test]
    fn test_concurrent_auto_post_is_turned_away() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (_, queue) = queued(&db, "a", t0());

        let _held = guards.try_acquire(queue).unwrap();
        let outcome = workflow
            .auto_post(queue, &FakePublisher { fail: false }, None)
            .unwrap();
        assert_eq!(outcome, AutoPostOutcome::AlreadyInProgress);
        assert!(db.get_queue_item(queue).unwrap().is_some());
    }

    #[test]
    fn test_auto_post_respects_claim_from_other_process() {
        let db = test_db();
        let config = Config::default();
        let (media, queue) = queued(&db, "a", t0());

        // The daemon holds the row while its publish call runs.
        let daemon_claim = QueueClaim::acquire(&db, queue, Utc::now()).unwrap().unwrap();

        // The CLI has its own in-memory guards and still has to stand aside.
        let cli_guards = ActionGuards::new();
        let cli = PostingWorkflow::new(&db, &config, &cli_guards);
        let outcome = cli
            .auto_post(queue, &FakePublisher { fail: false }, Some("cli"))
            .unwrap();
        assert_eq!(outcome, AutoPostOutcome::AlreadyInProgress);
        assert!(db.get_history_for_media(media).unwrap().is_empty());
        assert!(db.get_queue_item(queue).unwrap().is_some());

        drop(daemon_claim);
        let outcome = cli
            .auto_post(queue, &FakePublisher { fail: false }, Some("cli"))
            .unwrap();
        assert!(matches!(outcome, AutoPostOutcome::Posted { .. }));
        assert_eq!(db.get_history_for_media(media).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_auto_post_releases_claim() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (_, queue) = queued(&db, "a", t0());

        assert!(workflow
            .auto_post(queue, &FakePublisher { fail: true }, None)
            .is_err());
        assert!(QueueClaim::acquire(&db, queue, Utc::now()).unwrap().is_some());
    }

    #[test]
    fn test_operator_action_cancels_auto_post() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        let publisher = CancellingPublisher {
            guards: &guards,
            queue_item_id: queue,
        };
        let outcome = workflow.auto_post(queue, &publisher, None).unwrap();
        assert_eq!(outcome, AutoPostOutcome::Cancelled);
        assert!(db.get_history_for_media(media).unwrap().is_empty());
    }

    #[test]
    fn test_process_due_notifies_once() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (_, due) = queued(&db, "a", t0());
        queued(&db, "b", t0() + Duration::hours(6));
        let notifier = RecordingNotifier::default();

        let report = workflow.process_due(t0(), Some(&notifier), None).unwrap();
        assert_eq!(report.notified, 1);
        let report = workflow.process_due(t0(), Some(&notifier), None).unwrap();
        assert_eq!(report.notified, 0);

        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert!(db.get_queue_item(due).unwrap().unwrap().telegram_message_id.is_some());
    }

    #[test]
    fn test_process_due_auto_posts_for_instagram_tenants() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);

        let tenant = db
            .upsert_chat_settings(&ChatSettings {
                id: 0,
                telegram_chat_id: -200,
                display_name: Some("shop".to_string()),
                media_source_type: None,
                media_source_root: None,
                posts_per_day: None,
                posting_window_start: None,
                posting_window_end: None,
                is_paused: false,
                instagram_enabled: true,
            })
            .unwrap();
        let media = db
            .create_media(&crate::db::NewMediaItem {
                tenant_id: Some(tenant),
                ..new_media("p/a.jpg", "h1", None)
            })
            .unwrap();
        db.create_queue_item(media, t0(), Some(tenant)).unwrap();

        let notifier = RecordingNotifier::default();
        let report = workflow
            .process_due(t0(), Some(&notifier), Some(&FakePublisher { fail: false }))
            .unwrap();
        assert_eq!(report.auto_posted, 1);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(db.count_pending(Some(tenant)).unwrap(), 0);
    }

    #[test]
    fn test_stale_items_expire_into_history() {
        let db = test_db();
        let config = Config::default();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (stale_media, _) = queued(&db, "a", t0());
        queued(&db, "b", t0() + Duration::hours(47));

        let now = t0() + Duration::hours(config.posting.stale_after_hours + 1);
        assert_eq!(workflow.expire_stale(now).unwrap(), 1);
        assert_eq!(db.get_queue_all_tenants(QueueStatus::Skipped).unwrap().len(), 1);

        assert_eq!(workflow.purge_skipped(now).unwrap(), 1);
        assert!(db.get_queue_all_tenants(QueueStatus::Skipped).unwrap().is_empty());
        assert_eq!(db.count_pending(None).unwrap(), 1);
        let history = db.get_history_for_media(stale_media).unwrap();
        assert_eq!(history[0].status, HistoryStatus::Skipped);
        assert_eq!(history[0].posted_by.as_deref(), Some(SYSTEM_ACTOR));
    }

    #[test]
    fn test_reject_button_asks_before_locking() {
        let db = test_db();
        let config = operator_config();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        let reply = workflow
            .handle_action(OperatorAction::Reject(queue), Some(-1), Some("alice"))
            .unwrap();
        assert_eq!(reply, ActionReply::ConfirmReject(queue));
        assert!(db.get_queue_item(queue).unwrap().is_some());
        assert!(!db.is_media_locked(media, Utc::now()).unwrap());

        let reply = workflow
            .handle_action(OperatorAction::ConfirmReject(queue), Some(-1), Some("alice"))
            .unwrap();
        assert!(matches!(reply, ActionReply::Resolved(_)));
        let lock = db.get_active_lock(media, Utc::now()).unwrap().unwrap();
        assert_eq!(lock.reason, LockReason::PermanentReject);
        let history = db.get_history_for_media(media).unwrap();
        assert_eq!(history[0].status, HistoryStatus::Rejected);
        assert_eq!(history[0].posted_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_keep_withdraws_reject() {
        let db = test_db();
        let config = operator_config();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());

        let reply = workflow
            .handle_action(OperatorAction::Keep(queue), Some(-1), None)
            .unwrap();
        assert_eq!(reply, ActionReply::Restore(queue));
        assert!(db.get_queue_item(queue).unwrap().is_some());
        assert!(db.get_history_for_media(media).unwrap().is_empty());
    }

    #[test]
    fn test_button_from_other_chat_is_ignored() {
        let db = test_db();
        let config = operator_config();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (_, queue) = queued(&db, "a", t0());

        let reply = workflow
            .handle_action(OperatorAction::Posted(queue), Some(-999), Some("mallory"))
            .unwrap();
        assert_eq!(reply, ActionReply::Ignored);
        assert!(db.get_queue_item(queue).unwrap().is_some());

        // Without a configured chat nobody owns the default queue.
        let config = Config::default();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let reply = workflow
            .handle_action(OperatorAction::Posted(queue), Some(-1), None)
            .unwrap();
        assert_eq!(reply, ActionReply::Ignored);
    }

    #[test]
    fn test_tenant_items_answer_to_tenant_chat() {
        let db = test_db();
        let config = operator_config();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let tenant = db
            .upsert_chat_settings(&ChatSettings {
                id: 0,
                telegram_chat_id: -200,
                display_name: None,
                media_source_type: None,
                media_source_root: None,
                posts_per_day: None,
                posting_window_start: None,
                posting_window_end: None,
                is_paused: false,
                instagram_enabled: false,
            })
            .unwrap();
        let media = db
            .create_media(&crate::db::NewMediaItem {
                tenant_id: Some(tenant),
                ..new_media("p/a.jpg", "h1", None)
            })
            .unwrap();
        let queue = db.create_queue_item(media, t0(), Some(tenant)).unwrap();

        let reply = workflow
            .handle_action(OperatorAction::Skip(queue), Some(-1), None)
            .unwrap();
        assert_eq!(reply, ActionReply::Ignored);
        let reply = workflow
            .handle_action(OperatorAction::Skip(queue), Some(-200), None)
            .unwrap();
        assert_eq!(reply, ActionReply::Resolved("Skipped"));
        assert!(!db.is_media_locked(media, Utc::now()).unwrap());
    }

    #[test]
    fn test_process_callbacks_answers_every_press() {
        let db = test_db();
        let config = operator_config();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);
        let (media, queue) = queued(&db, "a", t0());
        let source = FakeCallbacks {
            next_offset: Some(15),
            ..Default::default()
        };
        source.press("cb1", -1, &format!("posted:{}", queue));
        source.press("cb2", -1, &format!("posted:{}", queue));
        source.press("cb3", -1, "hello");

        let offset = workflow.process_callbacks(&source, 3).unwrap();
        assert_eq!(offset, 15);

        let replies = source.replies.lock().unwrap().clone();
        assert_eq!(
            replies,
            vec![
                ("cb1".to_string(), ActionReply::Resolved("Marked as posted")),
                ("cb2".to_string(), ActionReply::AlreadyResolved),
                ("cb3".to_string(), ActionReply::Ignored),
            ]
        );
        let history = db.get_history_for_media(media).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].posting_method, PostingMethod::TelegramManual);
        assert_eq!(db.get_media(media).unwrap().unwrap().times_posted, 1);
    }

    #[test]
    fn test_empty_poll_keeps_offset() {
        let db = test_db();
        let config = operator_config();
        let guards = ActionGuards::new();
        let workflow = PostingWorkflow::new(&db, &config, &guards);

        assert_eq!(workflow.process_callbacks(&FakeCallbacks::default(), 42).unwrap(), 42);
    }
}
