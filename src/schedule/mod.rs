//! Builds the posting queue: generates future slots, spreads them over
//! categories and binds each one to an eligible media item.

pub mod allocation;
pub mod selection;
pub mod slots;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::ScheduleSettings;
use crate::db::Database;

pub use allocation::allocate_categories;
pub use selection::{pick_candidate, select_media};
pub use slots::{generate_slots, slot_base_times};

/// Label used in the breakdown for media without a category.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Outcome of a scheduling pass. Partial results are normal; `error` is set
/// when the pass stopped early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleResult {
    pub scheduled: usize,
    pub skipped: usize,
    pub total_slots: usize,
    pub category_breakdown: BTreeMap<String, usize>,
    pub error: Option<String>,
}

pub struct Scheduler<'a> {
    db: &'a Database,
    settings: ScheduleSettings,
    tenant_id: Option<i64>,
}

impl<'a> Scheduler<'a> {
    pub fn new(db: &'a Database, settings: ScheduleSettings, tenant_id: Option<i64>) -> Self {
        Self {
            db,
            settings,
            tenant_id,
        }
    }

    /// Schedule `days` days starting today.
    pub fn create_schedule(&self, days: u32) -> ScheduleResult {
        let now = Utc::now();
        self.create_schedule_with(days, now.date_naive(), now, &mut rand::thread_rng())
    }

    pub fn create_schedule_with<R: Rng + ?Sized>(
        &self,
        days: u32,
        start_date: NaiveDate,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> ScheduleResult {
        let mut result = ScheduleResult::default();
        if let Err(e) = self.fill(days, start_date, now, rng, &mut result) {
            warn!(tenant_id = ?self.tenant_id, error = %e, "Scheduling stopped early");
            result.error = Some(format!("{:#}", e));
        }
        info!(
            tenant_id = ?self.tenant_id,
            scheduled = result.scheduled,
            skipped = result.skipped,
            total_slots = result.total_slots,
            "Schedule pass finished"
        );
        result
    }

    /// Schedule `days` more days after the last queued slot, leaving the
    /// existing queue untouched. With an empty queue this starts today.
    pub fn extend_schedule(&self, days: u32) -> ScheduleResult {
        self.extend_schedule_with(days, Utc::now(), &mut rand::thread_rng())
    }

    pub fn extend_schedule_with<R: Rng + ?Sized>(
        &self,
        days: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> ScheduleResult {
        let start_date = match self.db.get_last_scheduled(self.tenant_id) {
            Ok(Some(last)) => last.date_naive() + Duration::days(1),
            Ok(None) => now.date_naive(),
            Err(e) => {
                return ScheduleResult {
                    error: Some(format!("{:#}", e)),
                    ..Default::default()
                }
            }
        };
        debug!(%start_date, "Extending schedule");
        self.create_schedule_with(days, start_date, now, rng)
    }

    fn fill<R: Rng + ?Sized>(
        &self,
        days: u32,
        start_date: NaiveDate,
        now: DateTime<Utc>,
        rng: &mut R,
        result: &mut ScheduleResult,
    ) -> Result<()> {
        let slots = generate_slots(days, start_date, &self.settings, now, rng);
        result.total_slots = slots.len();

        let categories = allocate_categories(slots.len(), &self.settings.category_mix, rng);

        for (i, slot) in slots.iter().enumerate() {
            let target = categories.get(i).map(String::as_str);
            match select_media(self.db, self.tenant_id, target, now, rng)? {
                Some(media) => {
                    let queue_id = self.db.create_queue_item(media.id, *slot, self.tenant_id)?;
                    debug!(queue_item_id = queue_id, media_id = media.id, %slot, "Queued media");
                    let label = media.category.unwrap_or_else(|| UNCATEGORIZED.to_string());
                    *result.category_breakdown.entry(label).or_insert(0) += 1;
                    result.scheduled += 1;
                }
                None => {
                    debug!(%slot, category = ?target, "No eligible media for slot");
                    result.skipped += 1;
                }
            }
        }
        Ok(())
    }
}
