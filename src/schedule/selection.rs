use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::db::{Database, MediaItem};

/// Pick the best candidate: never-posted items first, then the fewest posts,
/// with a random choice among equals.
pub fn pick_candidate<R: Rng + ?Sized>(candidates: Vec<MediaItem>, rng: &mut R) -> Option<MediaItem> {
    let rank = |item: &MediaItem| (item.last_posted_at.is_some(), item.times_posted);
    let best = candidates.iter().map(rank).min()?;
    let mut top: Vec<MediaItem> = candidates.into_iter().filter(|c| rank(c) == best).collect();
    let index = rng.gen_range(0..top.len());
    Some(top.swap_remove(index))
}

/// Select media for one slot. A category with nothing eligible falls back to
/// the whole library before the slot is given up.
pub fn select_media<R: Rng + ?Sized>(
    db: &Database,
    tenant_id: Option<i64>,
    category: Option<&str>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Option<MediaItem>> {
    if let Some(category) = category {
        let candidates = db.get_eligible_media(tenant_id, Some(category), now)?;
        if let Some(item) = pick_candidate(candidates, rng) {
            return Ok(Some(item));
        }
        tracing::debug!(category, "No eligible media in category, falling back");
    }
    let candidates = db.get_eligible_media(tenant_id, None, now)?;
    Ok(pick_candidate(candidates, rng))
}
