//! Posting time slots inside a daily window.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;

use crate::config::ScheduleSettings;

/// Evenly spaced slot times for one day, before jitter.
///
/// A window with `end < start` runs past midnight; offsets that reach 24h
/// land on the following date.
pub fn slot_base_times(day: NaiveDate, settings: &ScheduleSettings) -> Vec<DateTime<Utc>> {
    let posts = settings.posts_per_day.max(1);
    let interval = settings.window_hours() / posts as f64;
    let midnight = day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    let Some(midnight) = midnight else {
        return Vec::new();
    };

    (0..posts)
        .map(|k| {
            let offset_hours = settings.window_start_hour as f64 + k as f64 * interval;
            let (base, hours) = if offset_hours >= 24.0 {
                (midnight + Duration::days(1), offset_hours - 24.0)
            } else {
                (midnight, offset_hours)
            };
            base + Duration::seconds((hours * 3600.0).round() as i64)
        })
        .collect()
}

/// Future slot times for `days` days starting at `start_date`, jittered by
/// up to `jitter_minutes` either way and sorted ascending. Slots that do not
/// fall strictly after `now` are dropped.
pub fn generate_slots<R: Rng + ?Sized>(
    days: u32,
    start_date: NaiveDate,
    settings: &ScheduleSettings,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<DateTime<Utc>> {
    let jitter = settings.jitter_minutes.max(0);
    let mut slots = Vec::new();

    for day_offset in 0..days {
        let day = start_date + Duration::days(day_offset as i64);
        for base in slot_base_times(day, settings) {
            let slot = if jitter > 0 {
                base + Duration::minutes(rng.gen_range(-jitter..=jitter))
            } else {
                base
            };
            if slot > now {
                slots.push(slot);
            }
        }
    }

    slots.sort();
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn settings(start: u32, end: u32, posts: u32, jitter: i64) -> ScheduleSettings {
        ScheduleSettings {
            posts_per_day: posts,
            window_start_hour: start,
            window_end_hour: end,
            jitter_minutes: jitter,
            ttl_days: 30,
            category_mix: BTreeMap::new(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    #[test]
    fn test_even_spacing_in_daytime_window() {
        let times = slot_base_times(day(), &settings(9, 21, 3, 0));
        let hours: Vec<u32> = times.iter().map(|t| t.hour()).collect();
        assert_eq!(hours, vec![9, 13, 17]);
    }

    #[test]
    fn test_wrapping_window_stays_inside() {
        let times = slot_base_times(day(), &settings(22, 2, 2, 0));
        assert_eq!(
            times,
            vec![
                Utc.with_ymd_and_hms(2026, 6, 1, 22, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap(),
            ]
        );

        let window_start = Utc.with_ymd_and_hms(2026, 6, 1, 22, 0, 0).unwrap();
        let window_end = window_start + Duration::hours(4);
        for t in slot_base_times(day(), &settings(22, 2, 5, 0)) {
            assert!(t >= window_start && t < window_end, "{} outside window", t);
        }
    }

    #[test]
    fn test_past_slots_are_dropped_and_sorted() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let slots = generate_slots(2, day(), &settings(9, 21, 3, 0), now, &mut rng);
        // 09:00 of the first day has already passed.
        assert_eq!(slots.len(), 5);
        assert!(slots.iter().all(|s| *s > now));
        assert!(slots.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut rng = StdRng::seed_from_u64(42);
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let cfg = settings(9, 21, 4, 30);
        let bases = slot_base_times(day(), &cfg);
        let slots = generate_slots(1, day(), &cfg, now, &mut rng);
        assert_eq!(slots.len(), bases.len());
        for (slot, base) in slots.iter().zip(bases.iter()) {
            assert!((*slot - *base).num_minutes().abs() <= 30);
        }
    }
}
