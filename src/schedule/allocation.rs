use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Spread `total_slots` across categories in proportion to `mix`.
///
/// Ratios are normalized by their sum. Categories are visited by descending
/// ratio (ties by name); each takes its rounded share except the last, which
/// takes whatever remains, so the result always has exactly `total_slots`
/// labels. Shares are rounded half to even, so 2.5 becomes 2 and 3.5 becomes 4.
/// The labels are shuffled so categories do not cluster in time.
/// An empty or all-zero mix yields no preference at all.
pub fn allocate_categories<R: Rng + ?Sized>(
    total_slots: usize,
    mix: &BTreeMap<String, f64>,
    rng: &mut R,
) -> Vec<String> {
    let sum: f64 = mix.values().filter(|r| **r > 0.0).sum();
    if total_slots == 0 || sum <= 0.0 {
        return Vec::new();
    }

    let mut ordered: Vec<(&String, f64)> = mix
        .iter()
        .filter(|(_, r)| **r > 0.0)
        .map(|(name, r)| (name, *r / sum))
        .collect();
    // BTreeMap iteration is by name, and the sort is stable.
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut labels = Vec::with_capacity(total_slots);
    let last = ordered.len() - 1;
    for (i, (name, ratio)) in ordered.iter().enumerate() {
        let remaining = total_slots - labels.len();
        let count = if i == last {
            remaining
        } else {
            ((ratio * total_slots as f64).round_ties_even() as usize).min(remaining)
        };
        labels.extend(std::iter::repeat((*name).clone()).take(count));
    }

    labels.shuffle(rng);
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mix(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn count(labels: &[String], name: &str) -> usize {
        labels.iter().filter(|l| *l == name).count()
    }

    #[test]
    fn test_half_shares_round_to_even() {
        let mut rng = StdRng::seed_from_u64(3);
        // 0.5 of 5 slots is 2.5, which rounds down to 2.
        let labels = allocate_categories(5, &mix(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]), &mut rng);
        assert_eq!(count(&labels, "a"), 2);
        assert_eq!(labels.len(), 5);

        // 0.5 of 7 slots is 3.5, which rounds up to 4.
        let labels = allocate_categories(7, &mix(&[("a", 0.5), ("b", 0.5)]), &mut rng);
        assert_eq!(count(&labels, "a"), 4);
        assert_eq!(count(&labels, "b"), 3);
    }

    #[test]
    fn test_length_always_matches_total() {
        let mut rng = StdRng::seed_from_u64(1);
        let mixes = [
            mix(&[("a", 0.5), ("b", 0.5)]),
            mix(&[("a", 0.34), ("b", 0.33), ("c", 0.33)]),
            mix(&[("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0), ("e", 1.0), ("f", 1.0), ("g", 1.0)]),
            mix(&[("a", 0.9), ("b", 0.05), ("c", 0.05)]),
        ];
        for m in &mixes {
            for total in 1..=25 {
                assert_eq!(allocate_categories(total, m, &mut rng).len(), total);
            }
        }
    }

    #[test]
    fn test_ratios_are_respected() {
        let mut rng = StdRng::seed_from_u64(2);
        let labels = allocate_categories(10, &mix(&[("memes", 0.7), ("merch", 0.3)]), &mut rng);
        assert_eq!(count(&labels, "memes"), 7);
        assert_eq!(count(&labels, "merch"), 3);
    }

    #[test]
    fn test_unnormalized_ratios() {
        let mut rng = StdRng::seed_from_u64(3);
        let labels = allocate_categories(4, &mix(&[("a", 3.0), ("b", 1.0)]), &mut rng);
        assert_eq!(count(&labels, "a"), 3);
        assert_eq!(count(&labels, "b"), 1);
    }

    #[test]
    fn test_last_category_absorbs_rounding() {
        let mut rng = StdRng::seed_from_u64(4);
        // Each third rounds to 1 of 2 slots; the smallest ratio gets what is left.
        let labels = allocate_categories(2, &mix(&[("a", 0.34), ("b", 0.33), ("c", 0.33)]), &mut rng);
        assert_eq!(count(&labels, "a"), 1);
        assert_eq!(count(&labels, "b"), 1);
        assert_eq!(count(&labels, "c"), 0);
    }

    #[test]
    fn test_empty_mix_has_no_preference() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(allocate_categories(5, &BTreeMap::new(), &mut rng).is_empty());
        assert!(allocate_categories(5, &mix(&[("a", 0.0)]), &mut rng).is_empty());
    }
}
