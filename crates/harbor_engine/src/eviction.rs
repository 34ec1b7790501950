//! Size-bounded eviction policy.

use crate::cache::EntryMetadata;

/// Chooses which cache entries to drop when the cache is over budget.
///
/// The policy is stateless: [`EvictionPolicy::select`] is a pure function of
/// the metadata it is given. Entries are taken oldest first by `stored_at`,
/// with ties broken by key, until the remaining total fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    max_total_bytes: u64,
}

impl EvictionPolicy {
    /// Creates a policy with the given byte budget.
    pub fn new(max_total_bytes: u64) -> Self {
        Self { max_total_bytes }
    }

    /// The byte budget.
    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes
    }

    /// Returns the keys to evict, in eviction order.
    ///
    /// Empty when the total size is already within budget.
    pub fn select(&self, entries: &[EntryMetadata]) -> Vec<String> {
        let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        if total <= self.max_total_bytes {
            return Vec::new();
        }

        let mut ordered: Vec<&EntryMetadata> = entries.iter().collect();
        ordered.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.key.cmp(&b.key)));

        let mut victims = Vec::new();
        for entry in ordered {
            if total <= self.max_total_bytes {
                break;
            }
            total -= entry.size_bytes;
            victims.push(entry.key.clone());
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn meta(key: &str, size_bytes: u64, stored_at: u64) -> EntryMetadata {
        EntryMetadata {
            key: key.to_string(),
            size_bytes,
            stored_at,
            expires_at: None,
            version: 1,
        }
    }

    #[test]
    fn within_budget_selects_nothing() {
        let policy = EvictionPolicy::new(100);
        assert!(policy.select(&[]).is_empty());
        assert!(policy
            .select(&[meta("a", 50, 1), meta("b", 50, 2)])
            .is_empty());
    }

    #[test]
    fn evicts_oldest_until_fits() {
        let policy = EvictionPolicy::new(100);
        let entries = [meta("c", 50, 30), meta("a", 50, 10), meta("b", 50, 20)];
        assert_eq!(policy.select(&entries), vec!["a".to_string()]);

        let policy = EvictionPolicy::new(40);
        assert_eq!(
            policy.select(&entries),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn ties_break_by_key() {
        let policy = EvictionPolicy::new(10);
        let entries = [meta("zeta", 10, 5), meta("alpha", 10, 5), meta("mid", 10, 5)];
        assert_eq!(
            policy.select(&entries),
            vec!["alpha".to_string(), "mid".to_string()]
        );
    }

    fn arb_entries() -> impl Strategy<Value = Vec<EntryMetadata>> {
        prop::collection::btree_map("[a-z]{1,6}", (0u64..500, 0u64..50), 0..40).prop_map(|m| {
            m.into_iter()
                .map(|(key, (size, stored_at))| meta(&key, size, stored_at))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn selection_is_deterministic(entries in arb_entries(), budget in 0u64..5_000) {
            let policy = EvictionPolicy::new(budget);
            let mut reversed = entries.clone();
            reversed.reverse();
            prop_assert_eq!(policy.select(&entries), policy.select(&reversed));
        }

        #[test]
        fn remaining_total_fits_budget(entries in arb_entries(), budget in 0u64..5_000) {
            let policy = EvictionPolicy::new(budget);
            let victims: HashSet<String> = policy.select(&entries).into_iter().collect();
            let remaining: u64 = entries
                .iter()
                .filter(|e| !victims.contains(&e.key))
                .map(|e| e.size_bytes)
                .sum();
            prop_assert!(remaining <= budget);
        }

        #[test]
        fn never_evicts_newer_before_older(entries in arb_entries(), budget in 0u64..5_000) {
            let policy = EvictionPolicy::new(budget);
            let victims: HashSet<String> = policy.select(&entries).into_iter().collect();
            for kept in entries.iter().filter(|e| !victims.contains(&e.key)) {
                for evicted in entries.iter().filter(|e| victims.contains(&e.key)) {
                    prop_assert!(
                        (evicted.stored_at, &evicted.key) < (kept.stored_at, &kept.key)
                    );
                }
            }
        }
    }
}
