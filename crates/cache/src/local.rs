//! In-process counters backed by DashMap with atomic cells.
//! Used for single-node deployments and tests.

use crate::store::{AdCounters, CounterKind, DedupKey};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

pub struct LocalCounters {
    totals: DashMap<(Uuid, CounterKind), AtomicU64>,
    daily: DashMap<(Uuid, CounterKind, NaiveDate), AtomicU64>,
    dedup: DashMap<DedupKey, DateTime<Utc>>,
}

impl LocalCounters {
    pub fn new() -> Self {
        Self {
            totals: DashMap::new(),
            daily: DashMap::new(),
            dedup: DashMap::new(),
        }
    }

    pub fn increment(&self, ad_id: Uuid, kind: CounterKind, day: NaiveDate) -> u64 {
        bump(&self.daily, (ad_id, kind, day));
        bump(&self.totals, (ad_id, kind))
    }

    pub fn get(&self, ad_id: Uuid, kind: CounterKind, day: NaiveDate) -> (u64, u64) {
        let total = read(&self.totals, &(ad_id, kind));
        let today = read(&self.daily, &(ad_id, kind, day));
        (total, today)
    }

    pub fn snapshot(&self, ad_ids: &[Uuid], day: NaiveDate) -> HashMap<Uuid, AdCounters> {
        ad_ids
            .iter()
            .map(|&id| {
                let (impressions_total, impressions_today) = self.get(id, CounterKind::Impression, day);
                let (clicks_total, clicks_today) = self.get(id, CounterKind::Click, day);
                (
                    id,
                    AdCounters {
                        impressions_total,
                        impressions_today,
                        clicks_total,
                        clicks_today,
                    },
                )
            })
            .collect()
    }

    /// Check-then-set on the dedup marker. A suppressed repeat does not move
    /// the marker, so the window runs from the last recorded impression.
    pub fn mark_if_new(&self, key: &DedupKey, now: DateTime<Utc>, window: Duration) -> bool {
        match self.dedup.entry(key.clone()) {
            Entry::Occupied(mut seen) => {
                if now - *seen.get() < window {
                    false
                } else {
                    seen.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Remove expired dedup markers and per-day counters older than
    /// yesterday. Returns the number of entries removed.
    pub fn purge(&self, now: DateTime<Utc>, window: Duration, today: NaiveDate) -> usize {
        let mut removed = 0usize;
        self.dedup.retain(|_, seen| {
            let keep = now - *seen < window;
            removed += usize::from(!keep);
            keep
        });
        let keep_from = today.pred_opt().unwrap_or(today);
        self.daily.retain(|(_, _, day), _| {
            let keep = *day >= keep_from;
            removed += usize::from(!keep);
            keep
        });
        if removed > 0 {
            debug!(removed = removed, "Local counter maintenance complete");
        }
        removed
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}

impl Default for LocalCounters {
    fn default() -> Self {
        Self::new()
    }
}

fn bump<K: std::hash::Hash + Eq>(map: &DashMap<K, AtomicU64>, key: K) -> u64 {
    if let Some(cell) = map.get(&key) {
        return cell.fetch_add(1, Ordering::AcqRel) + 1;
    }
    map.entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::AcqRel)
        + 1
}

fn read<K: std::hash::Hash + Eq>(map: &DashMap<K, AtomicU64>, key: &K) -> u64 {
    map.get(key).map(|c| c.load(Ordering::Acquire)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(session: &str) -> DedupKey {
        DedupKey {
            ad_id: Uuid::nil(),
            zone_code: "header_main".to_string(),
            session_id: session.to_string(),
        }
    }

    #[test]
    fn test_daily_counters_roll_over() {
        let counters = LocalCounters::new();
        let ad = Uuid::new_v4();
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let tuesday = monday.succ_opt().unwrap();

        counters.increment(ad, CounterKind::Impression, monday);
        counters.increment(ad, CounterKind::Impression, monday);
        counters.increment(ad, CounterKind::Impression, tuesday);

        assert_eq!(counters.get(ad, CounterKind::Impression, monday), (3, 2));
        assert_eq!(counters.get(ad, CounterKind::Impression, tuesday), (3, 1));
        assert_eq!(counters.get(ad, CounterKind::Click, tuesday), (0, 0));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counters = Arc::new(LocalCounters::new());
        let ad = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.increment(ad, CounterKind::Impression, day);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counters.get(ad, CounterKind::Impression, day), (8000, 8000));
    }

    #[test]
    fn test_dedup_window() {
        let counters = LocalCounters::new();
        let window = Duration::seconds(30);
        let t0 = Utc::now();

        assert!(counters.mark_if_new(&key("s1"), t0, window));
        assert!(!counters.mark_if_new(&key("s1"), t0 + Duration::seconds(10), window));
        // The suppressed repeat did not extend the window.
        assert!(counters.mark_if_new(&key("s1"), t0 + Duration::seconds(31), window));
        assert!(counters.mark_if_new(&key("s2"), t0, window));
    }

    #[test]
    fn test_purge() {
        let counters = LocalCounters::new();
        let window = Duration::seconds(30);
        let now = Utc::now();
        let today = now.date_naive();
        let ad = Uuid::new_v4();

        counters.mark_if_new(&key("old"), now - Duration::minutes(5), window);
        counters.mark_if_new(&key("fresh"), now, window);
        counters.increment(ad, CounterKind::Impression, today - Duration::days(3));
        counters.increment(ad, CounterKind::Impression, today);

        assert_eq!(counters.purge(now, window, today), 2);
        assert_eq!(counters.dedup_len(), 1);
        // Totals survive the purge.
        assert_eq!(counters.get(ad, CounterKind::Impression, today), (2, 1));
    }

    #[test]
    fn test_purge_alongside_concurrent_inserts() {
        let counters = Arc::new(LocalCounters::new());
        let window = Duration::seconds(30);
        let now = Utc::now();
        let today = now.date_naive();

        for i in 0..100 {
            counters.mark_if_new(&key(&format!("stale-{i}")), now - Duration::minutes(5), window);
        }

        let writer = {
            let counters = counters.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    counters.mark_if_new(&key(&format!("live-{i}")), now, window);
                }
            })
        };
        let mut removed = 0;
        for _ in 0..50 {
            removed += counters.purge(now, window, today);
        }
        writer.join().unwrap();
        removed += counters.purge(now, window, today);

        assert_eq!(removed, 100);
        assert_eq!(counters.dedup_len(), 2000);
    }
}
