//! Shared impression/click counters and session dedup markers.
//!
//! Counters are the only mutable state shared between concurrent decisions,
//! so every backend increments atomically. The dedup marker is best-effort.

use crate::client::RedisCounters;
use crate::local::LocalCounters;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use loomads_core::config::RedisConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Impression,
    Click,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Impression => "imp",
            CounterKind::Click => "clk",
        }
    }
}

/// Point-in-time view of one advertisement's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdCounters {
    pub impressions_total: u64,
    pub impressions_today: u64,
    pub clicks_total: u64,
    pub clicks_today: u64,
}

/// Identifies one (ad, zone, session) triple for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub ad_id: Uuid,
    pub zone_code: String,
    pub session_id: String,
}

pub enum CounterStore {
    Local(LocalCounters),
    Redis(RedisCounters),
}

impl CounterStore {
    pub fn local() -> Self {
        CounterStore::Local(LocalCounters::new())
    }

    /// Connect to Redis when enabled, otherwise (or on connection failure)
    /// keep counters in process.
    pub async fn from_config(config: &RedisConfig) -> Self {
        if !config.enabled {
            info!("Redis disabled, using in-process counters");
            return Self::local();
        }
        match RedisCounters::new(config).await {
            Ok(redis) => CounterStore::Redis(redis),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-process counters");
                Self::local()
            }
        }
    }

    /// Atomically bump the total and per-day counters; returns the new total.
    pub async fn increment(&self, ad_id: Uuid, kind: CounterKind, day: NaiveDate) -> anyhow::Result<u64> {
        match self {
            CounterStore::Local(local) => Ok(local.increment(ad_id, kind, day)),
            CounterStore::Redis(redis) => redis.increment(ad_id, kind, day).await,
        }
    }

    pub async fn snapshot(&self, ad_ids: &[Uuid], day: NaiveDate) -> anyhow::Result<HashMap<Uuid, AdCounters>> {
        match self {
            CounterStore::Local(local) => Ok(local.snapshot(ad_ids, day)),
            CounterStore::Redis(redis) => redis.snapshot(ad_ids, day).await,
        }
    }

    /// Returns `true` when no marker for `key` was set within `window`, and
    /// sets one stamped `now`.
    pub async fn mark_if_new(&self, key: &DedupKey, now: DateTime<Utc>, window: Duration) -> anyhow::Result<bool> {
        match self {
            CounterStore::Local(local) => Ok(local.mark_if_new(key, now, window)),
            CounterStore::Redis(redis) => redis.mark_if_new(key, window).await,
        }
    }

    /// Drop expired dedup markers and stale per-day counters. Redis expires
    /// its own keys.
    pub fn maintenance(&self, now: DateTime<Utc>, window: Duration, today: NaiveDate) -> usize {
        match self {
            CounterStore::Local(local) => local.purge(now, window, today),
            CounterStore::Redis(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let store = CounterStore::local();
        let ad = Uuid::new_v4();
        let today = Utc::now().date_naive();

        assert_eq!(store.increment(ad, CounterKind::Impression, today).await.unwrap(), 1);
        assert_eq!(store.increment(ad, CounterKind::Impression, today).await.unwrap(), 2);
        store.increment(ad, CounterKind::Click, today).await.unwrap();

        let snap = store.snapshot(&[ad], today).await.unwrap();
        assert_eq!(
            snap[&ad],
            AdCounters {
                impressions_total: 2,
                impressions_today: 2,
                clicks_total: 1,
                clicks_today: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_redis_config_uses_local() {
        let store = CounterStore::from_config(&RedisConfig::default()).await;
        assert!(matches!(store, CounterStore::Local(_)));
    }
}
