//! Redis-backed counters for multi-node deployments.
//!
//! Increments run as an atomic MULTI pipeline; the dedup marker is a single
//! `SET NX EX`, so Redis expires both dedup markers and daily keys itself.

use crate::store::{AdCounters, CounterKind, DedupKey};
use chrono::{Duration, NaiveDate};
use loomads_core::config::RedisConfig;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

pub struct RedisCounters {
    conn: ConnectionManager,
    prefix: String,
    daily_ttl_secs: u64,
}

impl RedisCounters {
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let mut conn = ConnectionManager::new(client).await?;

        // Verify connectivity
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            daily_ttl_secs: config.daily_key_ttl_secs,
        })
    }

    fn total_key(&self, ad_id: Uuid, kind: CounterKind) -> String {
        format!("{}:ad:{}:{}:total", self.prefix, ad_id, kind.as_str())
    }

    fn daily_key(&self, ad_id: Uuid, kind: CounterKind, day: NaiveDate) -> String {
        format!("{}:ad:{}:{}:{}", self.prefix, ad_id, kind.as_str(), day.format("%Y%m%d"))
    }

    fn dedup_key(&self, key: &DedupKey) -> String {
        format!(
            "{}:seen:{}:{}:{}",
            self.prefix, key.ad_id, key.zone_code, key.session_id
        )
    }

    pub async fn increment(&self, ad_id: Uuid, kind: CounterKind, day: NaiveDate) -> anyhow::Result<u64> {
        let total_key = self.total_key(ad_id, kind);
        let daily_key = self.daily_key(ad_id, kind, day);

        let mut conn = self.conn.clone();
        let (total, _today): (u64, u64) = redis::pipe()
            .atomic()
            .incr(&total_key, 1)
            .incr(&daily_key, 1)
            .expire(&daily_key, self.daily_ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(total)
    }

    pub async fn snapshot(&self, ad_ids: &[Uuid], day: NaiveDate) -> anyhow::Result<HashMap<Uuid, AdCounters>> {
        if ad_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = ad_ids
            .iter()
            .flat_map(|&id| {
                [
                    self.total_key(id, CounterKind::Impression),
                    self.daily_key(id, CounterKind::Impression, day),
                    self.total_key(id, CounterKind::Click),
                    self.daily_key(id, CounterKind::Click, day),
                ]
            })
            .collect();

        let mut conn = self.conn.clone();
        let values: Vec<Option<u64>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        metrics::counter!("counters.redis.snapshots").increment(1);

        Ok(ad_ids
            .iter()
            .zip(values.chunks(4))
            .map(|(&id, chunk)| {
                let at = |i: usize| chunk.get(i).copied().flatten().unwrap_or(0);
                (
                    id,
                    AdCounters {
                        impressions_total: at(0),
                        impressions_today: at(1),
                        clicks_total: at(2),
                        clicks_today: at(3),
                    },
                )
            })
            .collect())
    }

    pub async fn mark_if_new(&self, key: &DedupKey, window: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(self.dedup_key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(window.num_seconds().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }
}
