//! Impression/click ceilings and session dedup over the shared counter store.

use crate::catalog::Candidate;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use loomads_cache::{AdCounters, CounterKind, CounterStore, DedupKey};
use loomads_core::types::Campaign;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapReason {
    DailyImpressions,
    TotalImpressions,
    DailyClicks,
    TotalClicks,
}

impl CapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapReason::DailyImpressions => "daily_impressions",
            CapReason::TotalImpressions => "total_impressions",
            CapReason::DailyClicks => "daily_clicks",
            CapReason::TotalClicks => "total_clicks",
        }
    }
}

fn reached(limit: Option<u64>, count: u64) -> bool {
    limit.is_some_and(|limit| count >= limit)
}

pub fn impression_cap(campaign: &Campaign, counters: &AdCounters) -> Option<CapReason> {
    if reached(campaign.daily_impression_limit, counters.impressions_today) {
        Some(CapReason::DailyImpressions)
    } else if reached(campaign.total_impression_limit, counters.impressions_total) {
        Some(CapReason::TotalImpressions)
    } else {
        None
    }
}

pub fn click_cap(campaign: &Campaign, counters: &AdCounters) -> Option<CapReason> {
    if reached(campaign.daily_click_limit, counters.clicks_today) {
        Some(CapReason::DailyClicks)
    } else if reached(campaign.total_click_limit, counters.clicks_total) {
        Some(CapReason::TotalClicks)
    } else {
        None
    }
}

fn has_limits(campaign: &Campaign) -> bool {
    campaign.daily_impression_limit.is_some()
        || campaign.total_impression_limit.is_some()
        || campaign.daily_click_limit.is_some()
        || campaign.total_click_limit.is_some()
}

/// Every counter update gets at least one retry.
const MIN_COUNTER_ATTEMPTS: u32 = 2;

pub struct CapTracker {
    store: Arc<CounterStore>,
    attempts: u32,
}

impl CapTracker {
    /// `attempts` is the number of tries per counter update, raised to two
    /// when configured lower.
    pub fn new(store: Arc<CounterStore>, attempts: u32) -> Self {
        Self {
            store,
            attempts: attempts.max(MIN_COUNTER_ATTEMPTS),
        }
    }

    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// Drop candidates that have reached any impression or click ceiling.
    /// If the counters cannot be read the candidates are kept.
    pub async fn enforce(&self, candidates: Vec<Candidate>, day: NaiveDate) -> Vec<Candidate> {
        let limited: Vec<Uuid> = candidates
            .iter()
            .filter(|c| has_limits(&c.campaign))
            .map(|c| c.ad.id)
            .collect();
        if limited.is_empty() {
            return candidates;
        }

        let counters = match self.store.snapshot(&limited, day).await {
            Ok(counters) => counters,
            Err(e) => {
                error!(error = %e, "Counter snapshot failed, serving without caps");
                return candidates;
            }
        };

        candidates
            .into_iter()
            .filter(|c| {
                let Some(counters) = counters.get(&c.ad.id) else {
                    return true;
                };
                match impression_cap(&c.campaign, counters).or_else(|| click_cap(&c.campaign, counters)) {
                    Some(reason) => {
                        debug!(ad_id = %c.ad.id, reason = reason.as_str(), "Candidate capped");
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }

    /// Whether a click on this ad would exceed a click ceiling.
    pub async fn click_capped(&self, ad_id: Uuid, campaign: &Campaign, day: NaiveDate) -> bool {
        if campaign.daily_click_limit.is_none() && campaign.total_click_limit.is_none() {
            return false;
        }
        match self.store.snapshot(&[ad_id], day).await {
            Ok(counters) => counters
                .get(&ad_id)
                .and_then(|c| click_cap(campaign, c))
                .is_some(),
            Err(e) => {
                error!(ad_id = %ad_id, error = %e, "Counter snapshot failed, attributing click");
                false
            }
        }
    }

    /// True unless the same (ad, zone, session) was seen inside `window`.
    /// Requests without a session are never deduplicated.
    pub async fn is_new_impression(&self, key: Option<DedupKey>, now: DateTime<Utc>, window: Duration) -> bool {
        let Some(key) = key else {
            return true;
        };
        match self.store.mark_if_new(&key, now, window).await {
            Ok(is_new) => is_new,
            Err(e) => {
                warn!(ad_id = %key.ad_id, error = %e, "Dedup check failed, recording impression");
                true
            }
        }
    }

    /// Increment a counter, retrying on failure. A final failure is logged
    /// and dropped; returns whether the update landed.
    pub async fn count(&self, ad_id: Uuid, kind: CounterKind, day: NaiveDate) -> bool {
        for attempt in 1..=self.attempts {
            match self.store.increment(ad_id, kind, day).await {
                Ok(_) => return true,
                Err(e) if attempt < self.attempts => {
                    warn!(ad_id = %ad_id, kind = kind.as_str(), attempt, error = %e, "Counter update failed, retrying");
                }
                Err(e) => {
                    metrics::counter!("counters.update_failed").increment(1);
                    error!(ad_id = %ad_id, kind = kind.as_str(), error = %e, "Counter update dropped");
                }
            }
        }
        false
    }
}
