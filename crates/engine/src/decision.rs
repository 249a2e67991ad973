//! The decision pipeline: zone lookup, candidate set, targeting filters,
//! caps, weighted selection, then impression bookkeeping.
//!
//! Tracking never blocks delivery. A counter or record failure is logged and
//! the decision is still returned.

use crate::caps::CapTracker;
use crate::catalog::{CampaignCatalog, Candidate};
use crate::filters::{EvalContext, FilterChain};
use crate::registry::ZoneRegistry;
use crate::selector::WeightedSelector;
use chrono::{DateTime, NaiveDate, Utc};
use loomads_analytics::RecordSink;
use loomads_cache::{CounterKind, CounterStore, DedupKey};
use loomads_core::config::ServingConfig;
use loomads_core::types::{
    AdDecision, ClickAck, ClickRecord, Decision, ImpressionRecord, RequestContext, RequesterAttributes,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("advertisement not found: {0}")]
    AdNotFound(Uuid),
}

pub struct DecisionEngine {
    serving: ServingConfig,
    zones: Arc<ZoneRegistry>,
    catalog: Arc<CampaignCatalog>,
    filters: FilterChain,
    caps: CapTracker,
    selector: WeightedSelector,
    sink: Arc<dyn RecordSink>,
}

impl DecisionEngine {
    pub fn new(
        serving: ServingConfig,
        zones: Arc<ZoneRegistry>,
        catalog: Arc<CampaignCatalog>,
        counters: Arc<CounterStore>,
        sink: Arc<dyn RecordSink>,
        selector: WeightedSelector,
    ) -> Self {
        let caps = CapTracker::new(counters, serving.counter_update_attempts);
        info!(
            enabled = serving.enabled,
            disabled_apps = serving.disabled_apps.len(),
            "Decision engine initialized"
        );
        Self {
            serving,
            zones,
            catalog,
            filters: FilterChain::standard(),
            caps,
            selector,
            sink,
        }
    }

    pub fn zones(&self) -> &Arc<ZoneRegistry> {
        &self.zones
    }

    pub fn catalog(&self) -> &Arc<CampaignCatalog> {
        &self.catalog
    }

    pub fn counters(&self) -> &Arc<CounterStore> {
        self.caps.store()
    }

    pub fn serving(&self) -> &ServingConfig {
        &self.serving
    }

    /// Calendar day on the configured local clock.
    pub fn local_day(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.serving.local_offset()).date_naive()
    }

    /// Pick one advertisement for `zone_code` and record the impression.
    pub async fn decide(&self, zone_code: &str, ctx: &RequestContext) -> Result<Decision, DecisionError> {
        let started = Instant::now();
        let zone = self.active_zone(zone_code)?;

        let eligible = self.eligible(&zone.code, ctx).await;
        let Some(winner) = self.selector.select(&eligible).cloned() else {
            metrics::counter!("decisions.no_ads").increment(1);
            debug!(zone = %zone.code, "No eligible advertisements");
            return Ok(Decision::NoAdsAvailable);
        };

        self.record_impression(&winner, &zone.code, ctx).await;

        metrics::counter!("decisions.served").increment(1);
        metrics::histogram!("decisions.latency_us").record(started.elapsed().as_micros() as f64);
        debug!(zone = %zone.code, ad_id = %winner.ad.id, "Advertisement selected");
        Ok(Decision::Served(AdDecision::from(winner.ad.as_ref())))
    }

    /// Up to `count` distinct advertisements for one zone. `count` is
    /// clamped to `[1, max_batch_ads]` and to the zone's own limit.
    pub async fn decide_many(
        &self,
        zone_code: &str,
        ctx: &RequestContext,
        count: usize,
    ) -> Result<Vec<AdDecision>, DecisionError> {
        let started = Instant::now();
        let zone = self.active_zone(zone_code)?;
        let count = count
            .clamp(1, self.serving.max_batch_ads.max(1))
            .min(zone.max_ads.max(1) as usize);

        let eligible = self.eligible(&zone.code, ctx).await;
        let winners = self.selector.select_many(eligible, count);
        if winners.is_empty() {
            metrics::counter!("decisions.no_ads").increment(1);
            return Ok(Vec::new());
        }

        let mut decisions = Vec::with_capacity(winners.len());
        for winner in &winners {
            self.record_impression(winner, &zone.code, ctx).await;
            decisions.push(AdDecision::from(winner.ad.as_ref()));
        }

        metrics::counter!("decisions.served").increment(decisions.len() as u64);
        metrics::histogram!("decisions.latency_us").record(started.elapsed().as_micros() as f64);
        Ok(decisions)
    }

    /// Candidates for `zone_code` that pass targeting and caps. Does not
    /// check the zone itself.
    pub async fn eligible(&self, zone_code: &str, ctx: &RequestContext) -> Vec<Candidate> {
        let candidates = self.catalog.candidates(zone_code, ctx.timestamp);
        if candidates.is_empty() {
            return candidates;
        }
        let eval = EvalContext::new(ctx, self.serving.local_offset());
        let targeted = self.filters.apply(candidates, &eval);
        self.caps.enforce(targeted, self.local_day(ctx.timestamp)).await
    }

    /// Record a click. Test traffic is acknowledged but not written; a click
    /// on an ad past its click ceiling is written unattributed and not counted.
    pub async fn record_click(
        &self,
        ad_id: Uuid,
        zone_code: &str,
        ctx: &RequestContext,
    ) -> Result<ClickAck, DecisionError> {
        let ad = self.catalog.get_ad(ad_id).ok_or(DecisionError::AdNotFound(ad_id))?;
        let campaign = self
            .catalog
            .get_campaign(ad.campaign_id)
            .ok_or(DecisionError::AdNotFound(ad_id))?;

        if ctx.is_test_traffic {
            metrics::counter!("clicks.ignored_test_traffic").increment(1);
            debug!(ad_id = %ad_id, "Ignoring click from test traffic");
            return Ok(ClickAck {
                ad_id,
                zone_code: zone_code.to_string(),
                recorded: false,
                attributed: false,
            });
        }

        let day = self.local_day(ctx.timestamp);
        let attributed = !self.caps.click_capped(ad_id, &campaign, day).await;
        if attributed {
            self.caps.count(ad_id, CounterKind::Click, day).await;
            metrics::counter!("clicks.recorded").increment(1);
        } else {
            metrics::counter!("clicks.unattributed").increment(1);
            debug!(ad_id = %ad_id, "Click past ceiling, not attributed");
        }

        self.sink.record_click(ClickRecord {
            id: Uuid::new_v4(),
            ad_id,
            campaign_id: campaign.id,
            zone_code: zone_code.to_string(),
            requester: RequesterAttributes::from(ctx),
            attributed,
            timestamp: ctx.timestamp,
        });

        Ok(ClickAck {
            ad_id,
            zone_code: zone_code.to_string(),
            recorded: true,
            attributed,
        })
    }

    fn active_zone(&self, zone_code: &str) -> Result<Arc<loomads_core::types::Zone>, DecisionError> {
        self.zones.get_active(zone_code, &self.serving).ok_or_else(|| {
            metrics::counter!("decisions.zone_not_found").increment(1);
            debug!(zone = %zone_code, "Zone unknown or inactive");
            DecisionError::ZoneNotFound(zone_code.to_string())
        })
    }

    async fn record_impression(&self, winner: &Candidate, zone_code: &str, ctx: &RequestContext) {
        let window = self.serving.dedup_window();
        let key = ctx.session_id.as_ref().map(|session_id| DedupKey {
            ad_id: winner.ad.id,
            zone_code: zone_code.to_string(),
            session_id: session_id.clone(),
        });

        if !self.caps.is_new_impression(key, ctx.timestamp, window).await {
            metrics::counter!("impressions.deduplicated").increment(1);
            debug!(ad_id = %winner.ad.id, zone = %zone_code, "Repeat impression suppressed");
            return;
        }

        self.caps
            .count(winner.ad.id, CounterKind::Impression, self.local_day(ctx.timestamp))
            .await;
        self.sink.record_impression(ImpressionRecord {
            id: Uuid::new_v4(),
            ad_id: winner.ad.id,
            campaign_id: winner.campaign.id,
            zone_code: zone_code.to_string(),
            requester: RequesterAttributes::from(ctx),
            timestamp: ctx.timestamp,
        });
        metrics::counter!("impressions.recorded").increment(1);
    }
}
