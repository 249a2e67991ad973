//! Auto-campaign optimizer.
//!
//! Per auto-campaign the run is: pause low performers, score each generated
//! advertisement by its CTR, score the campaign as
//! `0.7 * CTR% + 0.3 * ZoneCoverage%`, then stamp the run time. Pausing
//! happens before scoring, so a second run over unchanged counters yields
//! the same score. Every step is safe to repeat.

use crate::error::AutoCampaignError;
use crate::matcher::FormatMatcher;
use crate::store::AutoCampaignStore;
use chrono::{DateTime, Utc};
use loomads_cache::{AdCounters, CounterStore};
use loomads_core::auto::AutoAdvertisement;
use loomads_core::config::OptimizerConfig;
use loomads_core::types::{ctr_percent, CampaignStatus, StatusActor};
use loomads_engine::CampaignCatalog;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const CTR_WEIGHT: f64 = 0.7;
const COVERAGE_WEIGHT: f64 = 0.3;
const NEUTRAL_WEIGHT: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignReport {
    pub auto_campaign_id: Uuid,
    pub performance_score: f64,
    pub ctr: f64,
    pub zone_coverage: f64,
    pub ads_paused: usize,
    pub active_ads: usize,
    pub campaign_auto_paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRun {
    pub auto_campaign_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationReport {
    pub campaigns: Vec<CampaignReport>,
    pub failed: Vec<FailedRun>,
}

/// `0.7 * ctr + 0.3 * coverage`, both in percent.
pub fn performance_score(ctr: f64, zone_coverage: f64) -> f64 {
    CTR_WEIGHT * ctr + COVERAGE_WEIGHT * zone_coverage
}

/// Weight in `[1, 10]` proportional to an ad's share of the best CTR.
pub fn rebalanced_weight(ctr: f64, max_ctr: f64) -> u8 {
    if max_ctr <= 0.0 {
        return NEUTRAL_WEIGHT;
    }
    let scaled = (9.0 * (ctr / max_ctr)).round().clamp(0.0, 9.0);
    1 + scaled as u8
}

pub struct Optimizer {
    store: Arc<AutoCampaignStore>,
    matcher: Arc<FormatMatcher>,
    catalog: Arc<CampaignCatalog>,
    counters: Arc<CounterStore>,
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(
        store: Arc<AutoCampaignStore>,
        matcher: Arc<FormatMatcher>,
        catalog: Arc<CampaignCatalog>,
        counters: Arc<CounterStore>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            store,
            matcher,
            catalog,
            counters,
            config,
        }
    }

    /// Optimize every auto-campaign. One campaign failing does not stop
    /// the others.
    pub async fn optimize_all(&self, now: DateTime<Utc>) -> OptimizationReport {
        let mut report = OptimizationReport::default();
        for id in self.store.campaign_ids() {
            match self.optimize_campaign(id, now).await {
                Ok(campaign) => report.campaigns.push(campaign),
                Err(e) => {
                    error!(auto_campaign_id = %id, error = %e, "Auto-campaign optimization failed");
                    report.failed.push(FailedRun {
                        auto_campaign_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }
        metrics::counter!("optimizer.runs").increment(1);
        info!(
            optimized = report.campaigns.len(),
            failed = report.failed.len(),
            "Optimization run complete"
        );
        report
    }

    pub async fn optimize_campaign(&self, id: Uuid, now: DateTime<Utc>) -> Result<CampaignReport, AutoCampaignError> {
        let auto_campaign = self.store.campaign(id)?;
        let target_zones = self.matcher.target_zones(&auto_campaign)?;
        let rows = self.store.generated_for(id);

        let ad_ids: Vec<Uuid> = rows.iter().map(|r| r.advertisement_id).collect();
        let counters = self
            .counters
            .snapshot(&ad_ids, now.date_naive())
            .await
            .map_err(AutoCampaignError::Counters)?;
        let stats = |row: &AutoAdvertisement| counters.get(&row.advertisement_id).copied().unwrap_or_default();

        // 1. Pause low performers.
        let mut ads_paused = 0;
        if auto_campaign.auto_pause_low_performers {
            for row in rows.iter().filter(|r| r.is_active) {
                let c = stats(row);
                if c.impressions_total < self.config.min_impressions_for_pause {
                    continue;
                }
                let ctr = ctr_percent(c.clicks_total, c.impressions_total);
                if ctr < auto_campaign.performance_threshold_ctr {
                    self.deactivate(row)?;
                    ads_paused += 1;
                    info!(
                        auto_campaign_id = %id,
                        zone = %row.zone_code,
                        ctr,
                        threshold = auto_campaign.performance_threshold_ctr,
                        "Paused low-performing generated advertisement"
                    );
                }
            }
            metrics::counter!("optimizer.ads_paused").increment(ads_paused as u64);
        }

        // 2. Per-advertisement scores.
        let rows = self.store.generated_for(id);
        for row in &rows {
            let c = stats(row);
            let score = ctr_percent(c.clicks_total, c.impressions_total);
            self.store
                .update_generated(id, &row.zone_code, |r| r.performance_score = score);
        }

        // 3. Campaign score.
        let totals = rows.iter().map(stats).fold(AdCounters::default(), |mut acc, c| {
            acc.impressions_total += c.impressions_total;
            acc.clicks_total += c.clicks_total;
            acc
        });
        let ctr = ctr_percent(totals.clicks_total, totals.impressions_total);
        let zone_coverage = zone_coverage(&rows, target_zones.iter().map(|z| z.code.as_str()));
        let score = performance_score(ctr, zone_coverage);

        let active: Vec<&AutoAdvertisement> = rows.iter().filter(|r| r.is_active).collect();
        if auto_campaign.auto_optimize && self.config.rebalance_weights {
            self.rebalance(&active, &counters)?;
        }

        let campaign_auto_paused = auto_campaign.auto_pause_low_performers
            && rows.iter().any(|r| r.retired_at.is_none())
            && active.is_empty()
            && self.auto_pause_campaign(auto_campaign.campaign_id);

        // 4. Stamp the run.
        self.store.record_optimization(id, score, now)?;

        Ok(CampaignReport {
            auto_campaign_id: id,
            performance_score: score,
            ctr,
            zone_coverage,
            ads_paused,
            active_ads: active.len(),
            campaign_auto_paused,
        })
    }

    fn deactivate(&self, row: &AutoAdvertisement) -> Result<(), AutoCampaignError> {
        match self.catalog.set_ad_active(row.advertisement_id, false) {
            Ok(_) => {}
            Err(e) => warn!(ad_id = %row.advertisement_id, error = %e, "Generated advertisement missing from catalog"),
        }
        if !self
            .store
            .update_generated(row.auto_campaign_id, &row.zone_code, |r| r.is_active = false)
        {
            return Err(AutoCampaignError::AutoCampaignNotFound(row.auto_campaign_id));
        }
        Ok(())
    }

    fn rebalance(&self, active: &[&AutoAdvertisement], counters: &HashMap<Uuid, AdCounters>) -> Result<(), AutoCampaignError> {
        let ctrs: Vec<f64> = active
            .iter()
            .map(|r| {
                let c = counters.get(&r.advertisement_id).copied().unwrap_or_default();
                ctr_percent(c.clicks_total, c.impressions_total)
            })
            .collect();
        let max_ctr = ctrs.iter().copied().fold(0.0, f64::max);
        for (row, ctr) in active.iter().zip(ctrs) {
            self.catalog
                .set_ad_weight(row.advertisement_id, rebalanced_weight(ctr, max_ctr))?;
        }
        Ok(())
    }

    /// Move the bound campaign to auto-paused if it is currently active.
    fn auto_pause_campaign(&self, campaign_id: Uuid) -> bool {
        let Some(campaign) = self.catalog.get_campaign(campaign_id) else {
            return false;
        };
        if campaign.status != CampaignStatus::Active {
            return false;
        }
        match self
            .catalog
            .transition_campaign(campaign_id, CampaignStatus::AutoPaused, StatusActor::Optimizer)
        {
            Ok(_) => true,
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Could not auto-pause campaign");
                false
            }
        }
    }
}

/// Share of target zones that still have an active generated advertisement,
/// in percent. Zero when nothing matches.
fn zone_coverage<'a>(rows: &[AutoAdvertisement], target_zones: impl Iterator<Item = &'a str>) -> f64 {
    let targets: HashSet<&str> = target_zones.collect();
    if targets.is_empty() {
        return 0.0;
    }
    let covered: HashSet<&str> = rows
        .iter()
        .filter(|r| r.is_active && targets.contains(r.zone_code.as_str()))
        .map(|r| r.zone_code.as_str())
        .collect();
    covered.len() as f64 / targets.len() as f64 * 100.0
}
