//! Auto-format matching and materialization of generated advertisements.

use crate::error::AutoCampaignError;
use crate::store::AutoCampaignStore;
use chrono::{DateTime, Utc};
use loomads_core::auto::{
    AutoAdvertisement, AutoCampaign, AutoCampaignFormat, BackgroundHint, GenerationMetadata, ToneHint,
};
use loomads_core::types::{AdOrigin, Advertisement, Zone, ZoneType};
use loomads_engine::{CampaignCatalog, ZoneRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Whether `zone` belongs to `format`: type in the type set (or the set is
/// empty), `WxH` in the dimension set (or the set is empty), and not
/// explicitly excluded.
pub fn format_matches(format: &AutoCampaignFormat, zone: &Zone) -> bool {
    let type_ok = format.zone_types.is_empty() || format.zone_types.contains(&zone.zone_type);
    let dimensions = zone.dimensions();
    let dimension_ok =
        format.dimensions.is_empty() || format.dimensions.iter().any(|d| d.trim() == dimensions);
    let excluded = format.excluded_zones.iter().any(|code| code == &zone.code);
    type_ok && dimension_ok && !excluded
}

/// Active zones matching `format`, in the order given.
pub fn matching_zones(format: &AutoCampaignFormat, zones: &[Arc<Zone>]) -> Vec<Arc<Zone>> {
    zones
        .iter()
        .filter(|zone| zone.is_active && format_matches(format, zone))
        .cloned()
        .collect()
}

/// Rendering hints recorded with each generated advertisement.
pub fn generation_hints(zone_type: ZoneType) -> (Option<ToneHint>, Option<BackgroundHint>) {
    match zone_type {
        ZoneType::Header | ZoneType::Footer => (Some(ToneHint::Subtle), None),
        ZoneType::VideoOverlay => (None, Some(BackgroundHint::Transparent)),
        _ => (None, None),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub existing: usize,
    /// Rows brought back: a retired row whose zone returned, or a row whose
    /// advertisement had left the catalog.
    pub restored: usize,
    /// Rows deactivated because their zone left the registry.
    pub retired: usize,
    pub failed: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.created += other.created;
        self.existing += other.existing;
        self.restored += other.restored;
        self.retired += other.retired;
        self.failed += other.failed;
    }
}

pub struct FormatMatcher {
    store: Arc<AutoCampaignStore>,
    zones: Arc<ZoneRegistry>,
    catalog: Arc<CampaignCatalog>,
}

impl FormatMatcher {
    pub fn new(store: Arc<AutoCampaignStore>, zones: Arc<ZoneRegistry>, catalog: Arc<CampaignCatalog>) -> Self {
        Self { store, zones, catalog }
    }

    /// Current matching zones for one auto-campaign's format.
    pub fn target_zones(&self, auto_campaign: &AutoCampaign) -> Result<Vec<Arc<Zone>>, AutoCampaignError> {
        let format = self.store.format(auto_campaign.format_id)?;
        Ok(matching_zones(&format, &self.zones.active_zones()))
    }

    /// Bring one auto-campaign's generated advertisements in line with the
    /// registry and catalog:
    /// - a matching zone without a row gets one;
    /// - a row whose advertisement left the catalog gets a fresh one;
    /// - an active row whose zone left the registry is retired, and restored
    ///   when the zone returns.
    ///
    /// Rows are never deleted. Paused rows stay paused.
    pub fn sync_campaign(&self, auto_campaign_id: Uuid, now: DateTime<Utc>) -> Result<SyncReport, AutoCampaignError> {
        let auto_campaign = self.store.campaign(auto_campaign_id)?;
        let mut report = SyncReport::default();

        let existing: HashMap<String, AutoAdvertisement> = self
            .store
            .generated_for(auto_campaign.id)
            .into_iter()
            .map(|row| (row.zone_code.clone(), row))
            .collect();

        for row in existing.values() {
            if row.is_active && row.retired_at.is_none() && self.zones.get(&row.zone_code).is_none() {
                self.retire(row, now);
                report.retired += 1;
            }
        }

        for zone in self.target_zones(&auto_campaign)? {
            let outcome = match existing.get(&zone.code) {
                Some(row) => self.reconcile(&auto_campaign, &zone, row, now).map(|restored| {
                    if restored {
                        report.restored += 1;
                    } else {
                        report.existing += 1;
                    }
                }),
                None => self
                    .store
                    .insert_generated_with(auto_campaign.id, &zone.code, || {
                        self.materialize(&auto_campaign, &zone, now)
                    })
                    .map(|created| {
                        if created {
                            report.created += 1;
                        } else {
                            report.existing += 1;
                        }
                    }),
            };
            if let Err(e) = outcome {
                report.failed += 1;
                error!(
                    auto_campaign_id = %auto_campaign.id,
                    zone = %zone.code,
                    error = %e,
                    "Failed to generate advertisement"
                );
            }
        }

        if report.created > 0 {
            metrics::counter!("autocampaign.ads_created").increment(report.created as u64);
        }
        if report.created + report.restored + report.retired > 0 {
            info!(
                auto_campaign_id = %auto_campaign.id,
                created = report.created,
                existing = report.existing,
                restored = report.restored,
                retired = report.retired,
                "Auto-campaign synced"
            );
        }
        Ok(report)
    }

    /// Sync every auto-campaign. A failing campaign is counted and skipped.
    pub fn sync_all(&self, now: DateTime<Utc>) -> SyncReport {
        let mut total = SyncReport::default();
        for id in self.store.campaign_ids() {
            match self.sync_campaign(id, now) {
                Ok(report) => total.absorb(report),
                Err(e) => {
                    total.failed += 1;
                    error!(auto_campaign_id = %id, error = %e, "Auto-campaign sync failed");
                }
            }
        }
        total
    }

    /// Returns `true` when the row had to be restored.
    fn reconcile(
        &self,
        auto_campaign: &AutoCampaign,
        zone: &Zone,
        row: &AutoAdvertisement,
        now: DateTime<Utc>,
    ) -> Result<bool, AutoCampaignError> {
        if self.catalog.get_ad(row.advertisement_id).is_none() {
            let fresh = self.materialize(auto_campaign, zone, now)?;
            self.store.update_generated(auto_campaign.id, &zone.code, |r| {
                *r = AutoAdvertisement { id: r.id, ..fresh };
            });
            metrics::counter!("autocampaign.ads_restored").increment(1);
            return Ok(true);
        }
        if row.retired_at.is_some() {
            self.catalog.set_ad_active(row.advertisement_id, true)?;
            self.store.update_generated(auto_campaign.id, &zone.code, |r| {
                r.is_active = true;
                r.retired_at = None;
            });
            debug!(auto_campaign_id = %auto_campaign.id, zone = %zone.code, "Restored retired advertisement");
            return Ok(true);
        }
        Ok(false)
    }

    fn retire(&self, row: &AutoAdvertisement, now: DateTime<Utc>) {
        if let Err(e) = self.catalog.set_ad_active(row.advertisement_id, false) {
            debug!(ad_id = %row.advertisement_id, error = %e, "Retired row has no advertisement");
        }
        self.store.update_generated(row.auto_campaign_id, &row.zone_code, |r| {
            r.is_active = false;
            r.retired_at = Some(now);
        });
        info!(
            auto_campaign_id = %row.auto_campaign_id,
            zone = %row.zone_code,
            "Retired generated advertisement for a removed zone"
        );
    }

    fn materialize(
        &self,
        auto_campaign: &AutoCampaign,
        zone: &Zone,
        now: DateTime<Utc>,
    ) -> Result<AutoAdvertisement, AutoCampaignError> {
        let base = &auto_campaign.base;
        let ad = Advertisement {
            id: Uuid::new_v4(),
            campaign_id: auto_campaign.campaign_id,
            title: base.title.clone(),
            description: base.description.clone(),
            creative: base.creative.clone(),
            target_url: base.target_url.clone(),
            target_type: base.target_type,
            zones: vec![zone.code.clone()],
            weight: base.weight,
            is_active: true,
            targeting: auto_campaign.targeting.clone(),
            origin: AdOrigin::AutoCampaign {
                auto_campaign_id: auto_campaign.id,
            },
        };
        let advertisement_id = ad.id;
        self.catalog.upsert_advertisement(ad)?;

        let (tone, background) = generation_hints(zone.zone_type);
        debug!(auto_campaign_id = %auto_campaign.id, zone = %zone.code, ad_id = %advertisement_id, "Generated advertisement");
        Ok(AutoAdvertisement {
            id: Uuid::new_v4(),
            auto_campaign_id: auto_campaign.id,
            zone_code: zone.code.clone(),
            advertisement_id,
            is_active: true,
            performance_score: 0.0,
            metadata: GenerationMetadata {
                zone_type: zone.zone_type,
                dimensions: zone.dimensions(),
                tone,
                background,
                generated_at: now,
            },
            retired_at: None,
        })
    }
}
