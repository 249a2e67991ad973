//! Campaigns and advertisements, indexed by zone for candidate lookup.
//!
//! Definitions from the management layer are replaced wholesale on refresh.
//! Advertisements generated for auto-campaigns are owned by this process and
//! survive a refresh.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use loomads_core::error::{LoomError, LoomResult};
use loomads_core::types::{AdOrigin, Advertisement, Campaign, CampaignStatus, StatusActor};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// An advertisement paired with its campaign for one decision.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ad: Arc<Advertisement>,
    pub campaign: Arc<Campaign>,
}

pub struct CampaignCatalog {
    campaigns: DashMap<Uuid, Arc<Campaign>>,
    ads: DashMap<Uuid, Arc<Advertisement>>,
    zone_index: DashMap<String, Vec<Uuid>>,
}

impl CampaignCatalog {
    pub fn new() -> Self {
        Self {
            campaigns: DashMap::new(),
            ads: DashMap::new(),
            zone_index: DashMap::new(),
        }
    }

    pub fn from_definitions(campaigns: Vec<Campaign>, ads: Vec<Advertisement>) -> Self {
        let catalog = Self::new();
        catalog.replace_managed(campaigns, ads);
        catalog
    }

    /// Replace campaigns and managed advertisements. Generated
    /// advertisements are kept as long as their campaign still exists.
    pub fn replace_managed(&self, campaigns: Vec<Campaign>, ads: Vec<Advertisement>) {
        let campaign_ids: HashSet<Uuid> = campaigns.iter().map(|c| c.id).collect();
        for campaign in campaigns {
            self.campaigns.insert(campaign.id, Arc::new(campaign));
        }
        self.campaigns.retain(|id, _| campaign_ids.contains(id));

        let mut managed_ids = HashSet::new();
        for ad in ads {
            if !campaign_ids.contains(&ad.campaign_id) {
                warn!(ad_id = %ad.id, campaign_id = %ad.campaign_id, "Skipping advertisement with unknown campaign");
                continue;
            }
            managed_ids.insert(ad.id);
            self.ads.insert(ad.id, Arc::new(ad));
        }
        self.ads.retain(|id, ad| {
            campaign_ids.contains(&ad.campaign_id)
                && (managed_ids.contains(id) || matches!(ad.origin, AdOrigin::AutoCampaign { .. }))
        });

        self.rebuild_index();
        info!(
            campaigns = self.campaigns.len(),
            advertisements = self.ads.len(),
            "Campaign catalog loaded"
        );
    }

    fn rebuild_index(&self) {
        let mut index: std::collections::HashMap<String, Vec<Uuid>> = std::collections::HashMap::new();
        for ad in self.ads.iter() {
            for zone in &ad.zones {
                index.entry(zone.clone()).or_default().push(ad.id);
            }
        }
        self.zone_index.retain(|zone, _| index.contains_key(zone));
        for (zone, mut ids) in index {
            ids.sort();
            self.zone_index.insert(zone, ids);
        }
    }

    /// Insert or replace one advertisement and index it under its zones.
    pub fn upsert_advertisement(&self, ad: Advertisement) -> LoomResult<()> {
        if !self.campaigns.contains_key(&ad.campaign_id) {
            return Err(LoomError::not_found("campaign", ad.campaign_id));
        }
        let id = ad.id;
        let zones = ad.zones.clone();
        self.ads.insert(id, Arc::new(ad));

        for mut entry in self.zone_index.iter_mut() {
            if !zones.contains(entry.key()) {
                entry.value_mut().retain(|existing| *existing != id);
            }
        }
        for zone in zones {
            let mut ids = self.zone_index.entry(zone).or_default();
            if !ids.contains(&id) {
                ids.push(id);
                ids.sort();
            }
        }
        Ok(())
    }

    pub fn get_ad(&self, id: Uuid) -> Option<Arc<Advertisement>> {
        self.ads.get(&id).map(|a| a.value().clone())
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<Arc<Campaign>> {
        self.campaigns.get(&id).map(|c| c.value().clone())
    }

    /// Advertisements serving `zone_code` whose ad is active and whose
    /// campaign is active and inside its window at `now`. Sorted by ad id.
    pub fn candidates(&self, zone_code: &str, now: DateTime<Utc>) -> Vec<Candidate> {
        let Some(ids) = self.zone_index.get(zone_code).map(|ids| ids.value().clone()) else {
            return Vec::new();
        };

        ids.into_iter()
            .filter_map(|id| self.get_ad(id))
            .filter(|ad| ad.is_active)
            .filter_map(|ad| {
                let campaign = self.get_campaign(ad.campaign_id)?;
                campaign.is_running(now).then_some(Candidate { ad, campaign })
            })
            .collect()
    }

    fn update_ad<F>(&self, id: Uuid, f: F) -> LoomResult<Arc<Advertisement>>
    where
        F: FnOnce(&mut Advertisement),
    {
        let mut entry = self
            .ads
            .get_mut(&id)
            .ok_or_else(|| LoomError::not_found("advertisement", id))?;
        let mut ad = (**entry.value()).clone();
        f(&mut ad);
        let ad = Arc::new(ad);
        *entry.value_mut() = ad.clone();
        Ok(ad)
    }

    pub fn set_ad_active(&self, id: Uuid, active: bool) -> LoomResult<Arc<Advertisement>> {
        self.update_ad(id, |ad| ad.is_active = active)
    }

    pub fn set_ad_weight(&self, id: Uuid, weight: u8) -> LoomResult<Arc<Advertisement>> {
        self.update_ad(id, |ad| ad.weight = weight)
    }

    /// Apply a validated status change to a campaign.
    pub fn transition_campaign(
        &self,
        id: Uuid,
        next: CampaignStatus,
        actor: StatusActor,
    ) -> LoomResult<Arc<Campaign>> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| LoomError::not_found("campaign", id))?;
        let status = entry.value().status.transition(next, actor)?;
        let mut campaign = (**entry.value()).clone();
        campaign.status = status;
        let campaign = Arc::new(campaign);
        *entry.value_mut() = campaign.clone();
        info!(campaign_id = %id, status = ?status, actor = ?actor, "Campaign status changed");
        Ok(campaign)
    }

    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }

    pub fn ad_count(&self) -> usize {
        self.ads.len()
    }
}

impl Default for CampaignCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ad, campaign};
    use chrono::Duration;

    #[test]
    fn test_candidates_respect_status_window_and_activity() {
        let active = campaign(CampaignStatus::Active);
        let paused = campaign(CampaignStatus::Paused);
        let mut ended = campaign(CampaignStatus::Active);
        ended.end_date = Some(Utc::now() - Duration::hours(1));

        let serving = ad(active.id, &["header_main"]);
        let mut inactive = ad(active.id, &["header_main"]);
        inactive.is_active = false;
        let from_paused = ad(paused.id, &["header_main"]);
        let from_ended = ad(ended.id, &["header_main"]);
        let other_zone = ad(active.id, &["footer"]);

        let catalog = CampaignCatalog::from_definitions(
            vec![active, paused, ended],
            vec![serving.clone(), inactive, from_paused, from_ended, other_zone],
        );

        let found = catalog.candidates("header_main", Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ad.id, serving.id);
        assert!(catalog.candidates("unknown", Utc::now()).is_empty());
    }

    #[test]
    fn test_refresh_keeps_generated_ads() {
        let c = campaign(CampaignStatus::Active);
        let managed = ad(c.id, &["a"]);
        let catalog = CampaignCatalog::from_definitions(vec![c.clone()], vec![managed]);

        let mut generated = ad(c.id, &["b"]);
        generated.origin = AdOrigin::AutoCampaign {
            auto_campaign_id: Uuid::new_v4(),
        };
        catalog.upsert_advertisement(generated.clone()).unwrap();
        assert_eq!(catalog.ad_count(), 2);

        catalog.replace_managed(vec![c], Vec::new());
        assert_eq!(catalog.ad_count(), 1);
        assert_eq!(catalog.candidates("b", Utc::now())[0].ad.id, generated.id);
        assert!(catalog.candidates("a", Utc::now()).is_empty());
    }

    #[test]
    fn test_upsert_requires_campaign_and_reindexes() {
        let c = campaign(CampaignStatus::Active);
        let catalog = CampaignCatalog::from_definitions(vec![c.clone()], Vec::new());

        assert!(catalog.upsert_advertisement(ad(Uuid::new_v4(), &["a"])).is_err());

        let mut moving = ad(c.id, &["a"]);
        catalog.upsert_advertisement(moving.clone()).unwrap();
        moving.zones = vec!["b".to_string()];
        catalog.upsert_advertisement(moving.clone()).unwrap();

        assert!(catalog.candidates("a", Utc::now()).is_empty());
        assert_eq!(catalog.candidates("b", Utc::now()).len(), 1);
    }

    #[test]
    fn test_deactivate_and_transition() {
        let c = campaign(CampaignStatus::Active);
        let a = ad(c.id, &["a"]);
        let catalog = CampaignCatalog::from_definitions(vec![c.clone()], vec![a.clone()]);

        catalog.set_ad_active(a.id, false).unwrap();
        assert!(catalog.candidates("a", Utc::now()).is_empty());
        assert!(catalog.get_ad(a.id).is_some());

        assert!(catalog
            .transition_campaign(c.id, CampaignStatus::AutoPaused, StatusActor::User)
            .is_err());
        let updated = catalog
            .transition_campaign(c.id, CampaignStatus::AutoPaused, StatusActor::Optimizer)
            .unwrap();
        assert_eq!(updated.status, CampaignStatus::AutoPaused);
    }
}
