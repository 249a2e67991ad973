//! Auto-campaign definitions and the advertisements generated for them.

use crate::error::AutoCampaignError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use loomads_core::auto::{AutoAdvertisement, AutoCampaign, AutoCampaignFormat};
use tracing::info;
use uuid::Uuid;

/// Formats and auto-campaigns come from the management layer and are
/// replaced on refresh. Generated rows and computed scores are owned here
/// and survive a refresh.
pub struct AutoCampaignStore {
    formats: DashMap<Uuid, AutoCampaignFormat>,
    campaigns: DashMap<Uuid, AutoCampaign>,
    /// At most one generated row per (auto-campaign, zone).
    generated: DashMap<(Uuid, String), AutoAdvertisement>,
}

impl AutoCampaignStore {
    pub fn new() -> Self {
        Self {
            formats: DashMap::new(),
            campaigns: DashMap::new(),
            generated: DashMap::new(),
        }
    }

    pub fn from_definitions(formats: Vec<AutoCampaignFormat>, campaigns: Vec<AutoCampaign>) -> Self {
        let store = Self::new();
        store.replace_definitions(formats, campaigns);
        store
    }

    /// Replace formats and auto-campaigns. A campaign already known keeps
    /// its last computed score and optimization stamp.
    pub fn replace_definitions(&self, formats: Vec<AutoCampaignFormat>, campaigns: Vec<AutoCampaign>) {
        let format_ids: Vec<Uuid> = formats.iter().map(|f| f.id).collect();
        for format in formats {
            self.formats.insert(format.id, format);
        }
        self.formats.retain(|id, _| format_ids.contains(id));

        let campaign_ids: Vec<Uuid> = campaigns.iter().map(|c| c.id).collect();
        for mut campaign in campaigns {
            if let Some(existing) = self.campaigns.get(&campaign.id) {
                if existing.last_optimization_run.is_some() {
                    campaign.performance_score = existing.performance_score;
                    campaign.last_optimization_run = existing.last_optimization_run;
                }
            }
            self.campaigns.insert(campaign.id, campaign);
        }
        self.campaigns.retain(|id, _| campaign_ids.contains(id));

        info!(
            formats = self.formats.len(),
            auto_campaigns = self.campaigns.len(),
            generated = self.generated.len(),
            "Auto-campaign definitions loaded"
        );
    }

    pub fn format(&self, id: Uuid) -> Result<AutoCampaignFormat, AutoCampaignError> {
        self.formats
            .get(&id)
            .map(|f| f.value().clone())
            .ok_or(AutoCampaignError::FormatNotFound(id))
    }

    pub fn campaign(&self, id: Uuid) -> Result<AutoCampaign, AutoCampaignError> {
        self.campaigns
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(AutoCampaignError::AutoCampaignNotFound(id))
    }

    /// Auto-campaign ids in a stable order.
    pub fn campaign_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.campaigns.iter().map(|c| *c.key()).collect();
        ids.sort();
        ids
    }

    pub fn record_optimization(&self, id: Uuid, score: f64, at: DateTime<Utc>) -> Result<(), AutoCampaignError> {
        let mut campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or(AutoCampaignError::AutoCampaignNotFound(id))?;
        campaign.performance_score = score;
        campaign.last_optimization_run = Some(at);
        Ok(())
    }

    /// Insert a generated row built by `create` unless one already exists
    /// for its (auto-campaign, zone). Returns `true` when a row was created.
    /// The slot stays locked while `create` runs.
    pub fn insert_generated_with<F>(
        &self,
        auto_campaign_id: Uuid,
        zone_code: &str,
        create: F,
    ) -> Result<bool, AutoCampaignError>
    where
        F: FnOnce() -> Result<AutoAdvertisement, AutoCampaignError>,
    {
        match self.generated.entry((auto_campaign_id, zone_code.to_string())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(create()?);
                Ok(true)
            }
        }
    }

    /// Generated rows for one auto-campaign, sorted by zone code.
    pub fn generated_for(&self, auto_campaign_id: Uuid) -> Vec<AutoAdvertisement> {
        let mut rows: Vec<AutoAdvertisement> = self
            .generated
            .iter()
            .filter(|r| r.key().0 == auto_campaign_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.zone_code.cmp(&b.zone_code));
        rows
    }

    pub fn update_generated<F>(&self, auto_campaign_id: Uuid, zone_code: &str, f: F) -> bool
    where
        F: FnOnce(&mut AutoAdvertisement),
    {
        match self.generated.get_mut(&(auto_campaign_id, zone_code.to_string())) {
            Some(mut row) => {
                f(row.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn generated_count(&self) -> usize {
        self.generated.len()
    }
}

impl Default for AutoCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}
