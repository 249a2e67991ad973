use crate::auto::{AutoCampaign, AutoCampaignFormat};
use crate::error::LoomResult;
use crate::types::{Advertisement, Campaign, Zone};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::warn;

/// Full set of definitions written by the management layer. The engine
/// treats it as read-only input and reloads it periodically.
///
/// Records are decoded one by one: a malformed record is logged and
/// skipped, and the rest of the snapshot still loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default, deserialize_with = "entries")]
    pub zones: Vec<Zone>,
    #[serde(default, deserialize_with = "entries")]
    pub campaigns: Vec<Campaign>,
    #[serde(default, deserialize_with = "entries")]
    pub advertisements: Vec<Advertisement>,
    #[serde(default, deserialize_with = "entries")]
    pub auto_formats: Vec<AutoCampaignFormat>,
    #[serde(default, deserialize_with = "entries")]
    pub auto_campaigns: Vec<AutoCampaign>,
}

impl CatalogSnapshot {
    pub fn from_json(json: &str) -> LoomResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> LoomResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

fn entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<T>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                metrics::counter!("catalog.skipped_records").increment(1);
                warn!(
                    record = std::any::type_name::<T>(),
                    index,
                    error = %e,
                    "Skipping malformed catalog record"
                );
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_parses_partial_documents() {
        let snapshot = CatalogSnapshot::from_json(
            r#"{
                "zones": [
                    {"code": "header_main", "zone_type": "header", "width": 728, "height": 90}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.zones.len(), 1);
        assert!(snapshot.campaigns.is_empty());
        assert!(snapshot.auto_campaigns.is_empty());
    }

    #[test]
    fn test_snapshot_rejects_broken_json() {
        assert!(CatalogSnapshot::from_json("{ zones: ").is_err());
    }

    #[test]
    fn test_malformed_advertisement_does_not_sink_the_snapshot() {
        let campaign_id = uuid::Uuid::new_v4();
        let good = uuid::Uuid::new_v4();
        let odd_targeting = uuid::Uuid::new_v4();
        let json = format!(
            r#"{{
                "zones": [
                    {{"code": "header_main", "zone_type": "header", "width": 728, "height": 90}},
                    {{"code": "broken", "zone_type": "billboard"}}
                ],
                "advertisements": [
                    {{"id": "{good}", "campaign_id": "{campaign_id}", "title": "Good",
                      "image_url": "https://cdn.example.com/a.png",
                      "target_url": "https://example.com", "zones": ["header_main"]}},
                    {{"id": "{odd_targeting}", "campaign_id": "{campaign_id}", "title": "Odd",
                      "image_url": "https://cdn.example.com/b.png",
                      "target_url": "https://example.com", "zones": ["header_main"],
                      "targeting": "not-an-object"}},
                    {{"id": "not-a-uuid", "title": 7}}
                ]
            }}"#
        );

        let snapshot = CatalogSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot.zones.len(), 1);
        let ids: Vec<_> = snapshot.advertisements.iter().map(|ad| ad.id).collect();
        assert_eq!(ids, vec![good, odd_targeting]);
        assert!(snapshot.advertisements[1].targeting.is_none());
    }

    #[test]
    fn test_null_sections_are_empty() {
        let snapshot = CatalogSnapshot::from_json(r#"{"zones": null, "campaigns": []}"#).unwrap();
        assert!(snapshot.zones.is_empty());
        assert!(snapshot.campaigns.is_empty());
    }
}
