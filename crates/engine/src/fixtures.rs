//! Shared builders for unit tests.

use chrono::{Duration, Utc};
use loomads_core::types::{
    AdOrigin, Advertisement, Campaign, CampaignStatus, Creative, TargetType, Zone, ZoneType,
};
use uuid::Uuid;

pub fn campaign(status: CampaignStatus) -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        name: "test".to_string(),
        status,
        start_date: Utc::now() - Duration::days(1),
        end_date: None,
        daily_impression_limit: None,
        total_impression_limit: None,
        daily_click_limit: None,
        total_click_limit: None,
    }
}

pub fn ad(campaign_id: Uuid, zones: &[&str]) -> Advertisement {
    Advertisement {
        id: Uuid::new_v4(),
        campaign_id,
        title: "ad".to_string(),
        description: String::new(),
        creative: Creative::Image {
            image_url: "https://cdn.example.com/a.png".to_string(),
        },
        target_url: "https://example.com".to_string(),
        target_type: TargetType::External,
        zones: zones.iter().map(|z| z.to_string()).collect(),
        weight: 1,
        is_active: true,
        targeting: None,
        origin: AdOrigin::Managed,
    }
}

pub fn weighted_ad(campaign_id: Uuid, zones: &[&str], weight: u8) -> Advertisement {
    Advertisement {
        weight,
        ..ad(campaign_id, zones)
    }
}

pub fn zone(code: &str) -> Zone {
    Zone {
        code: code.to_string(),
        name: String::new(),
        zone_type: ZoneType::Header,
        width: 728,
        height: 90,
        max_ads: 3,
        is_active: true,
        app: None,
    }
}
