//! Builders shared by the matcher and optimizer tests.

use chrono::{Duration, Utc};
use loomads_core::auto::{AutoCampaign, AutoCampaignFormat, BaseCreative, GroupingStrategy};
use loomads_core::types::{Campaign, CampaignStatus, Creative, TargetType, Zone, ZoneType};
use uuid::Uuid;

pub fn campaign(status: CampaignStatus) -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        name: "auto".to_string(),
        status,
        start_date: Utc::now() - Duration::days(1),
        end_date: None,
        daily_impression_limit: None,
        total_impression_limit: None,
        daily_click_limit: None,
        total_click_limit: None,
    }
}

pub fn zone(code: &str, zone_type: ZoneType, width: u32, height: u32) -> Zone {
    Zone {
        code: code.to_string(),
        name: String::new(),
        zone_type,
        width,
        height,
        max_ads: 1,
        is_active: true,
        app: None,
    }
}

pub fn format(zone_types: &[ZoneType], dimensions: &[&str], excluded: &[&str]) -> AutoCampaignFormat {
    AutoCampaignFormat {
        id: Uuid::new_v4(),
        name: "format".to_string(),
        zone_types: zone_types.to_vec(),
        dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
        excluded_zones: excluded.iter().map(|z| z.to_string()).collect(),
        grouping: GroupingStrategy::ByTypeAndDimension,
    }
}

pub fn auto_campaign(format_id: Uuid, campaign_id: Uuid) -> AutoCampaign {
    AutoCampaign {
        id: Uuid::new_v4(),
        name: "auto".to_string(),
        format_id,
        campaign_id,
        base: BaseCreative {
            title: "Spring sale".to_string(),
            description: "Everything must go".to_string(),
            creative: Creative::Image {
                image_url: "https://cdn.example.com/spring.png".to_string(),
            },
            target_url: "https://example.com/spring".to_string(),
            target_type: TargetType::External,
            weight: 5,
        },
        targeting: None,
        auto_optimize: false,
        auto_pause_low_performers: false,
        performance_threshold_ctr: 0.5,
        performance_score: 0.0,
        last_optimization_run: None,
    }
}
