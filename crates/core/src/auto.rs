//! Auto-campaign data model: formats that group structurally similar zones,
//! campaigns bound to a format, and the per-zone advertisements generated
//! for them.

use crate::targeting::TargetingRule;
use crate::types::{Creative, TargetType, ZoneType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a format's zones are meant to be grouped. Bookkeeping for the
/// management layer; matching always applies both the type and dimension
/// sets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    ByType,
    ByDimension,
    #[default]
    ByTypeAndDimension,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCampaignFormat {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    /// Empty means any zone type.
    #[serde(default)]
    pub zone_types: Vec<ZoneType>,
    /// `WxH` strings; empty means any dimension.
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub excluded_zones: Vec<String>,
    #[serde(default)]
    pub grouping: GroupingStrategy,
}

/// The creative every generated advertisement is cloned from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseCreative {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub creative: Creative,
    pub target_url: String,
    #[serde(default)]
    pub target_type: TargetType,
    #[serde(default = "default_weight")]
    pub weight: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCampaign {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub format_id: Uuid,
    /// Campaign that owns the generated advertisements.
    pub campaign_id: Uuid,
    pub base: BaseCreative,
    #[serde(default)]
    pub targeting: Option<TargetingRule>,
    #[serde(default)]
    pub auto_optimize: bool,
    #[serde(default)]
    pub auto_pause_low_performers: bool,
    /// CTR in percent below which generated ads are paused.
    #[serde(default = "default_threshold_ctr")]
    pub performance_threshold_ctr: f64,
    #[serde(default)]
    pub performance_score: f64,
    #[serde(default)]
    pub last_optimization_run: Option<DateTime<Utc>>,
}

/// Content hints for the rendering collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToneHint {
    Subtle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundHint {
    Transparent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationMetadata {
    pub zone_type: ZoneType,
    pub dimensions: String,
    #[serde(default)]
    pub tone: Option<ToneHint>,
    #[serde(default)]
    pub background: Option<BackgroundHint>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAdvertisement {
    pub id: Uuid,
    pub auto_campaign_id: Uuid,
    pub zone_code: String,
    pub advertisement_id: Uuid,
    pub is_active: bool,
    pub performance_score: f64,
    pub metadata: GenerationMetadata,
    /// Set while the row's zone is gone from the registry. A retired row is
    /// inactive and comes back when the zone does.
    #[serde(default)]
    pub retired_at: Option<DateTime<Utc>>,
}

fn default_weight() -> u8 {
    5
}
fn default_threshold_ctr() -> f64 {
    0.5
}
