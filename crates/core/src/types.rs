use crate::error::{LoomError, LoomResult};
use crate::targeting::TargetingRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Zones ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Header,
    Footer,
    Sidebar,
    InFeed,
    Modal,
    VideoPreroll,
    VideoOverlay,
    VideoPopup,
    ContentCard,
    Notification,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Header => "header",
            ZoneType::Footer => "footer",
            ZoneType::Sidebar => "sidebar",
            ZoneType::InFeed => "in_feed",
            ZoneType::Modal => "modal",
            ZoneType::VideoPreroll => "video_preroll",
            ZoneType::VideoOverlay => "video_overlay",
            ZoneType::VideoPopup => "video_popup",
            ZoneType::ContentCard => "content_card",
            ZoneType::Notification => "notification",
        }
    }
}

/// A named, fixed-dimension slot where advertisements are rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub zone_type: ZoneType,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_max_ads")]
    pub max_ads: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Owning app; the zone only serves while that app is enabled.
    #[serde(default)]
    pub app: Option<String>,
}

impl Zone {
    /// Dimension string in the `WxH` form used by auto-formats.
    pub fn dimensions(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    AutoPaused,
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusActor {
    User,
    Optimizer,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed)
    }

    /// Validate a status change and return the new status.
    ///
    /// `Active -> AutoPaused` is reserved for the optimizer; everything else
    /// is a user action.
    pub fn transition(self, next: CampaignStatus, actor: StatusActor) -> LoomResult<CampaignStatus> {
        use CampaignStatus::*;

        let allowed = match (self, next) {
            (Draft, Active) => true,
            (Active, Paused) | (Paused, Active) => true,
            (Active, Completed) | (Paused, Completed) => true,
            (Active, AutoPaused) => actor == StatusActor::Optimizer,
            (AutoPaused, Active) | (AutoPaused, Completed) => actor == StatusActor::User,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(LoomError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// A time- and budget-bounded container of advertisements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    /// `None` means the campaign runs until stopped.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daily_impression_limit: Option<u64>,
    #[serde(default)]
    pub total_impression_limit: Option<u64>,
    #[serde(default)]
    pub daily_click_limit: Option<u64>,
    #[serde(default)]
    pub total_click_limit: Option<u64>,
}

impl Campaign {
    /// Active and inside its date window at `now`.
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active
            && self.start_date <= now
            && self.end_date.map_or(true, |end| now <= end)
    }
}

// ─── Advertisements ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    Image,
    Html,
    Video,
}

/// The renderable part of an advertisement. Serialized flat so the payload
/// carries exactly one of `image_url`, `html_content` or `video_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Creative {
    Image { image_url: String },
    Html { html_content: String },
    Video { video_url: String },
}

impl Creative {
    pub fn ad_type(&self) -> AdType {
        match self {
            Creative::Image { .. } => AdType::Image,
            Creative::Html { .. } => AdType::Html,
            Creative::Video { .. } => AdType::Video,
        }
    }
}

/// How the rendering layer should open `target_url`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    #[default]
    External,
    Internal,
    Modal,
}

/// Where an advertisement definition came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AdOrigin {
    /// Written by the management layer; replaced on catalog refresh.
    #[default]
    Managed,
    /// Materialized by the auto-format matcher; survives catalog refresh.
    AutoCampaign { auto_campaign_id: Uuid },
}

pub const MIN_AD_WEIGHT: u8 = 1;
pub const MAX_AD_WEIGHT: u8 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advertisement {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub creative: Creative,
    pub target_url: String,
    #[serde(default)]
    pub target_type: TargetType,
    /// Zone codes this advertisement may be served in.
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: u8,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// A rule that is not an object is dropped and the ad is untargeted.
    #[serde(default, deserialize_with = "crate::targeting::lenient")]
    pub targeting: Option<TargetingRule>,
    #[serde(default)]
    pub origin: AdOrigin,
}

impl Advertisement {
    pub fn ad_type(&self) -> AdType {
        self.creative.ad_type()
    }

    /// Selection weight clamped into `[1, 10]`.
    pub fn effective_weight(&self) -> u32 {
        u32::from(self.weight.clamp(MIN_AD_WEIGHT, MAX_AD_WEIGHT))
    }

    pub fn serves_zone(&self, zone_code: &str) -> bool {
        self.zones.iter().any(|z| z == zone_code)
    }
}

// ─── Request context ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

impl std::str::FromStr for DeviceClass {
    type Err = LoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(DeviceClass::Desktop),
            "mobile" => Ok(DeviceClass::Mobile),
            "tablet" => Ok(DeviceClass::Tablet),
            other => Err(LoomError::Validation(format!("unknown device class '{other}'"))),
        }
    }
}

/// Everything the eligibility filters know about the requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub device: Option<DeviceClass>,
    pub authenticated: bool,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referrer: Option<String>,
    pub url: Option<String>,
    pub app: Option<String>,
    pub session_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Administrative or preview traffic; never counted as a click.
    pub is_test_traffic: bool,
    pub timestamp: DateTime<Utc>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            device: None,
            authenticated: false,
            browser: None,
            os: None,
            referrer: None,
            url: None,
            app: None,
            session_id: None,
            ip: None,
            user_agent: None,
            is_test_traffic: false,
            timestamp: Utc::now(),
        }
    }
}

// ─── Impression / click records ─────────────────────────────────────────

/// Requester attributes copied onto every record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequesterAttributes {
    pub session_id: Option<String>,
    pub device: Option<DeviceClass>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub app: Option<String>,
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub ip: Option<String>,
    pub authenticated: bool,
}

impl From<&RequestContext> for RequesterAttributes {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            device: ctx.device,
            browser: ctx.browser.clone(),
            os: ctx.os.clone(),
            app: ctx.app.clone(),
            url: ctx.url.clone(),
            referrer: ctx.referrer.clone(),
            ip: ctx.ip.clone(),
            authenticated: ctx.authenticated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpressionRecord {
    pub id: Uuid,
    pub ad_id: Uuid,
    pub campaign_id: Uuid,
    pub zone_code: String,
    #[serde(flatten)]
    pub requester: RequesterAttributes,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRecord {
    pub id: Uuid,
    pub ad_id: Uuid,
    pub campaign_id: Uuid,
    pub zone_code: String,
    #[serde(flatten)]
    pub requester: RequesterAttributes,
    /// False when the ad was already at a click ceiling.
    pub attributed: bool,
    pub timestamp: DateTime<Utc>,
}

// ─── Decisions ──────────────────────────────────────────────────────────

/// Render-agnostic payload handed to the rendering layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdDecision {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub ad_type: AdType,
    pub title: String,
    pub description: String,
    pub target_url: String,
    pub target_type: TargetType,
    #[serde(flatten)]
    pub creative: Creative,
}

impl From<&Advertisement> for AdDecision {
    fn from(ad: &Advertisement) -> Self {
        Self {
            id: ad.id,
            ad_type: ad.ad_type(),
            title: ad.title.clone(),
            description: ad.description.clone(),
            target_url: ad.target_url.clone(),
            target_type: ad.target_type,
            creative: ad.creative.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Served(AdDecision),
    NoAdsAvailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClickAck {
    pub ad_id: Uuid,
    pub zone_code: String,
    /// False for administrative/test traffic.
    pub recorded: bool,
    pub attributed: bool,
}

/// Click-through rate in percent; zero without impressions.
pub fn ctr_percent(clicks: u64, impressions: u64) -> f64 {
    if impressions == 0 {
        0.0
    } else {
        clicks as f64 / impressions as f64 * 100.0
    }
}

fn default_true() -> bool {
    true
}
fn default_max_ads() -> u32 {
    1
}
fn default_weight() -> u8 {
    MIN_AD_WEIGHT
}
