//! Shared helpers for HTTP integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use loomads_analytics::MemoryLedger;
use loomads_api::{router, AppState};
use loomads_autocampaign::{AutoCampaignStore, FormatMatcher, Optimizer};
use loomads_cache::CounterStore;
use loomads_core::auto::{AutoCampaign, AutoCampaignFormat, BaseCreative, GroupingStrategy};
use loomads_core::config::{OptimizerConfig, ServingConfig};
use loomads_core::types::{
    AdOrigin, Advertisement, Campaign, CampaignStatus, Creative, TargetType, Zone, ZoneType,
};
use loomads_engine::{CampaignCatalog, DecisionEngine, WeightedSelector, ZoneRegistry};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub state: AppState,
    pub ledger: Arc<MemoryLedger>,
    pub campaign_id: Uuid,
    pub ad_ids: Vec<Uuid>,
    pub auto_campaign_id: Uuid,
}

impl TestApp {
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }
}

pub fn zone(code: &str, zone_type: ZoneType, width: u32, height: u32, max_ads: u32) -> Zone {
    Zone {
        code: code.to_string(),
        name: code.to_string(),
        zone_type,
        width,
        height,
        max_ads,
        is_active: true,
        app: None,
    }
}

fn image_ad(campaign_id: Uuid, zone: &str, title: &str) -> Advertisement {
    Advertisement {
        id: Uuid::new_v4(),
        campaign_id,
        title: title.to_string(),
        description: "Limited time".to_string(),
        creative: Creative::Image {
            image_url: format!("https://cdn.example.com/{title}.png"),
        },
        target_url: "https://example.com/offer".to_string(),
        target_type: TargetType::External,
        zones: vec![zone.to_string()],
        weight: 5,
        is_active: true,
        targeting: None,
        origin: AdOrigin::Managed,
    }
}

/// Zones: `header_main` (five ads, up to three per request), `footer`
/// (no ads), two sidebars matched by the auto-campaign format.
pub fn build_test_app() -> TestApp {
    let campaign = Campaign {
        id: Uuid::new_v4(),
        name: "spring".to_string(),
        status: CampaignStatus::Active,
        start_date: Utc::now() - Duration::days(1),
        end_date: None,
        daily_impression_limit: None,
        total_impression_limit: None,
        daily_click_limit: None,
        total_click_limit: None,
    };
    let ads: Vec<Advertisement> = (0..5)
        .map(|i| image_ad(campaign.id, "header_main", &format!("ad{i}")))
        .collect();
    let ad_ids = ads.iter().map(|a| a.id).collect();

    let zones = Arc::new(ZoneRegistry::from_zones(vec![
        zone("header_main", ZoneType::Header, 728, 90, 3),
        zone("footer", ZoneType::Footer, 728, 90, 1),
        zone("sidebar_left", ZoneType::Sidebar, 300, 250, 1),
        zone("sidebar_right", ZoneType::Sidebar, 300, 250, 1),
    ]));
    let catalog = Arc::new(CampaignCatalog::from_definitions(vec![campaign.clone()], ads));

    let format = AutoCampaignFormat {
        id: Uuid::new_v4(),
        name: "sidebars".to_string(),
        zone_types: vec![ZoneType::Sidebar],
        dimensions: vec!["300x250".to_string()],
        excluded_zones: Vec::new(),
        grouping: GroupingStrategy::ByTypeAndDimension,
    };
    let auto_campaign = AutoCampaign {
        id: Uuid::new_v4(),
        name: "sidebar promo".to_string(),
        format_id: format.id,
        campaign_id: campaign.id,
        base: BaseCreative {
            title: "Promo".to_string(),
            description: String::new(),
            creative: Creative::Html {
                html_content: "<b>Promo</b>".to_string(),
            },
            target_url: "https://example.com/promo".to_string(),
            target_type: TargetType::Internal,
            weight: 5,
        },
        targeting: None,
        auto_optimize: true,
        auto_pause_low_performers: false,
        performance_threshold_ctr: 0.5,
        performance_score: 0.0,
        last_optimization_run: None,
    };
    let auto_campaign_id = auto_campaign.id;
    let store = Arc::new(AutoCampaignStore::from_definitions(vec![format], vec![auto_campaign]));

    let counters = Arc::new(CounterStore::local());
    let ledger = Arc::new(MemoryLedger::new());
    let engine = Arc::new(DecisionEngine::new(
        ServingConfig::default(),
        zones.clone(),
        catalog.clone(),
        counters.clone(),
        ledger.clone(),
        WeightedSelector::seeded(7),
    ));
    let matcher = Arc::new(FormatMatcher::new(store.clone(), zones, catalog.clone()));
    let optimizer = Arc::new(Optimizer::new(
        store,
        matcher.clone(),
        catalog,
        counters,
        OptimizerConfig::default(),
    ));

    TestApp {
        state: AppState {
            engine,
            matcher,
            optimizer,
            node_id: "test-node".to_string(),
            start_time: Instant::now(),
        },
        ledger,
        campaign_id: campaign.id,
        ad_ids,
        auto_campaign_id,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get_with_headers(app: Router, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
