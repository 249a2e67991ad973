//! REST handlers for ad serving, click tracking, auto-campaign
//! administration and operational probes.

use crate::context::{request_context, ContextQuery};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use loomads_autocampaign::{FormatMatcher, OptimizationReport, Optimizer, SyncReport};
use loomads_core::types::{AdDecision, Decision};
use loomads_engine::{DecisionEngine, DecisionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub matcher: Arc<FormatMatcher>,
    pub optimizer: Arc<Optimizer>,
    pub node_id: String,
    pub start_time: Instant,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn decision_error(e: DecisionError) -> (StatusCode, Json<ErrorResponse>) {
    let error = match &e {
        DecisionError::ZoneNotFound(_) => "zone_not_found",
        DecisionError::AdNotFound(_) => "ad_not_found",
    };
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: error.to_string(),
            message: e.to_string(),
        }),
    )
}

/// Either an advertisement or the empty-zone marker. Both are 200s; only an
/// unknown zone is a 404.
#[derive(Serialize)]
#[serde(untagged)]
pub enum ZoneAdResponse {
    Ad(AdDecision),
    Empty(ErrorResponse),
}

/// `GET /zone/:code/ad`: Pick one advertisement for a zone.
pub async fn get_zone_ad(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ContextQuery>,
    headers: HeaderMap,
) -> ApiResult<ZoneAdResponse> {
    let ctx = request_context(&headers, &query);
    match state.engine.decide(&code, &ctx).await.map_err(decision_error)? {
        Decision::Served(ad) => Ok(Json(ZoneAdResponse::Ad(ad))),
        Decision::NoAdsAvailable => Ok(Json(ZoneAdResponse::Empty(ErrorResponse {
            error: "no_ads_available".to_string(),
            message: format!("No advertisements available for zone {code}"),
        }))),
    }
}

#[derive(Serialize, Deserialize)]
pub struct BatchResponse {
    pub ads: Vec<AdDecision>,
    pub count: usize,
}

/// `GET /zone/:code/ads/:count`: Up to `count` distinct advertisements.
pub async fn get_zone_ads(
    State(state): State<AppState>,
    Path((code, count)): Path<(String, i64)>,
    Query(query): Query<ContextQuery>,
    headers: HeaderMap,
) -> ApiResult<BatchResponse> {
    let ctx = request_context(&headers, &query);
    let count = usize::try_from(count.max(1)).unwrap_or(usize::MAX);
    let ads = state
        .engine
        .decide_many(&code, &ctx, count)
        .await
        .map_err(decision_error)?;
    Ok(Json(BatchResponse {
        count: ads.len(),
        ads,
    }))
}

#[derive(Deserialize)]
pub struct ClickRequest {
    pub zone_code: String,
}

#[derive(Serialize, Deserialize)]
pub struct ClickResponse {
    pub status: String,
    pub recorded: bool,
    pub attributed: bool,
}

/// `POST /track/click/:ad_id`: Record a click on a served advertisement.
pub async fn track_click(
    State(state): State<AppState>,
    Path(ad_id): Path<Uuid>,
    Query(query): Query<ContextQuery>,
    headers: HeaderMap,
    Json(request): Json<ClickRequest>,
) -> ApiResult<ClickResponse> {
    if request.zone_code.trim().is_empty() {
        metrics::counter!("api.validation_errors").increment(1);
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_click".to_string(),
                message: "zone_code must not be empty".to_string(),
            }),
        ));
    }

    let ctx = request_context(&headers, &query);
    let ack = state
        .engine
        .record_click(ad_id, &request.zone_code, &ctx)
        .await
        .map_err(|e| {
            warn!(ad_id = %ad_id, error = %e, "Click for unknown advertisement");
            decision_error(e)
        })?;
    debug!(ad_id = %ad_id, recorded = ack.recorded, attributed = ack.attributed, "Click tracked");

    Ok(Json(ClickResponse {
        status: "success".to_string(),
        recorded: ack.recorded,
        attributed: ack.attributed,
    }))
}

/// `POST /admin/auto-campaigns/sync`: Generate missing auto-campaign ads.
pub async fn sync_auto_campaigns(State(state): State<AppState>) -> Json<SyncReport> {
    Json(state.matcher.sync_all(Utc::now()))
}

/// `POST /admin/auto-campaigns/optimize`: Score and prune auto-campaigns.
pub async fn optimize_auto_campaigns(State(state): State<AppState>) -> Json<OptimizationReport> {
    Json(state.optimizer.optimize_all(Utc::now()).await)
}

/// `GET /health`: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        zones: state.engine.zones().len(),
        advertisements: state.engine.catalog().ad_count(),
    })
}

/// `GET /ready`: Ready once zone definitions are loaded.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.engine.zones().is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// `GET /live`: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub zones: usize,
    pub advertisements: usize,
}
