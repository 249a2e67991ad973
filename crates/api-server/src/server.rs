//! HTTP server and metrics exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use loomads_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Every route the service exposes, with middleware applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Serving
        .route("/zone/:code/ad", get(rest::get_zone_ad))
        .route("/zone/:code/ads/:count", get(rest::get_zone_ads))
        .route("/track/click/:ad_id", post(rest::track_click))
        // Auto-campaign administration
        .route("/admin/auto-campaigns/sync", post(rest::sync_auto_campaigns))
        .route("/admin/auto-campaigns/optimize", post(rest::optimize_auto_campaigns))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Install the Prometheus recorder and its scrape listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
