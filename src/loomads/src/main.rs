//! LoomAds: ad decision service.
//!
//! Loads zone and campaign definitions, wires the decision engine to its
//! counter store and record sink, starts the background loops and serves
//! HTTP.

use chrono::Utc;
use clap::Parser;
use loomads_analytics::{AnalyticsLogger, MemoryLedger, RecordSink};
use loomads_api::{ApiServer, AppState};
use loomads_autocampaign::{AutoCampaignStore, FormatMatcher, Optimizer};
use loomads_cache::CounterStore;
use loomads_core::config::AppConfig;
use loomads_core::CatalogSnapshot;
use loomads_engine::{CampaignCatalog, DecisionEngine, WeightedSelector, ZoneRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const MAINTENANCE_INTERVAL_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "loomads")]
#[command(about = "Ad decision engine for zone-based display advertising")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./loomads.toml when present)
    #[arg(long, short)]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "LOOMADS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "LOOMADS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Definitions snapshot to serve from (overrides config)
    #[arg(long, env = "LOOMADS__CATALOG__PATH")]
    catalog: Option<String>,

    /// Fixed seed for ad selection, for reproducible runs
    #[arg(long, env = "LOOMADS_RNG_SEED")]
    rng_seed: Option<u64>,
}

/// Everything a definitions refresh writes to.
#[derive(Clone)]
struct Definitions {
    zones: Arc<ZoneRegistry>,
    catalog: Arc<CampaignCatalog>,
    auto: Arc<AutoCampaignStore>,
}

impl Definitions {
    fn apply(&self, snapshot: CatalogSnapshot) {
        self.zones.replace_all(snapshot.zones);
        self.catalog
            .replace_managed(snapshot.campaigns, snapshot.advertisements);
        self.auto
            .replace_definitions(snapshot.auto_formats, snapshot.auto_campaigns);
    }

    async fn reload(&self, path: &str) -> anyhow::Result<()> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot = CatalogSnapshot::from_json(&raw)?;
        self.apply(snapshot);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loomads=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("LoomAds starting up");

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(path) = cli.catalog {
        config.catalog.path = Some(path);
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        catalog = ?config.catalog.path,
        redis = config.redis.enabled,
        clickhouse = config.clickhouse.enabled,
        "Configuration loaded"
    );

    // Definitions
    let definitions = Definitions {
        zones: Arc::new(ZoneRegistry::new()),
        catalog: Arc::new(CampaignCatalog::new()),
        auto: Arc::new(AutoCampaignStore::new()),
    };
    match config.catalog.path.as_deref() {
        Some(path) => {
            if let Err(e) = definitions.reload(path).await {
                error!(path, error = %e, "Failed to load definitions, starting empty");
            }
        }
        None => warn!("No catalog path configured, serving no zones"),
    }

    // Counters and record sink
    let counters = Arc::new(CounterStore::from_config(&config.redis).await);
    let sink: Arc<dyn RecordSink> = if config.clickhouse.enabled {
        match AnalyticsLogger::new(&config.clickhouse).await {
            Ok(logger) => Arc::new(logger),
            Err(e) => {
                error!(error = %e, "Failed to connect to ClickHouse, keeping records in memory");
                Arc::new(MemoryLedger::new())
            }
        }
    } else {
        info!("ClickHouse disabled, keeping records in memory");
        Arc::new(MemoryLedger::new())
    };

    // Decision engine and auto-campaigns
    let engine = Arc::new(DecisionEngine::new(
        config.serving.clone(),
        definitions.zones.clone(),
        definitions.catalog.clone(),
        counters.clone(),
        sink,
        WeightedSelector::with_seed(cli.rng_seed),
    ));
    let matcher = Arc::new(FormatMatcher::new(
        definitions.auto.clone(),
        definitions.zones.clone(),
        definitions.catalog.clone(),
    ));
    let optimizer = Arc::new(Optimizer::new(
        definitions.auto.clone(),
        matcher.clone(),
        definitions.catalog.clone(),
        counters.clone(),
        config.optimizer.clone(),
    ));

    let api_server = ApiServer::new(
        config.clone(),
        AppState {
            engine: engine.clone(),
            matcher: matcher.clone(),
            optimizer: optimizer.clone(),
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
        },
    );

    // Start metrics exporter
    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    // Spawn definitions refresh task
    if let Some(path) = config.catalog.path.clone() {
        let definitions = definitions.clone();
        let every = Duration::from_secs(config.catalog.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = definitions.reload(&path).await {
                    error!(path = %path, error = %e, "Definitions refresh failed, keeping previous");
                }
            }
        });
    }

    // Spawn auto-campaign sync and optimization task
    if config.optimizer.enabled {
        let every = Duration::from_secs(config.optimizer.interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let now = Utc::now();
                let synced = matcher.sync_all(now);
                let report = optimizer.optimize_all(now).await;
                info!(
                    created = synced.created,
                    optimized = report.campaigns.len(),
                    failed = report.failed.len() + synced.failed,
                    "Auto-campaign cycle finished"
                );
            }
        });
    }

    // Spawn counter maintenance task
    let window = config.serving.dedup_window();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let now = Utc::now();
            let removed = counters.maintenance(now, window, engine.local_day(now));
            if removed > 0 {
                info!(removed, "Counter maintenance purged stale entries");
            }
        }
    });

    info!("LoomAds is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
