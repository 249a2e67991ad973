use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::Deserialize;

/// Root application configuration. Loaded from an optional `loomads.toml`
/// file and environment variables with the prefix `LOOMADS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// When disabled, counters and dedup markers live in process memory.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_daily_key_ttl_secs")]
    pub daily_key_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    /// When disabled, impression/click records go to the in-memory ledger.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_db")]
    pub database: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Serving switches. Built once at startup and handed to the decision
/// engine; there is no global settings object.
#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Apps whose zones are switched off. A zone owned by one of these apps
    /// is treated as inactive.
    #[serde(default)]
    pub disabled_apps: Vec<String>,
    /// Offset of the local clock used for weekday, hour and "today".
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_max_batch_ads")]
    pub max_batch_ads: usize,
    /// Total attempts for a counter update, first try included. Values
    /// below 2 are raised to 2.
    #[serde(default = "default_counter_update_attempts")]
    pub counter_update_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// JSON definitions snapshot written by the management layer.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_optimizer_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub min_impressions_for_pause: u64,
    #[serde(default = "default_true")]
    pub rebalance_weights: bool,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_key_prefix() -> String {
    "loomads".to_string()
}
fn default_daily_key_ttl_secs() -> u64 {
    2 * 86_400
}
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}
fn default_clickhouse_db() -> String {
    "loomads".to_string()
}
fn default_batch_size() -> usize {
    5000
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_dedup_window_secs() -> u64 {
    30
}
fn default_max_batch_ads() -> usize {
    10
}
fn default_counter_update_attempts() -> u32 {
    2
}
fn default_refresh_interval_secs() -> u64 {
    60
}
fn default_optimizer_interval_secs() -> u64 {
    3600
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            urls: default_redis_urls(),
            key_prefix: default_key_prefix(),
            daily_key_ttl_secs: default_daily_key_ttl_secs(),
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_clickhouse_url(),
            database: default_clickhouse_db(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_apps: Vec::new(),
            utc_offset_minutes: 0,
            dedup_window_secs: default_dedup_window_secs(),
            max_batch_ads: default_max_batch_ads(),
            counter_update_attempts: default_counter_update_attempts(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_optimizer_interval_secs(),
            min_impressions_for_pause: 0,
            rebalance_weights: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            redis: RedisConfig::default(),
            clickhouse: ClickHouseConfig::default(),
            serving: ServingConfig::default(),
            catalog: CatalogConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl ServingConfig {
    /// Whether zones owned by `app` may serve. Zones without an owning app
    /// follow the global switch only.
    pub fn app_enabled(&self, app: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        match app {
            Some(app) => !self
                .disabled_apps
                .iter()
                .any(|disabled| disabled.eq_ignore_ascii_case(app)),
            None => true,
        }
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| {
            tracing::warn!(
                utc_offset_minutes = self.utc_offset_minutes,
                "Out-of-range UTC offset, falling back to UTC"
            );
            Utc.fix()
        })
    }

    /// Session dedup window. Values too large for a `Duration` saturate.
    pub fn dedup_window(&self) -> Duration {
        i64::try_from(self.dedup_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

impl AppConfig {
    /// Load configuration from an optional config file and environment
    /// variables. Environment wins over the file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(path.unwrap_or("loomads")).required(path.is_some()));

        builder = builder.add_source(
            config::Environment::with_prefix("LOOMADS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
