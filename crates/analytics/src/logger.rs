//! Asynchronous record logger that batches impressions and clicks and writes
//! them to ClickHouse. Submission never blocks the decision path.

use crate::ledger::RecordSink;
use clickhouse::Row;
use loomads_core::config::ClickHouseConfig;
use loomads_core::types::{ClickRecord, DeviceClass, ImpressionRecord, RequesterAttributes};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 100_000;
const TABLE: &str = "ad_events";

/// One row of the `ad_events` table.
#[derive(Debug, Clone, Row, Serialize)]
struct EventRow {
    #[serde(with = "clickhouse::serde::uuid")]
    id: Uuid,
    event_type: &'static str,
    #[serde(with = "clickhouse::serde::uuid")]
    ad_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    campaign_id: Uuid,
    zone_code: String,
    session_id: Option<String>,
    device: Option<String>,
    browser: Option<String>,
    os: Option<String>,
    app: Option<String>,
    url: Option<String>,
    referrer: Option<String>,
    ip: Option<String>,
    authenticated: bool,
    attributed: bool,
    /// DateTime64(3) travels as milliseconds since the epoch.
    timestamp: i64,
}

impl EventRow {
    fn new(
        event_type: &'static str,
        (id, ad_id, campaign_id): (Uuid, Uuid, Uuid),
        zone_code: String,
        requester: RequesterAttributes,
        attributed: bool,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id,
            event_type,
            ad_id,
            campaign_id,
            zone_code,
            session_id: requester.session_id,
            device: requester.device.map(|d| {
                match d {
                    DeviceClass::Desktop => "desktop",
                    DeviceClass::Mobile => "mobile",
                    DeviceClass::Tablet => "tablet",
                }
                .to_string()
            }),
            browser: requester.browser,
            os: requester.os,
            app: requester.app,
            url: requester.url,
            referrer: requester.referrer,
            ip: requester.ip,
            authenticated: requester.authenticated,
            attributed,
            timestamp: timestamp_ms,
        }
    }
}

impl From<ImpressionRecord> for EventRow {
    fn from(r: ImpressionRecord) -> Self {
        let ts = r.timestamp.timestamp_millis();
        EventRow::new("impression", (r.id, r.ad_id, r.campaign_id), r.zone_code, r.requester, true, ts)
    }
}

impl From<ClickRecord> for EventRow {
    fn from(r: ClickRecord) -> Self {
        let ts = r.timestamp.timestamp_millis();
        EventRow::new("click", (r.id, r.ad_id, r.campaign_id), r.zone_code, r.requester, r.attributed, ts)
    }
}

/// Record logger with background batch writer.
pub struct AnalyticsLogger {
    sender: mpsc::Sender<EventRow>,
}

impl AnalyticsLogger {
    /// Create a new logger and spawn the background writer.
    pub async fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel::<EventRow>(CHANNEL_CAPACITY);

        let writer = BatchWriter::new(config).await?;
        let batch_size = config.batch_size;
        let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms);

        tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await;
        });

        info!("Analytics logger initialized with ClickHouse backend");

        Ok(Self { sender })
    }

    fn submit(&self, row: EventRow) {
        if let Err(e) = self.sender.try_send(row) {
            metrics::counter!("analytics.dropped").increment(1);
            warn!("Analytics record dropped: {}", e);
        } else {
            metrics::counter!("analytics.queued").increment(1);
        }
    }
}

impl RecordSink for AnalyticsLogger {
    fn record_impression(&self, record: ImpressionRecord) {
        self.submit(record.into());
    }

    fn record_click(&self, record: ClickRecord) {
        self.submit(record.into());
    }
}

/// Background writer that batches rows and flushes to ClickHouse.
struct BatchWriter {
    client: clickhouse::Client,
}

impl BatchWriter {
    async fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        let client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        Self::ensure_schema(&client).await?;

        Ok(Self { client })
    }

    async fn ensure_schema(client: &clickhouse::Client) -> anyhow::Result<()> {
        client
            .query(
                "CREATE TABLE IF NOT EXISTS ad_events (
                    id UUID,
                    event_type LowCardinality(String),
                    ad_id UUID,
                    campaign_id UUID,
                    zone_code String,
                    session_id Nullable(String),
                    device Nullable(String),
                    browser Nullable(String),
                    os Nullable(String),
                    app Nullable(String),
                    url Nullable(String),
                    referrer Nullable(String),
                    ip Nullable(String),
                    authenticated Bool,
                    attributed Bool,
                    timestamp DateTime64(3)
                ) ENGINE = MergeTree()
                ORDER BY (timestamp, event_type, zone_code)
                PARTITION BY toYYYYMM(timestamp)",
            )
            .execute()
            .await?;

        info!("ClickHouse schema verified");
        Ok(())
    }

    async fn run(
        self,
        mut receiver: mpsc::Receiver<EventRow>,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) {
        let mut buffer: Vec<EventRow> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                received = receiver.recv() => {
                    match received {
                        Some(row) => {
                            buffer.push(row);
                            if buffer.len() >= batch_size {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => {
                            self.flush(&mut buffer).await;
                            debug!("Analytics channel closed, writer exiting");
                            return;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<EventRow>) {
        let count = buffer.len();
        debug!(count = count, "Flushing analytics batch to ClickHouse");

        match self.write_batch(buffer).await {
            Ok(()) => {
                metrics::counter!("analytics.flushed").increment(count as u64);
                debug!(count = count, "Analytics batch flushed successfully");
            }
            Err(e) => {
                metrics::counter!("analytics.flush_errors").increment(1);
                error!(error = %e, count = count, "Failed to flush analytics batch");
            }
        }

        buffer.clear();
    }

    async fn write_batch(&self, rows: &[EventRow]) -> anyhow::Result<()> {
        let mut insert = self.client.insert::<EventRow>(TABLE)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}
