use loomads_core::types::{ClickRecord, ImpressionRecord};
use parking_lot::RwLock;
use uuid::Uuid;

/// Destination for impression and click records. Records are immutable once
/// handed over; implementations must not block the caller.
pub trait RecordSink: Send + Sync {
    fn record_impression(&self, record: ImpressionRecord);
    fn record_click(&self, record: ClickRecord);
}

/// In-process append-only ledger. Backs single-node deployments without
/// ClickHouse and every test that inspects written records.
#[derive(Default)]
pub struct MemoryLedger {
    impressions: RwLock<Vec<ImpressionRecord>>,
    clicks: RwLock<Vec<ClickRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn impressions(&self) -> Vec<ImpressionRecord> {
        self.impressions.read().clone()
    }

    pub fn clicks(&self) -> Vec<ClickRecord> {
        self.clicks.read().clone()
    }

    pub fn impression_count(&self) -> usize {
        self.impressions.read().len()
    }

    pub fn click_count(&self) -> usize {
        self.clicks.read().len()
    }

    pub fn impressions_for(&self, ad_id: Uuid) -> usize {
        self.impressions.read().iter().filter(|r| r.ad_id == ad_id).count()
    }

    pub fn clicks_for(&self, ad_id: Uuid) -> usize {
        self.clicks.read().iter().filter(|r| r.ad_id == ad_id).count()
    }
}

impl RecordSink for MemoryLedger {
    fn record_impression(&self, record: ImpressionRecord) {
        self.impressions.write().push(record);
    }

    fn record_click(&self, record: ClickRecord) {
        self.clicks.write().push(record);
    }
}
