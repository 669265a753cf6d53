use async_trait::async_trait;

use crate::storage::{RelayStorage, StorageResult};

/// One settled charge, keyed by the request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostRecord {
    pub account_id: i64,
    pub request_id: String,
    pub quota: i64,
}

/// Durable target for cost records.
#[async_trait]
pub trait CostStore: Send + Sync {
    async fn insert_cost(&self, record: &CostRecord) -> StorageResult<()>;
}

#[async_trait]
impl CostStore for RelayStorage {
    async fn insert_cost(&self, record: &CostRecord) -> StorageResult<()> {
        RelayStorage::insert_cost(self, record.account_id, &record.request_id, record.quota).await
    }
}

/// Signed balance change; negative values are charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDelta {
    pub account_id: i64,
    pub delta: i64,
}

/// Receives in-memory balance mutations for asynchronous persistence.
///
/// Called on the request path, so implementations must not block.
pub trait QuotaSink: Send + Sync {
    fn submit(&self, delta: QuotaDelta);
}

#[derive(Debug, Default)]
pub struct NoopQuotaSink;

impl QuotaSink for NoopQuotaSink {
    fn submit(&self, _delta: QuotaDelta) {}
}
