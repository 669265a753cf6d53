use std::sync::Arc;
use std::time::Duration;

use relaygate_protocol::Usage;
use relaygate_storage::{CostRecord, CostStore};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::billing::{QuotaLedger, Reservation, final_quota};
use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub channel_ratio: f64,
}

#[derive(Debug)]
pub struct SettlementJob {
    pub reservation: Reservation,
    pub request_id: String,
    pub pricing: Pricing,
    /// Observed usage; `None` charges the full reservation.
    pub usage: Option<Usage>,
    /// Charge that ignores usage (per-item pricing).
    pub fixed_quota: Option<i64>,
}

impl SettlementJob {
    pub fn quota(&self) -> i64 {
        if let Some(quota) = self.fixed_quota {
            return quota;
        }
        match &self.usage {
            Some(usage) => final_quota(
                usage,
                self.pricing.model_ratio,
                self.pricing.completion_ratio,
                self.pricing.channel_ratio,
            ),
            None => self.reservation.amount(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub capacity: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

struct SettlementWorker {
    ledger: Arc<QuotaLedger>,
    costs: Arc<dyn CostStore>,
    config: SettlementConfig,
}

/// Bounded queue drained by one worker; settlement never blocks a response.
#[derive(Clone)]
pub struct SettlementQueue {
    tx: mpsc::Sender<SettlementJob>,
    worker: Arc<SettlementWorker>,
}

impl SettlementQueue {
    pub fn spawn(
        ledger: Arc<QuotaLedger>,
        costs: Arc<dyn CostStore>,
        config: SettlementConfig,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SettlementJob>(config.capacity.max(1));
        let worker = Arc::new(SettlementWorker {
            ledger,
            costs,
            config,
        });
        let runner = worker.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                runner.process(job).await;
            }
        });
        Self { tx, worker }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.worker.ledger
    }

    pub fn submit(&self, job: SettlementJob) {
        let job = match self.tx.try_send(job) {
            Ok(()) => return,
            Err(TrySendError::Full(job)) => {
                warn!(event = "settlement_queue_full", request_id = %job.request_id);
                job
            }
            Err(TrySendError::Closed(job)) => job,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let worker = self.worker.clone();
                handle.spawn(async move { worker.process(job).await });
            }
            Err(_) => {
                let quota = job.quota();
                self.worker.ledger.settle(&job.reservation, quota);
                error!(
                    event = "settlement_failed",
                    request_id = %job.request_id,
                    error = "no runtime to record the cost"
                );
            }
        }
    }
}

impl SettlementWorker {
    async fn process(&self, job: SettlementJob) {
        let quota = job.quota();
        let Some(charged) = self.ledger.settle(&job.reservation, quota) else {
            debug!(event = "settlement_skipped", request_id = %job.request_id);
            return;
        };
        let record = CostRecord {
            account_id: job.reservation.account_id(),
            request_id: job.request_id,
            quota: charged,
        };

        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.costs.insert_cost(&record).await {
                Ok(()) => {
                    info!(
                        event = "settlement_recorded",
                        request_id = %record.request_id,
                        account_id = record.account_id,
                        reserved = job.reservation.amount(),
                        quota = charged
                    );
                    return;
                }
                Err(err) if attempt < attempts => {
                    warn!(event = "settlement_retry", request_id = %record.request_id, attempt, error = %err);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(err) => {
                    let err = RelayError::Settlement(err.to_string());
                    error!(event = "settlement_failed", request_id = %record.request_id, attempt, error = %err);
                }
            }
        }
    }
}

/// Owns a pending reservation for the duration of one attempt.
///
/// Dropping it while still pending settles at the full reserved amount.
pub struct ReservationGuard {
    reservation: Option<Reservation>,
    queue: SettlementQueue,
    request_id: String,
    pricing: Pricing,
}

impl ReservationGuard {
    pub fn new(
        reservation: Reservation,
        queue: SettlementQueue,
        request_id: String,
        pricing: Pricing,
    ) -> Self {
        Self {
            reservation: Some(reservation),
            queue,
            request_id,
            pricing,
        }
    }

    pub fn amount(&self) -> i64 {
        self.reservation
            .as_ref()
            .map(Reservation::amount)
            .unwrap_or_default()
    }

    pub fn refund(mut self) -> bool {
        match self.reservation.take() {
            Some(reservation) => self.queue.ledger().refund(&reservation),
            None => false,
        }
    }

    pub fn settle(mut self, usage: Option<Usage>, fixed_quota: Option<i64>) {
        if let Some(reservation) = self.reservation.take() {
            self.queue.submit(self.job(reservation, usage, fixed_quota));
        }
    }

    fn job(
        &self,
        reservation: Reservation,
        usage: Option<Usage>,
        fixed_quota: Option<i64>,
    ) -> SettlementJob {
        SettlementJob {
            reservation,
            request_id: self.request_id.clone(),
            pricing: self.pricing,
            usage,
            fixed_quota,
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        if reservation.is_pending() {
            debug!(event = "relay_state", request_id = %self.request_id, state = "cancelled");
            let job = self.job(reservation, None, None);
            self.queue.submit(job);
        }
    }
}
