use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use relaygate_provider_core::ChannelStatus;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::sinks::QuotaDelta;
use crate::storage::{RelayStorage, StorageResult};

#[derive(Debug, Clone)]
pub enum ControlEvent {
    ChannelStatus {
        channel_id: i64,
        status: ChannelStatus,
        reason: Option<String>,
        at: OffsetDateTime,
    },
}

#[derive(Debug, Clone)]
pub struct StorageBusConfig {
    pub control_capacity: usize,
    pub quota_capacity: usize,
    pub flush_interval: Duration,
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl Default for StorageBusConfig {
    fn default() -> Self {
        Self {
            control_capacity: 1024,
            quota_capacity: 65_536,
            flush_interval: Duration::from_millis(200),
            retry_delay: Duration::from_millis(200),
            max_attempts: 3,
        }
    }
}

/// Background writers fed by bounded channels.
pub struct StorageBus {
    pub control_tx: mpsc::Sender<ControlEvent>,
    pub quota_tx: mpsc::Sender<QuotaDelta>,
    _handles: Vec<JoinHandle<()>>,
}

impl StorageBus {
    pub fn spawn(storage: RelayStorage, config: StorageBusConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel(config.control_capacity);
        let (quota_tx, quota_rx) = mpsc::channel(config.quota_capacity);

        let handles = vec![
            tokio::spawn(control_writer(storage.clone(), control_rx, config.clone())),
            tokio::spawn(quota_writer(storage, quota_rx, config)),
        ];

        Self {
            control_tx,
            quota_tx,
            _handles: handles,
        }
    }
}

async fn control_writer(
    storage: RelayStorage,
    mut rx: mpsc::Receiver<ControlEvent>,
    config: StorageBusConfig,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ControlEvent::ChannelStatus {
                channel_id,
                status,
                reason,
                at,
            } => {
                retry_write(
                    "channel_status",
                    || storage.set_channel_status(channel_id, status, reason.clone(), at),
                    &config,
                )
                .await;
            }
        }
    }
}

/// Deltas are merged per account and flushed on a timer.
async fn quota_writer(
    storage: RelayStorage,
    mut rx: mpsc::Receiver<QuotaDelta>,
    config: StorageBusConfig,
) {
    let mut pending: HashMap<i64, i64> = HashMap::new();
    let mut ticker = tokio_time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(delta) = rx.recv() => {
                *pending.entry(delta.account_id).or_default() += delta.delta;
            }
            _ = ticker.tick() => {
                flush_quota(&storage, &mut pending, &config).await;
            }
            else => {
                flush_quota(&storage, &mut pending, &config).await;
                break;
            }
        }
    }
}

async fn flush_quota(
    storage: &RelayStorage,
    pending: &mut HashMap<i64, i64>,
    config: &StorageBusConfig,
) {
    for (account_id, delta) in pending.drain() {
        if delta == 0 {
            continue;
        }
        retry_write(
            "quota_delta",
            || storage.apply_quota_delta(account_id, delta),
            config,
        )
        .await;
    }
}

async fn retry_write<F, Fut>(label: &'static str, mut f: F, config: &StorageBusConfig)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<()>>,
{
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        match f().await {
            Ok(()) => {
                debug!(event = "storage_write", kind = label, attempt);
                return;
            }
            Err(err) if attempt < attempts => {
                warn!(event = "storage_write_retry", kind = label, attempt, error = %err);
                tokio_time::sleep(config.retry_delay).await;
            }
            Err(err) => {
                error!(event = "storage_write_failed", kind = label, attempt, error = %err);
            }
        }
    }
}
