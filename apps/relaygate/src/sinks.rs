use async_trait::async_trait;
use relaygate_provider_core::{ChannelStateEvent, StateSink};
use relaygate_storage::{ControlEvent, QuotaDelta, QuotaSink, StorageBus};
use tokio::sync::mpsc;
use tracing::warn;

/// Forwards channel state changes to the storage control lane.
pub(crate) struct BusStateSink {
    control_tx: mpsc::Sender<ControlEvent>,
}

impl BusStateSink {
    pub(crate) fn new(bus: &StorageBus) -> Self {
        Self {
            control_tx: bus.control_tx.clone(),
        }
    }
}

#[async_trait]
impl StateSink for BusStateSink {
    async fn submit(&self, event: ChannelStateEvent) {
        let ChannelStateEvent::StatusChanged {
            channel_id,
            status,
            reason,
            at,
        } = event;
        let event = ControlEvent::ChannelStatus {
            channel_id,
            status,
            reason,
            at,
        };
        if let Err(err) = self.control_tx.send(event).await {
            warn!(event = "channel_status_dropped", channel_id, error = %err);
        }
    }
}

/// Non-blocking: a full quota lane drops the delta with a warning.
pub(crate) struct BusQuotaSink {
    quota_tx: mpsc::Sender<QuotaDelta>,
}

impl BusQuotaSink {
    pub(crate) fn new(bus: &StorageBus) -> Self {
        Self {
            quota_tx: bus.quota_tx.clone(),
        }
    }
}

impl QuotaSink for BusQuotaSink {
    fn submit(&self, delta: QuotaDelta) {
        if let Err(err) = self.quota_tx.try_send(delta) {
            warn!(
                event = "quota_delta_dropped",
                account_id = delta.account_id,
                delta = delta.delta,
                error = %err
            );
        }
    }
}
