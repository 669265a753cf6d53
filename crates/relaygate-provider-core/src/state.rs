use async_trait::async_trait;
use time::OffsetDateTime;

use crate::channel::{ChannelId, ChannelStatus};

#[derive(Debug, Clone)]
pub enum ChannelStateEvent {
    StatusChanged {
        channel_id: ChannelId,
        status: ChannelStatus,
        reason: Option<String>,
        at: OffsetDateTime,
    },
}

#[async_trait]
pub trait StateSink: Send + Sync {
    async fn submit(&self, event: ChannelStateEvent);
}

pub struct NoopStateSink;

#[async_trait]
impl StateSink for NoopStateSink {
    async fn submit(&self, _event: ChannelStateEvent) {}
}
