//! The relay engine: validation, channel failover and per-attempt execution.

mod executor;
pub mod retry;
pub mod settlement;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relaygate_common::GlobalConfig;
use relaygate_protocol::{ErrorWithStatusCode, RelayMode};
use relaygate_provider_core::{
    AdaptorRegistry, BufferedReply, ByteStream, Channel, ChannelPool, UpstreamClient,
};
use relaygate_storage::CostStore;
use tracing::{debug, info};

use crate::auth::TokenContext;
use crate::billing::{QuotaLedger, RatioTable};
use crate::classify::parse_relay_request;
use crate::error::RelayError;

pub use executor::decode_upstream_error;
pub use retry::{RetryDecision, next_attempt, parse_retry_budget, should_disable_channel};
pub use settlement::{Pricing, ReservationGuard, SettlementConfig, SettlementJob, SettlementQueue};

use self::retry::surface_error;

/// One authenticated inbound call.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub request_id: String,
    pub mode: RelayMode,
    pub path: String,
    pub query: Option<String>,
    pub body: Bytes,
    pub token: TokenContext,
}

#[derive(Debug)]
pub enum RelayResponse {
    Buffered(BufferedReply),
    Stream { status: u16, body: ByteStream },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub retry_times: u32,
    pub pre_consumed_tokens: u32,
    pub dispatch_timeout: Duration,
    pub auto_disable_channel: bool,
}

impl RelayConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            retry_times: global.retry_times,
            pre_consumed_tokens: global.pre_consumed_tokens,
            dispatch_timeout: global.dispatch_timeout(),
            auto_disable_channel: global.auto_disable_channel,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_global(&GlobalConfig::default())
    }
}

pub struct RelayEngineParts {
    pub config: RelayConfig,
    pub ratios: RatioTable,
    pub ledger: Arc<QuotaLedger>,
    pub pool: Arc<ChannelPool>,
    pub registry: AdaptorRegistry,
    pub client: Arc<dyn UpstreamClient>,
    pub costs: Arc<dyn CostStore>,
    pub settlement: SettlementConfig,
}

pub struct RelayEngine {
    config: RelayConfig,
    ratios: RatioTable,
    ledger: Arc<QuotaLedger>,
    pool: Arc<ChannelPool>,
    registry: AdaptorRegistry,
    client: Arc<dyn UpstreamClient>,
    settlement: SettlementQueue,
}

impl RelayEngine {
    /// Spawns the settlement worker, so it must run inside a tokio runtime.
    pub fn new(parts: RelayEngineParts) -> Self {
        let settlement = SettlementQueue::spawn(parts.ledger.clone(), parts.costs, parts.settlement);
        Self {
            config: parts.config,
            ratios: parts.ratios,
            ledger: parts.ledger,
            pool: parts.pool,
            registry: parts.registry,
            client: parts.client,
            settlement,
        }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Runs the request against successive untried channels until one
    /// succeeds, the error is not retryable, or the budget runs out.
    pub async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, ErrorWithStatusCode> {
        let unified = parse_relay_request(request.mode, &request.body)
            .map_err(|err| surface_error(err.into_status_error(), &request.request_id))?;
        debug!(event = "relay_state", request_id = %request.request_id, state = "validated");

        let mut budget = parse_retry_budget(request.query.as_deref(), self.config.retry_times);
        let mut tried = Vec::new();
        let mut last_error = None;
        loop {
            let Some(channel) = self.pool.select(&unified.model, &tried) else {
                let err = last_error.unwrap_or_else(|| RelayError::NoChannel(unified.model.clone()));
                return Err(surface_error(err.into_status_error(), &request.request_id));
            };
            tried.push(channel.id);

            let err = match self.execute_attempt(&request, &unified, &channel).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            self.disable_if_broken(&channel, &err).await;
            if !err.is_retryable() {
                return Err(surface_error(err.into_status_error(), &request.request_id));
            }
            match next_attempt(budget) {
                RetryDecision::Retry { remaining } => {
                    info!(
                        event = "relay_retry",
                        request_id = %request.request_id,
                        channel_id = channel.id,
                        remaining,
                        error = %err
                    );
                    budget = remaining;
                    last_error = Some(err);
                }
                RetryDecision::Exhausted => {
                    return Err(surface_error(err.into_status_error(), &request.request_id));
                }
            }
        }
    }

    async fn disable_if_broken(&self, channel: &Channel, err: &RelayError) {
        if !self.config.auto_disable_channel {
            return;
        }
        let RelayError::Upstream(upstream) = err else {
            return;
        };
        if should_disable_channel(upstream.status_code(), upstream.error()) {
            self.pool.disable(channel.id, upstream.message()).await;
        }
    }
}
