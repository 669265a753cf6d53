use bytes::{Bytes, BytesMut};
use relaygate_protocol::{ApiError, ErrorBody, ErrorWithStatusCode, RelayMode, UnifiedRequest};
use relaygate_provider_core::{
    ApiType, Channel, RelayMeta, RelayReply, StreamReply, UpstreamBody, UpstreamFailure,
    UpstreamHttpResponse, is_json_content_type,
};
use tracing::debug;

use super::settlement::{Pricing, ReservationGuard};
use super::{RelayEngine, RelayRequest, RelayResponse};
use crate::billing::{estimate_cost, image_quota};
use crate::error::RelayError;
use crate::meta::resolve_meta;

impl RelayEngine {
    /// One pass of Admitting → Converting → Dispatching → Responding → Settling.
    ///
    /// Every failure after admission refunds before returning.
    pub(super) async fn execute_attempt(
        &self,
        request: &RelayRequest,
        unified: &UnifiedRequest,
        channel: &Channel,
    ) -> Result<RelayResponse, RelayError> {
        let meta = resolve_meta(request, unified, channel);
        let adaptor = self
            .registry
            .get(meta.api_type)
            .ok_or(RelayError::InvalidApiType(meta.api_type.as_str()))?;

        trace_state(&meta, "admitting");
        let pricing = Pricing {
            model_ratio: self.ratios.model_ratio(&meta.actual_model),
            completion_ratio: self.ratios.completion_ratio(&meta.actual_model),
            channel_ratio: meta.channel_ratio,
        };
        let estimate = if meta.mode == RelayMode::ImagesGenerations {
            image_quota(unified, pricing.model_ratio, pricing.channel_ratio)
        } else {
            estimate_cost(
                unified,
                meta.prompt_tokens,
                self.config.pre_consumed_tokens,
                pricing.model_ratio * pricing.channel_ratio,
            )
        };
        let reservation = self
            .ledger
            .pre_consume(meta.account_id, estimate)
            .map_err(RelayError::InsufficientQuota)?;
        let guard = ReservationGuard::new(
            reservation,
            self.settlement.clone(),
            meta.request_id.clone(),
            pricing,
        );

        trace_state(&meta, "converting");
        let body = if is_passthrough(&meta) {
            request.body.clone()
        } else {
            match adaptor.convert_request(&meta, unified) {
                Ok(body) => body,
                Err(err) => {
                    guard.refund();
                    return Err(RelayError::Conversion(err));
                }
            }
        };

        trace_state(&meta, "dispatching");
        let dispatched = tokio::time::timeout(
            self.config.dispatch_timeout,
            adaptor.do_request(self.client.as_ref(), &meta, body),
        )
        .await;
        let response = match dispatched {
            Ok(Ok(response)) => response,
            Ok(Err(UpstreamFailure::Request(err))) => {
                guard.refund();
                return Err(RelayError::BuildRequest(err));
            }
            Ok(Err(failure)) => {
                guard.refund();
                return Err(RelayError::Upstream(ErrorWithStatusCode::wrap(
                    failure,
                    "do_request_failed",
                    500,
                )));
            }
            Err(_) => {
                guard.refund();
                return Err(RelayError::Upstream(ErrorWithStatusCode::wrap(
                    "upstream did not respond in time",
                    "do_request_failed",
                    504,
                )));
            }
        };

        if is_error_response(&meta, &response) {
            trace_state(&meta, "erroring");
            guard.refund();
            let status = response.status;
            let body = read_body(response.body).await;
            return Err(RelayError::Upstream(decode_upstream_error(status, &body)));
        }

        trace_state(&meta, "responding");
        let reply = match adaptor.do_response(&meta, response).await {
            Ok(reply) => reply,
            Err(err) => {
                guard.refund();
                return Err(RelayError::Upstream(err));
            }
        };

        let fixed_quota = (meta.mode == RelayMode::ImagesGenerations).then(|| guard.amount());
        match reply {
            RelayReply::Buffered(reply) => {
                trace_state(&meta, "settling");
                // Queued now; the worker charges independently of body delivery.
                guard.settle(Some(reply.usage), fixed_quota);
                Ok(RelayResponse::Buffered(reply))
            }
            RelayReply::Stream(StreamReply {
                status,
                body,
                outcome,
                ..
            }) => {
                tokio::spawn(async move {
                    // A vanished pump drops the guard, which charges the reservation.
                    if let Ok(outcome) = outcome.await {
                        trace_state(&meta, "settling");
                        debug!(
                            event = "stream_finished",
                            request_id = %meta.request_id,
                            completed = outcome.completed,
                            usage = ?outcome.usage
                        );
                        guard.settle(outcome.usage, fixed_quota);
                    }
                });
                Ok(RelayResponse::Stream { status, body })
            }
        }
    }
}

/// OpenAI-compatible channels receive the caller's bytes untouched unless the
/// model was remapped or the vendor needs a rewrite.
fn is_passthrough(meta: &RelayMeta) -> bool {
    meta.api_type == ApiType::OpenAI
        && !meta.is_model_mapped
        && !meta.channel_type.forces_body_rewrite()
}

fn is_error_response(meta: &RelayMeta, response: &UpstreamHttpResponse) -> bool {
    !response.is_success() || (meta.is_stream && is_json_content_type(&response.headers))
}

/// Turns an upstream error body into the caller-facing error, keeping the
/// upstream status.
pub fn decode_upstream_error(status: u16, body: &[u8]) -> ErrorWithStatusCode {
    let parsed = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .filter(|error| !error.message.is_empty());
    let error = parsed.unwrap_or_else(|| {
        let mut error = ApiError::new(
            format!("bad response status code {status}"),
            "upstream_error",
            "bad_response_status_code",
        );
        error.param = status.to_string();
        error
    });
    ErrorWithStatusCode::new(status, error)
}

async fn read_body(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut out = BytesMut::new();
            while let Some(chunk) = rx.recv().await {
                out.extend_from_slice(&chunk);
            }
            out.freeze()
        }
    }
}

fn trace_state(meta: &RelayMeta, state: &'static str) {
    debug!(
        event = "relay_state",
        request_id = %meta.request_id,
        channel_id = meta.channel_id,
        mode = %meta.mode,
        state
    );
}
