use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use relaygate_common::new_request_id;
use relaygate_protocol::{ErrorWithStatusCode, RelayMode};
use relaygate_provider_core::BufferedReply;
use tracing::{info, warn};

use crate::classify::classify_path;
use crate::core::CoreState;
use crate::error::{invalid_url, not_implemented};
use crate::relay::{RelayRequest, RelayResponse};
use crate::stream::{apply_event_stream_headers, stream_body};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Upstream headers that describe the upstream connection, not the payload.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    "x-request-id",
];

pub async fn relay_handler(
    State(state): State<Arc<CoreState>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let started_at = Instant::now();
    let request_id = request_id(&headers);
    let token = match state.auth.authenticate(&headers) {
        Ok(token) => token,
        Err(err) => return error_response(err, &request_id),
    };

    let path = uri.path().to_string();
    let mode = classify_path(&path);
    if mode == RelayMode::Audio {
        return error_response(not_implemented(), &request_id);
    }
    info!(
        event = "downstream_received",
        request_id = %request_id,
        mode = %mode,
        method = %method,
        path = %path,
        account_id = token.account_id,
        token_id = token.token_id
    );

    let result = state
        .engine
        .relay(RelayRequest {
            request_id: request_id.clone(),
            mode,
            path,
            query: uri.query().map(str::to_string),
            body,
            token,
        })
        .await;
    match result {
        Ok(RelayResponse::Buffered(reply)) => {
            info!(
                event = "downstream_responded",
                request_id = %request_id,
                mode = %mode,
                status = reply.status,
                prompt_tokens = reply.usage.prompt_tokens,
                completion_tokens = reply.usage.completion_tokens,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = false
            );
            buffered_response(reply, &request_id)
        }
        Ok(RelayResponse::Stream { status, body }) => {
            info!(
                event = "downstream_responded",
                request_id = %request_id,
                mode = %mode,
                status,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = true
            );
            let mut resp = Response::new(stream_body(body));
            *resp.status_mut() = status_code(status);
            apply_event_stream_headers(resp.headers_mut());
            with_request_id(resp, &request_id)
        }
        Err(err) => {
            warn!(
                event = "downstream_responded",
                request_id = %request_id,
                mode = %mode,
                status = err.status_code(),
                error = %err.message(),
                elapsed_ms = started_at.elapsed().as_millis()
            );
            error_response(err, &request_id)
        }
    }
}

pub async fn not_implemented_handler(headers: HeaderMap) -> Response {
    error_response(not_implemented(), &request_id(&headers))
}

pub async fn not_found_handler(method: Method, headers: HeaderMap, uri: Uri) -> Response {
    error_response(invalid_url(method.as_str(), uri.path()), &request_id(&headers))
}

/// Unmatched paths: a POST is relayed on the text path, anything else is 404.
pub async fn fallback_handler(
    state: State<Arc<CoreState>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    if method == Method::POST {
        relay_handler(state, method, headers, uri, body).await
    } else {
        not_found_handler(method, headers, uri).await
    }
}

fn buffered_response(reply: BufferedReply, request_id: &str) -> Response {
    let mut resp = Response::new(Body::from(reply.body));
    *resp.status_mut() = status_code(reply.status);
    for (name, value) in &reply.headers {
        if SKIPPED_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            resp.headers_mut().append(name, value);
        }
    }
    if !resp.headers().contains_key(CONTENT_TYPE) {
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    with_request_id(resp, request_id)
}

fn error_response(err: ErrorWithStatusCode, request_id: &str) -> Response {
    let mut resp = Response::new(Body::from(err.to_body()));
    *resp.status_mut() = status_code(err.status_code());
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    with_request_id(resp, request_id)
}

fn with_request_id(mut resp: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_request_id)
}
