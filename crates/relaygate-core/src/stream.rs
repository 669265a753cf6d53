use std::convert::Infallible;

use axum::body::Body;
use bytes::Bytes;
use http::HeaderValue;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderMap, TRANSFER_ENCODING};
use relaygate_provider_core::ByteStream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

pub fn apply_event_stream_headers(headers: &mut HeaderMap) {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
}

/// Response body fed by the pump. Dropping the body drops the receiver,
/// which the pump observes as a client disconnect.
pub fn stream_body(rx: ByteStream) -> Body {
    Body::from_stream(ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>))
}
