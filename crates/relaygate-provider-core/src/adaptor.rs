use async_trait::async_trait;
use bytes::Bytes;
use relaygate_protocol::{ErrorWithStatusCode, UnifiedRequest, Usage};
use tokio::sync::mpsc;

use crate::channel::ApiType;
use crate::errors::AdaptorResult;
use crate::headers::Headers;
use crate::meta::RelayMeta;
use crate::stream::{StreamReply, StreamTranscoder, spawn_stream_pump};
use crate::upstream::{
    UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
};

/// Fully decoded non-streaming reply.
#[derive(Debug, Clone)]
pub struct BufferedReply {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    pub usage: Usage,
}

#[derive(Debug)]
pub enum RelayReply {
    Buffered(BufferedReply),
    Stream(StreamReply),
}

/// Translator between the unified model and one upstream API family.
#[async_trait]
pub trait Adaptor: Send + Sync {
    fn api_type(&self) -> ApiType;

    fn name(&self) -> &'static str;

    /// Builds the provider request body from the unified request.
    fn convert_request(&self, meta: &RelayMeta, request: &UnifiedRequest)
    -> AdaptorResult<Bytes>;

    /// URL, auth and provider headers for an already converted body.
    fn build_request(&self, meta: &RelayMeta, body: Bytes) -> AdaptorResult<UpstreamHttpRequest>;

    /// Decodes a complete upstream body into the caller-facing payload and usage.
    fn decode_buffered(
        &self,
        meta: &RelayMeta,
        status: u16,
        headers: &Headers,
        body: Bytes,
    ) -> Result<BufferedReply, ErrorWithStatusCode>;

    fn stream_transcoder(&self, meta: &RelayMeta) -> Box<dyn StreamTranscoder>;

    /// Performs the upstream call. Status and headers come back unmodified.
    async fn do_request(
        &self,
        client: &dyn UpstreamClient,
        meta: &RelayMeta,
        body: Bytes,
    ) -> Result<UpstreamHttpResponse, UpstreamFailure> {
        let request = self
            .build_request(meta, body)
            .map_err(UpstreamFailure::Request)?;
        client.send(request).await
    }

    async fn do_response(
        &self,
        meta: &RelayMeta,
        response: UpstreamHttpResponse,
    ) -> Result<RelayReply, ErrorWithStatusCode> {
        let UpstreamHttpResponse {
            status,
            headers,
            body,
        } = response;
        if !meta.is_stream {
            let body = match body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(rx) => collect_stream(rx).await,
            };
            return self
                .decode_buffered(meta, status, &headers, body)
                .map(RelayReply::Buffered);
        }

        let upstream = match body {
            UpstreamBody::Stream(rx) => rx,
            UpstreamBody::Bytes(bytes) => {
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(bytes);
                rx
            }
        };
        let (body, outcome) = spawn_stream_pump(upstream, self.stream_transcoder(meta));
        Ok(RelayReply::Stream(StreamReply {
            status,
            headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
            body,
            outcome,
        }))
    }
}

async fn collect_stream(mut rx: mpsc::Receiver<Bytes>) -> Bytes {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    Bytes::from(out)
}
