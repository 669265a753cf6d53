use bytes::Bytes;
use relaygate_protocol::{ErrorWithStatusCode, RelayMode, UnifiedRequest};
use relaygate_provider_core::{
    Adaptor, AdaptorError, AdaptorResult, ApiType, BufferedReply, Headers, HttpMethod, RelayMeta,
    StreamTranscoder, UpstreamHttpRequest,
};

use super::openai::{OpenAIStreamTranscoder, decode_openai_buffered, encode_openai_body};
use crate::auth_extractor;

const ADAPTOR_NAME: &str = "azure";

/// Azure OpenAI deployments. Bodies and replies use the OpenAI wire format.
#[derive(Debug, Default)]
pub struct AzureAdaptor;

impl AzureAdaptor {
    pub fn new() -> Self {
        Self
    }
}

fn task_path(mode: RelayMode) -> AdaptorResult<&'static str> {
    match mode {
        RelayMode::ChatCompletions => Ok("chat/completions"),
        RelayMode::Completions => Ok("completions"),
        RelayMode::Embeddings => Ok("embeddings"),
        RelayMode::ImagesGenerations => Ok("images/generations"),
        other => Err(AdaptorError::UnsupportedMode(other)),
    }
}

/// Deployment names cannot contain dots (`gpt-3.5-turbo` → `gpt-35-turbo`).
fn deployment_id(model: &str) -> String {
    model.replace('.', "")
}

#[async_trait::async_trait]
impl Adaptor for AzureAdaptor {
    fn api_type(&self) -> ApiType {
        ApiType::Azure
    }

    fn name(&self) -> &'static str {
        ADAPTOR_NAME
    }

    fn convert_request(&self, meta: &RelayMeta, request: &UnifiedRequest) -> AdaptorResult<Bytes> {
        task_path(meta.mode)?;
        encode_openai_body(meta, request)
    }

    fn build_request(&self, meta: &RelayMeta, body: Bytes) -> AdaptorResult<UpstreamHttpRequest> {
        let task = task_path(meta.mode)?;
        let api_version = meta
            .query_param("api-version")
            .filter(|value| !value.is_empty())
            .or_else(|| meta.api_version.clone())
            .ok_or_else(|| AdaptorError::InvalidConfig("missing api-version".to_string()))?;
        if meta.base_url.is_empty() {
            return Err(AdaptorError::InvalidConfig("missing base_url".to_string()));
        }
        let url = format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            meta.base_url,
            deployment_id(&meta.actual_model),
            task,
            api_version
        );

        let mut headers = Headers::new();
        auth_extractor::set_header(&mut headers, "api-key", &meta.api_key);
        auth_extractor::set_content_type_json(&mut headers);
        auth_extractor::set_accept(&mut headers, meta.is_stream);
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(body),
            is_stream: meta.is_stream,
        })
    }

    fn decode_buffered(
        &self,
        meta: &RelayMeta,
        status: u16,
        headers: &Headers,
        body: Bytes,
    ) -> Result<BufferedReply, ErrorWithStatusCode> {
        decode_openai_buffered(meta, status, headers, body)
    }

    fn stream_transcoder(&self, meta: &RelayMeta) -> Box<dyn StreamTranscoder> {
        Box::new(OpenAIStreamTranscoder::new(meta))
    }
}
