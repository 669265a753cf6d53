use bytes::Bytes;
use relaygate_protocol::{
    ChatCompletionChunk, CompletionsChunk, ErrorWithStatusCode, RelayMode, SseEvent, TextResponse,
    UnifiedRequest, Usage, encode_data_event, encode_done,
};
use relaygate_provider_core::{
    Adaptor, AdaptorResult, ApiType, BufferedReply, Headers, HttpMethod, RelayMeta,
    StreamTranscoder, UpstreamHttpRequest,
};
use serde_json::Value;

use crate::auth_extractor;
use crate::tokenizer;

const ADAPTOR_NAME: &str = "openai";

/// OpenAI and every OpenAI-compatible vendor.
#[derive(Debug, Default)]
pub struct OpenAIAdaptor;

impl OpenAIAdaptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Adaptor for OpenAIAdaptor {
    fn api_type(&self) -> ApiType {
        ApiType::OpenAI
    }

    fn name(&self) -> &'static str {
        ADAPTOR_NAME
    }

    fn convert_request(&self, meta: &RelayMeta, request: &UnifiedRequest) -> AdaptorResult<Bytes> {
        encode_openai_body(meta, request)
    }

    fn build_request(&self, meta: &RelayMeta, body: Bytes) -> AdaptorResult<UpstreamHttpRequest> {
        let url = match meta.upstream_query() {
            Some(query) => format!("{}{}?{}", meta.base_url, meta.request_path, query),
            None => format!("{}{}", meta.base_url, meta.request_path),
        };
        let mut headers = Headers::new();
        auth_extractor::set_bearer(&mut headers, &meta.api_key);
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

/// Re-serializes the unified request with the upstream model name.
///
/// Vendors with a forced rewrite additionally lose parameters they reject.
pub(crate) fn encode_openai_body(
    meta: &RelayMeta,
    request: &UnifiedRequest,
) -> AdaptorResult<Bytes> {
    let mut request = request.clone();
    if !meta.actual_model.is_empty() {
        request.model = meta.actual_model.clone();
    }
    if meta.channel_type.forces_body_rewrite() {
        let zero_penalty = request
            .extra
            .get("frequency_penalty")
            .and_then(Value::as_f64)
            .is_some_and(|value| value == 0.0);
        if zero_penalty {
            request.extra.remove("frequency_penalty");
        }
    }
    Ok(Bytes::from(request.to_vec()?))
}

/// The body is forwarded unchanged; only usage is extracted.
pub(crate) fn decode_openai_buffered(
    meta: &RelayMeta,
    status: u16,
    headers: &Headers,
    body: Bytes,
) -> Result<BufferedReply, ErrorWithStatusCode> {
    let response: TextResponse = serde_json::from_slice(&body)
        .map_err(|err| ErrorWithStatusCode::wrap(err, "unmarshal_response_body_failed", 500))?;
    if let Some(error) = response.error.as_ref().filter(|error| !error.kind.is_empty()) {
        return Err(ErrorWithStatusCode::new(status, error.clone()));
    }

    let usage = match response.usage.filter(|usage| !usage.is_empty()) {
        Some(usage) => usage,
        None => {
            let completion = tokenizer::count_text(&meta.actual_model, &response.completion_text());
            Usage::new(meta.prompt_tokens, completion)
        }
    };
    Ok(BufferedReply {
        status,
        headers: headers.clone(),
        body,
        usage,
    })
}

/// Passes OpenAI SSE frames through untouched while tracking usage.
pub(crate) struct OpenAIStreamTranscoder {
    model: String,
    mode: RelayMode,
    prompt_tokens: u64,
    completion_tokens: u64,
    reported: Option<Usage>,
    seen: bool,
}

impl OpenAIStreamTranscoder {
    pub(crate) fn new(meta: &RelayMeta) -> Self {
        Self {
            model: meta.actual_model.clone(),
            mode: meta.mode,
            prompt_tokens: meta.prompt_tokens,
            completion_tokens: 0,
            reported: None,
            seen: false,
        }
    }

    fn observe(&mut self, data: &str) {
        let (text, usage) = if self.mode == RelayMode::Completions {
            match serde_json::from_str::<CompletionsChunk>(data) {
                Ok(chunk) => {
                    let text: String = chunk
                        .choices
                        .iter()
                        .map(|choice| choice.text.as_str())
                        .collect();
                    (text, chunk.usage)
                }
                Err(_) => return,
            }
        } else {
            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    let text: String = chunk
                        .choices
                        .iter()
                        .filter_map(|choice| choice.delta.content.as_deref())
                        .collect();
                    (text, chunk.usage)
                }
                Err(_) => return,
            }
        };
        self.seen = true;
        self.completion_tokens += tokenizer::count_text(&self.model, &text);
        if let Some(usage) = usage.filter(|usage| !usage.is_empty()) {
            self.reported = Some(usage);
        }
    }
}

impl StreamTranscoder for OpenAIStreamTranscoder {
    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes> {
        if event.is_done() {
            return vec![encode_done()];
        }
        if event.data.is_empty() {
            return Vec::new();
        }
        self.observe(&event.data);
        vec![encode_data_event(event.data.as_bytes())]
    }

    fn on_finish(&mut self) -> Vec<Bytes> {
        Vec::new()
    }

    fn usage(&self) -> Option<Usage> {
        if let Some(usage) = self.reported {
            return Some(usage);
        }
        self.seen
            .then(|| Usage::new(self.prompt_tokens, self.completion_tokens))
    }
}
