use bytes::Bytes;
use relaygate_protocol::claude::{
    BlockDelta, ClaudeContent, ClaudeMessage, ImageSource, MessagesRequest, MessagesResponse,
    ResponseBlock, StreamEvent, finish_reason,
};
use relaygate_protocol::{
    ApiError, ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChunkChoice, ChunkDelta,
    ContentPart, ErrorBody, ErrorWithStatusCode, RelayMode, SseEvent, TextMessage, UnifiedRequest,
    Usage, encode_data_event, encode_done,
};
use relaygate_provider_core::{
    Adaptor, AdaptorError, AdaptorResult, ApiType, BufferedReply, Headers, HttpMethod, RelayMeta,
    StreamTranscoder, UpstreamHttpRequest, header_set,
};
use serde_json::Value;
use time::OffsetDateTime;

use crate::auth_extractor;
use crate::tokenizer;

const ADAPTOR_NAME: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API behind the chat completions surface.
#[derive(Debug, Default)]
pub struct AnthropicAdaptor;

impl AnthropicAdaptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Adaptor for AnthropicAdaptor {
    fn api_type(&self) -> ApiType {
        ApiType::Anthropic
    }

    fn name(&self) -> &'static str {
        ADAPTOR_NAME
    }

    fn convert_request(&self, meta: &RelayMeta, request: &UnifiedRequest) -> AdaptorResult<Bytes> {
        let converted = match meta.mode {
            RelayMode::ChatCompletions => chat_to_messages(meta, request),
            RelayMode::Completions => prompt_to_messages(meta, request),
            other => return Err(AdaptorError::UnsupportedMode(other)),
        };
        Ok(Bytes::from(serde_json::to_vec(&converted)?))
    }

    fn build_request(&self, meta: &RelayMeta, body: Bytes) -> AdaptorResult<UpstreamHttpRequest> {
        let mut headers = Headers::new();
        auth_extractor::set_header(&mut headers, "x-api-key", &meta.api_key);
        auth_extractor::set_header(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
        auth_extractor::set_content_type_json(&mut headers);
        auth_extractor::set_accept(&mut headers, meta.is_stream);
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: format!("{}/v1/messages", meta.base_url),
            headers,
            body: Some(body),
            is_stream: meta.is_stream,
        })
    }

    fn decode_buffered(
        &self,
        meta: &RelayMeta,
        status: u16,
        _headers: &Headers,
        body: Bytes,
    ) -> Result<BufferedReply, ErrorWithStatusCode> {
        let value: Value = serde_json::from_slice(&body)
            .map_err(|err| ErrorWithStatusCode::wrap(err, "unmarshal_response_body_failed", 500))?;
        if value.get("type").and_then(Value::as_str) == Some("error") {
            let error = serde_json::from_value::<ErrorBody>(value)
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_default();
            return Err(ErrorWithStatusCode::new(status, error));
        }
        let response: MessagesResponse = serde_json::from_value(value)
            .map_err(|err| ErrorWithStatusCode::wrap(err, "unmarshal_response_body_failed", 500))?;

        let text: String = response
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect();
        let usage = if response.usage.input_tokens + response.usage.output_tokens > 0 {
            Usage::new(response.usage.input_tokens, response.usage.output_tokens)
        } else {
            Usage::new(
                meta.prompt_tokens,
                tokenizer::count_text(&meta.actual_model, &text),
            )
        };
        let converted = ChatCompletionResponse {
            id: format!("chatcmpl-{}", response.id),
            object: "chat.completion".to_string(),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            model: meta.origin_model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: TextMessage::new("assistant", text),
                finish_reason: response
                    .stop_reason
                    .as_deref()
                    .map(|reason| finish_reason(reason).to_string()),
            }],
            usage,
        };
        let body = serde_json::to_vec(&converted)
            .map_err(|err| ErrorWithStatusCode::wrap(err, "marshal_response_body_failed", 500))?;

        let mut headers = Headers::new();
        header_set(&mut headers, "content-type", "application/json");
        Ok(BufferedReply {
            status,
            headers,
            body: Bytes::from(body),
            usage,
        })
    }

    fn stream_transcoder(&self, meta: &RelayMeta) -> Box<dyn StreamTranscoder> {
        Box::new(AnthropicStreamTranscoder::new(meta))
    }
}

fn chat_to_messages(meta: &RelayMeta, request: &UnifiedRequest) -> MessagesRequest {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for message in request.messages.vision_messages() {
        if message.role == "system" {
            for part in &message.content {
                if let ContentPart::Text { text } = part {
                    system.push(text.clone());
                }
            }
            continue;
        }
        let role = if message.role == "assistant" {
            "assistant"
        } else {
            "user"
        };
        let content = message.content.iter().map(convert_part).collect();
        messages.push(ClaudeMessage {
            role: role.to_string(),
            content,
        });
    }
    MessagesRequest {
        model: meta.actual_model.clone(),
        messages,
        system: (!system.is_empty()).then(|| system.join("\n")),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream: meta.is_stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: stop_sequences(request),
    }
}

fn prompt_to_messages(meta: &RelayMeta, request: &UnifiedRequest) -> MessagesRequest {
    let prompt = request.parse_prompt().join("\n");
    MessagesRequest {
        model: meta.actual_model.clone(),
        messages: vec![ClaudeMessage {
            role: "user".to_string(),
            content: vec![ClaudeContent::Text { text: prompt }],
        }],
        system: None,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream: meta.is_stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: stop_sequences(request),
    }
}

fn convert_part(part: &ContentPart) -> ClaudeContent {
    match part {
        ContentPart::Text { text } => ClaudeContent::Text { text: text.clone() },
        ContentPart::ImageUrl { image_url } => ClaudeContent::Image {
            source: image_source(&image_url.url),
        },
    }
}

/// `data:<media>;base64,<payload>` URLs are inlined, anything else is fetched
/// by the upstream.
fn image_source(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return ImageSource::Base64 {
                media_type: media_type.to_string(),
                data: data.to_string(),
            };
        }
    }
    ImageSource::Url {
        url: url.to_string(),
    }
}

fn stop_sequences(request: &UnifiedRequest) -> Option<Vec<String>> {
    match request.extra.get("stop")? {
        Value::String(stop) => Some(vec![stop.clone()]),
        Value::Array(items) => {
            let stops: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            (!stops.is_empty()).then_some(stops)
        }
        _ => None,
    }
}

/// Rewrites Anthropic SSE into OpenAI chat completion chunks.
struct AnthropicStreamTranscoder {
    id: String,
    model: String,
    tokenizer_model: String,
    created: i64,
    prompt_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
    counted_tokens: u64,
    seen: bool,
    done_sent: bool,
}

impl AnthropicStreamTranscoder {
    fn new(meta: &RelayMeta) -> Self {
        Self {
            id: format!("chatcmpl-{}", meta.request_id),
            model: meta.origin_model.clone(),
            tokenizer_model: meta.actual_model.clone(),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            prompt_tokens: meta.prompt_tokens,
            input_tokens: 0,
            output_tokens: 0,
            counted_tokens: 0,
            seen: false,
            done_sent: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> Vec<Bytes> {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        };
        match serde_json::to_vec(&chunk) {
            Ok(payload) => vec![encode_data_event(&payload)],
            Err(_) => Vec::new(),
        }
    }
}

impl StreamTranscoder for AnthropicStreamTranscoder {
    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes> {
        let Ok(parsed) = serde_json::from_str::<StreamEvent>(&event.data) else {
            return Vec::new();
        };
        match parsed {
            StreamEvent::MessageStart { message } => {
                self.seen = true;
                if !message.id.is_empty() {
                    self.id = format!("chatcmpl-{}", message.id);
                }
                self.input_tokens = message.usage.input_tokens;
                self.output_tokens = message.usage.output_tokens;
                self.chunk(
                    ChunkDelta {
                        role: Some("assistant".to_string()),
                        content: None,
                    },
                    None,
                )
            }
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => {
                self.seen = true;
                self.counted_tokens += tokenizer::count_text(&self.tokenizer_model, &text);
                self.chunk(
                    ChunkDelta {
                        role: None,
                        content: Some(text),
                    },
                    None,
                )
            }
            StreamEvent::ContentBlockDelta { .. } => Vec::new(),
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.output_tokens = self.output_tokens.max(usage.output_tokens);
                    if usage.input_tokens > 0 {
                        self.input_tokens = usage.input_tokens;
                    }
                }
                let reason = delta
                    .stop_reason
                    .as_deref()
                    .map(|reason| finish_reason(reason).to_string());
                self.chunk(ChunkDelta::default(), reason)
            }
            StreamEvent::MessageStop => {
                self.done_sent = true;
                vec![encode_done()]
            }
            StreamEvent::Error { error } => {
                let body = ErrorBody {
                    error: Some(ApiError::new(error.message, error.kind, Value::Null)),
                };
                match serde_json::to_vec(&body) {
                    Ok(payload) => vec![encode_data_event(&payload)],
                    Err(_) => Vec::new(),
                }
            }
            StreamEvent::Ignored => Vec::new(),
        }
    }

    fn on_finish(&mut self) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        self.done_sent = true;
        vec![encode_done()]
    }

    fn usage(&self) -> Option<Usage> {
        if !self.seen {
            return None;
        }
        let prompt = if self.input_tokens > 0 {
            self.input_tokens
        } else {
            self.prompt_tokens
        };
        let completion = if self.output_tokens > 0 {
            self.output_tokens
        } else {
            self.counted_tokens
        };
        Some(Usage::new(prompt, completion))
    }
}

#[cfg(test)]
mod tests {
    use relaygate_provider_core::ChannelType;

    use super::*;

    fn meta(mode: RelayMode) -> RelayMeta {
        RelayMeta {
            request_id: "req-1".to_string(),
            mode,
            api_type: ApiType::Anthropic,
            channel_id: 3,
            channel_type: ChannelType::Anthropic,
            channel_name: "claude".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key: "sk-ant".to_string(),
            api_version: None,
            channel_ratio: 1.0,
            origin_model: "claude-3-haiku".to_string(),
            actual_model: "claude-3-haiku-20240307".to_string(),
            is_model_mapped: true,
            token_id: 1,
            token_name: "t".to_string(),
            account_id: 1,
            is_stream: true,
            prompt_tokens: 12,
            request_path: "/v1/chat/completions".to_string(),
            query: None,
        }
    }

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn chat_lifts_system_and_defaults_max_tokens() {
        let request = UnifiedRequest::from_slice(
            br#"{"model":"claude-3-haiku","messages":[
                {"role":"system","content":"be brief"},
                {"role":"user","content":[{"type":"text","text":"what is this"},
                  {"type":"image_url","image_url":{"url":"data:image/png;base64,AAAA"}}]}
            ],"stop":"END"}"#,
        )
        .unwrap();
        let converted = chat_to_messages(&meta(RelayMode::ChatCompletions), &request);
        assert_eq!(converted.system.as_deref(), Some("be brief"));
        assert_eq!(converted.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(converted.messages.len(), 1);
        assert_eq!(
            converted.messages[0].content[1],
            ClaudeContent::Image {
                source: ImageSource::Base64 {
                    media_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                }
            }
        );
        assert_eq!(converted.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn embeddings_are_unsupported() {
        let request = UnifiedRequest::default();
        let err = AnthropicAdaptor::new()
            .convert_request(&meta(RelayMode::Embeddings), &request)
            .unwrap_err();
        assert!(matches!(err, AdaptorError::UnsupportedMode(RelayMode::Embeddings)));
    }

    #[test]
    fn buffered_reply_becomes_chat_completion() {
        let body = Bytes::from_static(
            br#"{"id":"msg_1","model":"claude-3-haiku-20240307","content":[{"type":"text","text":"hi"}],
                "stop_reason":"end_turn","usage":{"input_tokens":9,"output_tokens":2}}"#,
        );
        let reply = AnthropicAdaptor::new()
            .decode_buffered(&meta(RelayMode::ChatCompletions), 200, &Headers::new(), body)
            .unwrap();
        assert_eq!(reply.usage, Usage::new(9, 2));
        let value: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "hi");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["model"], "claude-3-haiku");
    }

    #[test]
    fn error_reply_keeps_upstream_type() {
        let body = Bytes::from_static(
            br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        let err = AnthropicAdaptor::new()
            .decode_buffered(&meta(RelayMode::ChatCompletions), 529, &Headers::new(), body)
            .unwrap_err();
        assert_eq!(err.status_code(), 529);
        assert_eq!(err.error().kind, "overloaded_error");
    }

    #[test]
    fn stream_is_transcoded_to_chat_chunks() {
        let mut transcoder = AnthropicStreamTranscoder::new(&meta(RelayMode::ChatCompletions));
        let start = transcoder.on_event(&event(
            r#"{"type":"message_start","message":{"id":"msg_9","usage":{"input_tokens":20,"output_tokens":1}}}"#,
        ));
        assert_eq!(start.len(), 1);
        let delta = transcoder.on_event(&event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ));
        let text = std::str::from_utf8(&delta[0]).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains(r#""content":"Hello""#));
        assert!(text.contains("chatcmpl-msg_9"));

        transcoder.on_event(&event(
            r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":7}}"#,
        ));
        let stop = transcoder.on_event(&event(r#"{"type":"message_stop"}"#));
        assert_eq!(&stop[0][..], &encode_done()[..]);
        assert!(transcoder.on_finish().is_empty());
        assert_eq!(transcoder.usage(), Some(Usage::new(20, 7)));
    }

    #[test]
    fn truncated_stream_still_terminates() {
        let mut transcoder = AnthropicStreamTranscoder::new(&meta(RelayMode::ChatCompletions));
        assert_eq!(transcoder.usage(), None);
        transcoder.on_event(&event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"partial"}}"#,
        ));
        assert_eq!(transcoder.on_finish().len(), 1);
        let usage = transcoder.usage().unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(
            usage.completion_tokens,
            tokenizer::count_text("claude-3-haiku-20240307", "partial")
        );
    }
}
