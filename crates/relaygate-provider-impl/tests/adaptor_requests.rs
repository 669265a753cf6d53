use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use relaygate_protocol::{RelayMode, UnifiedRequest, Usage};
use relaygate_provider_core::{
    ApiType, ChannelType, Headers, HttpMethod, RelayMeta, RelayReply, UpstreamBody,
    UpstreamClient, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse, header_get,
    header_set,
};
use relaygate_provider_impl::builtin_registry;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn meta(channel_type: ChannelType, mode: RelayMode) -> RelayMeta {
    RelayMeta {
        request_id: "req-42".to_string(),
        mode,
        api_type: channel_type.api_type(),
        channel_id: 1,
        channel_type,
        channel_name: "c".to_string(),
        base_url: "https://upstream.test".to_string(),
        api_key: "secret".to_string(),
        api_version: Some("2024-02-01".to_string()),
        channel_ratio: 1.0,
        origin_model: "gpt-3.5-turbo".to_string(),
        actual_model: "gpt-3.5-turbo".to_string(),
        is_model_mapped: false,
        token_id: 1,
        token_name: "default".to_string(),
        account_id: 1,
        is_stream: false,
        prompt_tokens: 5,
        request_path: "/v1/chat/completions".to_string(),
        query: None,
    }
}

#[test]
fn registry_covers_builtin_api_types() {
    let registry = builtin_registry();
    assert_eq!(registry.len(), 3);
    assert!(registry.get(ApiType::OpenAI).is_some());
    assert!(registry.get(ApiType::Azure).is_some());
    assert!(registry.get(ApiType::Anthropic).is_some());
    assert!(registry.get(ApiType::Gemini).is_none());
}

#[test]
fn azure_request_shape_prefers_query_api_version() {
    let registry = builtin_registry();
    let adaptor = registry.get(ApiType::Azure).unwrap();

    let mut meta = meta(ChannelType::Azure, RelayMode::ChatCompletions);
    let req = adaptor.build_request(&meta, Bytes::from_static(b"{}")).unwrap();
    assert_eq!(req.method, HttpMethod::Post);
    assert_eq!(
        req.url,
        "https://upstream.test/openai/deployments/gpt-35-turbo/chat/completions?api-version=2024-02-01"
    );
    assert_eq!(header_get(&req.headers, "api-key"), Some("secret"));
    assert!(header_get(&req.headers, "authorization").is_none());

    meta.query = Some("api-version=2024-06-01".to_string());
    let req = adaptor.build_request(&meta, Bytes::from_static(b"{}")).unwrap();
    assert!(req.url.ends_with("?api-version=2024-06-01"));

    meta.query = None;
    meta.api_version = None;
    assert!(adaptor.build_request(&meta, Bytes::new()).is_err());
}

#[test]
fn anthropic_request_shape() {
    let registry = builtin_registry();
    let adaptor = registry.get(ApiType::Anthropic).unwrap();
    let meta = meta(ChannelType::Anthropic, RelayMode::ChatCompletions);

    let request = UnifiedRequest::from_slice(
        br#"{"model":"gpt-3.5-turbo","messages":[{"role":"user","content":"hi"}],"max_tokens":64}"#,
    )
    .unwrap();
    let body = adaptor.convert_request(&meta, &request).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["max_tokens"], 64);
    assert_eq!(value["messages"][0]["content"][0]["text"], "hi");

    let req = adaptor.build_request(&meta, body).unwrap();
    assert_eq!(req.url, "https://upstream.test/v1/messages");
    assert_eq!(header_get(&req.headers, "x-api-key"), Some("secret"));
    assert_eq!(header_get(&req.headers, "anthropic-version"), Some("2023-06-01"));
}

struct ScriptedClient {
    seen: Mutex<Vec<UpstreamHttpRequest>>,
    chunks: Vec<&'static [u8]>,
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            self.seen.lock().unwrap().push(req);
            let (tx, rx) = mpsc::channel(self.chunks.len().max(1));
            for chunk in &self.chunks {
                let _ = tx.try_send(Bytes::from_static(chunk));
            }
            let mut headers = Headers::new();
            header_set(&mut headers, "content-type", "text/event-stream");
            Ok(UpstreamHttpResponse {
                status: 200,
                headers,
                body: UpstreamBody::Stream(rx),
            })
        })
    }
}

#[tokio::test]
async fn anthropic_stream_round_trip_through_client() {
    let registry = builtin_registry();
    let adaptor = registry.get(ApiType::Anthropic).unwrap();
    let mut meta = meta(ChannelType::Anthropic, RelayMode::ChatCompletions);
    meta.is_stream = true;

    let client = ScriptedClient {
        seen: Mutex::new(Vec::new()),
        chunks: vec![
            b"event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\",\"usage\":{\"input_tokens\":11,\"output_tokens\":1}}}\n\n",
            b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            b"event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
            b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ],
    };

    let response = adaptor
        .do_request(&client, &meta, Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert!(client.seen.lock().unwrap()[0].is_stream);

    let RelayReply::Stream(reply) = adaptor.do_response(&meta, response).await.unwrap() else {
        panic!("expected a streaming reply");
    };
    let mut body = reply.body;
    let mut frames = Vec::new();
    while let Some(frame) = timeout(Duration::from_secs(1), body.recv()).await.unwrap() {
        frames.push(String::from_utf8(frame.to_vec()).unwrap());
    }
    assert_eq!(frames.len(), 4);
    assert!(frames[1].contains(r#""content":"Hi""#));
    assert!(frames[2].contains(r#""finish_reason":"stop""#));
    assert_eq!(frames[3], "data: [DONE]\n\n");

    let outcome = reply.outcome.await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.usage, Some(Usage::new(11, 3)));
}
