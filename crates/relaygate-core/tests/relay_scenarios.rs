use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;
use relaygate_core::{
    Core, QuotaLedger, RatioTable, RelayConfig, RelayEngine, RelayEngineParts, SettlementConfig,
    TokenAuth, TokenEntry, TokenSnapshot,
};
use relaygate_protocol::{RelayMode, UnifiedRequest};
use relaygate_provider_core::{
    Channel, ChannelConfig, ChannelPool, ChannelStateEvent, ChannelStatus, ChannelType, Headers,
    StateSink, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind, header_get, header_set,
};
use relaygate_provider_impl::builtin_registry;
use relaygate_provider_impl::tokenizer::{count_request, count_text};
use relaygate_storage::{CostRecord, CostStore, QuotaDelta, QuotaSink, StorageResult};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tower::util::ServiceExt;

const ACCOUNT: i64 = 42;
const CALLER_KEY: &str = "sk-caller";
const HELLO_CHUNK: &str = "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n";

enum MockReply {
    Json { status: u16, body: Value },
    Stream { chunks: Vec<&'static str> },
    /// Like `Stream`, but the upstream never finishes on its own.
    OpenStream { chunks: Vec<&'static str> },
}

#[derive(Default)]
struct MockUpstream {
    script: Mutex<VecDeque<MockReply>>,
    seen: Mutex<Vec<UpstreamHttpRequest>>,
    open: Mutex<Vec<mpsc::Sender<Bytes>>>,
}

impl MockUpstream {
    fn new(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn seen(&self) -> Vec<UpstreamHttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl UpstreamClient for MockUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            self.seen.lock().unwrap().push(req);
            let reply = self.script.lock().unwrap().pop_front();
            let mut headers = Headers::new();
            match reply {
                Some(MockReply::Json { status, body }) => {
                    header_set(&mut headers, "content-type", "application/json");
                    Ok(UpstreamHttpResponse {
                        status,
                        headers,
                        body: UpstreamBody::Bytes(Bytes::from(body.to_string())),
                    })
                }
                Some(MockReply::Stream { chunks }) => {
                    header_set(&mut headers, "content-type", "text/event-stream");
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        headers,
                        body: UpstreamBody::Stream(feed(chunks).1),
                    })
                }
                Some(MockReply::OpenStream { chunks }) => {
                    header_set(&mut headers, "content-type", "text/event-stream");
                    let (tx, rx) = feed(chunks);
                    self.open.lock().unwrap().push(tx);
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        headers,
                        body: UpstreamBody::Stream(rx),
                    })
                }
                None => Err(UpstreamFailure::Transport {
                    kind: UpstreamTransportErrorKind::Other,
                    message: "script exhausted".to_string(),
                }),
            }
        })
    }
}

fn feed(chunks: Vec<&'static str>) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(chunks.len().max(1));
    for chunk in chunks {
        let _ = tx.try_send(Bytes::from_static(chunk.as_bytes()));
    }
    (tx, rx)
}

#[derive(Default)]
struct MemoryCosts(Mutex<Vec<CostRecord>>);

#[async_trait]
impl CostStore for MemoryCosts {
    async fn insert_cost(&self, record: &CostRecord) -> StorageResult<()> {
        self.0.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct DeltaLog(Mutex<Vec<i64>>);

impl QuotaSink for DeltaLog {
    fn submit(&self, delta: QuotaDelta) {
        self.0.lock().unwrap().push(delta.delta);
    }
}

#[derive(Default)]
struct StatusLog(Mutex<Vec<ChannelStateEvent>>);

#[async_trait]
impl StateSink for StatusLog {
    async fn submit(&self, event: ChannelStateEvent) {
        self.0.lock().unwrap().push(event);
    }
}

struct Harness {
    app: Router,
    ledger: Arc<QuotaLedger>,
    pool: Arc<ChannelPool>,
    upstream: Arc<MockUpstream>,
    costs: Arc<MemoryCosts>,
    deltas: Arc<DeltaLog>,
    statuses: Arc<StatusLog>,
}

impl Harness {
    fn new(balance: i64, channels: Vec<Channel>, replies: Vec<MockReply>) -> Self {
        let deltas = Arc::new(DeltaLog::default());
        let statuses = Arc::new(StatusLog::default());
        let ledger = Arc::new(QuotaLedger::new([(ACCOUNT, balance)], deltas.clone()));
        let pool = Arc::new(ChannelPool::new(channels, Some(statuses.clone())));
        let upstream = Arc::new(MockUpstream::new(replies));
        let costs = Arc::new(MemoryCosts::default());

        let engine = RelayEngine::new(RelayEngineParts {
            config: RelayConfig::default(),
            ratios: RatioTable::empty().with_model_ratio("gpt-test", 1.0),
            ledger: ledger.clone(),
            pool: pool.clone(),
            registry: builtin_registry(),
            client: upstream.clone(),
            costs: costs.clone(),
            settlement: SettlementConfig::default(),
        });

        let mut snapshot = TokenSnapshot::default();
        snapshot.tokens_by_key.insert(
            CALLER_KEY.to_string(),
            TokenEntry {
                token_id: 1,
                account_id: ACCOUNT,
                name: "default".to_string(),
                enabled: true,
            },
        );
        let core = Core::new(Arc::new(engine), Arc::new(TokenAuth::new(snapshot)));

        Self {
            app: core.router(),
            ledger,
            pool,
            upstream,
            costs,
            deltas,
            statuses,
        }
    }

    async fn send(&self, method: &str, uri: &str, body: Value) -> axum::response::Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {CALLER_KEY}"))
            .header("x-request-id", "req-test")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn wait_for_costs(&self, count: usize) -> Vec<CostRecord> {
        timeout(Duration::from_secs(2), async {
            loop {
                let records = self.costs.0.lock().unwrap().clone();
                if records.len() >= count {
                    return records;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    fn deltas(&self) -> Vec<i64> {
        self.deltas.0.lock().unwrap().clone()
    }
}

fn channel(id: i64) -> Channel {
    Channel {
        id,
        name: format!("openai-{id}"),
        channel_type: ChannelType::OpenAI,
        base_url: "https://up.test".to_string(),
        key: format!("sk-upstream-{id}"),
        config: ChannelConfig::default(),
        ratio: 1.0,
        weight: 1,
        priority: 0,
        status: ChannelStatus::Enabled,
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn chat_request(stream: bool) -> Value {
    json!({
        "model": "gpt-test",
        "stream": stream,
        "messages": [{ "role": "user", "content": "hi" }],
        "max_tokens": 10
    })
}

#[tokio::test]
async fn stream_settles_at_reported_usage() {
    let harness = Harness::new(
        10_000,
        vec![channel(1)],
        vec![MockReply::Stream {
            chunks: vec![
                HELLO_CHUNK,
                "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n\n",
                "data: [DONE]\n\n",
            ],
        }],
    );

    let response = harness
        .send("POST", "/v1/chat/completions", chat_request(true))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(headers["x-request-id"], "req-test");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("\"content\":\"Hello\""));
    assert!(text.ends_with("data: [DONE]\n\n"));

    let records = harness.wait_for_costs(1).await;
    assert_eq!(records[0].quota, 15);
    assert_eq!(records[0].request_id, "req-test");
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(10_000 - 15));

    let deltas = harness.deltas();
    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0] + deltas[1], -15);

    let seen = harness.upstream.seen();
    assert!(seen[0].is_stream);
    assert_eq!(
        header_get(&seen[0].headers, "authorization"),
        Some("Bearer sk-upstream-1")
    );
}

#[tokio::test]
async fn client_disconnect_mid_stream_settles_observed_usage() {
    let harness = Harness::new(
        10_000,
        vec![channel(1)],
        vec![MockReply::OpenStream {
            chunks: vec![HELLO_CHUNK],
        }],
    );

    let response = harness
        .send("POST", "/v1/chat/completions", chat_request(true))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();
    let first = timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&first).contains("\"content\":\"Hello\""));
    drop(body);

    let request = UnifiedRequest::from_slice(chat_request(true).to_string().as_bytes()).unwrap();
    let expected = (count_request(RelayMode::ChatCompletions, &request, "gpt-test")
        + count_text("gpt-test", "Hello")) as i64;
    let records = harness.wait_for_costs(1).await;
    assert_eq!(records[0].quota, expected);
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(10_000 - expected));

    let deltas = harness.deltas();
    assert_eq!(deltas.len(), 2);
    assert!(-deltas[0] > expected);
    assert!(harness.upstream.open.lock().unwrap()[0].is_closed());
}

#[tokio::test]
async fn json_reply_to_stream_request_is_refunded() {
    let harness = Harness::new(
        10_000,
        vec![channel(1)],
        vec![MockReply::Json {
            status: 200,
            body: json!({
                "error": {
                    "message": "The model is overloaded",
                    "type": "server_error",
                    "code": null
                }
            }),
        }],
    );

    let response = harness
        .send("POST", "/v1/chat/completions", chat_request(true))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = json_body(response).await;
    assert_eq!(
        body["error"]["message"],
        "The model is overloaded (request id: req-test)"
    );
    assert_eq!(body["error"]["type"], "server_error");

    let deltas = harness.deltas();
    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0] + deltas[1], 0);
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(10_000));
    sleep(Duration::from_millis(50)).await;
    assert!(harness.costs.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn misconfigured_channel_fails_without_failover() {
    let mut azure = channel(1);
    azure.channel_type = ChannelType::Azure;
    azure.priority = 10;
    let harness = Harness::new(
        10_000,
        vec![azure, channel(2)],
        vec![MockReply::Json {
            status: 200,
            body: json!({ "choices": [] }),
        }],
    );

    let response = harness
        .send("POST", "/v1/chat/completions?retry=1", chat_request(false))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "build_request_failed");

    assert!(harness.upstream.seen().is_empty());
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(10_000));
    let deltas = harness.deltas();
    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0] + deltas[1], 0);
    assert!(harness.pool.snapshot().iter().all(|channel| channel.is_enabled()));
}

#[tokio::test]
async fn insufficient_quota_never_dispatches() {
    let harness = Harness::new(100, vec![channel(1)], Vec::new());

    let response = harness
        .send("POST", "/v1/chat/completions", chat_request(false))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "insufficient_user_quota");
    assert_eq!(
        body["error"]["message"],
        "user quota is not enough (request id: req-test)"
    );

    assert!(harness.upstream.seen().is_empty());
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(100));
    assert!(harness.deltas().is_empty());
}

#[tokio::test]
async fn rate_limited_channels_fail_over_then_surface_saturation() {
    let rate_limited = || MockReply::Json {
        status: 429,
        body: json!({
            "error": {
                "message": "Rate limit reached for requests",
                "type": "requests",
                "code": "rate_limit_exceeded"
            }
        }),
    };
    let harness = Harness::new(
        10_000,
        vec![channel(1), channel(2), channel(3)],
        vec![rate_limited(), rate_limited(), rate_limited()],
    );

    let response = harness
        .send("POST", "/v1/chat/completions?retry=2", chat_request(false))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(
        body["error"]["message"],
        "upstream load is saturated, please try again later (request id: req-test)"
    );

    let mut keys: Vec<String> = harness
        .upstream
        .seen()
        .iter()
        .filter_map(|req| header_get(&req.headers, "authorization").map(str::to_string))
        .collect();
    assert_eq!(keys.len(), 3);
    assert!(
        harness
            .upstream
            .seen()
            .iter()
            .all(|req| req.url == "https://up.test/v1/chat/completions")
    );
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);

    let deltas = harness.deltas();
    assert_eq!(deltas.len(), 6);
    for pair in deltas.chunks(2) {
        assert!(pair[0] < 0);
        assert_eq!(pair[0] + pair[1], 0);
    }
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(10_000));
    assert!(harness.pool.snapshot().iter().all(|channel| channel.is_enabled()));
    assert!(harness.costs.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_path_takes_the_text_path() {
    let request = json!({ "model": "gpt-test", "prompt": "hello" });
    let harness = Harness::new(
        10_000,
        vec![channel(1)],
        vec![MockReply::Json {
            status: 200,
            body: json!({
                "id": "cmpl-1",
                "object": "text_completion",
                "choices": [{ "index": 0, "text": "hi there" }],
                "usage": { "prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3 }
            }),
        }],
    );

    let response = harness.send("POST", "/foo/bar", request.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["choices"][0]["text"], "hi there");

    let seen = harness.upstream.seen();
    assert_eq!(seen[0].url, "https://up.test/foo/bar");
    let forwarded: Value = serde_json::from_slice(seen[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(forwarded, request);

    let records = harness.wait_for_costs(1).await;
    assert_eq!(records[0].quota, 3);
    assert_eq!(harness.ledger.balance(ACCOUNT), Some(9_997));
}

#[tokio::test]
async fn revoked_key_disables_channel_and_retries_elsewhere() {
    let mut primary = channel(1);
    primary.priority = 10;
    let harness = Harness::new(
        10_000,
        vec![primary, channel(2)],
        vec![
            MockReply::Json {
                status: 401,
                body: json!({
                    "error": {
                        "message": "Incorrect API key provided",
                        "type": "invalid_request_error",
                        "code": "invalid_api_key"
                    }
                }),
            },
            MockReply::Json {
                status: 200,
                body: json!({
                    "choices": [{ "index": 0, "message": { "role": "assistant", "content": "ok" } }],
                    "usage": { "prompt_tokens": 8, "completion_tokens": 1, "total_tokens": 9 }
                }),
            },
        ],
    );

    let response = harness
        .send("POST", "/v1/chat/completions?retry=1&user=abc", chat_request(false))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let seen = harness.upstream.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].url, "https://up.test/v1/chat/completions?user=abc");

    let disabled = harness.pool.get(1).unwrap();
    assert_eq!(disabled.status, ChannelStatus::AutoDisabled);
    assert!(harness.pool.get(2).unwrap().is_enabled());
    let statuses = harness.statuses.0.lock().unwrap().len();
    assert_eq!(statuses, 1);

    let records = harness.wait_for_costs(1).await;
    assert_eq!(records[0].quota, 9);
}

#[tokio::test]
async fn validation_errors_surface_without_touching_quota() {
    let harness = Harness::new(10_000, vec![channel(1)], Vec::new());
    let response = harness
        .send("POST", "/v1/chat/completions", json!({ "model": "gpt-test" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_text_request");
    assert!(harness.deltas().is_empty());
}

#[tokio::test]
async fn missing_channel_is_service_unavailable() {
    let mut only_gpt4 = channel(1);
    only_gpt4.config.models = vec!["gpt-4".to_string()];
    let harness = Harness::new(10_000, vec![only_gpt4], Vec::new());
    let response = harness
        .send("POST", "/v1/chat/completions", chat_request(false))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(
        body["error"]["message"],
        "no available channel for model gpt-test (request id: req-test)"
    );
}

#[tokio::test]
async fn fixed_routes_and_auth() {
    let harness = Harness::new(10_000, vec![channel(1)], Vec::new());

    let response = harness
        .send("POST", "/v1/audio/transcriptions", json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "api_not_implemented");

    let response = harness.send("DELETE", "/v1/models/gpt-4", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    let response = harness.send("GET", "/foo/bar", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "req-test");
    let body = json_body(response).await;
    assert_eq!(body["error"]["message"], "Invalid URL (GET /foo/bar)");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .body(Body::from(chat_request(false).to_string()))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
}
