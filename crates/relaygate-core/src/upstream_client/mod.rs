use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use relaygate_common::GlobalConfig;
use relaygate_provider_core::{
    Headers, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
use tokio::sync::mpsc;
use tracing::debug;
use wreq::{Client, Method, Proxy};

const STREAM_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Whole-exchange ceiling; long streams rely on the idle timeout instead.
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global
                .proxy
                .as_deref()
                .map(str::trim)
                .filter(|proxy| !proxy.is_empty())
                .map(str::to_string),
            connect_timeout: global.connect_timeout(),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: global.stream_idle_timeout(),
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self::from_global(&GlobalConfig::default())
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
    config: UpstreamClientConfig,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let client = build_client(&config)?;
        Ok(Self { client, config })
    }
}

fn build_client(config: &UpstreamClientConfig) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = config.proxy.as_deref() {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut builder = self.client.request(http_method_to_wreq(req.method), &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, self.config.stream_idle_timeout).await
        })
    }
}

fn http_method_to_wreq(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Successful streaming replies become a channel fed by a reader task;
/// everything else is read to the end.
async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamHttpResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    tokio::spawn(forward_chunks(resp, tx, stream_idle_timeout));

    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

/// Copies body chunks until the upstream ends, stalls past the idle timeout,
/// or the receiver is dropped.
async fn forward_chunks(resp: wreq::Response, tx: mpsc::Sender<Bytes>, idle: Duration) {
    let mut stream = resp.bytes_stream();
    while let Ok(next) = tokio::time::timeout(idle, stream.next()).await.inspect_err(|_| {
        debug!(event = "upstream_stream_idle", idle_secs = idle.as_secs());
    }) {
        match next {
            Some(Ok(chunk)) => {
                if tx.send(chunk).await.is_err() {
                    debug!(event = "upstream_stream_abandoned");
                    return;
                }
            }
            Some(Err(err)) => {
                debug!(event = "upstream_stream_error", error = %err);
                return;
            }
            None => return,
        }
    }
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    UpstreamFailure::Transport {
        kind: classify_wreq_error(&err),
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

    if err.is_timeout() {
        if mentions(&["read", "idle"]) {
            UpstreamTransportErrorKind::ReadTimeout
        } else {
            UpstreamTransportErrorKind::Timeout
        }
    } else if err.is_connect() && mentions(&["dns", "resolve"]) {
        UpstreamTransportErrorKind::Dns
    } else if mentions(&["tls", "ssl", "certificate"]) {
        UpstreamTransportErrorKind::Tls
    } else if err.is_connect() || err.is_connection_reset() {
        UpstreamTransportErrorKind::Connect
    } else {
        UpstreamTransportErrorKind::Other
    }
}
