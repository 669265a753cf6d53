//! Adaptor seam for relaygate.
//!
//! This crate does **not** depend on axum or any concrete HTTP client.
//! Adaptors construct `UpstreamHttpRequest` values and decode responses,
//! while a higher layer supplies the `UpstreamClient` that performs IO.

pub mod adaptor;
pub mod channel;
pub mod channel_pool;
pub mod errors;
pub mod headers;
pub mod meta;
pub mod registry;
pub mod state;
pub mod stream;
pub mod upstream;

pub use adaptor::{Adaptor, BufferedReply, RelayReply};
pub use channel::{ApiType, Channel, ChannelConfig, ChannelId, ChannelStatus, ChannelType};
pub use channel_pool::ChannelPool;
pub use errors::{AdaptorError, AdaptorResult};
pub use headers::{Headers, header_get, header_remove, header_set, is_json_content_type};
pub use meta::RelayMeta;
pub use registry::AdaptorRegistry;
pub use state::{ChannelStateEvent, NoopStateSink, StateSink};
pub use stream::{StreamOutcome, StreamReply, StreamTranscoder, spawn_stream_pump};
pub use upstream::{
    ByteStream, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
