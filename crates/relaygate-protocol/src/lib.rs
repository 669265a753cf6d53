//! Wire model shared by the relay engine and the adaptors.
//!
//! The unified request follows the OpenAI chat/completions surface; provider
//! specific shapes (currently Anthropic Messages) live in their own modules.

pub mod claude;
pub mod error;
pub mod messages;
pub mod relay_mode;
pub mod request;
pub mod response;
pub mod sse;

pub use error::{ApiError, ErrorBody, ErrorWithStatusCode};
pub use messages::{ContentPart, ImageDetail, ImageUrl, Messages, TextMessage, VisionMessage};
pub use relay_mode::RelayMode;
pub use request::{TextInput, UnifiedRequest};
pub use response::{
    ChatCompletionChunk, ChatCompletionResponse, ChatChoice, ChunkChoice, ChunkDelta,
    CompletionsChunk, TextResponse, Usage,
};
pub use sse::{DONE_EVENT, SseEvent, SseParser, encode_data_event, encode_done};
