//! Built-in upstream adaptors.
//!
//! This crate does not perform network IO. Adaptors build `UpstreamHttpRequest`
//! values and decode whatever the injected `UpstreamClient` hands back.

mod adaptors;
mod auth_extractor;
mod registry;
pub mod tokenizer;

pub use adaptors::{AnthropicAdaptor, AzureAdaptor, OpenAIAdaptor};
pub use registry::{builtin_registry, register_builtin_adaptors};
