mod anthropic;
mod azure;
mod openai;

pub use anthropic::AnthropicAdaptor;
pub use azure::AzureAdaptor;
pub use openai::OpenAIAdaptor;
