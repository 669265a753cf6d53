use std::sync::Arc;

use relaygate_provider_core::AdaptorRegistry;

use crate::adaptors::{AnthropicAdaptor, AzureAdaptor, OpenAIAdaptor};

pub fn register_builtin_adaptors(registry: &mut AdaptorRegistry) {
    registry.register(Arc::new(OpenAIAdaptor::new()));
    registry.register(Arc::new(AzureAdaptor::new()));
    registry.register(Arc::new(AnthropicAdaptor::new()));
}

pub fn builtin_registry() -> AdaptorRegistry {
    let mut registry = AdaptorRegistry::new();
    register_builtin_adaptors(&mut registry);
    registry
}
