use relaygate_protocol::UnifiedRequest;
use relaygate_provider_core::{Channel, RelayMeta};
use relaygate_provider_impl::tokenizer;

use crate::relay::RelayRequest;

/// Builds the per-attempt context for `channel`.
pub fn resolve_meta(request: &RelayRequest, unified: &UnifiedRequest, channel: &Channel) -> RelayMeta {
    let (actual_model, is_model_mapped) = channel.map_model(&unified.model);
    let prompt_tokens = tokenizer::count_request(request.mode, unified, &actual_model);
    RelayMeta {
        request_id: request.request_id.clone(),
        mode: request.mode,
        api_type: channel.api_type(),
        channel_id: channel.id,
        channel_type: channel.channel_type,
        channel_name: channel.name.clone(),
        base_url: channel.base_url().to_string(),
        api_key: channel.key.clone(),
        api_version: channel.config.api_version.clone(),
        channel_ratio: channel.ratio,
        origin_model: unified.model.clone(),
        actual_model,
        is_model_mapped,
        token_id: request.token.token_id,
        token_name: request.token.token_name.clone(),
        account_id: request.token.account_id,
        is_stream: unified.stream,
        prompt_tokens,
        request_path: request.path.clone(),
        query: request.query.clone(),
    }
}
