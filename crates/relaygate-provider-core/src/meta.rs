use relaygate_protocol::RelayMode;

use crate::channel::{ApiType, ChannelId, ChannelType};

/// Query parameters read by the gateway itself and never sent upstream.
const GATEWAY_QUERY_PARAMS: &[&str] = &["retry"];

/// Immutable per-attempt context handed to adaptors.
#[derive(Debug, Clone)]
pub struct RelayMeta {
    pub request_id: String,
    pub mode: RelayMode,
    pub api_type: ApiType,
    pub channel_id: ChannelId,
    pub channel_type: ChannelType,
    pub channel_name: String,
    pub base_url: String,
    pub api_key: String,
    pub api_version: Option<String>,
    pub channel_ratio: f64,
    pub origin_model: String,
    pub actual_model: String,
    pub is_model_mapped: bool,
    pub token_id: i64,
    pub token_name: String,
    pub account_id: i64,
    pub is_stream: bool,
    pub prompt_tokens: u64,
    pub request_path: String,
    pub query: Option<String>,
}

impl RelayMeta {
    /// First value of an inbound query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// The inbound query minus gateway-owned parameters. `None` when nothing
    /// is left or the query does not decode.
    pub fn upstream_query(&self) -> Option<String> {
        let query = self.query.as_deref().filter(|query| !query.is_empty())?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .filter(|(key, _)| !GATEWAY_QUERY_PARAMS.contains(&key.as_str()))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        serde_urlencoded::to_string(&pairs).ok()
    }
}
