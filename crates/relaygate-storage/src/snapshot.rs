use serde_json::Value as JsonValue;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub quota: i64,
    pub used_quota: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: i64,
    pub account_id: i64,
    pub key: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub channel_type: String,
    pub base_url: Option<String>,
    pub key: String,
    pub config_json: JsonValue,
    pub ratio: f64,
    pub weight: i32,
    pub priority: i32,
    pub status: i32,
    pub updated_at: OffsetDateTime,
}

/// Everything the relay needs in memory; loaded once at boot.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub accounts: Vec<AccountRow>,
    pub tokens: Vec<TokenRow>,
    pub channels: Vec<ChannelRow>,
}
