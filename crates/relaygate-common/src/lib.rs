use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod request_id;

pub use request_id::{message_with_request_id, new_request_id};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid global config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    pub data_dir: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Retry budget used when the inbound request carries no `retry` parameter.
    pub retry_times: u32,
    /// Base token allowance added to every pre-consumption estimate.
    pub pre_consumed_tokens: u32,
    pub dispatch_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    pub settlement_queue_capacity: usize,
    /// Disable channels automatically on permanent credential/quota faults.
    pub auto_disable_channel: bool,
    /// Optional JSON file with `model_ratio` / `completion_ratio` tables.
    pub ratio_file: Option<String>,
}

impl GlobalConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            dsn: String::new(),
            data_dir: "./data".to_string(),
            proxy: None,
            retry_times: 0,
            pre_consumed_tokens: 500,
            dispatch_timeout_secs: 300,
            connect_timeout_secs: 5,
            stream_idle_timeout_secs: 30,
            settlement_queue_capacity: 1024,
            auto_disable_channel: true,
            ratio_file: None,
        }
    }
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub data_dir: Option<String>,
    pub proxy: Option<String>,
    pub retry_times: Option<u32>,
    pub pre_consumed_tokens: Option<u32>,
    pub dispatch_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
    pub settlement_queue_capacity: Option<usize>,
    pub auto_disable_channel: Option<bool>,
    pub ratio_file: Option<String>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            };
        }
        take!(
            host,
            port,
            dsn,
            data_dir,
            proxy,
            retry_times,
            pre_consumed_tokens,
            dispatch_timeout_secs,
            connect_timeout_secs,
            stream_idle_timeout_secs,
            settlement_queue_capacity,
            auto_disable_channel,
            ratio_file,
        );
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let defaults = GlobalConfig::default();
        let dsn = self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?;
        let settlement_queue_capacity = self
            .settlement_queue_capacity
            .unwrap_or(defaults.settlement_queue_capacity);
        if settlement_queue_capacity == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "settlement_queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(GlobalConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            dsn,
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            proxy: self.proxy.filter(|value| !value.trim().is_empty()),
            retry_times: self.retry_times.unwrap_or(defaults.retry_times),
            pre_consumed_tokens: self
                .pre_consumed_tokens
                .unwrap_or(defaults.pre_consumed_tokens),
            dispatch_timeout_secs: self
                .dispatch_timeout_secs
                .unwrap_or(defaults.dispatch_timeout_secs),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            stream_idle_timeout_secs: self
                .stream_idle_timeout_secs
                .unwrap_or(defaults.stream_idle_timeout_secs),
            settlement_queue_capacity,
            auto_disable_channel: self
                .auto_disable_channel
                .unwrap_or(defaults.auto_disable_channel),
            ratio_file: self.ratio_file.filter(|value| !value.trim().is_empty()),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            data_dir: Some(value.data_dir),
            proxy: value.proxy,
            retry_times: Some(value.retry_times),
            pre_consumed_tokens: Some(value.pre_consumed_tokens),
            dispatch_timeout_secs: Some(value.dispatch_timeout_secs),
            connect_timeout_secs: Some(value.connect_timeout_secs),
            stream_idle_timeout_secs: Some(value.stream_idle_timeout_secs),
            settlement_queue_capacity: Some(value.settlement_queue_capacity),
            auto_disable_channel: Some(value.auto_disable_channel),
            ratio_file: value.ratio_file,
        }
    }
}
