use clap::Parser;
use relaygate_common::GlobalConfigPatch;

/// Flags fall back to `RELAYGATE_*` environment variables.
#[derive(Parser)]
#[command(name = "relaygate")]
pub(crate) struct Cli {
    #[arg(long, env = "RELAYGATE_DSN")]
    pub(crate) dsn: Option<String>,
    #[arg(long, env = "RELAYGATE_DATA_DIR")]
    pub(crate) data_dir: Option<String>,
    #[arg(long, env = "RELAYGATE_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "RELAYGATE_PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "RELAYGATE_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "RELAYGATE_RETRY_TIMES")]
    pub(crate) retry_times: Option<u32>,
    #[arg(long, env = "RELAYGATE_PRE_CONSUMED_TOKENS")]
    pub(crate) pre_consumed_tokens: Option<u32>,
    #[arg(long, env = "RELAYGATE_DISPATCH_TIMEOUT_SECS")]
    pub(crate) dispatch_timeout_secs: Option<u64>,
    #[arg(long, env = "RELAYGATE_CONNECT_TIMEOUT_SECS")]
    pub(crate) connect_timeout_secs: Option<u64>,
    #[arg(long, env = "RELAYGATE_STREAM_IDLE_TIMEOUT_SECS")]
    pub(crate) stream_idle_timeout_secs: Option<u64>,
    #[arg(long, env = "RELAYGATE_SETTLEMENT_QUEUE_CAPACITY")]
    pub(crate) settlement_queue_capacity: Option<usize>,
    #[arg(long, env = "RELAYGATE_AUTO_DISABLE_CHANNEL")]
    pub(crate) auto_disable_channel: Option<bool>,
    #[arg(long, env = "RELAYGATE_RATIO_FILE")]
    pub(crate) ratio_file: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host,
            port: self.port,
            dsn: self.dsn.filter(|value| !value.trim().is_empty()),
            data_dir: self.data_dir.filter(|value| !value.trim().is_empty()),
            proxy: self.proxy,
            retry_times: self.retry_times,
            pre_consumed_tokens: self.pre_consumed_tokens,
            dispatch_timeout_secs: self.dispatch_timeout_secs,
            connect_timeout_secs: self.connect_timeout_secs,
            stream_idle_timeout_secs: self.stream_idle_timeout_secs,
            settlement_queue_capacity: self.settlement_queue_capacity,
            auto_disable_channel: self.auto_disable_channel,
            ratio_file: self.ratio_file,
        }
    }
}
