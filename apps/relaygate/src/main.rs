use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use relaygate_common::{GlobalConfig, GlobalConfigPatch};
use relaygate_core::{
    AuthProvider, Core, QuotaLedger, RatioTable, RelayConfig, RelayEngine, RelayEngineParts,
    SettlementConfig, TokenAuth, UpstreamClientConfig, WreqUpstreamClient,
};
use relaygate_provider_core::{ChannelPool, StateSink};
use relaygate_provider_impl::builtin_registry;
use relaygate_storage::{QuotaSink, RelayStorage, StorageBus, StorageBusConfig};
use tracing::info;

mod cli;
mod data_dir;
mod dsn;
mod sinks;
mod snapshot;

use crate::cli::Cli;
use crate::data_dir::resolve_data_dir;
use crate::dsn::resolve_dsn;
use crate::sinks::{BusQuotaSink, BusStateSink};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("relaygate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut patch = GlobalConfigPatch {
        dsn: None,
        ..GlobalConfigPatch::from(GlobalConfig::default())
    };
    patch.overlay(cli.into_patch());
    let data_dir = resolve_data_dir(patch.data_dir.as_deref());
    patch.dsn = Some(resolve_dsn(patch.dsn.as_deref(), &data_dir)?);
    patch.data_dir = Some(data_dir);
    let config = patch.into_config()?;
    info!(
        host = %config.host,
        port = config.port,
        dsn = %config.dsn,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        retry_times = config.retry_times,
        "config loaded"
    );

    let storage = RelayStorage::connect(&config.dsn).await?;
    storage.sync().await?;
    info!("db connected");

    let snapshot = storage.load_snapshot().await?;
    info!(
        accounts = snapshot.accounts.len(),
        tokens = snapshot.tokens.len(),
        channels = snapshot.channels.len(),
        "snapshot loaded"
    );

    let bus = StorageBus::spawn(storage.clone(), StorageBusConfig::default());
    let state_sink: Arc<dyn StateSink> = Arc::new(BusStateSink::new(&bus));
    let quota_sink: Arc<dyn QuotaSink> = Arc::new(BusQuotaSink::new(&bus));

    let auth: Arc<dyn AuthProvider> =
        Arc::new(TokenAuth::new(snapshot::build_token_snapshot(&snapshot)));
    let ledger = Arc::new(QuotaLedger::new(
        snapshot::account_balances(&snapshot),
        quota_sink,
    ));
    let channels = snapshot::build_channels(&snapshot);
    let enabled = channels.iter().filter(|channel| channel.is_enabled()).count();
    info!(channels_total = channels.len(), channels_enabled = enabled, "pool ready");
    let pool = Arc::new(ChannelPool::new(channels, Some(state_sink)));

    let ratios = match config.ratio_file.as_deref() {
        Some(path) => {
            let ratios = RatioTable::from_file(path)?;
            info!(path = %path, "ratio table loaded");
            ratios
        }
        None => RatioTable::default(),
    };
    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))?;

    let engine = RelayEngine::new(RelayEngineParts {
        config: RelayConfig::from_global(&config),
        ratios,
        ledger,
        pool,
        registry: builtin_registry(),
        client: Arc::new(client),
        costs: Arc::new(storage),
        settlement: SettlementConfig {
            capacity: config.settlement_queue_capacity,
            ..Default::default()
        },
    });
    let core = Core::new(Arc::new(engine), auth);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, core.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown");
    drop(bus);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relaygate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler failed");
    }
}
