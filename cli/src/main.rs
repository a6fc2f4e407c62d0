//! vaultindex: vault lifecycle indexer service.
//!
//! ```text
//! vaultindex [run]   start the poll loop and the health endpoint
//! vaultindex info    print the effective configuration and event topics
//! ```

mod alert;
mod config;
mod health;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vaultindex_core::checkpoint::CheckpointStore;
use vaultindex_core::indexer::{DispatchOrder, StartMode};
use vaultindex_core::projector::{AlertSink, LogAlertSink, ProjectionStore, StateProjector};
use vaultindex_core::records::Table;
use vaultindex_core::types::EventKind;
use vaultindex_evm::{signature, EvmLogSource, HttpEvmClient, PollLoop};
use vaultindex_storage::rest::RestStore;
use vaultindex_storage::sqlite::SqliteStore;
use vaultindex_storage::InMemoryStore;

use crate::alert::{AlertFanout, WebhookAlertSink};
use crate::config::{Cli, Command, Settings, StoreBackend};
use crate::health::HealthState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.settings.log_config()?)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cli.settings).await,
        Command::Info => cmd_info(&cli.settings),
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let config = settings.indexer_config()?;
    let rpc_url = settings
        .rpc_url()
        .context("RPC_URL (or AMOY_RPC_URL) is required")?;
    let timeout = Duration::from_secs(settings.request_timeout_secs);

    let client = HttpEvmClient::new(rpc_url, timeout)?;
    let source = EvmLogSource::new(client, settings.contract()?);

    let sqlite = match &settings.sqlite_path {
        Some(path) => Some(Arc::new(
            SqliteStore::open(path)
                .await
                .with_context(|| format!("opening {path}"))?,
        )),
        None => None,
    };

    let backend = settings.store_backend()?;
    let store: Arc<dyn ProjectionStore> = match (&backend, &sqlite) {
        (StoreBackend::Rest { url, key }, _) => Arc::new(
            RestStore::new(url.as_str(), key.as_str(), timeout)?
                .with_table_name(Table::Vaults, settings.vaults_table.as_str())
                .with_table_name(Table::Secrets, settings.secrets_table.as_str()),
        ),
        (StoreBackend::Sqlite(_), Some(db)) => db.clone(),
        _ => {
            tracing::warn!("no STORE_URL or SQLITE_PATH; projections are kept in memory only");
            Arc::new(InMemoryStore::new())
        }
    };

    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
    if let Some(url) = &settings.alert_webhook_url {
        sinks.push(Arc::new(WebhookAlertSink::new(url.as_str(), timeout)?));
    }
    let alerts = if settings.alert_webhook_url.is_some() {
        "log and webhook alerts"
    } else {
        "log alerts"
    };
    let mode = format!("{} store, {}", backend.name(), alerts);

    let registry = StateProjector::new(store)
        .with_alerts(Arc::new(AlertFanout::new(sinks)))
        .into_registry();

    let mut poll = PollLoop::new(config, source, registry);
    if let Some(db) = sqlite {
        let checkpoints: Arc<dyn CheckpointStore> = db;
        poll = poll.with_checkpoints(checkpoints);
    }

    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(settings.health_addr)
        .await
        .with_context(|| format!("binding health endpoint on {}", settings.health_addr))?;
    info!(addr = %settings.health_addr, %mode, "health endpoint listening");
    let app = health::router(HealthState::new(poll.subscribe(), mode));
    let server = tokio::spawn({
        let token = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }
    });

    let indexer = tokio::spawn({
        let token = shutdown.clone();
        async move {
            if let Err(e) = poll.run(token).await {
                error!(error = %e, "poll loop is not running; health endpoint stays up");
            }
        }
    });

    shutdown_signal().await?;
    info!("shutdown requested");
    shutdown.cancel();

    indexer.await.context("poll loop task panicked")?;
    server
        .await
        .context("health server task panicked")?
        .context("health server failed")?;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("ctrl-c")?,
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}

fn cmd_info(settings: &Settings) -> anyhow::Result<()> {
    let order = match DispatchOrder::from(settings.dispatch_order) {
        DispatchOrder::TypePriority => "type-priority",
        DispatchOrder::Chronological => "chronological",
    };
    let start = match StartMode::from(settings.start) {
        StartMode::ColdStart => "cold-start",
        StartMode::Resume => "resume",
    };

    println!("vaultindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  chain            {}", settings.chain);
    println!("  indexer id       {}", settings.indexer_id);
    println!(
        "  contract         {}",
        settings.contract_address.as_deref().unwrap_or("(unset)")
    );
    println!("  rpc              {}", settings.rpc_url().unwrap_or("(unset)"));
    println!("  poll interval    {} ms", settings.poll_interval_ms);
    println!("  max block range  {}", settings.max_block_range);
    println!("  dispatch order   {order}");
    println!("  start            {start}");
    println!("  store            {}", settings.store_backend()?.name());
    println!("  health           http://{}/health", settings.health_addr);
    println!();
    println!("Events:");
    for kind in EventKind::DISPATCH_ORDER {
        let sig = signature(kind);
        println!("  {:<60} {}", sig.canonical(), sig.topic0());
    }
    Ok(())
}
