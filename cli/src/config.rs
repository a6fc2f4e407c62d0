//! Command-line and environment configuration.
//!
//! Every setting can come from a flag or from the environment; a `.env` file
//! in the working directory is loaded first.

use std::net::SocketAddr;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};

use vaultindex_core::indexer::{DispatchOrder, IndexerConfig, StartMode};
use vaultindex_core::types::Address;
use vaultindex_evm::IndexerBuilder;

use crate::telemetry::LogConfig;

#[derive(Debug, Parser)]
#[command(name = "vaultindex", author, version, about = "Vault lifecycle event indexer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start the poll loop and the health endpoint (default)
    Run,
    /// Print the effective configuration and event topics
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OrderArg {
    TypePriority,
    Chronological,
}

impl From<OrderArg> for DispatchOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::TypePriority => DispatchOrder::TypePriority,
            OrderArg::Chronological => DispatchOrder::Chronological,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StartArg {
    ColdStart,
    Resume,
}

impl From<StartArg> for StartMode {
    fn from(value: StartArg) -> Self {
        match value {
            StartArg::ColdStart => StartMode::ColdStart,
            StartArg::Resume => StartMode::Resume,
        }
    }
}

#[derive(Debug, Clone, Args)]
#[command(rename_all = "kebab-case")]
pub struct Settings {
    /// Chain JSON-RPC endpoint
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Fallback for `--rpc-url`
    #[arg(long, env = "AMOY_RPC_URL", hide = true)]
    pub amoy_rpc_url: Option<String>,

    /// Vault contract address
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,

    #[arg(long, env = "CHAIN", default_value = "polygon-amoy")]
    pub chain: String,

    /// Indexer id, used as the checkpoint key
    #[arg(long, env = "INDEXER_ID", default_value = "vaults")]
    pub indexer_id: String,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub poll_interval_ms: u64,

    /// Blocks per eth_getLogs call
    #[arg(long, env = "MAX_BLOCK_RANGE", default_value_t = 1_000)]
    pub max_block_range: u64,

    #[arg(long, env = "DISPATCH_ORDER", value_enum, default_value_t = OrderArg::TypePriority)]
    pub dispatch_order: OrderArg,

    #[arg(long = "start", env = "START_MODE", value_enum, default_value_t = StartArg::ColdStart)]
    pub start: StartArg,

    /// PostgREST base URL of the projection store
    #[arg(long, env = "STORE_URL")]
    pub store_url: Option<String>,

    #[arg(long, env = "STORE_KEY", hide_env_values = true)]
    pub store_key: Option<String>,

    #[arg(long, env = "VAULTS_TABLE", default_value = "vaults")]
    pub vaults_table: String,

    #[arg(long, env = "SECRETS_TABLE", default_value = "secrets")]
    pub secrets_table: String,

    /// SQLite file for projections (without a store URL) and checkpoints
    #[arg(long, env = "SQLITE_PATH")]
    pub sqlite_path: Option<String>,

    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8000")]
    pub health_addr: SocketAddr,

    /// POST every ProtocolInitiated alert to this URL
    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,

    /// Timeout for RPC, store and webhook requests
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Per-crate levels, e.g. `vaultindex_evm=debug,sqlx=warn`
    #[arg(long, env = "LOG_COMPONENTS", default_value = "")]
    pub log_components: String,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Where projection rows are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Rest { url: String, key: String },
    Sqlite(String),
    Memory,
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rest { .. } => "rest",
            Self::Sqlite(_) => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl Settings {
    pub fn rpc_url(&self) -> Option<&str> {
        self.rpc_url.as_deref().or(self.amoy_rpc_url.as_deref())
    }

    pub fn contract(&self) -> anyhow::Result<Address> {
        let raw = self
            .contract_address
            .as_deref()
            .context("CONTRACT_ADDRESS is required")?;
        Address::parse(raw).context("CONTRACT_ADDRESS")
    }

    pub fn indexer_config(&self) -> anyhow::Result<IndexerConfig> {
        if self.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be positive");
        }
        if self.max_block_range == 0 {
            bail!("MAX_BLOCK_RANGE must be positive");
        }
        Ok(IndexerBuilder::new()
            .id(&self.indexer_id)
            .chain(&self.chain)
            .contract(self.contract()?.to_string())
            .poll_interval_ms(self.poll_interval_ms)
            .max_block_range(self.max_block_range)
            .dispatch_order(self.dispatch_order.into())
            .start(self.start.into())
            .build_config())
    }

    /// Projection backend: REST if a store URL is set, else SQLite, else memory.
    pub fn store_backend(&self) -> anyhow::Result<StoreBackend> {
        match (&self.store_url, &self.store_key, &self.sqlite_path) {
            (Some(url), Some(key), _) => Ok(StoreBackend::Rest {
                url: url.clone(),
                key: key.clone(),
            }),
            (Some(_), None, _) => bail!("STORE_URL is set but STORE_KEY is missing"),
            (None, _, Some(path)) => Ok(StoreBackend::Sqlite(path.clone())),
            (None, _, None) => Ok(StoreBackend::Memory),
        }
    }

    pub fn log_config(&self) -> anyhow::Result<LogConfig> {
        Ok(LogConfig {
            level: self.log_level.clone(),
            components: LogConfig::parse_components(&self.log_components).context("LOG_COMPONENTS")?,
            json: self.log_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x08fCCb1Fc3D6d409DA1d7165058e68bd97F238E9";

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["vaultindex"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn run_is_the_default_command() {
        assert_eq!(parse(&[]).command, None);
        assert_eq!(parse(&["info"]).command, Some(Command::Info));
    }

    #[test]
    fn rpc_url_falls_back_to_amoy() {
        let cli = parse(&["--amoy-rpc-url", "https://rpc-amoy.polygon.technology"]);
        assert_eq!(cli.settings.rpc_url(), Some("https://rpc-amoy.polygon.technology"));

        let cli = parse(&["--rpc-url", "http://localhost:8545", "--amoy-rpc-url", "https://x"]);
        assert_eq!(cli.settings.rpc_url(), Some("http://localhost:8545"));
    }

    #[test]
    fn indexer_config_from_flags() {
        let cli = parse(&[
            "--contract-address",
            CONTRACT,
            "--poll-interval-ms",
            "3000",
            "--dispatch-order",
            "chronological",
            "--start",
            "resume",
        ]);
        let cfg = cli.settings.indexer_config().unwrap();
        assert_eq!(cfg.contract_address, "0x08fccb1fc3d6d409da1d7165058e68bd97f238e9");
        assert_eq!(cfg.poll_interval_ms, 3_000);
        assert_eq!(cfg.backoff.initial_ms, 6_000);
        assert_eq!(cfg.dispatch_order, DispatchOrder::Chronological);
        assert_eq!(cfg.start, StartMode::Resume);
    }

    #[test]
    fn bad_contract_address_is_rejected() {
        let cli = parse(&["--contract-address", "0x1234"]);
        assert!(cli.settings.indexer_config().is_err());
    }

    #[test]
    fn log_components_reach_the_filter() {
        let cli = parse(&["--log-level", "warn", "--log-components", "vaultindex_evm=debug"]);
        let log = cli.settings.log_config().unwrap();
        assert_eq!(log.directives(), "warn,vaultindex_evm=debug");

        let cli = parse(&["--log-components", "nonsense"]);
        assert!(cli.settings.log_config().is_err());
    }

    #[test]
    fn store_backend_selection() {
        let cli = parse(&["--store-url", "https://x.supabase.co", "--store-key", "k", "--sqlite-path", "a.db"]);
        assert_eq!(cli.settings.store_backend().unwrap().name(), "rest");

        let cli = parse(&["--sqlite-path", "a.db"]);
        assert_eq!(
            cli.settings.store_backend().unwrap(),
            StoreBackend::Sqlite("a.db".into())
        );

        let cli = parse(&["--store-url", "https://x.supabase.co"]);
        assert!(cli.settings.store_backend().is_err());
    }
}
