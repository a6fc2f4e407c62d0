//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;

/// How events of different types inside one polled range are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrder {
    /// Grouped by type in the fixed order
    /// `VaultCreated → ProtocolInitiated → AssetsUnlocked → ProtocolCancelled`.
    /// Final state wins, not event order: a vault created, unlocked and
    /// cancelled in one range ends up `active`.
    #[default]
    TypePriority,
    /// All types merged into one `(block, log_index)` sequence.
    Chronological,
}

/// Where the cursor starts when the process boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Start at the current chain height. Events emitted while the process
    /// was down are never seen, which also means no duplicate alerts.
    #[default]
    ColdStart,
    /// Start at the saved checkpoint when one exists, else the chain height.
    Resume,
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used for checkpoint keys).
    pub id: String,
    /// Chain slug (e.g. `"polygon-amoy"`).
    pub chain: String,
    /// Address of the vault contract whose logs are indexed.
    pub contract_address: String,
    /// Delay between successful cycles (milliseconds).
    pub poll_interval_ms: u64,
    /// Delay policy after a failed cycle.
    pub backoff: BackoffConfig,
    /// Maximum blocks per `eth_getLogs` call; larger ranges are split.
    pub max_block_range: u64,
    pub dispatch_order: DispatchOrder,
    pub start: StartMode,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "vaults".into(),
            chain: "polygon-amoy".into(),
            contract_address: String::new(),
            poll_interval_ms: 5_000,
            backoff: BackoffConfig::for_poll_interval(5_000),
            max_block_range: 1_000,
            dispatch_order: DispatchOrder::TypePriority,
            start: StartMode::ColdStart,
        }
    }
}

/// Poll-loop state machine.
///
/// `Idle → Fetching → Dispatching → Advancing → Idle`, with `ErrorBackoff`
/// reachable from any working state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerState {
    /// Not yet started (or waiting for startup connectivity).
    Starting,
    /// Sleeping until the next cycle.
    Idle,
    /// Querying chain height and logs.
    Fetching,
    /// Routing events to the state projector.
    Dispatching,
    /// Moving the cursor to the fetched head.
    Advancing,
    /// Waiting out a failed cycle.
    ErrorBackoff,
    /// Startup connectivity check failed; the loop never started.
    Disconnected,
    /// Shut down via cancellation.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Advancing => write!(f, "advancing"),
            Self::ErrorBackoff => write!(f, "error-backoff"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of the loop published for the health surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub state: IndexerState,
    /// Whether the startup connectivity check passed.
    pub connected: bool,
    pub cursor: Option<u64>,
    /// Chain height seen by the last successful fetch.
    pub head: Option<u64>,
    /// Completed cycles (successful or not).
    pub cycles: u64,
    /// Projection writes that failed and were dropped.
    pub failed_writes: u64,
    pub last_error: Option<String>,
}

impl Default for IndexerStatus {
    fn default() -> Self {
        Self {
            state: IndexerState::Starting,
            connected: false,
            cursor: None,
            head: None,
            cycles: 0,
            failed_writes: 0,
            last_error: None,
        }
    }
}
