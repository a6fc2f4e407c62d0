//! Fluent builder API for vault indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use vaultindex_core::indexer::DispatchOrder;
//! use vaultindex_evm::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .chain("polygon-amoy")
//!     .contract("0x08fCCb1Fc3D6d409DA1d7165058e68bd97F238E9")
//!     .poll_interval_ms(3_000)
//!     .dispatch_order(DispatchOrder::Chronological)
//!     .build_config();
//! ```

use vaultindex_core::backoff::BackoffConfig;
use vaultindex_core::handler::HandlerRegistry;
use vaultindex_core::indexer::{DispatchOrder, IndexerConfig, StartMode};
use vaultindex_core::source::ChainLogSource;

use crate::index_loop::PollLoop;

/// Fluent builder for [`IndexerConfig`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the indexer ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the vault contract address.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    /// Set the polling interval. Also resets the error backoff to start at
    /// twice this interval.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self.config.backoff = BackoffConfig {
            initial_ms: ms.saturating_mul(2),
            ..self.config.backoff
        };
        self
    }

    /// Override the error backoff entirely.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the number of blocks per `eth_getLogs` call.
    pub fn max_block_range(mut self, blocks: u64) -> Self {
        self.config.max_block_range = blocks;
        self
    }

    pub fn dispatch_order(mut self, order: DispatchOrder) -> Self {
        self.config.dispatch_order = order;
        self
    }

    pub fn start(mut self, mode: StartMode) -> Self {
        self.config.start = mode;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build a [`PollLoop`] over `source` with the given handlers.
    pub fn build<S: ChainLogSource>(self, source: S, registry: HandlerRegistry) -> PollLoop<S> {
        PollLoop::new(self.config, source, registry)
    }
}
