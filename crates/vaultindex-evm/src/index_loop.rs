//! The poll loop: the permanent heartbeat of the indexer.
//!
//! # Cycle
//! ```text
//! Idle → Fetching → Dispatching → Advancing → Idle
//!           │
//!           └─ fetch / height error ─→ ErrorBackoff → Idle   (cursor unchanged)
//! ```
//!
//! Handler failures never leave `Dispatching` early; the cursor advances to
//! the queried head once every event has been routed. Cycles are strictly
//! serialized: one task owns the loop and nothing else mutates the cursor.
//!
//! # Startup
//! [`PollLoop::connect`] checks that the chain is reachable and seeds the
//! cursor, either from the chain height (cold start) or from the saved
//! checkpoint ([`StartMode::Resume`]). If the check fails the loop never runs
//! and its status stays `Disconnected`.
//!
//! # Shutdown
//! [`PollLoop::run`] takes a [`CancellationToken`]. Only the sleeps between
//! cycles are interrupted; a cycle in progress always completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use vaultindex_core::backoff::ErrorBackoff;
use vaultindex_core::checkpoint::{CheckpointManager, CheckpointStore};
use vaultindex_core::cursor::Cursor;
use vaultindex_core::error::IndexerError;
use vaultindex_core::handler::{Dispatcher, HandlerRegistry};
use vaultindex_core::indexer::{IndexerConfig, IndexerState, IndexerStatus, StartMode};
use vaultindex_core::source::ChainLogSource;
use vaultindex_core::types::{BlockRange, IndexContext};

use crate::fetcher::RangeFetcher;

/// What one call to [`PollLoop::poll_once`] did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Chain height has not moved past the cursor. Nothing was fetched.
    NoNewBlocks { cursor: u64 },
    /// A range was fetched, dispatched and the cursor advanced to `range.to`.
    Applied {
        range: BlockRange,
        dispatched: usize,
        /// Handler failures (dropped writes) in this cycle.
        failed: usize,
    },
    /// The cycle was abandoned; the cursor did not move.
    Failed(IndexerError),
}

impl CycleOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Drives fetch → dispatch → advance cycles against a [`ChainLogSource`].
pub struct PollLoop<S> {
    config: IndexerConfig,
    fetcher: RangeFetcher<S>,
    dispatcher: Dispatcher,
    cursor: Option<Cursor>,
    checkpoint: Option<CheckpointManager>,
    backoff: ErrorBackoff,
    status: watch::Sender<IndexerStatus>,
}

impl<S: ChainLogSource> PollLoop<S> {
    pub fn new(config: IndexerConfig, source: S, registry: HandlerRegistry) -> Self {
        let (status, _) = watch::channel(IndexerStatus::default());
        Self {
            fetcher: RangeFetcher::new(source, config.max_block_range),
            dispatcher: Dispatcher::new(registry, config.dispatch_order),
            cursor: None,
            checkpoint: None,
            backoff: ErrorBackoff::new(config.backoff.clone()),
            status,
            config,
        }
    }

    /// Persist the cursor after every advance, and read it back in
    /// [`StartMode::Resume`].
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(CheckpointManager::new(store, &self.config.chain, &self.config.id));
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Receiver for status snapshots, e.g. for a health endpoint.
    pub fn subscribe(&self) -> watch::Receiver<IndexerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> IndexerStatus {
        self.status.borrow().clone()
    }

    /// Last fully-applied block, once connected.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor.map(|c| c.get())
    }

    fn set_state(&self, state: IndexerState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Startup connectivity gate and cursor initialization.
    ///
    /// Returns the starting cursor.
    pub async fn connect(&mut self) -> Result<u64, IndexerError> {
        self.set_state(IndexerState::Starting);

        if !self.fetcher.source().is_connected().await {
            return Err(self.disconnected(IndexerError::Connectivity(
                "chain source unreachable at startup".into(),
            )));
        }
        let head = match self.fetcher.head().await {
            Ok(h) => h,
            Err(e) => return Err(self.disconnected(e)),
        };

        let start = match (self.config.start, &self.checkpoint) {
            (StartMode::ColdStart, _) => head,
            (StartMode::Resume, None) => {
                tracing::warn!("resume requested without a checkpoint store; starting at chain height");
                head
            }
            (StartMode::Resume, Some(cp)) => match cp.load().await {
                Ok(Some(saved)) => {
                    tracing::info!(block = saved.block_number, head, "resuming from checkpoint");
                    saved.block_number
                }
                Ok(None) => head,
                Err(e) => {
                    tracing::warn!(error = %e, "checkpoint unreadable; starting at chain height");
                    head
                }
            },
        };

        self.cursor = Some(Cursor::new(start));
        self.status.send_modify(|s| {
            s.state = IndexerState::Idle;
            s.connected = true;
            s.cursor = Some(start);
            s.head = Some(head);
            s.last_error = None;
        });
        tracing::info!(
            chain = %self.config.chain,
            contract = %self.config.contract_address,
            cursor = start,
            mode = ?self.config.start,
            "connected; listening for vault events"
        );
        Ok(start)
    }

    fn disconnected(&self, error: IndexerError) -> IndexerError {
        tracing::error!(error = %error, "startup connectivity check failed; poll loop not started");
        self.status.send_modify(|s| {
            s.state = IndexerState::Disconnected;
            s.connected = false;
            s.last_error = Some(error.to_string());
        });
        error
    }

    /// Run exactly one cycle.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let Some(mut cursor) = self.cursor else {
            return CycleOutcome::Failed(IndexerError::Aborted {
                reason: "poll loop is not connected".into(),
            });
        };

        self.set_state(IndexerState::Fetching);
        let head = match self.fetcher.head().await {
            Ok(h) => h,
            Err(e) => return self.cycle_failed(e, None),
        };

        let Some(range) = cursor.pending(head) else {
            self.status.send_modify(|s| {
                s.state = IndexerState::Idle;
                s.head = Some(head);
                s.cycles += 1;
                s.last_error = None;
            });
            tracing::trace!(cursor = cursor.get(), head, "no new blocks");
            return CycleOutcome::NoNewBlocks { cursor: cursor.get() };
        };

        let batches = match self.fetcher.fetch(range).await {
            Ok(b) => b,
            Err(e) => return self.cycle_failed(e, Some(range)),
        };

        self.set_state(IndexerState::Dispatching);
        let ctx = IndexContext {
            range,
            chain: self.config.chain.clone(),
        };
        let report = self.dispatcher.dispatch(&batches, &ctx).await;

        self.set_state(IndexerState::Advancing);
        if let Err(e) = cursor.advance(range.to) {
            return self.cycle_failed(e, Some(range));
        }
        self.cursor = Some(cursor);

        if let Some(cp) = &self.checkpoint {
            if let Err(e) = cp.save(range.to).await {
                tracing::warn!(block = range.to, error = %e, "checkpoint save failed");
            }
        }

        let failed = report.failures.len();
        self.status.send_modify(|s| {
            s.state = IndexerState::Idle;
            s.cursor = Some(range.to);
            s.head = Some(head);
            s.cycles += 1;
            s.failed_writes += failed as u64;
            s.last_error = None;
        });

        if report.dispatched > 0 || failed > 0 {
            tracing::info!(
                from = range.from,
                to = range.to,
                dispatched = report.dispatched,
                failed,
                "range applied"
            );
        } else {
            tracing::debug!(from = range.from, to = range.to, "range applied; no events");
        }

        CycleOutcome::Applied {
            range,
            dispatched: report.dispatched,
            failed,
        }
    }

    fn cycle_failed(&self, error: IndexerError, range: Option<BlockRange>) -> CycleOutcome {
        match range {
            Some(r) => tracing::error!(from = r.from, to = r.to, error = %error, "cycle failed; cursor unchanged"),
            None => tracing::error!(error = %error, "cycle failed; cursor unchanged"),
        }
        self.status.send_modify(|s| {
            s.state = IndexerState::ErrorBackoff;
            s.cycles += 1;
            s.last_error = Some(error.to_string());
        });
        CycleOutcome::Failed(error)
    }

    /// Connect (if not yet connected) and poll until `shutdown` is cancelled.
    ///
    /// Returns an error only if the startup connectivity check fails.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), IndexerError> {
        if self.cursor.is_none() {
            self.connect().await?;
        }

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        while !shutdown.is_cancelled() {
            let delay = match self.poll_once().await {
                CycleOutcome::Failed(_) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        failures = self.backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "backing off"
                    );
                    delay
                }
                _ => {
                    self.backoff.reset();
                    interval
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(IndexerState::Stopped);
        tracing::info!(cursor = ?self.cursor(), "poll loop stopped");
        Ok(())
    }
}
