//! The chain log source consumed by the range fetcher.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{BlockRange, EventKind, RawEvent};

/// Read-only view of the chain: current height and decoded logs per event type.
///
/// # Ordering
/// `logs` must return events in ascending `(block_number, log_index)` order.
/// Fetchers still re-check this and normalize, logging any violation.
#[async_trait]
pub trait ChainLogSource: Send + Sync {
    /// Current chain height.
    async fn height(&self) -> Result<u64, IndexerError>;

    /// All decoded `kind` events emitted in the inclusive `range`.
    async fn logs(&self, kind: EventKind, range: BlockRange)
        -> Result<Vec<RawEvent>, IndexerError>;

    /// Whether the source is reachable. Checked once at startup.
    async fn is_connected(&self) -> bool;
}
