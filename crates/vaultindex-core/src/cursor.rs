//! Indexer cursor: the watermark of the last fully-applied block.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::BlockRange;

/// The highest block whose events have been fully applied to the store.
///
/// Monotonically non-decreasing for the lifetime of the process. In the
/// default cold-start mode it is seeded with the chain height at startup, so
/// events emitted before the process started are never replayed. That trades
/// complete history for "no duplicate alarms"; see
/// [`StartMode`](crate::indexer::StartMode) for the durable alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    block_number: u64,
}

impl Cursor {
    /// Create a cursor at the given starting position.
    pub fn new(block_number: u64) -> Self {
        Self { block_number }
    }

    /// Last fully-applied block.
    pub fn get(&self) -> u64 {
        self.block_number
    }

    /// Move the watermark to `to`. Fails if that would move it backwards.
    pub fn advance(&mut self, to: u64) -> Result<(), IndexerError> {
        if to < self.block_number {
            return Err(IndexerError::InvalidCursor {
                current: self.block_number,
                requested: to,
            });
        }
        self.block_number = to;
        Ok(())
    }

    /// Returns the next block to process (cursor + 1).
    pub fn next_block(&self) -> u64 {
        self.block_number + 1
    }

    /// Range still to be applied given chain height `head`, if any.
    pub fn pending(&self, head: u64) -> Option<BlockRange> {
        BlockRange::after(self.block_number, head)
    }
}
