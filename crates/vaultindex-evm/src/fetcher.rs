//! Range fetcher: one log query per event type over `[cursor + 1, head]`.
//!
//! Ranges wider than `max_block_range` are split into consecutive chunks.
//! Any failed query aborts the whole fetch so the caller never advances past
//! a partially observed range.

use vaultindex_core::error::IndexerError;
use vaultindex_core::source::ChainLogSource;
use vaultindex_core::types::{BlockRange, EventBatches, EventKind, RawEvent};

/// Result of a range fetch: all four batches, or the first failure.
pub type FetchResult = Result<EventBatches, IndexerError>;

/// Fetches typed event batches from a [`ChainLogSource`].
pub struct RangeFetcher<S> {
    source: S,
    max_block_range: u64,
}

impl<S: ChainLogSource> RangeFetcher<S> {
    pub fn new(source: S, max_block_range: u64) -> Self {
        Self {
            source,
            max_block_range: max_block_range.max(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current chain height.
    pub async fn head(&self) -> Result<u64, IndexerError> {
        self.source.height().await
    }

    /// Fetch every event type in `range`.
    pub async fn fetch(&self, range: BlockRange) -> FetchResult {
        let mut batches = EventBatches::new();
        for kind in EventKind::DISPATCH_ORDER {
            let events = self.fetch_kind(kind, range).await?;
            batches.insert(kind, events);
        }
        tracing::debug!(%range, events = batches.len(), "range fetched");
        Ok(batches)
    }

    async fn fetch_kind(&self, kind: EventKind, range: BlockRange) -> Result<Vec<RawEvent>, IndexerError> {
        let mut events = Vec::new();
        for chunk in range.chunks(self.max_block_range) {
            let mut part = self
                .source
                .logs(kind, chunk)
                .await
                .map_err(|e| e.into_fetch(kind.name(), chunk.from, chunk.to))?;
            if let Some(stray) = part.iter().find(|e| e.kind() != kind) {
                return Err(IndexerError::Fetch {
                    event: kind.name().to_string(),
                    from: chunk.from,
                    to: chunk.to,
                    reason: format!("source returned a {} event", stray.kind()),
                });
            }
            events.append(&mut part);
        }
        normalize_order(kind, range, &mut events);
        Ok(events)
    }
}

/// Sort `events` into `(block, log_index)` order, warning if they were not.
fn normalize_order(kind: EventKind, range: BlockRange, events: &mut [RawEvent]) {
    let ordered = events.windows(2).all(|w| w[0].position() <= w[1].position());
    if !ordered {
        tracing::warn!(event = %kind, %range, "logs returned out of order; sorting");
        events.sort_by_key(RawEvent::position);
    }
}
