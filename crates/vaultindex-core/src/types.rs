//! Shared types for the indexing pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

// ─── Address ─────────────────────────────────────────────────────────────────

/// A 20-byte account address.
///
/// The chain layer may hand back checksummed (mixed-case) addresses; the store
/// key is always `0x` + 40 lower-case hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    raw: alloy_primitives::Address,
    key: String,
}

impl Address {
    /// Parse an address (with or without `0x`, any case, checksum not enforced).
    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let raw: alloy_primitives::Address = digits
            .parse()
            .map_err(|e| IndexerError::Decode(format!("invalid address '{s}': {e}")))?;
        Ok(Self::from(raw))
    }

    /// Lower-case store key.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn as_primitive(&self) -> &alloy_primitives::Address {
        &self.raw
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(raw: alloy_primitives::Address) -> Self {
        Self {
            key: format!("{raw:#x}"),
            raw,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl TryFrom<String> for Address {
    type Error = IndexerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.key
    }
}

// ─── EventKind ───────────────────────────────────────────────────────────────

/// The four event types emitted by the vault contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    VaultCreated,
    ProtocolInitiated,
    AssetsUnlocked,
    ProtocolCancelled,
}

impl EventKind {
    /// Fixed type-priority dispatch order.
    pub const DISPATCH_ORDER: [EventKind; 4] = [
        EventKind::VaultCreated,
        EventKind::ProtocolInitiated,
        EventKind::AssetsUnlocked,
        EventKind::ProtocolCancelled,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::VaultCreated => "VaultCreated",
            Self::ProtocolInitiated => "ProtocolInitiated",
            Self::AssetsUnlocked => "AssetsUnlocked",
            Self::ProtocolCancelled => "ProtocolCancelled",
        }
    }

    /// Position of this kind in [`Self::DISPATCH_ORDER`].
    pub fn priority(&self) -> usize {
        match self {
            Self::VaultCreated => 0,
            Self::ProtocolInitiated => 1,
            Self::AssetsUnlocked => 2,
            Self::ProtocolCancelled => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── RawEvent ────────────────────────────────────────────────────────────────

/// Decoded, typed arguments of a vault event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventArgs {
    VaultCreated { owner: Address, beneficiary: Address },
    ProtocolInitiated { owner: Address, timestamp: u64 },
    AssetsUnlocked { owner: Address, beneficiary: Address },
    ProtocolCancelled { owner: Address },
}

impl EventArgs {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::VaultCreated { .. } => EventKind::VaultCreated,
            Self::ProtocolInitiated { .. } => EventKind::ProtocolInitiated,
            Self::AssetsUnlocked { .. } => EventKind::AssetsUnlocked,
            Self::ProtocolCancelled { .. } => EventKind::ProtocolCancelled,
        }
    }

    pub fn owner(&self) -> &Address {
        match self {
            Self::VaultCreated { owner, .. }
            | Self::ProtocolInitiated { owner, .. }
            | Self::AssetsUnlocked { owner, .. }
            | Self::ProtocolCancelled { owner } => owner,
        }
    }
}

/// A decoded log entry. Lives only for the duration of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Log index within the block.
    pub log_index: u64,
    /// Transaction hash (`0x…`), informational only.
    pub tx_hash: String,
    pub args: EventArgs,
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        self.args.kind()
    }

    pub fn owner(&self) -> &Address {
        self.args.owner()
    }

    /// Sort key giving on-chain order.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── BlockRange ──────────────────────────────────────────────────────────────

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// The range to query after `cursor` given chain height `head`.
    ///
    /// Returns `None` when `head <= cursor` (nothing new).
    pub fn after(cursor: u64, head: u64) -> Option<Self> {
        (head > cursor).then(|| Self {
            from: cursor + 1,
            to: head,
        })
    }

    /// Split into consecutive sub-ranges of at most `max_len` blocks.
    pub fn chunks(&self, max_len: u64) -> Vec<BlockRange> {
        let step = max_len.max(1);
        let mut out = Vec::new();
        let mut start = self.from;
        while start <= self.to {
            let end = start.saturating_add(step - 1).min(self.to);
            out.push(BlockRange { from: start, to: end });
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        out
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

// ─── EventBatches ────────────────────────────────────────────────────────────

/// Output of one successful range fetch: one ordered batch per event type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatches {
    batches: BTreeMap<EventKind, Vec<RawEvent>>,
}

impl EventBatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the batch for `kind`, replacing any previous one.
    pub fn insert(&mut self, kind: EventKind, events: Vec<RawEvent>) {
        self.batches.insert(kind, events);
    }

    /// Events of `kind` in on-chain order.
    pub fn get(&self, kind: EventKind) -> &[RawEvent] {
        self.batches.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of events across all types.
    pub fn len(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events grouped by type in [`EventKind::DISPATCH_ORDER`].
    pub fn by_type_priority(&self) -> Vec<&RawEvent> {
        EventKind::DISPATCH_ORDER
            .iter()
            .flat_map(|kind| self.get(*kind).iter())
            .collect()
    }

    /// All events merged by `(block, log_index)`.
    pub fn chronological(&self) -> Vec<&RawEvent> {
        let mut all: Vec<&RawEvent> = self.batches.values().flatten().collect();
        // stable: ties keep type-priority order
        all.sort_by_key(|e| e.position());
        all
    }
}

// ─── IndexContext ────────────────────────────────────────────────────────────

/// Context passed to event handlers during dispatch.
#[derive(Debug, Clone)]
pub struct IndexContext {
    /// The range being applied in this cycle.
    pub range: BlockRange,
    /// The indexer's chain slug (e.g. `"polygon-amoy"`).
    pub chain: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_normalizes_checksummed_input() {
        let a = Address::parse("0x08fCCb1Fc3D6d409DA1d7165058e68bd97F238E9").unwrap();
        assert_eq!(a.as_str(), "0x08fccb1fc3d6d409da1d7165058e68bd97f238e9");
        let b = Address::parse("08FCCB1FC3D6D409DA1D7165058E68BD97F238E9").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn address_rejects_garbage() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz8fccb1fc3d6d409da1d7165058e68bd97f238e").is_err());
    }

    #[test]
    fn address_wraps_primitive() {
        let raw = alloy_primitives::Address::repeat_byte(0xab);
        let a = Address::from(raw);
        assert_eq!(a.as_str(), format!("0x{}", "ab".repeat(20)));
        assert_eq!(a.as_primitive(), &raw);
        assert_eq!(Address::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn address_serde_normalizes() {
        let a: Address =
            serde_json::from_str("\"0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD\"").unwrap();
        assert_eq!(a.as_str(), "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd");
    }

    #[test]
    fn range_after_cursor() {
        assert_eq!(BlockRange::after(100, 100), None);
        assert_eq!(BlockRange::after(100, 99), None);
        assert_eq!(
            BlockRange::after(100, 103),
            Some(BlockRange { from: 101, to: 103 })
        );
    }

    #[test]
    fn range_chunks_cover_inclusive_range() {
        let r = BlockRange { from: 1, to: 2500 };
        let chunks = r.chunks(1000);
        assert_eq!(
            chunks,
            vec![
                BlockRange { from: 1, to: 1000 },
                BlockRange { from: 1001, to: 2000 },
                BlockRange { from: 2001, to: 2500 },
            ]
        );
        assert_eq!(BlockRange { from: 7, to: 7 }.chunks(1000).len(), 1);
    }

    #[test]
    fn inverted_range_has_no_chunks() {
        assert!(BlockRange { from: 10, to: 9 }.chunks(1000).is_empty());
    }

    fn ev(args: EventArgs, block: u64, log_index: u64) -> RawEvent {
        RawEvent {
            block_number: block,
            log_index,
            tx_hash: "0x0".into(),
            args,
        }
    }

    #[test]
    fn batches_orderings() {
        let a = Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let b = Address::parse("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let mut batches = EventBatches::new();
        batches.insert(
            EventKind::ProtocolCancelled,
            vec![ev(EventArgs::ProtocolCancelled { owner: a.clone() }, 101, 0)],
        );
        batches.insert(
            EventKind::VaultCreated,
            vec![ev(
                EventArgs::VaultCreated { owner: a.clone(), beneficiary: b.clone() },
                102,
                3,
            )],
        );
        assert_eq!(batches.len(), 2);

        let kinds: Vec<_> = batches.by_type_priority().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::VaultCreated, EventKind::ProtocolCancelled]);

        let kinds: Vec<_> = batches.chronological().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::ProtocolCancelled, EventKind::VaultCreated]);

        assert!(batches.get(EventKind::AssetsUnlocked).is_empty());
    }

    #[test]
    fn dispatch_order_matches_priority() {
        for (i, kind) in EventKind::DISPATCH_ORDER.iter().enumerate() {
            assert_eq!(kind.priority(), i);
        }
    }
}
