//! Vault contract event signatures and log decoding.
//!
//! Only the two ABI shapes the contract emits are supported: `address` and
//! `uint256`. Indexed parameters come from `topics[1..]`; the rest are
//! ABI-decoded from `data` as one tuple.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use vaultindex_core::error::IndexerError;
use vaultindex_core::types::{Address, EventArgs, EventKind, RawEvent};

/// ABI parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint256,
}

impl ParamType {
    fn dyn_type(&self) -> DynSolType {
        match self {
            Self::Address => DynSolType::Address,
            Self::Uint256 => DynSolType::Uint(256),
        }
    }
}

/// One event parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub indexed: bool,
}

/// Static description of one contract event.
#[derive(Debug, Clone, Copy)]
pub struct EventSignature {
    pub kind: EventKind,
    pub params: &'static [ParamSpec],
}

const fn param(name: &'static str, ty: ParamType, indexed: bool) -> ParamSpec {
    ParamSpec { name, ty, indexed }
}

const VAULT_CREATED: EventSignature = EventSignature {
    kind: EventKind::VaultCreated,
    params: &[
        param("owner", ParamType::Address, true),
        param("beneficiary", ParamType::Address, true),
    ],
};

const PROTOCOL_INITIATED: EventSignature = EventSignature {
    kind: EventKind::ProtocolInitiated,
    params: &[
        param("owner", ParamType::Address, true),
        param("timestamp", ParamType::Uint256, false),
    ],
};

const ASSETS_UNLOCKED: EventSignature = EventSignature {
    kind: EventKind::AssetsUnlocked,
    params: &[
        param("owner", ParamType::Address, true),
        param("beneficiary", ParamType::Address, true),
    ],
};

const PROTOCOL_CANCELLED: EventSignature = EventSignature {
    kind: EventKind::ProtocolCancelled,
    params: &[param("owner", ParamType::Address, true)],
};

/// Signature of `kind`.
pub fn signature(kind: EventKind) -> &'static EventSignature {
    match kind {
        EventKind::VaultCreated => &VAULT_CREATED,
        EventKind::ProtocolInitiated => &PROTOCOL_INITIATED,
        EventKind::AssetsUnlocked => &ASSETS_UNLOCKED,
        EventKind::ProtocolCancelled => &PROTOCOL_CANCELLED,
    }
}

/// keccak256 of `input`.
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut k = Keccak::v256();
    k.update(input);
    let mut out = [0u8; 32];
    k.finalize(&mut out);
    out
}

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| IndexerError::Decode(format!("quantity '{s}': {e}")))
}

/// Decode one indexed topic. Both supported types are value types, so the
/// topic is the 32-byte ABI word itself.
fn decode_topic(topic: &str, ty: ParamType) -> Result<DynSolValue, IndexerError> {
    let word: B256 = topic
        .parse()
        .map_err(|e| IndexerError::Decode(format!("invalid topic '{topic}': {e}")))?;
    match ty {
        ParamType::Address => {
            if word[..12].iter().any(|b| *b != 0) {
                return Err(IndexerError::Decode(format!("address topic has dirty high bytes: {topic}")));
            }
            Ok(DynSolValue::Address(alloy_primitives::Address::from_word(word)))
        }
        ParamType::Uint256 => Ok(DynSolValue::Uint(U256::from_be_slice(word.as_slice()), 256)),
    }
}

fn to_u64(value: &U256, what: &str) -> Result<u64, IndexerError> {
    u64::try_from(*value).map_err(|_| IndexerError::Decode(format!("{what} does not fit in u64")))
}

impl EventSignature {
    /// Canonical signature, e.g. `VaultCreated(address,address)`.
    pub fn canonical(&self) -> String {
        let types: Vec<String> = self
            .params
            .iter()
            .map(|p| p.ty.dyn_type().sol_type_name().into_owned())
            .collect();
        format!("{}({})", self.kind.name(), types.join(","))
    }

    /// `topic0` as `0x`-prefixed lower-case hex.
    pub fn topic0(&self) -> String {
        format!("0x{}", hex::encode(keccak256(self.canonical().as_bytes())))
    }

    fn decode_data(&self, data: &str) -> Result<Vec<DynSolValue>, IndexerError> {
        let types: Vec<DynSolType> = self
            .params
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.ty.dyn_type())
            .collect();
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data))
            .map_err(|e| IndexerError::Decode(format!("{}: data: {e}", self.kind)))?;
        match DynSolType::Tuple(types).abi_decode(&bytes) {
            Ok(DynSolValue::Tuple(values)) => Ok(values),
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(IndexerError::Decode(format!("{}: data: {e}", self.kind))),
        }
    }

    /// Decode a raw log of this event into a [`RawEvent`].
    pub fn decode(&self, log: &RawLog) -> Result<RawEvent, IndexerError> {
        let indexed = self.params.iter().filter(|p| p.indexed).count();
        if log.topics.len() != indexed + 1 {
            return Err(IndexerError::Decode(format!(
                "{}: expected {} topics, got {}",
                self.kind,
                indexed + 1,
                log.topics.len()
            )));
        }
        if !log.topics[0].eq_ignore_ascii_case(&self.topic0()) {
            return Err(IndexerError::Decode(format!(
                "{}: unexpected topic0 {}",
                self.kind, log.topics[0]
            )));
        }

        let mut topics = log.topics[1..].iter();
        let mut data = self.decode_data(&log.data)?.into_iter();
        let mut values = Vec::with_capacity(self.params.len());
        for p in self.params {
            let value = if p.indexed {
                match topics.next() {
                    Some(t) => decode_topic(t, p.ty)?,
                    None => return Err(IndexerError::Decode(format!("{}: missing topic", self.kind))),
                }
            } else {
                data.next().ok_or_else(|| {
                    IndexerError::Decode(format!("{}: data too short for '{}'", self.kind, p.name))
                })?
            };
            values.push(value);
        }

        let args = match (self.kind, values.as_slice()) {
            (EventKind::VaultCreated, [DynSolValue::Address(o), DynSolValue::Address(b)]) => {
                EventArgs::VaultCreated { owner: (*o).into(), beneficiary: (*b).into() }
            }
            (EventKind::ProtocolInitiated, [DynSolValue::Address(o), DynSolValue::Uint(t, _)]) => {
                EventArgs::ProtocolInitiated { owner: (*o).into(), timestamp: to_u64(t, "timestamp")? }
            }
            (EventKind::AssetsUnlocked, [DynSolValue::Address(o), DynSolValue::Address(b)]) => {
                EventArgs::AssetsUnlocked { owner: (*o).into(), beneficiary: (*b).into() }
            }
            (EventKind::ProtocolCancelled, [DynSolValue::Address(o)]) => {
                EventArgs::ProtocolCancelled { owner: (*o).into() }
            }
            _ => {
                return Err(IndexerError::Decode(format!(
                    "{}: parameter layout mismatch",
                    self.kind
                )))
            }
        };

        Ok(RawEvent {
            block_number: parse_hex_u64(&log.block_number)?,
            log_index: parse_hex_u64(&log.log_index)?,
            tx_hash: log.tx_hash.clone().unwrap_or_default(),
            args,
        })
    }
}
