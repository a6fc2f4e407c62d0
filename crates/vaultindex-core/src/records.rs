//! Projection records written to the external store.
//!
//! Rows travel as JSON objects so that every store backend (memory, SQLite,
//! REST) can apply partial updates the same way. The typed records here are
//! the canonical shape of those rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::IndexerError;
use crate::types::Address;

/// A projection row: column name → value.
pub type Row = Map<String, Value>;

/// Column every projection table is keyed on.
pub const KEY_COLUMN: &str = "owner_wallet";

/// Projection tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    Vaults,
    Secrets,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vaults => "vaults",
            Self::Secrets => "secrets",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Statuses ────────────────────────────────────────────────────────────────

/// Lifecycle state of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultStatus {
    Active,
    Initiated,
    Unlocked,
}

impl VaultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Initiated => "initiated",
            Self::Unlocked => "unlocked",
        }
    }
}

/// Lifecycle state of a vault's paired secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStatus {
    Locked,
    Unlocked,
}

impl SecretStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

// ─── VaultRecord ─────────────────────────────────────────────────────────────

/// One row of the `vaults` table, keyed by owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub owner_wallet: Address,
    pub beneficiary_wallet: Address,
    pub status: VaultStatus,
    /// Wall-clock time the indexer observed `ProtocolInitiated`.
    #[serde(default)]
    pub initiated_at: Option<DateTime<Utc>>,
}

impl VaultRecord {
    /// Row upserted on `VaultCreated`.
    ///
    /// `initiated_at` is deliberately absent so a replayed creation does not
    /// clobber it on stores that merge columns.
    pub fn creation_row(owner: &Address, beneficiary: &Address) -> Row {
        into_row(json!({
            KEY_COLUMN: owner,
            "beneficiary_wallet": beneficiary,
            "status": VaultStatus::Active,
        }))
    }

    /// Partial row for a status transition.
    pub fn status_patch(status: VaultStatus) -> Row {
        into_row(json!({ "status": status }))
    }

    /// Partial row for `ProtocolInitiated`.
    pub fn initiation_patch(observed_at: DateTime<Utc>) -> Row {
        into_row(json!({
            "status": VaultStatus::Initiated,
            "initiated_at": observed_at,
        }))
    }

    pub fn from_row(row: &Row) -> Result<Self, IndexerError> {
        serde_json::from_value(Value::Object(row.clone()))
            .map_err(|e| IndexerError::Decode(format!("vault row: {e}")))
    }
}

// ─── SecretRecord ────────────────────────────────────────────────────────────

/// One row of the externally-owned `secrets` table. Only `status` is written here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub owner_wallet: Address,
    pub status: SecretStatus,
}

impl SecretRecord {
    pub fn status_patch(status: SecretStatus) -> Row {
        into_row(json!({ "status": status }))
    }

    pub fn from_row(row: &Row) -> Result<Self, IndexerError> {
        serde_json::from_value(Value::Object(row.clone()))
            .map_err(|e| IndexerError::Decode(format!("secret row: {e}")))
    }
}

fn into_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Merge `patch` into `row` column by column (last write wins).
pub fn merge_row(row: &mut Row, patch: &Row) {
    for (k, v) in patch {
        row.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn creation_row_shape() {
        let owner = addr("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
        let ben = addr("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let row = VaultRecord::creation_row(&owner, &ben);
        assert_eq!(row["owner_wallet"], "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(row["status"], "active");
        assert!(!row.contains_key("initiated_at"));

        let record = VaultRecord::from_row(&row).unwrap();
        assert_eq!(record.status, VaultStatus::Active);
        assert_eq!(record.initiated_at, None);
    }

    #[test]
    fn initiation_patch_merges() {
        let owner = addr("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let ben = addr("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let mut row = VaultRecord::creation_row(&owner, &ben);
        let at = DateTime::from_timestamp(1_700_000_123, 0).unwrap();
        merge_row(&mut row, &VaultRecord::initiation_patch(at));

        let record = VaultRecord::from_row(&row).unwrap();
        assert_eq!(record.status, VaultStatus::Initiated);
        assert_eq!(record.initiated_at, Some(at));
        assert_eq!(record.beneficiary_wallet, ben);
    }

    #[test]
    fn secret_status_serializes_lowercase() {
        let patch = SecretRecord::status_patch(SecretStatus::Unlocked);
        assert_eq!(patch["status"], "unlocked");
    }
}
