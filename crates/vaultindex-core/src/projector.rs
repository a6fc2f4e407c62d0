//! State projector: one handler per event type, each applying idempotent
//! writes to the projection store.
//!
//! | Event               | Effect                                                    |
//! |---------------------|-----------------------------------------------------------|
//! | `VaultCreated`      | upsert vault `{owner, beneficiary, status: active}`       |
//! | `ProtocolInitiated` | vault `status: initiated`, `initiated_at: <observed now>` |
//! | `AssetsUnlocked`    | vault `status: unlocked`, then secret `status: unlocked`  |
//! | `ProtocolCancelled` | vault `status: active`, from any state                    |
//!
//! A failed write is returned to the dispatcher, which logs it and carries
//! on. Nothing is retried: the cursor advances past the range regardless, so
//! a dropped write stays dropped until reconciled by hand.
//!
//! The two writes of `AssetsUnlocked` are not atomic. A crash or failure
//! between them leaves `vaults` and `secrets` disagreeing, and the event is
//! never replayed once the cursor has moved on.
//!
//! `ProtocolCancelled` reverting an `unlocked` vault to `active` is kept as
//! observed behavior; it may not be intended business logic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::handler::{EventHandler, HandlerRegistry};
use crate::records::{Row, SecretRecord, SecretStatus, Table, VaultRecord, VaultStatus};
use crate::types::{Address, EventArgs, EventKind, IndexContext, RawEvent};

// ─── Store / alert seams ─────────────────────────────────────────────────────

/// A key-addressed table store with upsert/update semantics.
///
/// Both writes must be idempotent under replay of identical arguments.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Insert `row` under `key`, or merge it into the existing row.
    async fn upsert(&self, table: Table, key: &Address, row: Row) -> Result<(), IndexerError>;

    /// Merge `patch` into the row under `key`. Returns the number of rows matched.
    async fn update(&self, table: Table, key: &Address, patch: Row) -> Result<u64, IndexerError>;

    /// Read a row back.
    async fn get(&self, table: Table, key: &Address) -> Result<Option<Row>, IndexerError>;
}

/// Payload of the terminal-event alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub owner: Address,
    /// Timestamp carried by the chain event.
    pub chain_timestamp: u64,
    /// When the indexer observed the event.
    pub observed_at: DateTime<Utc>,
}

/// Side channel notified on `ProtocolInitiated`. Delivery is at-least-once.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), IndexerError>;
}

/// Alert sink that only writes a log banner.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), IndexerError> {
        tracing::warn!(
            owner = %alert.owner,
            chain_timestamp = alert.chain_timestamp,
            observed_at = %alert.observed_at,
            "PROTOCOL INITIATED: notifying government and verifier portals"
        );
        Ok(())
    }
}

/// Wall-clock source for `initiated_at`.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn write_error(table: Table, owner: &Address, err: IndexerError) -> IndexerError {
    match err {
        e @ IndexerError::ProjectionWrite { .. } => e,
        other => IndexerError::ProjectionWrite {
            table: table.name().to_string(),
            owner: owner.to_string(),
            reason: other.to_string(),
        },
    }
}

fn unexpected(expected: EventKind, event: &RawEvent) -> IndexerError {
    IndexerError::Decode(format!(
        "{expected} handler received {} event at block {}",
        event.kind(),
        event.block_number
    ))
}

async fn update_expecting_row(
    store: &dyn ProjectionStore,
    table: Table,
    owner: &Address,
    patch: Row,
    event: EventKind,
) -> Result<(), IndexerError> {
    let matched = store
        .update(table, owner, patch)
        .await
        .map_err(|e| write_error(table, owner, e))?;
    if matched == 0 {
        tracing::warn!(%table, %owner, %event, "no row to update");
    }
    Ok(())
}

// ─── StateProjector ──────────────────────────────────────────────────────────

/// Builds the four lifecycle handlers over a shared store.
pub struct StateProjector {
    store: Arc<dyn ProjectionStore>,
    alerts: Option<Arc<dyn AlertSink>>,
    clock: Clock,
}

impl StateProjector {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self {
            store,
            alerts: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Notify `sink` on every `ProtocolInitiated`.
    pub fn with_alerts(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Override the clock used for `initiated_at` (tests).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Register all four handlers into `registry`.
    pub fn register(&self, registry: &mut HandlerRegistry) {
        registry.on_event(Arc::new(VaultCreatedHandler {
            store: self.store.clone(),
        }));
        registry.on_event(Arc::new(ProtocolInitiatedHandler {
            store: self.store.clone(),
            alerts: self.alerts.clone(),
            clock: self.clock.clone(),
        }));
        registry.on_event(Arc::new(AssetsUnlockedHandler {
            store: self.store.clone(),
        }));
        registry.on_event(Arc::new(ProtocolCancelledHandler {
            store: self.store.clone(),
        }));
    }

    /// A registry containing only the projector's handlers.
    pub fn into_registry(self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        self.register(&mut registry);
        registry
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

struct VaultCreatedHandler {
    store: Arc<dyn ProjectionStore>,
}

#[async_trait]
impl EventHandler for VaultCreatedHandler {
    async fn handle(&self, event: &RawEvent, _ctx: &IndexContext) -> Result<(), IndexerError> {
        let EventArgs::VaultCreated { owner, beneficiary } = &event.args else {
            return Err(unexpected(self.kind(), event));
        };
        self.store
            .upsert(Table::Vaults, owner, VaultRecord::creation_row(owner, beneficiary))
            .await
            .map_err(|e| write_error(Table::Vaults, owner, e))?;
        tracing::info!(%owner, %beneficiary, block = event.block_number, "vault created");
        Ok(())
    }

    fn kind(&self) -> EventKind {
        EventKind::VaultCreated
    }
}

struct ProtocolInitiatedHandler {
    store: Arc<dyn ProjectionStore>,
    alerts: Option<Arc<dyn AlertSink>>,
    clock: Clock,
}

#[async_trait]
impl EventHandler for ProtocolInitiatedHandler {
    async fn handle(&self, event: &RawEvent, _ctx: &IndexContext) -> Result<(), IndexerError> {
        let EventArgs::ProtocolInitiated { owner, timestamp } = &event.args else {
            return Err(unexpected(self.kind(), event));
        };
        // observed-at, not the chain timestamp
        let observed_at = (self.clock)();

        let write = update_expecting_row(
            self.store.as_ref(),
            Table::Vaults,
            owner,
            VaultRecord::initiation_patch(observed_at),
            self.kind(),
        )
        .await;
        if write.is_ok() {
            tracing::info!(%owner, block = event.block_number, "protocol initiated");
        }

        // alert even if the projection write failed
        let alerted = match &self.alerts {
            Some(sink) => {
                let alert = Alert {
                    owner: owner.clone(),
                    chain_timestamp: *timestamp,
                    observed_at,
                };
                sink.notify(&alert).await
            }
            None => Ok(()),
        };

        match (write, alerted) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(w), Err(a)) => {
                tracing::error!(
                    %owner,
                    event = %self.kind(),
                    block = event.block_number,
                    error = %a,
                    "alert failed after projection write failure"
                );
                Err(w)
            }
        }
    }

    fn kind(&self) -> EventKind {
        EventKind::ProtocolInitiated
    }
}

struct AssetsUnlockedHandler {
    store: Arc<dyn ProjectionStore>,
}

#[async_trait]
impl EventHandler for AssetsUnlockedHandler {
    async fn handle(&self, event: &RawEvent, _ctx: &IndexContext) -> Result<(), IndexerError> {
        let EventArgs::AssetsUnlocked { owner, .. } = &event.args else {
            return Err(unexpected(self.kind(), event));
        };

        // Two best-effort writes; the second runs even if the first failed.
        let vault = update_expecting_row(
            self.store.as_ref(),
            Table::Vaults,
            owner,
            VaultRecord::status_patch(VaultStatus::Unlocked),
            self.kind(),
        )
        .await;
        let secret = update_expecting_row(
            self.store.as_ref(),
            Table::Secrets,
            owner,
            SecretRecord::status_patch(SecretStatus::Unlocked),
            self.kind(),
        )
        .await;

        match (vault, secret) {
            (Ok(()), Ok(())) => {
                tracing::info!(%owner, block = event.block_number, "assets unlocked");
                Ok(())
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                tracing::warn!(%owner, "vaults and secrets now disagree for this owner");
                Err(e)
            }
            (Err(v), Err(s)) => Err(IndexerError::ProjectionWrite {
                table: "vaults+secrets".into(),
                owner: owner.to_string(),
                reason: format!("{v}; {s}"),
            }),
        }
    }

    fn kind(&self) -> EventKind {
        EventKind::AssetsUnlocked
    }
}

struct ProtocolCancelledHandler {
    store: Arc<dyn ProjectionStore>,
}

#[async_trait]
impl EventHandler for ProtocolCancelledHandler {
    async fn handle(&self, event: &RawEvent, _ctx: &IndexContext) -> Result<(), IndexerError> {
        let EventArgs::ProtocolCancelled { owner } = &event.args else {
            return Err(unexpected(self.kind(), event));
        };
        update_expecting_row(
            self.store.as_ref(),
            Table::Vaults,
            owner,
            VaultRecord::status_patch(VaultStatus::Active),
            self.kind(),
        )
        .await?;
        tracing::info!(%owner, block = event.block_number, "protocol cancelled");
        Ok(())
    }

    fn kind(&self) -> EventKind {
        EventKind::ProtocolCancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::merge_row;
    use crate::types::BlockRange;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Minimal map-backed store; `fail` lists tables whose writes are rejected.
    #[derive(Default)]
    struct MapStore {
        rows: Mutex<HashMap<(Table, Address), Row>>,
        fail: Mutex<HashSet<Table>>,
        writes: Mutex<u32>,
    }

    impl MapStore {
        fn check(&self, table: Table) -> Result<(), IndexerError> {
            *self.writes.lock().unwrap() += 1;
            if self.fail.lock().unwrap().contains(&table) {
                return Err(IndexerError::Storage("rejected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProjectionStore for MapStore {
        async fn upsert(&self, table: Table, key: &Address, row: Row) -> Result<(), IndexerError> {
            self.check(table)?;
            let mut rows = self.rows.lock().unwrap();
            merge_row(rows.entry((table, key.clone())).or_default(), &row);
            Ok(())
        }

        async fn update(&self, table: Table, key: &Address, patch: Row) -> Result<u64, IndexerError> {
            self.check(table)?;
            match self.rows.lock().unwrap().get_mut(&(table, key.clone())) {
                Some(row) => {
                    merge_row(row, &patch);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        async fn get(&self, table: Table, key: &Address) -> Result<Option<Row>, IndexerError> {
            Ok(self.rows.lock().unwrap().get(&(table, key.clone())).cloned())
        }
    }

    #[derive(Default)]
    struct CapturingSink(Mutex<Vec<Alert>>);

    #[async_trait]
    impl AlertSink for CapturingSink {
        async fn notify(&self, alert: &Alert) -> Result<(), IndexerError> {
            self.0.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct DownSink;

    #[async_trait]
    impl AlertSink for DownSink {
        async fn notify(&self, _alert: &Alert) -> Result<(), IndexerError> {
            Err(IndexerError::Alert("down".into()))
        }
    }

    fn a() -> Address {
        Address::parse("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap()
    }

    fn b() -> Address {
        Address::parse("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap()
    }

    fn ev(args: EventArgs, block: u64) -> RawEvent {
        RawEvent {
            block_number: block,
            log_index: 0,
            tx_hash: "0x0".into(),
            args,
        }
    }

    fn ctx() -> IndexContext {
        IndexContext {
            range: BlockRange { from: 1, to: 10 },
            chain: "test".into(),
        }
    }

    fn fixed_clock() -> (Clock, DateTime<Utc>) {
        let at = DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        (Arc::new(move || at), at)
    }

    async fn vault(store: &MapStore) -> VaultRecord {
        VaultRecord::from_row(&store.get(Table::Vaults, &a()).await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn vault_created_is_idempotent() {
        let store = Arc::new(MapStore::default());
        let registry = StateProjector::new(store.clone()).into_registry();
        let created = ev(EventArgs::VaultCreated { owner: a(), beneficiary: b() }, 1);

        assert!(registry.dispatch_event(&created, &ctx()).await.is_empty());
        let once = store.get(Table::Vaults, &a()).await.unwrap();
        assert!(registry.dispatch_event(&created, &ctx()).await.is_empty());
        let twice = store.get(Table::Vaults, &a()).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(vault(&store).await.status, VaultStatus::Active);
    }

    #[tokio::test]
    async fn initiated_uses_observed_time_and_alerts() {
        let store = Arc::new(MapStore::default());
        let sink = Arc::new(CapturingSink::default());
        let (clock, at) = fixed_clock();
        let registry = StateProjector::new(store.clone())
            .with_alerts(sink.clone())
            .with_clock(clock)
            .into_registry();

        registry
            .dispatch_event(&ev(EventArgs::VaultCreated { owner: a(), beneficiary: b() }, 1), &ctx())
            .await;
        let errors = registry
            .dispatch_event(
                &ev(EventArgs::ProtocolInitiated { owner: a(), timestamp: 1_700_000_000 }, 2),
                &ctx(),
            )
            .await;
        assert!(errors.is_empty());

        let record = vault(&store).await;
        assert_eq!(record.status, VaultStatus::Initiated);
        assert_eq!(record.initiated_at, Some(at));

        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].chain_timestamp, 1_700_000_000);
        assert_eq!(alerts[0].observed_at, at);
    }

    #[tokio::test]
    async fn initiated_reports_write_error_when_alert_also_fails() {
        let store = Arc::new(MapStore::default());
        store.fail.lock().unwrap().insert(Table::Vaults);
        let registry = StateProjector::new(store.clone())
            .with_alerts(Arc::new(DownSink))
            .into_registry();

        let errors = registry
            .dispatch_event(
                &ev(EventArgs::ProtocolInitiated { owner: a(), timestamp: 1_700_000_000 }, 2),
                &ctx(),
            )
            .await;

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], IndexerError::ProjectionWrite { .. }));
    }

    #[tokio::test]
    async fn initiated_alert_failure_alone_is_reported() {
        let store = Arc::new(MapStore::default());
        let registry = StateProjector::new(store.clone())
            .with_alerts(Arc::new(DownSink))
            .into_registry();
        registry
            .dispatch_event(&ev(EventArgs::VaultCreated { owner: a(), beneficiary: b() }, 1), &ctx())
            .await;

        let errors = registry
            .dispatch_event(
                &ev(EventArgs::ProtocolInitiated { owner: a(), timestamp: 1_700_000_000 }, 2),
                &ctx(),
            )
            .await;

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], IndexerError::Alert(_)));
        assert_eq!(vault(&store).await.status, VaultStatus::Initiated);
    }

    #[tokio::test]
    async fn unlocked_writes_both_tables() {
        let store = Arc::new(MapStore::default());
        let mut secret = Row::new();
        secret.insert("owner_wallet".into(), a().to_string().into());
        secret.insert("status".into(), "locked".into());
        store.upsert(Table::Secrets, &a(), secret).await.unwrap();

        let registry = StateProjector::new(store.clone()).into_registry();
        registry
            .dispatch_event(&ev(EventArgs::VaultCreated { owner: a(), beneficiary: b() }, 1), &ctx())
            .await;
        let errors = registry
            .dispatch_event(&ev(EventArgs::AssetsUnlocked { owner: a(), beneficiary: b() }, 2), &ctx())
            .await;
        assert!(errors.is_empty());

        assert_eq!(vault(&store).await.status, VaultStatus::Unlocked);
        let secret = store.get(Table::Secrets, &a()).await.unwrap().unwrap();
        assert_eq!(SecretRecord::from_row(&secret).unwrap().status, SecretStatus::Unlocked);
    }

    #[tokio::test]
    async fn unlocked_attempts_secret_write_after_vault_failure() {
        let store = Arc::new(MapStore::default());
        store.fail.lock().unwrap().insert(Table::Vaults);
        let registry = StateProjector::new(store.clone()).into_registry();

        let errors = registry
            .dispatch_event(&ev(EventArgs::AssetsUnlocked { owner: a(), beneficiary: b() }, 2), &ctx())
            .await;

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], IndexerError::ProjectionWrite { .. }));
        assert_eq!(*store.writes.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_reverts_unlocked_vault_to_active() {
        let store = Arc::new(MapStore::default());
        let registry = StateProjector::new(store.clone()).into_registry();
        for e in [
            ev(EventArgs::VaultCreated { owner: a(), beneficiary: b() }, 1),
            ev(EventArgs::AssetsUnlocked { owner: a(), beneficiary: b() }, 2),
            ev(EventArgs::ProtocolCancelled { owner: a() }, 3),
        ] {
            registry.dispatch_event(&e, &ctx()).await;
        }
        assert_eq!(vault(&store).await.status, VaultStatus::Active);
    }

    #[tokio::test]
    async fn update_without_vault_is_not_an_error() {
        let store = Arc::new(MapStore::default());
        let registry = StateProjector::new(store.clone()).into_registry();
        let errors = registry
            .dispatch_event(&ev(EventArgs::ProtocolCancelled { owner: a() }, 3), &ctx())
            .await;
        assert!(errors.is_empty());
        assert!(store.get(Table::Vaults, &a()).await.unwrap().is_none());
    }
}
