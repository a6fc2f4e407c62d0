//! Event handler trait, registry and the per-cycle dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::indexer::DispatchOrder;
use crate::types::{EventBatches, EventKind, IndexContext, RawEvent};

/// Trait for event handlers.
///
/// A handler performs idempotent writes for one event type. Returning an
/// error never aborts the cycle; the dispatcher records it and moves on.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for each event of [`Self::kind`].
    async fn handle(&self, event: &RawEvent, ctx: &IndexContext) -> Result<(), IndexerError>;

    /// The event type this handler processes.
    fn kind(&self) -> EventKind;
}

/// Registry of event handlers keyed by event type.
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for its event type.
    pub fn on_event(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(handler.kind()).or_default().push(handler);
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Run every handler registered for the event's type.
    ///
    /// All handlers run even if an earlier one fails; their errors are returned.
    pub async fn dispatch_event(&self, event: &RawEvent, ctx: &IndexContext) -> Vec<IndexerError> {
        let mut errors = Vec::new();
        if let Some(handlers) = self.handlers.get(&event.kind()) {
            for handler in handlers {
                if let Err(e) = handler.handle(event, ctx).await {
                    errors.push(e);
                }
            }
        }
        errors
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// One handler failure observed during a cycle.
#[derive(Debug)]
pub struct HandlerFailure {
    pub kind: EventKind,
    pub owner: String,
    pub block_number: u64,
    pub log_index: u64,
    pub error: IndexerError,
}

/// Outcome of dispatching one fetched range.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Events routed to handlers.
    pub dispatched: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Routes every fetched event to its handlers in the configured order.
pub struct Dispatcher {
    registry: HandlerRegistry,
    order: DispatchOrder,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, order: DispatchOrder) -> Self {
        Self { registry, order }
    }

    pub fn order(&self) -> DispatchOrder {
        self.order
    }

    /// Dispatch all events. Handler failures are logged and collected; they
    /// never stop later events in this or other type batches.
    pub async fn dispatch(&self, batches: &EventBatches, ctx: &IndexContext) -> DispatchReport {
        let events = match self.order {
            DispatchOrder::TypePriority => batches.by_type_priority(),
            DispatchOrder::Chronological => batches.chronological(),
        };

        let mut report = DispatchReport::default();
        for event in events {
            report.dispatched += 1;
            for error in self.registry.dispatch_event(event, ctx).await {
                tracing::error!(
                    event = %event.kind(),
                    owner = %event.owner(),
                    block = event.block_number,
                    log_index = event.log_index,
                    range = %ctx.range,
                    error = %error,
                    "handler failed; write dropped"
                );
                report.failures.push(HandlerFailure {
                    kind: event.kind(),
                    owner: event.owner().to_string(),
                    block_number: event.block_number,
                    log_index: event.log_index,
                    error,
                });
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, BlockRange, EventArgs};
    use std::sync::Mutex;

    /// Records the order events were seen in; fails on a chosen block.
    struct Recorder {
        kind: EventKind,
        seen: Arc<Mutex<Vec<(EventKind, u64)>>>,
        fail_on_block: Option<u64>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, e: &RawEvent, _c: &IndexContext) -> Result<(), IndexerError> {
            self.seen.lock().unwrap().push((e.kind(), e.block_number));
            if Some(e.block_number) == self.fail_on_block {
                return Err(IndexerError::ProjectionWrite {
                    table: "vaults".into(),
                    owner: e.owner().to_string(),
                    reason: "rejected".into(),
                });
            }
            Ok(())
        }
        fn kind(&self) -> EventKind {
            self.kind
        }
    }

    fn owner() -> Address {
        Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
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
            range: BlockRange { from: 101, to: 110 },
            chain: "test".into(),
        }
    }

    fn batches() -> EventBatches {
        let mut b = EventBatches::new();
        b.insert(
            EventKind::VaultCreated,
            vec![
                ev(EventArgs::VaultCreated { owner: owner(), beneficiary: owner() }, 105),
                ev(EventArgs::VaultCreated { owner: owner(), beneficiary: owner() }, 106),
            ],
        );
        b.insert(
            EventKind::ProtocolCancelled,
            vec![ev(EventArgs::ProtocolCancelled { owner: owner() }, 101)],
        );
        b
    }

    fn registry(
        seen: &Arc<Mutex<Vec<(EventKind, u64)>>>,
        fail_on_block: Option<u64>,
    ) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for kind in EventKind::DISPATCH_ORDER {
            registry.on_event(Arc::new(Recorder {
                kind,
                seen: seen.clone(),
                fail_on_block,
            }));
        }
        registry
    }

    #[tokio::test]
    async fn type_priority_order() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = Dispatcher::new(registry(&seen, None), DispatchOrder::TypePriority);
        let report = d.dispatch(&batches(), &ctx()).await;

        assert_eq!(report.dispatched, 3);
        assert!(report.is_clean());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::VaultCreated, 105),
                (EventKind::VaultCreated, 106),
                (EventKind::ProtocolCancelled, 101),
            ]
        );
    }

    #[tokio::test]
    async fn chronological_order() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = Dispatcher::new(registry(&seen, None), DispatchOrder::Chronological);
        d.dispatch(&batches(), &ctx()).await;

        let blocks: Vec<u64> = seen.lock().unwrap().iter().map(|(_, b)| *b).collect();
        assert_eq!(blocks, vec![101, 105, 106]);
    }

    #[tokio::test]
    async fn failure_does_not_stop_later_events() {
        let seen = Arc::new(Mutex::new(vec![]));
        let d = Dispatcher::new(registry(&seen, Some(105)), DispatchOrder::TypePriority);
        let report = d.dispatch(&batches(), &ctx()).await;

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].block_number, 105);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unregistered_kind_is_skipped() {
        let d = Dispatcher::new(HandlerRegistry::new(), DispatchOrder::TypePriority);
        let report = d.dispatch(&batches(), &ctx()).await;
        assert_eq!(report.dispatched, 3);
        assert!(report.is_clean());
    }
}
