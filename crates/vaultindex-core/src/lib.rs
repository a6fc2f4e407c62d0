//! vaultindex-core: foundation for the vault lifecycle indexer.
//!
//! # Architecture
//!
//! ```text
//! PollLoop (vaultindex-evm)
//!     ├── Cursor             (watermark of the last applied block)
//!     ├── RangeFetcher       (ChainLogSource → EventBatches)
//!     ├── Dispatcher         (type-priority or chronological routing)
//!     │     └── HandlerRegistry → StateProjector handlers → ProjectionStore
//!     └── CheckpointManager  (optional durable cursor)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod indexer;
pub mod projector;
pub mod records;
pub mod source;
pub mod types;

pub use backoff::{BackoffConfig, ErrorBackoff};
pub use checkpoint::{CheckpointManager, CheckpointStore};
pub use cursor::Cursor;
pub use error::IndexerError;
pub use handler::{DispatchReport, Dispatcher, EventHandler, HandlerRegistry};
pub use indexer::{DispatchOrder, IndexerConfig, IndexerState, IndexerStatus, StartMode};
pub use projector::{Alert, AlertSink, LogAlertSink, ProjectionStore, StateProjector};
pub use records::{Row, SecretRecord, SecretStatus, Table, VaultRecord, VaultStatus};
pub use source::ChainLogSource;
pub use types::{Address, BlockRange, EventArgs, EventBatches, EventKind, IndexContext, RawEvent};
