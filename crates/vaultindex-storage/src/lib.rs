//! vaultindex-storage: projection and checkpoint store backends.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)
//! - `rest`: PostgREST-style HTTP API via `reqwest` (projections only)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "rest")]
pub mod rest;

pub use memory::InMemoryStore;
