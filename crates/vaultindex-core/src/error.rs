//! Error types for the vaultindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Chain RPC or projection store unreachable. Recovered by backoff.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A per-event-type log query failed or returned a malformed response.
    /// Aborts the whole range fetch; the cursor is not advanced.
    #[error("fetch of '{event}' logs in [{from}, {to}] failed: {reason}")]
    Fetch {
        event: String,
        from: u64,
        to: u64,
        reason: String,
    },

    /// The projection store rejected a write. Logged, never retried.
    #[error("projection write to '{table}' for owner {owner} failed: {reason}")]
    ProjectionWrite {
        table: String,
        owner: String,
        reason: String,
    },

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("cursor cannot move backwards: current {current}, requested {requested}")]
    InvalidCursor { current: u64, requested: u64 },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("alert delivery failed: {0}")]
    Alert(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` if the chain or store could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Returns `true` if this is a range-fetch failure.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    /// Returns `true` if the next cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Rpc(_) | Self::Fetch { .. } | Self::Storage(_)
        )
    }

    /// Wrap any error raised while querying logs of `event` into a `Fetch` error.
    ///
    /// Connectivity errors are kept as-is so the loop can report them distinctly.
    pub fn into_fetch(self, event: &str, from: u64, to: u64) -> Self {
        match self {
            e @ (Self::Connectivity(_) | Self::Fetch { .. }) => e,
            other => Self::Fetch {
                event: event.to_string(),
                from,
                to,
                reason: other.to_string(),
            },
        }
    }
}
