//! [`ChainLogSource`] over an EVM JSON-RPC client.

use async_trait::async_trait;

use vaultindex_core::error::IndexerError;
use vaultindex_core::source::ChainLogSource;
use vaultindex_core::types::{Address, BlockRange, EventKind, RawEvent};

use crate::abi::signature;
use crate::rpc::{EvmRpcClient, LogFilter};

/// Reads vault contract logs through an [`EvmRpcClient`].
pub struct EvmLogSource<C> {
    client: C,
    contract: Address,
}

impl<C: EvmRpcClient> EvmLogSource<C> {
    pub fn new(client: C, contract: Address) -> Self {
        Self { client, contract }
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainLogSource for EvmLogSource<C> {
    async fn height(&self) -> Result<u64, IndexerError> {
        self.client.block_number().await
    }

    async fn logs(&self, kind: EventKind, range: BlockRange) -> Result<Vec<RawEvent>, IndexerError> {
        let sig = signature(kind);
        let filter = LogFilter {
            address: self.contract.to_string(),
            topic0: sig.topic0(),
            range,
        };
        let logs = self.client.get_logs(&filter).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if log.is_removed() {
                tracing::debug!(event = %kind, block = %log.block_number, "skipping removed log");
                continue;
            }
            events.push(sig.decode(log)?);
        }
        Ok(events)
    }

    async fn is_connected(&self) -> bool {
        match self.client.chain_id().await {
            Ok(chain_id) => {
                tracing::debug!(chain_id, "chain reachable");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "chain unreachable");
                false
            }
        }
    }
}
