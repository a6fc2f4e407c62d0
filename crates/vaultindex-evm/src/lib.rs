//! vaultindex-evm: EVM log source, range fetcher and poll loop.

pub mod abi;
pub mod builder;
pub mod fetcher;
pub mod index_loop;
pub mod rpc;
pub mod source;

pub use abi::{signature, EventSignature, RawLog};
pub use builder::IndexerBuilder;
pub use fetcher::{FetchResult, RangeFetcher};
pub use index_loop::{CycleOutcome, PollLoop};
pub use rpc::{EvmRpcClient, HttpEvmClient, LogFilter};
pub use source::EvmLogSource;
