//! Read-only chain access.
//!
//! All network suspension points of the watcher go through [`ChainSource`]. The
//! production implementation is [`RpcChainSource`]; tests inject scripted fakes.

mod rpc;

pub use rpc::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY, RpcChainSource,
    RpcChainSourceBuilder,
};

use alloy::{
    primitives::{Address, B256, Bytes},
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a [`ChainSource`].
///
/// Transient transport conditions are retried inside the source; an error reaching the
/// caller means retries were exhausted.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The per-call timeout elapsed, retries included.
    #[error("chain operation timed out")]
    Timeout,

    /// The underlying transport failed after exhausting retries.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Minimal read-only view of the chain needed by the watcher.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block number (the chain head).
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Hash of the block at `number` on the current canonical chain, or `None` if the
    /// chain has no block at that height.
    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ChainError>;

    /// Logs matching `filter`, as returned by `eth_getLogs`.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;

    /// Executes a read-only contract call (`eth_call`) against `to`.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;
}
