//! Chunked log fetching over the resolved watch-target set.

use std::{collections::HashMap, sync::Arc};

use alloy::{
    primitives::{Address, B256},
    rpc::types::{Filter, Log},
};
use tracing::debug;

use crate::{chain::ChainSource, error::WatchError, types::EventKey};

/// Default maximum number of blocks per `eth_getLogs` request.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1_000;

/// The materialized watch targets for one scan cycle: the flat address/topic sets for
/// the log filter, plus the `(address, topic0) → spec` route map.
///
/// Every raw log maps to at most one spec through [`WatchSet::route`]; logs matching
/// neither address nor topic are unmonitored and ignored.
#[derive(Debug, Default)]
pub struct WatchSet {
    addresses: Vec<Address>,
    topics: Vec<B256>,
    routes: HashMap<(Address, B256), usize>,
}

impl WatchSet {
    /// Registers one emitting address for the spec at `spec_index` with the given
    /// event signature hash.
    pub fn insert(&mut self, address: Address, topic0: B256, spec_index: usize) {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
        if !self.topics.contains(&topic0) {
            self.topics.push(topic0);
        }
        self.routes.insert((address, topic0), spec_index);
    }

    /// Maps a raw log to the index of its owning spec, if monitored.
    #[must_use]
    pub fn route(&self, log: &Log) -> Option<usize> {
        let topic0 = log.topic0()?;
        self.routes.get(&(log.address(), *topic0)).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Pulls logs for a block range, splitting it into bounded chunks to respect upstream
/// query-size limits.
pub struct LogScanner {
    chain: Arc<dyn ChainSource>,
    max_block_range: u64,
}

impl LogScanner {
    /// Values below 1 are clamped to 1 (a chunk always covers at least one block).
    #[must_use]
    pub fn new(chain: Arc<dyn ChainSource>, max_block_range: u64) -> Self {
        Self { chain, max_block_range: max_block_range.max(1) }
    }

    /// Fetches all logs matching `watch` in `from..=to`, ordered by
    /// `(block_number, tx_index, log_index)` ascending.
    ///
    /// Transient failures are retried inside the chain source; a chunk that exhausts
    /// its retries surfaces [`WatchError::ScanFailed`], aborting the current cycle
    /// only. The checkpoint is never advanced past a failed chunk, so the same range
    /// is retried on the next cycle.
    pub async fn fetch(
        &self,
        watch: &WatchSet,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, WatchError> {
        let mut logs = Vec::new();

        let mut chunk_start = from;
        while chunk_start <= to {
            let chunk_end = chunk_start.saturating_add(self.max_block_range - 1).min(to);
            let filter = Filter::new()
                .address(watch.addresses.clone())
                .event_signature(watch.topics.clone())
                .from_block(chunk_start)
                .to_block(chunk_end);

            let chunk = self
                .chain
                .logs(&filter)
                .await
                .map_err(|source| WatchError::ScanFailed { from: chunk_start, to: chunk_end, source })?;

            debug!(from = chunk_start, to = chunk_end, count = chunk.len(), "fetched log chunk");
            logs.extend(chunk);
            chunk_start = chunk_end + 1;
        }

        // chunks arrive in range order, but re-sort into canonical chain order since
        // handler side effects must appear in (block, tx, log) order
        logs.sort_by_key(|log| EventKey::from_log(log).unwrap_or_default());
        Ok(logs)
    }
}
