//! Chain reorganization detection against checkpoint-retained hashes.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{chain::ChainSource, checkpoint::Checkpoint, error::WatchError};

/// Detects reorganizations of already-processed blocks and rolls the checkpoint back
/// to the last common ancestor.
///
/// The guard compares the tip hashes retained in the checkpoint (one per committed
/// cycle) against the current canonical chain. Re-dispatch of events that were already
/// delivered before a rollback is the documented at-least-once exception for the reorg
/// case: the dedupe keys above the ancestor are cleared deliberately, so the new
/// canonical chain's version of each event is delivered.
pub struct ReorgGuard {
    chain: Arc<dyn ChainSource>,
}

impl ReorgGuard {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainSource>) -> Self {
        Self { chain }
    }

    /// Verifies the retained tip hashes still match the chain.
    ///
    /// Returns `None` when the newest retained hash is still canonical. On a mismatch,
    /// walks the retained window backward to the last matching block, rolls
    /// `checkpoint` back to it, and returns the common ancestor height. If nothing in
    /// the window matches, falls back to just before the oldest retained entry.
    pub async fn check(&self, checkpoint: &mut Checkpoint) -> Result<Option<u64>, WatchError> {
        let retained: Vec<_> =
            checkpoint.recent_blocks.iter().rev().map(|(number, hash)| (*number, *hash)).collect();
        let Some(&(tip_number, tip_hash)) = retained.first() else {
            // nothing observed yet (first run, or hashes pruned)
            return Ok(None);
        };

        if self.chain.block_hash(tip_number).await? == Some(tip_hash) {
            return Ok(None);
        }

        info!(block_number = tip_number, "reorg detected, searching for common ancestor");

        for &(number, hash) in retained.iter().skip(1) {
            if self.chain.block_hash(number).await? == Some(hash) {
                info!(common_ancestor = number, "common ancestor found");
                checkpoint.rollback(number);
                return Ok(Some(number));
            }
        }

        // every retained hash was replaced; restart just before the retained window
        let (oldest, _) = retained[retained.len() - 1];
        let ancestor = oldest.saturating_sub(1);
        warn!(
            ancestor,
            "deep reorg beyond retained window, restarting before oldest retained block"
        );
        checkpoint.rollback(ancestor);
        Ok(Some(ancestor))
    }
}
