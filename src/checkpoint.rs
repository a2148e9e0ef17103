//! Durable scan progress.
//!
//! The checkpoint is the single shared mutable resource of the watcher. It is owned by
//! the dispatcher, mutated only between cycles, and persisted through a
//! [`CheckpointStore`] whose `save` is assumed crash-atomic.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Mutex,
};

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::types::EventKey;

/// Default trailing window, in blocks, for dedupe keys and retained tip hashes.
pub const DEFAULT_WINDOW: u64 = 1_000;

/// Durable record of the last fully-processed block, plus a trailing window of
/// dispatched event keys (dedupe) and observed tip hashes (reorg detection).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last fully-processed block; advances forward only.
    pub block: u64,
    /// Keys of events dispatched within the trailing window.
    pub recent_events: BTreeSet<EventKey>,
    /// Observed canonical tip hash per committed cycle, within the trailing window.
    pub recent_blocks: BTreeMap<u64, B256>,
}

impl Checkpoint {
    /// A checkpoint that considers everything up to and including `block` processed.
    #[must_use]
    pub fn at(block: u64) -> Self {
        Self { block, ..Self::default() }
    }

    /// Whether `key` was already dispatched within the trailing window.
    #[must_use]
    pub fn is_duplicate(&self, key: EventKey) -> bool {
        self.recent_events.contains(&key)
    }

    /// Records a dispatched event key.
    pub fn record_event(&mut self, key: EventKey) {
        self.recent_events.insert(key);
    }

    /// Advances the processed marker to `to`, retains the observed tip hash, and
    /// prunes window entries older than `window` blocks.
    ///
    /// The marker never moves backward through this method; rollbacks go through
    /// [`Checkpoint::rollback`].
    pub fn advance(&mut self, to: u64, tip_hash: Option<B256>, window: u64) {
        if to <= self.block {
            return;
        }
        self.block = to;
        if let Some(hash) = tip_hash {
            self.recent_blocks.insert(to, hash);
        }

        let cutoff = self.block.saturating_sub(window);
        self.recent_events = self.recent_events.split_off(&EventKey::new(cutoff, 0, 0));
        self.recent_blocks = self.recent_blocks.split_off(&cutoff);
    }

    /// Forces the processed marker back to `to` after a reorg, clearing dedupe keys
    /// and retained hashes above that point so the affected tail is re-scanned and
    /// re-dispatched.
    pub fn rollback(&mut self, to: u64) {
        debug!(from = self.block, to, "rolling checkpoint back");
        self.block = to;
        let _ = self.recent_events.split_off(&EventKey::new(to + 1, 0, 0));
        let _ = self.recent_blocks.split_off(&(to + 1));
    }
}

/// Errors from checkpoint persistence.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt checkpoint data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable key/value persistence for the checkpoint.
///
/// A single `save` is assumed crash-atomic; the dispatcher is the only writer.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the last saved checkpoint, or `None` on first run.
    async fn load(&self) -> Result<Option<Checkpoint>, StoreError>;

    /// Persists `checkpoint`, replacing any previous state.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

/// File-backed store writing JSON through a temp file + rename, so a crash mid-save
/// leaves the previous checkpoint intact.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Checkpoint>, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(checkpoint)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<Checkpoint>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        *self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    const HASH_A: B256 =
        b256!("0x00000000000000000000000000000000000000000000000000000000000000aa");
    const HASH_B: B256 =
        b256!("0x00000000000000000000000000000000000000000000000000000000000000bb");

    #[test]
    fn advance_moves_forward_only() {
        let mut checkpoint = Checkpoint::at(110);
        checkpoint.advance(100, Some(HASH_A), DEFAULT_WINDOW);
        assert_eq!(checkpoint.block, 110);
        assert!(checkpoint.recent_blocks.is_empty());
    }

    #[test]
    fn advance_prunes_entries_outside_the_window() {
        let mut checkpoint = Checkpoint::at(0);
        checkpoint.record_event(EventKey::new(5, 0, 0));
        checkpoint.advance(10, Some(HASH_A), 100);
        checkpoint.record_event(EventKey::new(105, 0, 1));
        checkpoint.advance(120, Some(HASH_B), 100);

        // block 5 and hash at 10 fell out of the 100-block window ending at 120
        assert!(!checkpoint.is_duplicate(EventKey::new(5, 0, 0)));
        assert!(checkpoint.is_duplicate(EventKey::new(105, 0, 1)));
        assert_eq!(checkpoint.recent_blocks.get(&120), Some(&HASH_B));
        assert!(!checkpoint.recent_blocks.contains_key(&10));
    }

    #[test]
    fn rollback_clears_state_above_the_ancestor() {
        let mut checkpoint = Checkpoint::at(0);
        checkpoint.advance(100, Some(HASH_A), DEFAULT_WINDOW);
        checkpoint.record_event(EventKey::new(99, 0, 0));
        checkpoint.advance(110, Some(HASH_B), DEFAULT_WINDOW);
        checkpoint.record_event(EventKey::new(108, 2, 1));

        checkpoint.rollback(100);

        assert_eq!(checkpoint.block, 100);
        assert!(checkpoint.is_duplicate(EventKey::new(99, 0, 0)));
        assert!(!checkpoint.is_duplicate(EventKey::new(108, 2, 1)));
        assert!(checkpoint.recent_blocks.contains_key(&100));
        assert!(!checkpoint.recent_blocks.contains_key(&110));
    }

    #[tokio::test]
    async fn file_store_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::new(dir.path().join("checkpoint.json"));

        assert!(store.load().await?.is_none());

        let mut checkpoint = Checkpoint::at(0);
        checkpoint.advance(42, Some(HASH_A), DEFAULT_WINDOW);
        checkpoint.record_event(EventKey::new(41, 1, 2));
        store.save(&checkpoint).await?;

        assert_eq!(store.load().await?, Some(checkpoint));
        Ok(())
    }
}
