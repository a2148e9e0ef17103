//! poolwatch watches a Rocket Pool-style deployment for a configured set of contract
//! events and routes each occurrence to exactly one notification handler, exactly
//! once, in chain order.
//!
//! The main entry point is [`Watcher`], built via [`WatcherBuilder`] from a
//! [`WatchConfig`], a [`ChainSource`], a [`CheckpointStore`] and a
//! [`NotificationSink`]. [`Watcher::run`] drives the scan loop;
//! [`Watcher::run_cycle`] executes a single cycle and returns its [`CycleReport`].
//!
//! # Watch categories
//!
//! `direct` specs watch one named contract's current deployment, resolved through the
//! on-chain [`registry`]. `global` specs watch every delegate instance enumerated by a
//! directory contract; the instance set is refreshed before each scan and only ever
//! grows within a run.
//!
//! # Progress and restarts
//!
//! A durable [`Checkpoint`] records the last fully-processed block, a trailing window
//! of dispatched event keys (dedupe), and recently observed tip hashes (reorg
//! detection). It advances only after every event in the scanned range has been
//! handled and the new state has been persisted, so a restart or a failed cycle
//! resumes from a consistent position without gaps or double-delivery.
//!
//! # Reorgs
//!
//! Before each cycle the [`reorg::ReorgGuard`] verifies the retained tip hashes
//! against the chain. On a mismatch the checkpoint rolls back to the last common
//! ancestor and the affected tail is re-scanned. Consumers should expect benign
//! re-deliveries around reorgs; everywhere else delivery is exactly-once within the
//! dedupe window.
//!
//! # Failure policy
//!
//! A handler failure is isolated: it is logged, recorded in the [`CycleReport`], and
//! does not stop subsequent events or checkpoint advancement. [`Watcher::replay`]
//! re-drives a block range on demand for operator recovery. Only configuration errors
//! are fatal.

pub mod chain;
pub mod checkpoint;
pub mod registry;
pub mod reorg;

mod config;
mod decoder;
mod dispatcher;
mod error;
mod scanner;
mod types;

pub use chain::{ChainError, ChainSource, RpcChainSource};
pub use checkpoint::{Checkpoint, CheckpointStore, JsonFileStore, MemoryStore};
pub use config::{EventSpec, SpecKind, WatchConfig};
pub use decoder::DecodeError;
pub use dispatcher::{
    CycleReport, DEFAULT_CONFIRMATIONS, HandlerFailure, NotificationSink, SinkError, Watcher,
    WatcherBuilder,
};
pub use error::{ConfigError, WatchError};
pub use scanner::{DEFAULT_MAX_BLOCK_RANGE, LogScanner, WatchSet};
pub use types::{DecodedEvent, EventKey};
