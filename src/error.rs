use thiserror::Error;

use crate::{chain::ChainError, checkpoint::StoreError};

/// Fatal configuration errors, raised at startup only.
///
/// These are the only errors allowed to terminate the process: a watcher that cannot
/// trust its configuration must not start scanning.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The watch config document could not be parsed.
    #[error("malformed watch config: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Two entries share the same `(contract, event)` identity.
    #[error("duplicate watch spec for {contract}.{event}")]
    DuplicateSpec { contract: String, event: String },

    /// A configured handler name is not known to the notification sink.
    #[error("handler `{handler}` for {contract}.{event} is unknown to the notification sink")]
    UnknownHandler { contract: String, event: String, handler: String },

    /// A global contract is enumerated through more than one directory.
    #[error("contract `{contract}` is enumerated by conflicting directories `{first}` and `{second}`")]
    ConflictingDirectories { contract: String, first: String, second: String },
}

/// Errors emitted by the watcher.
///
/// Everything except [`WatchError::Config`] is cycle-local: the checkpoint's block
/// marker is left untouched and the same range is retried on the next cycle.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Invalid watch configuration (fatal, startup only).
    #[error("invalid watch configuration: {0}")]
    Config(#[from] ConfigError),

    /// A contract name has no mapping in the on-chain registry.
    #[error("no on-chain mapping for contract `{0}`")]
    UnknownContract(String),

    /// A contract name could not be resolved to a live deployment.
    #[error("stale deployment for contract `{name}`: {reason}")]
    StaleDeployment { name: String, reason: String },

    /// A log chunk exhausted its retries; the cycle aborts and is retried later.
    #[error("log scan failed for blocks {from}..={to}: {source}")]
    ScanFailed {
        from: u64,
        to: u64,
        #[source]
        source: ChainError,
    },

    /// A chain query outside the scan path failed.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// The checkpoint could not be loaded or persisted.
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),
}
