//! Watch configuration: which contract events are monitored and which handler owns
//! each occurrence.
//!
//! The configuration is static input data loaded once at startup. It has two
//! categories: `direct` entries watch a single named contract's current deployment;
//! `global` entries watch every delegate instance enumerated by a directory contract.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::ConfigError;

/// Whether a spec watches one fixed deployment or a dynamically discovered set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecKind {
    /// Exactly one address: the named contract's current deployment.
    Direct,
    /// One-to-many addresses: all currently known delegate instances, refreshed each
    /// scan cycle.
    Global,
}

/// A single watched `(contract, event)` pair and its owning handler.
#[derive(Clone, Debug)]
pub struct EventSpec {
    /// Logical contract name, resolved through the contract registry.
    pub contract: String,
    /// ABI event name.
    pub event: String,
    /// Opaque handler identifier resolved by the notification layer.
    pub handler: String,
    pub kind: SpecKind,
    /// For global specs, the directory contract enumerating the emitting instances.
    pub directory: Option<String>,
    /// Dispatching this event flushes the contract registry cache, so contract
    /// upgrades take effect without a restart.
    pub refreshes_registry: bool,
}

impl EventSpec {
    /// The spec identity used for routing and duplicate detection.
    #[must_use]
    pub fn identity(&self) -> (&str, &str) {
        (&self.contract, &self.event)
    }
}

#[derive(Deserialize)]
struct RawEvent {
    event: String,
    handler: String,
    #[serde(default)]
    refreshes_registry: bool,
}

#[derive(Deserialize)]
struct RawDirect {
    contract: String,
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawGlobal {
    contract: String,
    directory: String,
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    direct: Vec<RawDirect>,
    #[serde(default)]
    global: Vec<RawGlobal>,
}

/// The full set of watched event specs, immutable after load.
#[derive(Clone, Debug, Default)]
pub struct WatchConfig {
    specs: Vec<EventSpec>,
}

impl WatchConfig {
    /// Parses a JSON watch config and rejects duplicate `(contract, event)` identities.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let mut specs = Vec::new();
        for entry in raw.direct {
            for event in entry.events {
                specs.push(EventSpec {
                    contract: entry.contract.clone(),
                    event: event.event,
                    handler: event.handler,
                    kind: SpecKind::Direct,
                    directory: None,
                    refreshes_registry: event.refreshes_registry,
                });
            }
        }
        for entry in raw.global {
            for event in entry.events {
                specs.push(EventSpec {
                    contract: entry.contract.clone(),
                    event: event.event,
                    handler: event.handler,
                    kind: SpecKind::Global,
                    directory: Some(entry.directory.clone()),
                    refreshes_registry: event.refreshes_registry,
                });
            }
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.identity()) {
                return Err(ConfigError::DuplicateSpec {
                    contract: spec.contract.clone(),
                    event: spec.event.clone(),
                });
            }
        }

        // each global contract must map to exactly one directory, or the instance
        // resolver could not tell which enumeration owns the contract's address set
        let mut directories: HashMap<&str, &str> = HashMap::new();
        for spec in &specs {
            let Some(directory) = spec.directory.as_deref() else {
                continue;
            };
            if let Some(&existing) = directories.get(spec.contract.as_str()) {
                if existing != directory {
                    return Err(ConfigError::ConflictingDirectories {
                        contract: spec.contract.clone(),
                        first: existing.to_owned(),
                        second: directory.to_owned(),
                    });
                }
            } else {
                directories.insert(&spec.contract, directory);
            }
        }

        Ok(Self { specs })
    }

    #[must_use]
    pub fn specs(&self) -> &[EventSpec] {
        &self.specs
    }

    /// Unique `(watched contract, directory contract)` pairs across global specs.
    #[must_use]
    pub fn directories(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::new();
        for spec in &self.specs {
            if let Some(directory) = spec.directory.as_deref() {
                let pair = (spec.contract.as_str(), directory);
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }
}
