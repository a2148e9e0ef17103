//! Delegate instance discovery for global event specs.
//!
//! Global events are emitted by dynamically created delegate contracts (minipools)
//! rather than a fixed deployment. The resolver enumerates them through the directory
//! contract named in the config and keeps a monotonic-additive snapshot per run:
//! instances are never removed once discovered, since historical logs from a retired
//! instance remain valid to scan.

use std::{collections::HashMap, sync::Arc};

use alloy::{primitives::Address, sol, sol_types::SolCall};
use tracing::{debug, warn};

use crate::{chain::ChainSource, error::WatchError, registry::ContractRegistry};

sol! {
    /// Enumeration surface of the minipool directory contract.
    interface InstanceDirectory {
        function getMinipoolCount() external view returns (uint256);
        function getMinipoolAt(uint256 index) external view returns (address);
    }
}

struct InstanceSet {
    directory: String,
    seen_count: u64,
    addresses: Vec<Address>,
}

/// Tracks the current delegate address set for each global watched contract.
pub struct InstanceResolver {
    sets: HashMap<String, InstanceSet>,
}

impl InstanceResolver {
    /// Creates a resolver for the given `(watched contract, directory contract)`
    /// pairs, as produced by [`WatchConfig::directories`](crate::WatchConfig::directories).
    #[must_use]
    pub fn new(directories: &[(&str, &str)]) -> Self {
        let sets = directories
            .iter()
            .map(|(contract, directory)| {
                let set = InstanceSet {
                    directory: (*directory).to_owned(),
                    seen_count: 0,
                    addresses: Vec::new(),
                };
                ((*contract).to_owned(), set)
            })
            .collect();
        Self { sets }
    }

    /// Refreshes every instance set by asking each directory for instances created
    /// since the previous refresh.
    ///
    /// Fails open: a directory that cannot be queried logs a warning and keeps its
    /// last consistent snapshot (indices resolved before the failure stay committed,
    /// later ones are retried next refresh), so a resolution outage never stalls
    /// unrelated direct events.
    pub async fn refresh(&mut self, registry: &mut ContractRegistry) {
        for (contract, set) in &mut self.sets {
            match refresh_set(registry, set).await {
                Ok(0) => {}
                Ok(added) => {
                    debug!(contract, added, total = set.addresses.len(), "discovered new instances");
                }
                Err(err) => {
                    warn!(
                        contract,
                        directory = %set.directory,
                        error = %err,
                        "instance resolution degraded, keeping last consistent snapshot"
                    );
                }
            }
        }
    }

    /// The currently known instance addresses for a global watched contract.
    #[must_use]
    pub fn current(&self, contract: &str) -> &[Address] {
        self.sets.get(contract).map_or(&[], |set| set.addresses.as_slice())
    }
}

async fn refresh_set(
    registry: &mut ContractRegistry,
    set: &mut InstanceSet,
) -> Result<u64, WatchError> {
    let directory = registry.resolve_address(&set.directory).await?;
    let chain: Arc<dyn ChainSource> = Arc::clone(registry.chain());

    let calldata = InstanceDirectory::getMinipoolCountCall {}.abi_encode();
    let returned = chain.call(directory, calldata.into()).await?;
    let count = InstanceDirectory::getMinipoolCountCall::abi_decode_returns(&returned)
        .map_err(|err| WatchError::StaleDeployment {
            name: set.directory.clone(),
            reason: err.to_string(),
        })?
        .to::<u64>();

    let previously_seen = set.seen_count;
    for index in set.seen_count..count {
        let calldata =
            InstanceDirectory::getMinipoolAtCall { index: alloy::primitives::U256::from(index) }
                .abi_encode();
        let returned = chain.call(directory, calldata.into()).await?;
        let address = InstanceDirectory::getMinipoolAtCall::abi_decode_returns(&returned)
            .map_err(|err| WatchError::StaleDeployment {
                name: set.directory.clone(),
                reason: err.to_string(),
            })?;
        // commit address and count together; a failure at a later index keeps the
        // resolved prefix and the next refresh resumes from it instead of
        // re-pushing addresses it already holds
        set.addresses.push(address);
        set.seen_count = index + 1;
    }

    Ok(count.saturating_sub(previously_seen))
}
