//! Contract name resolution.
//!
//! Rocket Pool-style deployments keep a name→address/ABI mapping inside an on-chain
//! storage contract. [`ContractRegistry`] resolves logical names through that contract
//! and caches the results. The cache is an explicitly owned, single-writer object held
//! by the dispatcher rather than ambient state, so tests can inject a fake chain.
//!
//! Cached entries survive until a registry-refreshing event is dispatched
//! ([`ContractRegistry::flush`]) or a decode detects ABI drift
//! ([`ContractRegistry::invalidate`]); both force re-resolution on next use, so
//! contract upgrades take effect without a restart.

mod instances;

pub use instances::InstanceResolver;

use std::{collections::HashMap, sync::Arc};

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, B256, keccak256},
    sol,
    sol_types::SolCall,
};
use tracing::debug;

use crate::{chain::ChainSource, error::WatchError};

sol! {
    /// Name-keyed lookup surface of the on-chain storage contract.
    interface NamedStorage {
        function getAddress(bytes32 key) external view returns (address);
        function getString(bytes32 key) external view returns (string);
    }
}

/// A resolved deployment: current address plus parsed ABI.
#[derive(Clone, Debug)]
pub struct Deployment {
    pub address: Address,
    pub abi: Arc<JsonAbi>,
}

/// Resolves logical contract names to current deployments, with caching.
pub struct ContractRegistry {
    chain: Arc<dyn ChainSource>,
    storage: Address,
    overrides: HashMap<String, Address>,
    addresses: HashMap<String, Address>,
    abis: HashMap<String, Arc<JsonAbi>>,
}

impl ContractRegistry {
    /// Creates a registry rooted at the storage contract deployed at `storage`.
    #[must_use]
    pub fn new(chain: Arc<dyn ChainSource>, storage: Address) -> Self {
        Self {
            chain,
            storage,
            overrides: HashMap::new(),
            addresses: HashMap::new(),
            abis: HashMap::new(),
        }
    }

    /// Seeds a manual address override for `name`, bypassing the on-chain address
    /// lookup (the ABI is still fetched from storage).
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, address: Address) -> Self {
        self.overrides.insert(name.into(), address);
        self
    }

    /// Resolves `name` to its current deployment.
    ///
    /// # Errors
    ///
    /// [`WatchError::UnknownContract`] if storage maps the name to the zero address or
    /// an empty ABI; [`WatchError::StaleDeployment`] if the lookup itself fails.
    pub async fn resolve(&mut self, name: &str) -> Result<Deployment, WatchError> {
        let address = self.resolve_address(name).await?;
        if let Some(abi) = self.abis.get(name) {
            return Ok(Deployment { address, abi: Arc::clone(abi) });
        }

        debug!(contract = name, "fetching ABI from storage");
        let raw = self.get_string(storage_key("contract.abi", name), name).await?;
        if raw.is_empty() {
            return Err(WatchError::UnknownContract(name.to_owned()));
        }
        let abi: JsonAbi = serde_json::from_str(&raw).map_err(|err| {
            WatchError::StaleDeployment { name: name.to_owned(), reason: err.to_string() }
        })?;

        let abi = Arc::new(abi);
        self.abis.insert(name.to_owned(), Arc::clone(&abi));
        Ok(Deployment { address, abi })
    }

    /// Resolves only the current address of `name` (no ABI fetch).
    pub async fn resolve_address(&mut self, name: &str) -> Result<Address, WatchError> {
        if let Some(address) = self.overrides.get(name) {
            return Ok(*address);
        }
        if let Some(address) = self.addresses.get(name) {
            return Ok(*address);
        }

        debug!(contract = name, "fetching address from storage");
        let calldata = NamedStorage::getAddressCall { key: storage_key("contract.address", name) }
            .abi_encode();
        let returned =
            self.chain.call(self.storage, calldata.into()).await.map_err(|err| {
                WatchError::StaleDeployment { name: name.to_owned(), reason: err.to_string() }
            })?;
        let address =
            NamedStorage::getAddressCall::abi_decode_returns(&returned).map_err(|err| {
                WatchError::StaleDeployment { name: name.to_owned(), reason: err.to_string() }
            })?;

        if address.is_zero() {
            return Err(WatchError::UnknownContract(name.to_owned()));
        }
        self.addresses.insert(name.to_owned(), address);
        Ok(address)
    }

    async fn get_string(&self, key: B256, name: &str) -> Result<String, WatchError> {
        let calldata = NamedStorage::getStringCall { key }.abi_encode();
        let returned =
            self.chain.call(self.storage, calldata.into()).await.map_err(|err| {
                WatchError::StaleDeployment { name: name.to_owned(), reason: err.to_string() }
            })?;
        NamedStorage::getStringCall::abi_decode_returns(&returned).map_err(|err| {
            WatchError::StaleDeployment { name: name.to_owned(), reason: err.to_string() }
        })
    }

    /// Drops every cached resolution. Called when a registry-refreshing event
    /// (contract upgraded/added) is dispatched.
    pub fn flush(&mut self) {
        debug!("flushing contract registry cache");
        self.addresses.clear();
        self.abis.clear();
    }

    /// Drops the cached resolution for one contract. Called when decoding detects ABI
    /// drift, so the next cycle re-resolves against fresh storage state.
    pub fn invalidate(&mut self, name: &str) {
        debug!(contract = name, "invalidating cached deployment");
        self.addresses.remove(name);
        self.abis.remove(name);
    }

    pub(crate) fn chain(&self) -> &Arc<dyn ChainSource> {
        &self.chain
    }
}

/// `keccak256(prefix ++ name)`, matching Solidity's
/// `keccak256(abi.encodePacked(prefix, name))` key scheme of the storage contract.
fn storage_key(prefix: &str, name: &str) -> B256 {
    let mut packed = Vec::with_capacity(prefix.len() + name.len());
    packed.extend_from_slice(prefix.as_bytes());
    packed.extend_from_slice(name.as_bytes());
    keccak256(packed)
}
