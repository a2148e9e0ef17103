//! Shared test harness: a scripted in-memory chain and a recording notification sink.

// each test target uses a different subset of the harness
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

use alloy::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    rpc::types::{Filter, Log},
    sol,
    sol_types::SolCall,
};
use async_trait::async_trait;
use poolwatch::{
    ChainError, ChainSource, Checkpoint, CheckpointStore, DecodedEvent, EventKey, MemoryStore,
    NotificationSink, SinkError, checkpoint::StoreError,
};

sol! {
    interface NamedStorage {
        function getAddress(bytes32 key) external view returns (address);
        function getString(bytes32 key) external view returns (string);
    }

    interface InstanceDirectory {
        function getMinipoolCount() external view returns (uint256);
        function getMinipoolAt(uint256 index) external view returns (address);
    }
}

/// Storage key scheme of the on-chain name registry: `keccak256(prefix ++ name)`.
pub fn storage_key(prefix: &str, name: &str) -> B256 {
    let mut packed = Vec::new();
    packed.extend_from_slice(prefix.as_bytes());
    packed.extend_from_slice(name.as_bytes());
    keccak256(packed)
}

#[derive(Default)]
struct ChainState {
    head: u64,
    /// Hash variant per block; bumping a block's variant simulates a reorg.
    variants: BTreeMap<u64, u8>,
    logs: Vec<Log>,
    calls: HashMap<(Address, Bytes), Bytes>,
    failing_callees: HashSet<Address>,
    failing_log_fetches: u32,
    fork_after_next_logs: Option<u64>,
    call_invocations: usize,
}

impl ChainState {
    fn fork(&mut self, from: u64) {
        for number in from..=self.head {
            *self.variants.entry(number).or_insert(0) += 1;
        }
        self.logs.retain(|log| log.block_number.is_none_or(|number| number < from));
    }
}

fn block_hash(number: u64, variant: u8) -> B256 {
    let mut packed = number.to_be_bytes().to_vec();
    packed.push(variant);
    keccak256(packed)
}

/// Scripted chain: blocks with deterministic hashes, stored logs, and primed
/// `eth_call` responses.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().head = head;
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Replaces the chain tail from `from` upward: every block at or above `from`
    /// gets a new hash, and stored logs in that range are dropped (the replacement
    /// chain's logs are added by the test).
    pub fn fork_from(&self, from: u64) {
        self.state.lock().unwrap().fork(from);
    }

    /// Applies [`MockChain::fork_from`] right after the next log fetch is served,
    /// simulating a reorg that lands between `eth_getLogs` and the cycle commit.
    pub fn fork_after_next_logs(&self, from: u64) {
        self.state.lock().unwrap().fork_after_next_logs = Some(from);
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Primes a raw `eth_call` response.
    pub fn prime_call(&self, to: Address, calldata: Bytes, ret: Bytes) {
        self.state.lock().unwrap().calls.insert((to, calldata), ret);
    }

    /// Primes the storage contract's address lookup for a contract name.
    pub fn prime_address(&self, storage: Address, name: &str, address: Address) {
        let calldata =
            NamedStorage::getAddressCall { key: storage_key("contract.address", name) }
                .abi_encode();
        let ret = NamedStorage::getAddressCall::abi_encode_returns(&address);
        self.prime_call(storage, calldata.into(), ret.into());
    }

    /// Primes the storage contract's ABI lookup for a contract name.
    pub fn prime_abi(&self, storage: Address, name: &str, abi_json: &str) {
        let calldata =
            NamedStorage::getStringCall { key: storage_key("contract.abi", name) }.abi_encode();
        let ret = NamedStorage::getStringCall::abi_encode_returns(&abi_json.to_owned());
        self.prime_call(storage, calldata.into(), ret.into());
    }

    /// Primes the directory contract's instance enumeration.
    pub fn prime_instances(&self, directory: Address, instances: &[Address]) {
        let count_call = InstanceDirectory::getMinipoolCountCall {}.abi_encode();
        let count_ret =
            InstanceDirectory::getMinipoolCountCall::abi_encode_returns(&U256::from(
                instances.len(),
            ));
        self.prime_call(directory, count_call.into(), count_ret.into());

        for (index, instance) in instances.iter().enumerate() {
            let at_call =
                InstanceDirectory::getMinipoolAtCall { index: U256::from(index) }.abi_encode();
            let at_ret = InstanceDirectory::getMinipoolAtCall::abi_encode_returns(instance);
            self.prime_call(directory, at_call.into(), at_ret.into());
        }
    }

    /// Makes every call to `to` fail until cleared.
    pub fn fail_calls_to(&self, to: Address) {
        self.state.lock().unwrap().failing_callees.insert(to);
    }

    pub fn restore_calls_to(&self, to: Address) {
        self.state.lock().unwrap().failing_callees.remove(&to);
    }

    /// Makes the next `count` log fetches fail.
    pub fn fail_log_fetches(&self, count: u32) {
        self.state.lock().unwrap().failing_log_fetches = count;
    }

    pub fn call_invocations(&self) -> usize {
        self.state.lock().unwrap().call_invocations
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ChainError> {
        let state = self.state.lock().unwrap();
        if number > state.head {
            return Ok(None);
        }
        let variant = state.variants.get(&number).copied().unwrap_or(0);
        Ok(Some(block_hash(number, variant)))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_log_fetches > 0 {
            state.failing_log_fetches -= 1;
            return Err(ChainError::Transport("scripted log failure".into()));
        }

        let from = filter.get_from_block().unwrap_or(0);
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        let matched = state
            .logs
            .iter()
            .filter(|log| {
                let Some(number) = log.block_number else { return false };
                if number < from || number > to {
                    return false;
                }
                if !filter.address.is_empty() && !filter.address.matches(&log.address()) {
                    return false;
                }
                match log.topic0() {
                    Some(topic0) => filter.topics[0].is_empty() || filter.topics[0].matches(topic0),
                    None => filter.topics[0].is_empty(),
                }
            })
            .cloned()
            .collect();

        if let Some(fork_from) = state.fork_after_next_logs.take() {
            state.fork(fork_from);
        }
        Ok(matched)
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.call_invocations += 1;
        if state.failing_callees.contains(&to) {
            return Err(ChainError::Transport("scripted call failure".into()));
        }
        state
            .calls
            .get(&(to, calldata))
            .cloned()
            .ok_or_else(|| ChainError::Transport(format!("unprimed call to {to}")))
    }
}

/// Builds a mined log at the given chain position.
pub fn mined_log(
    address: Address,
    block: u64,
    tx_index: u64,
    log_index: u64,
    data: alloy::primitives::LogData,
) -> Log {
    let mut log = Log::default();
    log.inner.address = address;
    log.inner.data = data;
    log.block_number = Some(block);
    log.transaction_index = Some(tx_index);
    log.log_index = Some(log_index);
    log
}

/// Memory-backed store whose next `fail_saves` save attempts fail, simulating a
/// crash between dispatch and checkpoint persistence.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_saves: Mutex<u32>,
}

impl FlakyStore {
    pub fn failing_next_saves(count: u32) -> Self {
        Self { inner: MemoryStore::new(), fail_saves: Mutex::new(count) }
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn load(&self) -> Result<Option<Checkpoint>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        {
            let mut remaining = self.fail_saves.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Io(std::io::Error::other("scripted save failure")));
            }
        }
        self.inner.save(checkpoint).await
    }
}

/// Sink that records deliveries in order and can be told to fail specific handlers.
#[derive(Default)]
pub struct RecordingSink {
    known: Vec<String>,
    delivered: Mutex<Vec<(String, EventKey)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn with_handlers(handlers: &[&str]) -> Self {
        Self {
            known: handlers.iter().map(|&handler| handler.to_owned()).collect(),
            ..Self::default()
        }
    }

    pub fn fail_handler(&self, handler: &str) {
        self.failing.lock().unwrap().insert(handler.to_owned());
    }

    pub fn restore_handler(&self, handler: &str) {
        self.failing.lock().unwrap().remove(handler);
    }

    /// Deliveries so far, in invocation order.
    pub fn delivered(&self) -> Vec<(String, EventKey)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for &RecordingSink {
    fn supports(&self, handler: &str) -> bool {
        self.known.iter().any(|known| known == handler)
    }

    async fn deliver(&self, handler: &str, event: &DecodedEvent) -> Result<(), SinkError> {
        if self.failing.lock().unwrap().contains(handler) {
            return Err(SinkError(format!("scripted failure for `{handler}`")));
        }
        self.delivered.lock().unwrap().push((handler.to_owned(), event.key));
        Ok(())
    }
}
