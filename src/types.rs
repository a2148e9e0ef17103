use std::fmt;

use alloy::{dyn_abi::DynSolValue, primitives::Address, rpc::types::Log};
use serde::{Deserialize, Serialize};

/// Uniquely identifies a log event's position in the chain.
///
/// The derived `Ord` gives lexicographic comparison over
/// `(block_number, tx_index, log_index)`, which is the canonical chain order of events
/// and the order in which handlers are invoked.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventKey {
    /// The block number the event was emitted in.
    pub block_number: u64,
    /// The transaction index within the block.
    pub tx_index: u64,
    /// The log index within the block.
    pub log_index: u64,
}

impl EventKey {
    #[must_use]
    pub fn new(block_number: u64, tx_index: u64, log_index: u64) -> Self {
        Self { block_number, tx_index, log_index }
    }

    /// Extracts the key from a mined log.
    ///
    /// Returns `None` for pending logs, which carry no position and are never
    /// dispatched.
    #[must_use]
    pub fn from_log(log: &Log) -> Option<Self> {
        Some(Self {
            block_number: log.block_number?,
            tx_index: log.transaction_index?,
            log_index: log.log_index?,
        })
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.block_number, self.tx_index, self.log_index)
    }
}

/// A raw log decoded against its contract's ABI, owned by the dispatcher for the
/// duration of a single handler invocation.
#[derive(Clone, Debug)]
pub struct DecodedEvent {
    /// Logical name of the emitting contract (spec identity, first half).
    pub contract: String,
    /// Event name (spec identity, second half).
    pub event: String,
    /// Handler this event is routed to.
    pub handler: String,
    /// Chain position of the underlying log.
    pub key: EventKey,
    /// Concrete emitting address (relevant for global specs with many instances).
    pub address: Address,
    /// Decoded fields in ABI declaration order.
    pub fields: Vec<(String, DynSolValue)>,
}

impl DecodedEvent {
    /// Looks up a decoded field by parameter name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}
