//! Raw log → typed event decoding against the registry's cached ABIs.

use alloy::{dyn_abi::EventExt, json_abi::JsonAbi, primitives::B256, rpc::types::Log};
use thiserror::Error;

use crate::{
    config::EventSpec,
    types::{DecodedEvent, EventKey},
};

/// Per-event decode failures. Neither variant aborts a cycle: mismatches are logged
/// and skipped, drift additionally invalidates the registry entry so the next cycle
/// re-resolves the ABI.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The log's topic matches no known event signature for the contract.
    #[error("no event in `{contract}` ABI matches topic {topic}")]
    Mismatch { contract: String, topic: B256 },

    /// The log does not decode against the cached ABI (field count/type mismatch).
    #[error("ABI drift decoding {contract}.{event}: {reason}")]
    AbiDrift { contract: String, event: String, reason: String },
}

/// Decodes a routed raw log into a [`DecodedEvent`] using the matching contract ABI.
pub fn decode(
    log: &Log,
    abi: &JsonAbi,
    spec: &EventSpec,
    key: EventKey,
) -> Result<DecodedEvent, DecodeError> {
    let Some(topic0) = log.topic0() else {
        return Err(DecodeError::Mismatch { contract: spec.contract.clone(), topic: B256::ZERO });
    };

    let Some(event) = abi.events().find(|event| event.selector() == *topic0) else {
        return Err(DecodeError::Mismatch { contract: spec.contract.clone(), topic: *topic0 });
    };

    let decoded = event.decode_log(&log.inner.data).map_err(|err| DecodeError::AbiDrift {
        contract: spec.contract.clone(),
        event: event.name.clone(),
        reason: err.to_string(),
    })?;

    // stitch indexed and body values back into ABI declaration order
    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut fields = Vec::with_capacity(event.inputs.len());
    for input in &event.inputs {
        let value = if input.indexed { indexed.next() } else { body.next() };
        let Some(value) = value else {
            return Err(DecodeError::AbiDrift {
                contract: spec.contract.clone(),
                event: event.name.clone(),
                reason: format!("missing value for parameter `{}`", input.name),
            });
        };
        fields.push((input.name.clone(), value));
    }

    Ok(DecodedEvent {
        contract: spec.contract.clone(),
        event: event.name.clone(),
        handler: spec.handler.clone(),
        key,
        address: log.address(),
        fields,
    })
}
