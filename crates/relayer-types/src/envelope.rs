use serde::{Deserialize, Serialize};

use crate::{ChainId, EmitterAddress, MessageKey};

/// A decoded and verified attestation. Immutable once produced by a decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Index of the signer set that attested this message.
    pub guardian_set_index: u32,
    /// Unix timestamp (seconds) of the observation, as reported by the origin.
    pub timestamp: u32,
    pub nonce: u32,
    pub origin_chain: ChainId,
    pub origin_address: EmitterAddress,
    pub sequence: u64,
    pub consistency_level: u8,
    /// Application payload, opaque to the pipeline.
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    /// Hash of the signed body.
    #[serde(with = "hex::serde")]
    pub digest: [u8; 32],
    /// The bytes this envelope was decoded from.
    #[serde(with = "hex::serde")]
    pub raw: Vec<u8>,
}

impl Envelope {
    /// The identity key of this envelope.
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.origin_chain, self.origin_address, self.sequence)
    }
}

/// A destination acknowledgment for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Name of the destination the message was delivered to.
    pub destination: String,
    /// Transaction hash on the destination ledger, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Block height the transaction was included at, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// The destination reported the message as already applied.
    #[serde(default)]
    pub already_delivered: bool,
}
