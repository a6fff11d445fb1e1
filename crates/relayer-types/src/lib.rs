//! Identity and envelope types shared by every stage of the relay pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod credential;
pub mod endpoint_url;
pub mod envelope;

pub use credential::Credential;
pub use endpoint_url::EndpointUrl;
pub use envelope::{Envelope, Receipt};

/// Errors raised while parsing identity components from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseKeyError {
    /// The chain id is not a valid `u16`.
    #[error("invalid chain id `{0}`")]
    ChainId(String),
    /// The emitter address is not hex or longer than 32 bytes.
    #[error("invalid emitter address `{0}`")]
    Address(String),
    /// The sequence is not a valid `u64`.
    #[error("invalid sequence `{0}`")]
    Sequence(String),
    /// The binary key has the wrong length.
    #[error("invalid key length {0}, expected {}", MessageKey::LEN)]
    Length(usize),
}

/// Chain identifier of the chain an attestation originated from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(transparent)]
#[display(fmt = "{}", _0)]
pub struct ChainId(pub u16);

impl FromStr for ChainId {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(ChainId)
            .map_err(|_| ParseKeyError::ChainId(s.to_string()))
    }
}

/// A 32 byte emitter address, left padded with zeros when the origin chain
/// uses shorter addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmitterAddress(pub [u8; 32]);

impl EmitterAddress {
    /// Returns the raw bytes of the address.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for EmitterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EmitterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmitterAddress({self})")
    }
}

impl FromStr for EmitterAddress {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_part)
            .map_err(|_| ParseKeyError::Address(s.to_string()))?;
        if bytes.is_empty() || bytes.len() > 32 {
            return Err(ParseKeyError::Address(s.to_string()));
        }
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for EmitterAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EmitterAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The identity of one attestation: `(origin chain, origin address, sequence)`.
///
/// The origin system guarantees its uniqueness; every piece of relay state is
/// indexed by it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chain the attestation was emitted on.
    pub origin_chain: ChainId,
    /// Emitter of the attestation.
    pub origin_address: EmitterAddress,
    /// Per-emitter sequence number.
    pub sequence: u64,
}

impl MessageKey {
    /// Size of the binary encoding returned by [`MessageKey::to_bytes`].
    pub const LEN: usize = 2 + 32 + 8;

    pub fn new(
        origin_chain: ChainId,
        origin_address: EmitterAddress,
        sequence: u64,
    ) -> Self {
        Self {
            origin_chain,
            origin_address,
            sequence,
        }
    }

    /// Big endian encoding, so byte order matches `(chain, address, sequence)` order.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..2].copy_from_slice(&self.origin_chain.0.to_be_bytes());
        out[2..34].copy_from_slice(&self.origin_address.0);
        out[34..].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseKeyError> {
        if bytes.len() != Self::LEN {
            return Err(ParseKeyError::Length(bytes.len()));
        }
        let mut chain = [0u8; 2];
        chain.copy_from_slice(&bytes[..2]);
        let mut address = [0u8; 32];
        address.copy_from_slice(&bytes[2..34]);
        let mut sequence = [0u8; 8];
        sequence.copy_from_slice(&bytes[34..]);
        Ok(Self {
            origin_chain: ChainId(u16::from_be_bytes(chain)),
            origin_address: EmitterAddress(address),
            sequence: u64::from_be_bytes(sequence),
        })
    }

    /// Parses the three path components used by the query endpoint.
    pub fn from_parts(
        chain: &str,
        address: &str,
        sequence: &str,
    ) -> Result<Self, ParseKeyError> {
        Ok(Self {
            origin_chain: chain.parse()?,
            origin_address: address.parse()?,
            sequence: sequence
                .trim()
                .parse()
                .map_err(|_| ParseKeyError::Sequence(sequence.to_string()))?,
        })
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.origin_chain, self.origin_address, self.sequence
        )
    }
}
