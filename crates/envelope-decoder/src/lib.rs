// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Envelope Decoder
//!
//! Turns raw signed attestations (VAAs) into [`Envelope`]s.
//!
//! Signature checking is not done here: the decoder extracts the signatures
//! and the body digest and hands them to a [`SignatureVerifier`]. Everything
//! after this crate only sees [`Envelope`]s.

use attestation_relayer_types::{ChainId, EmitterAddress, Envelope};
use sha3::{Digest, Keccak256};

mod builder;

pub use builder::SignedVaa;

/// Why a raw attestation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The input ended before a required field.
    #[error("truncated input: needed {needed} bytes at offset {offset}, got {len}")]
    Truncated {
        /// Offset of the field that could not be read.
        offset: usize,
        /// Bytes the field needs.
        needed: usize,
        /// Total input length.
        len: usize,
    },
    /// The envelope version is not supported.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    /// The signatures are malformed or the verifier rejected them.
    #[error("invalid signatures: {0}")]
    InvalidSignatures(String),
    /// Any other structural problem.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Decodes raw attestation bytes into an [`Envelope`].
pub trait EnvelopeDecoder: Send + Sync {
    /// Fails with [`DecodeError`] on malformed or unauthenticated input.
    fn decode(&self, raw: &[u8]) -> Result<Envelope, DecodeError>;
}

/// One guardian signature over the body digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardianSignature {
    /// Position of the signer in the guardian set.
    pub index: u8,
    /// Recoverable secp256k1 signature (`r ‖ s ‖ v`).
    pub signature: [u8; 65],
}

/// Checks that a body digest is attested by the guardian set.
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        guardian_set_index: u32,
        digest: &[u8; 32],
        signatures: &[GuardianSignature],
    ) -> Result<(), DecodeError>;
}

/// Accepts every signature set. Used when the attestation source already
/// verified the quorum, as a guardian spy does before streaming a VAA.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustSource;

impl SignatureVerifier for TrustSource {
    fn verify(
        &self,
        _guardian_set_index: u32,
        _digest: &[u8; 32],
        _signatures: &[GuardianSignature],
    ) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Only supported envelope version.
pub const VAA_VERSION: u8 = 1;
const SIGNATURE_LEN: usize = 66;
/// timestamp + nonce + chain + emitter + sequence + consistency level.
const BODY_HEADER_LEN: usize = 4 + 4 + 2 + 32 + 8 + 1;

/// Decoder for the signed VAA wire format:
///
/// ```text
/// version u8 | guardian_set_index u32 | n u8 | n * (index u8, signature [u8; 65])
/// timestamp u32 | nonce u32 | emitter_chain u16 | emitter_address [u8; 32]
/// sequence u64 | consistency_level u8 | payload ..
/// ```
///
/// All integers are big endian.
#[derive(Debug, Clone, Default)]
pub struct VaaDecoder<V = TrustSource> {
    verifier: V,
}

impl VaaDecoder {
    /// A decoder that relies on the source having verified the signatures.
    pub fn trusting() -> Self {
        Self {
            verifier: TrustSource,
        }
    }
}

impl<V: SignatureVerifier> VaaDecoder<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.offset.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.offset..end];
                self.offset = end;
                Ok(out)
            }
            None => Err(DecodeError::Truncated {
                offset: self.offset,
                needed: n,
                len: self.buf.len(),
            }),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.offset..];
        self.offset = self.buf.len();
        out
    }
}

/// Hash the guardians sign: `keccak256(keccak256(body))`.
pub fn body_digest(body: &[u8]) -> [u8; 32] {
    let first = Keccak256::digest(body);
    Keccak256::digest(first).into()
}

impl<V: SignatureVerifier> EnvelopeDecoder for VaaDecoder<V> {
    fn decode(&self, raw: &[u8]) -> Result<Envelope, DecodeError> {
        let mut r = Reader { buf: raw, offset: 0 };
        let version = r.u8()?;
        if version != VAA_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let guardian_set_index = u32::from_be_bytes(r.array()?);
        let n = usize::from(r.u8()?);
        if n == 0 {
            return Err(DecodeError::InvalidSignatures("no signatures".into()));
        }
        // check the whole signature block length up front for a precise error.
        if raw.len() < r.offset + n * SIGNATURE_LEN + BODY_HEADER_LEN {
            return Err(DecodeError::Truncated {
                offset: r.offset,
                needed: n * SIGNATURE_LEN + BODY_HEADER_LEN,
                len: raw.len(),
            });
        }
        let mut signatures: Vec<GuardianSignature> = Vec::with_capacity(n);
        for _ in 0..n {
            let index = r.u8()?;
            let signature = r.array::<65>()?;
            if let Some(prev) = signatures.last() {
                if prev.index >= index {
                    return Err(DecodeError::InvalidSignatures(format!(
                        "guardian indices must be strictly increasing, got {index} after {}",
                        prev.index
                    )));
                }
            }
            signatures.push(GuardianSignature { index, signature });
        }

        let body = &raw[r.offset..];
        let digest = body_digest(body);
        self.verifier
            .verify(guardian_set_index, &digest, &signatures)?;

        let timestamp = u32::from_be_bytes(r.array()?);
        let nonce = u32::from_be_bytes(r.array()?);
        let origin_chain = ChainId(u16::from_be_bytes(r.array()?));
        let origin_address = EmitterAddress(r.array()?);
        let sequence = u64::from_be_bytes(r.array()?);
        let consistency_level = r.u8()?;
        let payload = r.rest().to_vec();

        tracing::trace!(
            chain = %origin_chain,
            emitter = %origin_address,
            sequence,
            digest = %hex::encode(digest),
            "decoded envelope"
        );

        Ok(Envelope {
            guardian_set_index,
            timestamp,
            nonce,
            origin_chain,
            origin_address,
            sequence,
            consistency_level,
            payload,
            digest,
            raw: raw.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignedVaa {
        SignedVaa::builder()
            .emitter_chain(2)
            .emitter_address([0xAB; 32])
            .sequence(42)
            .payload(b"P2WH-price".to_vec())
            .build()
    }

    #[test]
    fn decodes_a_signed_vaa() {
        let raw = sample().to_bytes();
        let envelope = VaaDecoder::trusting().decode(&raw).unwrap();
        assert_eq!(envelope.origin_chain, ChainId(2));
        assert_eq!(envelope.origin_address, EmitterAddress([0xAB; 32]));
        assert_eq!(envelope.sequence, 42);
        assert_eq!(envelope.payload, b"P2WH-price".to_vec());
        assert_eq!(envelope.raw, raw);
        assert_eq!(envelope.digest, body_digest(&sample().body()));
    }

    #[test]
    fn rejects_truncated_input() {
        let raw = sample().to_bytes();
        for cut in [0, 1, 5, 6, 40, raw.len() - sample().payload.len() - 1] {
            let err = VaaDecoder::trusting().decode(&raw[..cut]).unwrap_err();
            assert!(
                matches!(err, DecodeError::Truncated { .. }),
                "cut at {cut}: {err:?}"
            );
        }
    }

    #[test]
    fn rejects_unknown_version() {
        let mut raw = sample().to_bytes();
        raw[0] = 2;
        assert_eq!(
            VaaDecoder::trusting().decode(&raw).unwrap_err(),
            DecodeError::UnsupportedVersion(2)
        );
    }

    #[test]
    fn rejects_unordered_signatures() {
        let vaa = SignedVaa::builder()
            .signer_indices(vec![3, 1])
            .emitter_chain(1)
            .emitter_address([1; 32])
            .sequence(1)
            .build();
        assert!(matches!(
            VaaDecoder::trusting().decode(&vaa.to_bytes()),
            Err(DecodeError::InvalidSignatures(_))
        ));
    }

    struct RejectAll;
    impl SignatureVerifier for RejectAll {
        fn verify(
            &self,
            _: u32,
            _: &[u8; 32],
            _: &[GuardianSignature],
        ) -> Result<(), DecodeError> {
            Err(DecodeError::InvalidSignatures("no quorum".into()))
        }
    }

    #[test]
    fn verifier_decides_authenticity() {
        let err = VaaDecoder::new(RejectAll)
            .decode(&sample().to_bytes())
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidSignatures("no quorum".into()));
    }
}
