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

use crate::VAA_VERSION;

/// Encoder for the signed VAA wire format, the inverse of
/// [`crate::VaaDecoder`]. Signatures are placeholders: this is meant for
/// fixtures and for replaying bodies through a trusting decoder.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct SignedVaa {
    #[builder(default)]
    pub guardian_set_index: u32,
    /// Guardian indices that "signed", each gets a zeroed signature.
    #[builder(default = vec![0])]
    pub signer_indices: Vec<u8>,
    #[builder(default)]
    pub timestamp: u32,
    #[builder(default)]
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    #[builder(default = 1)]
    pub consistency_level: u8,
    #[builder(default)]
    pub payload: Vec<u8>,
}

impl SignedVaa {
    /// The signed part of the VAA.
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(51 + self.payload.len());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.emitter_chain.to_be_bytes());
        out.extend_from_slice(&self.emitter_address);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(self.consistency_level);
        out.extend_from_slice(&self.payload);
        out
    }

    /// The full wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![VAA_VERSION];
        out.extend_from_slice(&self.guardian_set_index.to_be_bytes());
        out.push(self.signer_indices.len() as u8);
        for index in &self.signer_indices {
            out.push(*index);
            out.extend_from_slice(&[0u8; 65]);
        }
        out.extend_from_slice(&self.body());
        out
    }
}
