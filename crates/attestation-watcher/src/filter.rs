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

use std::collections::HashSet;
use std::sync::Arc;

use attestation_relayer_config::FilterConfig;
use attestation_relayer_types::{ChainId, EmitterAddress, Envelope};

/// Allow-list of emitters. An empty list matches every emitter.
#[derive(Debug, Clone, Default)]
pub struct EmitterFilter {
    emitters: HashSet<(ChainId, EmitterAddress)>,
}

impl EmitterFilter {
    pub fn new(
        emitters: impl IntoIterator<Item = (ChainId, EmitterAddress)>,
    ) -> Self {
        Self {
            emitters: emitters.into_iter().collect(),
        }
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.emitters.is_empty()
            || self
                .emitters
                .contains(&(envelope.origin_chain, envelope.origin_address))
    }

    /// The configured emitters, sorted so subscribe messages are stable.
    pub fn emitters(&self) -> Vec<(ChainId, EmitterAddress)> {
        let mut out: Vec<_> = self.emitters.iter().copied().collect();
        out.sort();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }
}

/// Decides whether a payload is something this relayer delivers.
pub trait PayloadClassifier: Send + Sync {
    fn classify(&self, envelope: &Envelope) -> bool;
}

/// Classifies every payload as relayable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PayloadClassifier for AcceptAll {
    fn classify(&self, _envelope: &Envelope) -> bool {
        true
    }
}

/// Accepts payloads that start with a fixed magic, e.g. `P2WH` for price
/// attestations.
#[derive(Debug, Clone)]
pub struct PayloadPrefixClassifier {
    prefix: Vec<u8>,
}

impl PayloadPrefixClassifier {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl PayloadClassifier for PayloadPrefixClassifier {
    fn classify(&self, envelope: &Envelope) -> bool {
        envelope.payload.starts_with(&self.prefix)
    }
}

/// Builds the emitter filter and payload classifier described by `config`.
pub fn from_config(
    config: &FilterConfig,
) -> attestation_relayer_utils::Result<(EmitterFilter, Arc<dyn PayloadClassifier>)>
{
    let filter = EmitterFilter::new(config.emitter_ids()?);
    let classifier: Arc<dyn PayloadClassifier> =
        match config.payload_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                Arc::new(PayloadPrefixClassifier::new(prefix.as_bytes()))
            }
            _ => Arc::new(AcceptAll),
        };
    Ok((filter, classifier))
}
