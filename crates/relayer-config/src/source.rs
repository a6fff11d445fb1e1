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

use std::time::Duration;

use attestation_relayer_types::{ChainId, EmitterAddress, EndpointUrl};
use serde::{Deserialize, Serialize};

use crate::defaults;

/// Where attestations are streamed from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Websocket endpoint of the attestation source, e.g. `ws://spy:7073`.
    pub endpoint: EndpointUrl,
    /// Timeout of a single connection attempt.
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reconnect when nothing was read for this long.
    #[serde(default = "defaults::read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Timeout of decoding a single attestation.
    #[serde(default = "defaults::decode_timeout_ms")]
    pub decode_timeout_ms: u64,
    /// Upper bound between two reconnect attempts.
    #[serde(default = "defaults::reconnect_max_interval_ms")]
    pub reconnect_max_interval_ms: u64,
}

impl SourceConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
    /// Decode timeout as a [`Duration`].
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

/// One `(chain, emitter)` allow-list entry, as written in the config.
///
/// Entries are kept as written and checked by
/// [`crate::utils::postloading_process`], so a bad entry is reported with its
/// position instead of failing the whole deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EmitterRule {
    /// Origin chain id.
    pub chain_id: u64,
    /// Emitter address, hex encoded, optionally `0x` prefixed.
    pub address: String,
}

impl EmitterRule {
    /// Parses the rule into typed identity components.
    pub fn parse(&self) -> Result<(ChainId, EmitterAddress), String> {
        let chain = u16::try_from(self.chain_id)
            .map_err(|_| format!("chain id {} out of range", self.chain_id))?;
        let address = self
            .address
            .parse::<EmitterAddress>()
            .map_err(|e| e.to_string())?;
        Ok((ChainId(chain), address))
    }
}

/// Emitter allow-list and payload classification.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterConfig {
    /// Allow-list of emitters. Empty means every emitter matches.
    #[serde(default)]
    pub emitters: Vec<EmitterRule>,
    /// Only relay payloads starting with this ASCII magic, e.g. `P2WH`.
    #[serde(default)]
    pub payload_prefix: Option<String>,
}

impl FilterConfig {
    /// The allow-list as typed pairs. Only fails on a config that skipped
    /// [`crate::utils::postloading_process`].
    pub fn emitter_ids(
        &self,
    ) -> attestation_relayer_utils::Result<Vec<(ChainId, EmitterAddress)>> {
        self.emitters
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                rule.parse().map_err(|reason| {
                    attestation_relayer_utils::Error::InvalidFilter {
                        index,
                        reason,
                    }
                })
            })
            .collect()
    }
}
