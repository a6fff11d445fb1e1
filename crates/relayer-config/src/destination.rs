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

use attestation_relayer_types::{Credential, EndpointUrl};
use serde::{Deserialize, Serialize};

use crate::{defaults, EmitterRule};

/// How the relayer talks to a destination ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationKind {
    /// A submit gateway reached over HTTP(S) that builds, signs and
    /// broadcasts the transaction for the configured account.
    Http,
}

/// DestinationConfig is the configuration of one destination ledger.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DestinationConfig {
    /// Whether this destination is used.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    /// Adapter used for this destination.
    pub kind: DestinationKind,
    /// Submit endpoint.
    pub endpoint: EndpointUrl,
    /// Relayer account on the destination. Submissions for the same account
    /// are never in flight at the same time.
    pub account: String,
    /// Credential used to authorize submissions, supports `$ENV_VAR`.
    #[serde(default, skip_serializing)]
    pub credential: Option<Credential>,
    /// Emitters routed to this destination. Empty means all of them.
    #[serde(default)]
    pub routes: Vec<EmitterRule>,
    /// How often the account balance is refreshed, `0` disables it.
    #[serde(default = "defaults::balance_interval_ms")]
    pub balance_interval_ms: u64,
}
