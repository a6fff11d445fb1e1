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

#![warn(missing_docs)]

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the attestation relayer.
//!
//! ## Overview
//!
//! Possible configuration include:
//! * `port`: The port the metrics and query server listens on. Defaults to 8081
//! * `source`: Where attestations are streamed from and the read timeouts.
//! * `filter`: Which emitters (and which payloads) are relayed.
//! * `dispatcher`: Retry limits, backoff and worker pool size.
//! * `destinations`: The ledgers messages are submitted to, and their credentials.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values of the configuration.
pub mod defaults;
/// Destination configuration
pub mod destination;
/// Dispatcher configuration
pub mod dispatcher;
/// Attestation source and filter configuration
pub mod source;
/// Utils for processing configuration
pub mod utils;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use destination::{DestinationConfig, DestinationKind};
pub use dispatcher::DispatcherConfig;
pub use source::{EmitterRule, FilterConfig, SourceConfig};

/// RelayerConfig is the configuration for the attestation relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// Metrics and query server port number
    ///
    /// default to 8081
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Value of the `app` label on every exported metric.
    #[serde(default = "defaults::app_name")]
    pub app_name: String,
    /// The attestation source.
    pub source: SourceConfig,
    /// Emitter allow-list and payload classification.
    #[serde(default)]
    pub filter: FilterConfig,
    /// Dispatcher retry and concurrency settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Destination ledgers.
    ///
    /// a map between destination name and its configuration.
    #[serde(default)]
    pub destinations: HashMap<String, DestinationConfig>,
}

impl RelayerConfig {
    /// Makes sure that every enabled destination carries its credential.
    pub fn verify(&self) -> attestation_relayer_utils::Result<()> {
        for (name, destination) in &self.destinations {
            if !destination.enabled {
                continue;
            }
            let has_credential = destination
                .credential
                .as_ref()
                .map(|c| !c.is_empty())
                .unwrap_or(false);
            if !has_credential {
                return Err(attestation_relayer_utils::Error::MissingSecrets {
                    destination: name.clone(),
                });
            }
        }
        Ok(())
    }
}
