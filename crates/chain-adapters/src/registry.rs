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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use attestation_relayer_config::{DestinationConfig, DestinationKind};
use attestation_relayer_types::{ChainId, EmitterAddress, Envelope};
use attestation_relayer_utils::Error;

use crate::{ChainAdapter, HttpChainAdapter};

struct Destination {
    adapter: Arc<dyn ChainAdapter>,
    /// Emitters routed here, empty routes everything.
    routes: Vec<(ChainId, EmitterAddress)>,
}

/// Destination adapters by name.
///
/// Routing walks destinations in name order, so the choice is stable across
/// restarts.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    destinations: BTreeMap<String, Arc<Destination>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.destinations.keys()).finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an adapter for every configured destination.
    ///
    /// Expects a config that went through post-loading validation, disabled
    /// destinations are skipped anyway.
    pub fn from_config(
        destinations: &HashMap<String, DestinationConfig>,
        submit_timeout: Duration,
    ) -> attestation_relayer_utils::Result<Self> {
        let mut registry = Self::new();
        for (name, config) in destinations.iter().filter(|(_, c)| c.enabled) {
            let credential = config
                .credential
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| Error::MissingSecrets {
                    destination: name.clone(),
                })?;
            let adapter: Arc<dyn ChainAdapter> = match config.kind {
                DestinationKind::Http => Arc::new(HttpChainAdapter::new(
                    name.clone(),
                    config.account.clone(),
                    config.endpoint.as_url().clone(),
                    credential,
                    submit_timeout,
                )?),
            };
            let routes = config
                .routes
                .iter()
                .enumerate()
                .map(|(index, rule)| {
                    rule.parse()
                        .map_err(|reason| Error::InvalidFilter { index, reason })
                })
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(
                destination = %name,
                account = %config.account,
                routes = routes.len(),
                "registered destination"
            );
            registry.insert(adapter, routes);
        }
        Ok(registry)
    }

    /// Registers `adapter` under its own name, replacing any previous one.
    pub fn insert(
        &mut self,
        adapter: Arc<dyn ChainAdapter>,
        routes: Vec<(ChainId, EmitterAddress)>,
    ) {
        self.destinations.insert(
            adapter.name().to_string(),
            Arc::new(Destination { adapter, routes }),
        );
    }

    pub fn with_adapter(
        mut self,
        adapter: Arc<dyn ChainAdapter>,
        routes: Vec<(ChainId, EmitterAddress)>,
    ) -> Self {
        self.insert(adapter, routes);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChainAdapter>> {
        self.destinations.get(name).map(|d| d.adapter.clone())
    }

    /// Picks the destination for `envelope`: the first one, by name, whose
    /// routes contain the envelope emitter or that routes everything.
    pub fn route(&self, envelope: &Envelope) -> Option<String> {
        let emitter = (envelope.origin_chain, envelope.origin_address);
        self.destinations
            .iter()
            .find(|(_, d)| d.routes.is_empty() || d.routes.contains(&emitter))
            .map(|(name, _)| name.clone())
    }

    pub fn adapters(&self) -> impl Iterator<Item = Arc<dyn ChainAdapter>> + '_ {
        self.destinations.values().map(|d| d.adapter.clone())
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use attestation_relayer_types::Receipt;

    use super::*;
    use crate::SubmitError;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl ChainAdapter for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn account(&self) -> &str {
            "acct"
        }
        async fn submit(&self, _: &Envelope) -> Result<Receipt, SubmitError> {
            Err(SubmitError::Permanent("unused".into()))
        }
    }

    fn envelope(chain: u16, address: u8) -> Envelope {
        Envelope {
            guardian_set_index: 0,
            timestamp: 0,
            nonce: 0,
            origin_chain: ChainId(chain),
            origin_address: EmitterAddress([address; 32]),
            sequence: 1,
            consistency_level: 1,
            payload: vec![],
            digest: [0; 32],
            raw: vec![],
        }
    }

    #[test]
    fn routes_to_first_matching_destination() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(Named("zeta")), vec![])
            .with_adapter(
                Arc::new(Named("alpha")),
                vec![(ChainId(2), EmitterAddress([7; 32]))],
            );
        assert_eq!(registry.route(&envelope(2, 7)).as_deref(), Some("alpha"));
        // not in alpha's routes, falls through to the catch-all.
        assert_eq!(registry.route(&envelope(2, 8)).as_deref(), Some("zeta"));
        assert_eq!(registry.get("alpha").unwrap().name(), "alpha");
        assert!(registry.get("beta").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn no_route_without_catch_all() {
        let registry = AdapterRegistry::new().with_adapter(
            Arc::new(Named("alpha")),
            vec![(ChainId(2), EmitterAddress([7; 32]))],
        );
        assert_eq!(registry.route(&envelope(1, 7)), None);
        assert_eq!(AdapterRegistry::new().route(&envelope(1, 7)), None);
    }

    fn destinations(
        value: serde_json::Value,
    ) -> HashMap<String, DestinationConfig> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn builds_from_config() {
        let config = destinations(serde_json::json!({
            "terra": {
                "kind": "http",
                "endpoint": "http://localhost:9000/submit",
                "account": "terra1relayer",
                "credential": "token",
                "routes": [{ "chain-id": 2, "address": "0x07" }],
            },
            "off": {
                "enabled": false,
                "kind": "http",
                "endpoint": "http://localhost:9001/submit",
                "account": "nobody",
            },
        }));
        let registry =
            AdapterRegistry::from_config(&config, Duration::from_secs(1))
                .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("terra").unwrap().account(), "terra1relayer");
        let mut address = [0u8; 32];
        address[31] = 7;
        let mut e = envelope(2, 0);
        e.origin_address = EmitterAddress(address);
        assert_eq!(registry.route(&e).as_deref(), Some("terra"));
    }

    #[test]
    fn missing_credential_is_rejected() {
        let config = destinations(serde_json::json!({
            "terra": {
                "kind": "http",
                "endpoint": "http://localhost:9000/submit",
                "account": "terra1relayer",
            },
        }));
        assert!(matches!(
            AdapterRegistry::from_config(&config, Duration::from_secs(1)),
            Err(Error::MissingSecrets { destination }) if destination == "terra"
        ));
    }
}
