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
//! Runtime context shared by the watcher, the dispatcher and the HTTP
//! handlers of the attestation relayer.
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

use attestation_relayer_config::RelayerConfig;
use attestation_relayer_store::SledStore;
use attestation_relayer_utils::metric::Metrics;

/// RelayerContext contains Relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: RelayerConfig,
    /// Broadcasts a shutdown signal to all active tasks.
    ///
    /// When a graceful shutdown is initiated, a `()` value is sent via
    /// the broadcast::Sender. Each task receives it, reaches a safe
    /// terminal state, and completes.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the relayer
    pub metrics: Arc<Metrics>,
    /// Wakes the dispatcher up when the watcher queues new work.
    pub work_available: Arc<Notify>,
    store: SledStore,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(
        config: RelayerConfig,
        store: SledStore,
    ) -> attestation_relayer_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Metrics::new(&config.app_name)?);
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
            work_available: Arc::new(Notify::new()),
            store,
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Returns a reference to the relay state store.
    pub fn store(&self) -> &SledStore {
        &self.store
    }
}

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the server
/// should shutdown.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RelayerConfig {
        serde_json::from_value(serde_json::json!({
            "app-name": "ctx_test",
            "source": { "endpoint": "ws://localhost:7073" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn shutdown_reaches_every_subscriber() {
        let ctx =
            RelayerContext::new(config(), SledStore::temporary().unwrap())
                .unwrap();
        let mut a = ctx.shutdown_signal();
        let mut b = ctx.shutdown_signal();
        ctx.shutdown();
        a.recv().await;
        b.recv().await;
        assert!(a.is_shutdown() && b.is_shutdown());
        // a second recv returns immediately.
        a.recv().await;
    }
}
