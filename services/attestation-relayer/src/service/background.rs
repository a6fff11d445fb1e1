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

use tokio::time;

use attestation_chain_adapters::AdapterRegistry;
use attestation_relayer_context::RelayerContext;
use attestation_relayer_store::MessageStore;

/// How often the store size gauges are refreshed.
const STORE_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Keeps `store_entries` and `total_amount_of_data_stored` up to date until
/// shutdown.
pub fn start_store_metrics(ctx: &RelayerContext) {
    let store = ctx.store().clone();
    let metrics = ctx.metrics.clone();
    let mut shutdown_signal = ctx.shutdown_signal();
    let task = async move {
        let mut interval = time::interval(STORE_METRICS_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = shutdown_signal.recv() => return,
            }
            match store.len() {
                Ok(len) => metrics
                    .store_entries
                    .set(i64::try_from(len).unwrap_or(i64::MAX)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to count store entries");
                }
            }
            metrics.total_amount_of_data_stored.set(
                i64::try_from(store.get_data_stored_size()).unwrap_or(i64::MAX),
            );
        }
    };
    tokio::task::spawn(task);
}

/// Polls the relayer account balance of every destination whose
/// `balance-interval-ms` is not zero.
pub fn start_balance_refresh(ctx: &RelayerContext, registry: &AdapterRegistry) {
    for adapter in registry.adapters() {
        let interval_ms = ctx
            .config
            .destinations
            .get(adapter.name())
            .map(|d| d.balance_interval_ms)
            .unwrap_or_default();
        if interval_ms == 0 {
            tracing::trace!(destination = adapter.name(), "Balance refresh disabled");
            continue;
        }
        let metrics = ctx.metrics.clone();
        let mut shutdown_signal = ctx.shutdown_signal();
        let task = async move {
            let mut interval = time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {},
                    _ = shutdown_signal.recv() => return,
                }
                match adapter.balance().await {
                    Ok(Some(balance)) => {
                        if let Err(e) =
                            metrics.set_account_balance(adapter.name(), balance)
                        {
                            tracing::warn!(error = %e, "Failed to record balance");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        destination = adapter.name(),
                        account = adapter.account(),
                        error = %e,
                        "Failed to refresh account balance",
                    ),
                }
            }
        };
        tokio::task::spawn(task);
    }
}
