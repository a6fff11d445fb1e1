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

//! # Relayer Service Module
//!
//! A module for starting the long-running tasks of the relayer.
//!
//! ## Overview
//!
//! Services are tasks which the relayer constantly runs throughout its
//! lifetime: the attestation watcher, the dispatcher, the HTTP server and a
//! couple of periodic metric refreshers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use attestation_chain_adapters::AdapterRegistry;
use attestation_dispatcher::Dispatcher;
use attestation_relayer_context::RelayerContext;
use attestation_relayer_store::SledStore;
use attestation_watcher::{
    filters_from_config, AttestationSource, AttestationWatcher,
    WsAttestationSource,
};

/// Periodic metric refreshers.
pub mod background;

/// Type alias for [Sled](https://sled.rs)-based database store
pub type Store = SledStore;

/// Sets up the HTTP server exposing metrics, relay state queries and the
/// relayer information.
///
/// Returns the bound address and the server future, which completes once the
/// shutdown signal fires and the in-flight requests are answered.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration and database
pub fn build_web_services(
    ctx: RelayerContext,
) -> crate::Result<(SocketAddr, impl Future<Output = crate::Result<()>> + 'static)>
{
    let socket_addr = SocketAddr::new([0, 0, 0, 0].into(), ctx.config.port);
    let mut shutdown_signal = ctx.shutdown_signal();
    let app = attestation_relayer_handlers::router(Arc::new(ctx))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .into_make_service();

    let server = axum::Server::try_bind(&socket_addr)?.serve(app);
    let addr = server.local_addr();
    let server = server.with_graceful_shutdown(async move {
        shutdown_signal.recv().await;
    });
    Ok((addr, async move { server.await.map_err(Into::into) }))
}

/// Starts all background services of the relayer, subscribing to the
/// configured websocket attestation source.
///
/// Every configuration problem (missing credentials, malformed filters) and
/// an unreachable attestation source surface here, before anything runs.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration and database
pub async fn ignite(ctx: &RelayerContext) -> crate::Result<()> {
    tracing::trace!(
        "Relayer configuration: {}",
        serde_json::to_string_pretty(&ctx.config)?
    );
    let source = WsAttestationSource::new(
        ctx.config.source.endpoint.as_url().clone(),
        ctx.config.source.connect_timeout(),
    );
    ignite_with_source(ctx, Arc::new(source)).await
}

/// Same as [`ignite`], with the attestation source supplied by the caller.
pub async fn ignite_with_source(
    ctx: &RelayerContext,
    source: Arc<dyn AttestationSource>,
) -> crate::Result<()> {
    let config = &ctx.config;
    let registry = AdapterRegistry::from_config(
        &config.destinations,
        config.dispatcher.submit_timeout(),
    )?;
    if registry.is_empty() {
        tracing::warn!("No destination is enabled, queued messages will fail");
    }
    let (filter, classifier) = filters_from_config(&config.filter)?;
    let watcher = AttestationWatcher::builder()
        .store(ctx.store().clone())
        .source(source)
        .filter(filter)
        .classifier(classifier)
        .registry(registry.clone())
        .metrics(ctx.metrics.clone())
        .work_available(ctx.work_available.clone())
        .decode_timeout(config.source.decode_timeout())
        .read_timeout(config.source.read_timeout())
        .reconnect_max_interval(Duration::from_millis(
            config.source.reconnect_max_interval_ms,
        ))
        .build();
    start_attestation_watcher(ctx, watcher).await?;
    start_dispatcher(ctx, registry.clone());
    background::start_store_metrics(ctx);
    background::start_balance_refresh(ctx, &registry);
    tracing::info!(destinations = registry.len(), "Relayer services started");
    Ok(())
}

/// Opens the first subscription and kicks off the watcher.
///
/// Failing to reach the source here is fatal, later disconnects are retried
/// by the watcher itself.
async fn start_attestation_watcher(
    ctx: &RelayerContext,
    watcher: AttestationWatcher<Store>,
) -> crate::Result<()> {
    let stream = watcher.connect_at_boot().await?;
    let shutdown_signal = ctx.shutdown_signal();
    tracing::debug!("Attestation watcher started");
    let task = async move {
        match watcher.run(stream, shutdown_signal).await {
            Ok(()) => tracing::trace!("Stopping attestation watcher"),
            Err(e) => {
                tracing::error!(error = %e, "Attestation watcher stopped");
            }
        }
    };
    // kick off the watcher.
    tokio::task::spawn(task);
    Ok(())
}

/// Starts the dispatcher task.
fn start_dispatcher(ctx: &RelayerContext, registry: AdapterRegistry) {
    let dispatcher = Dispatcher::new(
        ctx.store().clone(),
        registry,
        ctx.metrics.clone(),
        ctx.work_available.clone(),
        ctx.config.dispatcher.clone(),
    );
    let shutdown_signal = ctx.shutdown_signal();
    tracing::debug!("Dispatcher started");
    let task = async move {
        match dispatcher.run(shutdown_signal).await {
            Ok(()) => tracing::trace!("Stopping dispatcher"),
            Err(e) => tracing::error!(error = %e, "Dispatcher stopped"),
        }
    };
    // kick off the dispatcher.
    tokio::task::spawn(task);
}

#[cfg(test)]
mod tests;
