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

//! Attestation Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use tokio::signal::unix;

use attestation_relayer::service;
use attestation_relayer_config::cli::{
    create_store, load_config, setup_logger, Opts,
};
use attestation_relayer_context::RelayerContext;
use attestation_relayer_utils::probe;

/// How long in-flight attempts get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;
    config.verify()?;

    // persistent storage for the relayer
    let store = create_store(&args)?;

    // The RelayerContext takes a configuration and the store, and populates
    // objects that are needed throughout the lifetime of the relayer.
    let ctx = RelayerContext::new(config, store)?;

    // metrics and relay state queries.
    let (addr, server) = service::build_web_services(ctx.clone())?;
    tracing::info!("Starting the server on {}", addr);
    let server_handle = tokio::spawn(server);

    // start all background services.
    // this does not block, will fire the services on background tasks.
    service::ignite(&ctx).await?;
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
        },
    }
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        shutdown = true
    );
    tracing::warn!("Shutting down...");
    // send shutdown signal to all of the application.
    ctx.shutdown();
    match tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await {
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Server failed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Server task panicked"),
        Ok(Ok(Ok(()))) => {}
        Err(_) => tracing::warn!("Server did not stop in time"),
    }
    // give the dispatcher a moment to record in-flight attempts.
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    ctx.store().flush()?;
    tracing::info!("Clean Exit ..");
    Ok(())
}
