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

use crate::RelayerConfig;
use anyhow::Context;
use directories_next::ProjectDirs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

/// `ProjectDirs` qualifier, organization and application name. Without
/// `--config-dir` the relayer reads `*.toml` from the OS config dir for this
/// triple and keeps its relay state under the matching local data dir.
pub const PACKAGE_ID: [&str; 3] = ["tools", "webb", "attestation-relayer"];

/// Relays signed guardian attestations to the configured destination ledgers.
///
/// Watches the guardian spy stream, persists every accepted attestation and
/// retries delivery until each destination confirms it. Delivery state and
/// metrics are served over HTTP on the configured port.
///
/// $ attestation-relayer -vv -c ./config
#[derive(StructOpt, Debug)]
#[structopt(name = "attestation-relayer")]
pub struct Opts {
    /// Log verbosity: errors only by default, `-vvvv` for trace.
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory holding the `*.toml` relay config (source, filters,
    /// destinations, retry policy). Relay state is kept in a `store`
    /// directory next to it.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Keep relay state in a throwaway database. Pending deliveries and
    /// retry schedules are lost on exit.
    #[structopt(long)]
    pub tmp: bool,
}

/// Loads the configuration from the given directory, or from the default
/// config directory of the OS when none is given.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<RelayerConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
            .context("no home directory to read the relay config from")?
            .config_dir()
            .to_path_buf(),
    };
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading relay config from {}", path.display());
    let config = crate::utils::load(path)?;
    tracing::trace!(
        destinations = config.destinations.len(),
        "Relay config loaded"
    );
    Ok(config)
}

/// Sets up the logger for the relayer, based on the verbosity level passed in.
///
/// `0` only shows errors, every extra `-v` adds a level up to `TRACE`.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directives = [
        format!("attestation_relayer={log_level}"),
        format!("attestation_watcher={log_level}"),
        format!("attestation_dispatcher={log_level}"),
        format!("attestation_chain_adapters={log_level}"),
        format!("attestation_relayer_store={log_level}"),
        format!("{}={log_level}", attestation_relayer_utils::probe::TARGET),
    ];
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        env_filter = env_filter.add_directive(directive.parse()?);
    }
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    // if we are not compiling for integration tests, we should use pretty logs
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // otherwise, we should use json, which is easy to parse.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger.init();
    Ok(())
}

/// Creates the relay state store, in a temporary location when `--tmp` is set.
pub fn create_store(
    opts: &Opts,
) -> anyhow::Result<attestation_relayer_store::SledStore> {
    if opts.tmp {
        tracing::debug!("Relay state is kept in a temporary store");
        let store = attestation_relayer_store::SledStore::temporary()?;
        return Ok(store);
    }
    let db_path = match opts.config_dir.as_deref() {
        Some(dir) => store_path(dir),
        None => {
            let dirs = ProjectDirs::from(
                PACKAGE_ID[0],
                PACKAGE_ID[1],
                PACKAGE_ID[2],
            )
            .context("no home directory to keep relay state in")?;
            dirs.data_local_dir().join("store")
        }
    };
    tracing::debug!("Opening relay state at {}", db_path.display());
    let store = attestation_relayer_store::SledStore::open(db_path)?;
    Ok(store)
}

/// Relay state sits beside the config directory, so `-c deploy/config`
/// keeps it in `deploy/store`.
fn store_path(config_dir: &Path) -> PathBuf {
    match config_dir.parent() {
        Some(parent) => parent.join("store"),
        None => config_dir.join("store"),
    }
}

#[cfg(test)]
mod tests {
    use attestation_relayer_store::MessageStore;

    use super::*;

    #[test]
    fn parses_relay_options() {
        let opts = Opts::from_iter([
            "attestation-relayer",
            "-vv",
            "--tmp",
            "-c",
            "/srv/relayer/config",
        ]);
        assert_eq!(opts.verbose, 2);
        assert!(opts.tmp);
        assert_eq!(
            opts.config_dir.as_deref(),
            Some(Path::new("/srv/relayer/config"))
        );
    }

    #[test]
    fn defaults_to_persistent_state_and_os_config_dir() {
        let opts = Opts::from_iter(["attestation-relayer"]);
        assert_eq!(opts.verbose, 0);
        assert!(!opts.tmp);
        assert!(opts.config_dir.is_none());
    }

    #[test]
    fn store_lives_next_to_the_config_dir() {
        assert_eq!(
            store_path(Path::new("/srv/relayer/config")),
            PathBuf::from("/srv/relayer/store")
        );
    }

    #[test]
    fn tmp_store_starts_empty() {
        let opts = Opts::from_iter(["attestation-relayer", "--tmp"]);
        let store = create_store(&opts).unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn rejects_a_missing_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }
}
