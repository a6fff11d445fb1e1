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

use config::{Config, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use attestation_relayer_utils::Error;

use super::*;

/// Prefix of environment variables merged on top of the config files.
pub const ENV_PREFIX: &str = "RELAYER";

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> attestation_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(Error::from))
        .collect()
}

/// Try to parse the [`RelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> attestation_relayer_utils::Result<RelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of RELAYER).
    let builder = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("_"));
    let cfg = builder.build()?;
    let config: Result<
        RelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files from a directory.
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> attestation_relayer_utils::Result<RelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration.
///
/// Malformed filter or route entries are rejected here, so the relayer never
/// starts with a filter it cannot evaluate.
pub fn postloading_process(
    mut config: RelayerConfig,
) -> attestation_relayer_utils::Result<RelayerConfig> {
    tracing::trace!("Checking configration sanity ...");

    config.filter.emitter_ids()?;
    if let Some(prefix) = &config.filter.payload_prefix {
        if prefix.is_empty() {
            return Err(Error::InvalidFilter {
                index: 0,
                reason: "payload-prefix cannot be empty".into(),
            });
        }
    }

    // keep only enabled destinations, with lower cased names.
    let destinations = config
        .destinations
        .drain()
        .filter(|(_, d)| d.enabled)
        .map(|(name, d)| (name.to_lowercase(), d))
        .collect::<HashMap<_, _>>();
    for (name, destination) in &destinations {
        for (index, rule) in destination.routes.iter().enumerate() {
            rule.parse().map_err(|reason| Error::InvalidFilter {
                index,
                reason: format!("route of destination `{name}`: {reason}"),
            })?;
        }
    }
    config.destinations = destinations;
    if config.destinations.is_empty() {
        tracing::warn!(
            "!!WARNING!!: no destination is configured, every matching message will fail permanently"
        );
    }

    let d = &mut config.dispatcher;
    if d.workers == 0 {
        tracing::warn!("dispatcher workers is 0, using 1 instead");
        d.workers = 1;
    }
    if d.max_attempts == 0 {
        return Err(Error::Generic("dispatcher max-attempts must be at least 1"));
    }
    if d.backoff_factor == 0 {
        return Err(Error::Generic("dispatcher backoff-factor must be at least 1"));
    }
    if d.backoff_max_ms < d.backoff_base_ms {
        return Err(Error::Generic(
            "dispatcher backoff-max-ms must not be lower than backoff-base-ms",
        ));
    }
    // a jitter larger than the base delay could make a later retry land
    // before an earlier one.
    if d.jitter_ms > d.backoff_base_ms {
        tracing::warn!(
            "dispatcher jitter-ms ({}) is larger than backoff-base-ms ({}), clamping",
            d.jitter_ms,
            d.backoff_base_ms
        );
        d.jitter_ms = d.backoff_base_ms;
    }
    if d.batch_size == 0 {
        d.batch_size = defaults::batch_size();
    }

    Ok(config)
}
