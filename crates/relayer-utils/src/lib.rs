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

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Metrics functionality
pub mod metric;
/// A module used for debugging relayer lifecycle, ingest, dispatch, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// An enum of all possible errors that could be encountered during the execution of the
/// Attestation Relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error while decoding a hex string.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// Error in the underlying Http/Ws server.
    #[error(transparent)]
    Axum(#[from] axum::Error),
    /// HTTP Error
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Reqwest error
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// A destination is configured without the credential it needs to submit.
    #[error("Missing required credential for destination `{}`", destination)]
    MissingSecrets {
        /// The name of the destination.
        destination: String,
    },
    /// An emitter filter entry could not be parsed.
    #[error("Invalid emitter filter at index {}: {}", index, reason)]
    InvalidFilter {
        /// Position of the entry in the filter list.
        index: usize,
        /// Why the entry was rejected.
        reason: String,
    },
    /// A state change that the message lifecycle does not allow.
    #[error("Invalid status transition for {}: {} -> {}", key, from, to)]
    InvalidTransition {
        /// The identity key of the entry.
        key: String,
        /// The current status.
        from: String,
        /// The rejected target status.
        to: String,
    },
    /// The backing store could not serve the operation.
    #[error("Store unavailable: {}", _0)]
    StoreUnavailable(String),
    /// The attestation source could not be reached or dropped the stream.
    #[error("Attestation source unavailable: {}", _0)]
    SourceUnavailable(String),
}

/// A type alias for the result for the attestation relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for HandlerError {
    fn from(value: Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Error type for HTTP handlers
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

/// Milliseconds since the unix epoch, as used by every timestamp in the relay state.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
