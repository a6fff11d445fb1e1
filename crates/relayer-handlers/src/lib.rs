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

//! Relayer handlers for HTTP calls.
//!
//! Every handler only reads relay state, none of them can change it.

#![warn(missing_docs)]

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use attestation_relayer_context::RelayerContext;

/// Module handles relayer API
pub mod routes;

/// Builds the HTTP API of the relayer.
///
/// * `GET /metrics` prometheus text exposition.
/// * `GET /query/:chain/:address/:sequence` relay state of one message.
/// * `GET /api/v1/info` the running configuration, secrets excluded.
pub fn router(ctx: Arc<RelayerContext>) -> Router {
    let api = Router::new().route("/info", get(routes::handle_relayer_info));
    Router::new()
        .route("/metrics", get(routes::handle_metric_info))
        .route(
            "/query/:chain/:address/:sequence",
            get(routes::handle_query),
        )
        .nest("/api/v1", api)
        .with_state(ctx)
}
