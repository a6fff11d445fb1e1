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

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use attestation_relayer_context::RelayerContext;
use attestation_relayer_store::{MessageStatus, MessageStore, StoreEntry};
use attestation_relayer_types::{MessageKey, Receipt};
use attestation_relayer_utils::HandlerError;

/// Relay state of one message, as exposed to clients.
///
/// This shape is a stable contract, independent of how the store persists
/// entries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    status: MessageStatus,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    receipt: Option<Receipt>,
}

impl From<StoreEntry> for QueryResponse {
    fn from(entry: StoreEntry) -> Self {
        Self {
            status: entry.status,
            attempts: entry.attempts,
            last_error: entry.last_error,
            receipt: entry.receipt,
        }
    }
}

/// Handles relay state queries by identity key.
///
/// Returns `400` for a malformed key and `404` for a key that was never
/// observed.
///
/// # Arguments
///
/// * `chain` - origin chain id, decimal.
/// * `address` - emitter address, hex, optionally `0x` prefixed.
/// * `sequence` - emitter sequence, decimal.
pub async fn handle_query(
    State(ctx): State<Arc<RelayerContext>>,
    Path((chain, address, sequence)): Path<(String, String, String)>,
) -> Result<Json<QueryResponse>, HandlerError> {
    let key = MessageKey::from_parts(&chain, &address, &sequence)
        .map_err(|e| HandlerError(StatusCode::BAD_REQUEST, e.to_string()))?;
    tracing::trace!(%key, "query");
    match ctx.store().get(&key)? {
        Some(entry) => Ok(Json(entry.into())),
        None => Err(HandlerError(
            StatusCode::NOT_FOUND,
            format!("No relay state for {key}"),
        )),
    }
}
