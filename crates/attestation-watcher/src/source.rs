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

use base64::Engine;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tungstenite::tungstenite::Message;

use crate::EmitterFilter;

/// Why the source failed to produce the next attestation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The connection failed or broke, the watcher reconnects.
    #[error("attestation source unavailable: {0}")]
    Unavailable(String),
    /// A single frame could not be turned into bytes, the stream is fine.
    #[error("undecodable frame: {0}")]
    Undecodable(String),
}

/// Long lived stream of raw signed attestations.
pub type AttestationStream = BoxStream<'static, Result<Vec<u8>, SourceError>>;

/// A feed of signed attestations.
#[async_trait::async_trait]
pub trait AttestationSource: Send + Sync {
    /// Opens a new subscription. The source may use `filter` to narrow the
    /// stream down, the watcher filters again either way.
    async fn connect(
        &self,
        filter: &EmitterFilter,
    ) -> Result<AttestationStream, SourceError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmitterFilterMessage {
    chain_id: u16,
    emitter_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterEntry {
    emitter_filter: EmitterFilterMessage,
}

#[derive(Debug, Default, Serialize)]
struct SubscribeRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    filters: Vec<FilterEntry>,
}

impl From<&EmitterFilter> for SubscribeRequest {
    fn from(filter: &EmitterFilter) -> Self {
        let filters = filter
            .emitters()
            .into_iter()
            .map(|(chain, address)| FilterEntry {
                emitter_filter: EmitterFilterMessage {
                    chain_id: chain.0,
                    emitter_address: address.to_string(),
                },
            })
            .collect();
        Self { filters }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaaMessage {
    vaa_bytes: String,
}

/// Decodes `hex` (optionally `0x` prefixed) or falls back to base64.
fn decode_text(text: &str) -> Result<Vec<u8>, SourceError> {
    let text = text.trim();
    let stripped = text.strip_prefix("0x").unwrap_or(text);
    if let Ok(bytes) = hex::decode(stripped) {
        return Ok(bytes);
    }
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| SourceError::Undecodable(e.to_string()))
}

/// Turns one text frame into attestation bytes. Text frames are either the
/// encoded bytes themselves or a `{"vaaBytes": ..}` object.
pub(crate) fn parse_text_frame(text: &str) -> Result<Vec<u8>, SourceError> {
    if text.trim_start().starts_with('{') {
        let msg: SignedVaaMessage = serde_json::from_str(text)
            .map_err(|e| SourceError::Undecodable(e.to_string()))?;
        decode_text(&msg.vaa_bytes)
    } else {
        decode_text(text)
    }
}

/// Subscribes to signed attestations over a websocket.
#[derive(Debug, Clone)]
pub struct WsAttestationSource {
    endpoint: url::Url,
    connect_timeout: Duration,
}

impl WsAttestationSource {
    pub fn new(endpoint: url::Url, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }
}

#[async_trait::async_trait]
impl AttestationSource for WsAttestationSource {
    #[tracing::instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn connect(
        &self,
        filter: &EmitterFilter,
    ) -> Result<AttestationStream, SourceError> {
        let connect = tungstenite::tokio::connect_async(self.endpoint.as_str());
        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| SourceError::Unavailable("connect timed out".into()))?
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let request = serde_json::to_string(&SubscribeRequest::from(filter))
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        ws.send(Message::Text(request))
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        tracing::debug!(filters = filter.emitters().len(), "subscribed");

        let stream = ws.filter_map(|frame| async move {
            match frame {
                Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
                Ok(Message::Text(text)) => Some(parse_text_frame(&text)),
                Ok(Message::Close(reason)) => Some(Err(SourceError::Unavailable(
                    format!("closed by peer: {reason:?}"),
                ))),
                // pings are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(SourceError::Unavailable(e.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}
