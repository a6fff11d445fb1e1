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

use attestation_relayer_types::{Credential, Envelope, Receipt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{ChainAdapter, SubmitError};

/// Error codes a gateway may return with a 4xx that still deserve a retry.
const RETRYABLE_CODES: &[&str] =
    &["insufficient_fee", "nonce_conflict", "sequence_mismatch"];

/// Request body sent to the submit gateway.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    /// Hex encoded signed VAA.
    vaa: String,
    account: &'a str,
    emitter_chain: u16,
    emitter_address: String,
    sequence: u64,
}

/// Response body of the submit gateway, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub height: Option<u64>,
    /// Machine readable error code.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: f64,
}

/// Classifies a gateway answer.
///
/// | status              | outcome                                   |
/// |---------------------|-------------------------------------------|
/// | 2xx                 | receipt                                   |
/// | 409                 | already delivered                         |
/// | 408, 429, 5xx       | retryable                                 |
/// | other 4xx           | permanent, unless `code` is retryable     |
pub fn classify_response(
    destination: &str,
    status: StatusCode,
    body: GatewayResponse,
) -> Result<Receipt, SubmitError> {
    let reason = || {
        body.error
            .clone()
            .or_else(|| body.code.clone())
            .unwrap_or_else(|| status.to_string())
    };
    if status.is_success() {
        return Ok(Receipt {
            destination: destination.to_string(),
            tx_hash: body.tx_hash,
            height: body.height,
            already_delivered: false,
        });
    }
    match status {
        StatusCode::CONFLICT => Err(SubmitError::AlreadyDelivered {
            tx_hash: body.tx_hash,
        }),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(SubmitError::Retryable(reason()))
        }
        s if s.is_server_error() => Err(SubmitError::Retryable(reason())),
        _ => {
            let retryable = body
                .code
                .as_deref()
                .map_or(false, |c| RETRYABLE_CODES.contains(&c));
            if retryable {
                Err(SubmitError::Retryable(reason()))
            } else {
                Err(SubmitError::Permanent(reason()))
            }
        }
    }
}

/// A [`ChainAdapter`] that hands the signed VAA to a submit gateway which
/// builds, signs and broadcasts the destination transaction for `account`.
#[derive(Clone)]
pub struct HttpChainAdapter {
    name: String,
    account: String,
    endpoint: url::Url,
    credential: Credential,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpChainAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChainAdapter")
            .field("name", &self.name)
            .field("account", &self.account)
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl HttpChainAdapter {
    /// Creates a new adapter. `timeout` bounds every request.
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        endpoint: url::Url,
        credential: Credential,
        timeout: Duration,
    ) -> attestation_relayer_utils::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;
        Ok(Self {
            name: name.into(),
            account: account.into(),
            endpoint,
            credential,
            client,
        })
    }

    fn transport_error(e: reqwest::Error) -> SubmitError {
        // nothing reached the destination or we could not read the answer,
        // both are safe to retry since the destination dedupes deliveries.
        SubmitError::Retryable(e.to_string())
    }
}

#[async_trait::async_trait]
impl ChainAdapter for HttpChainAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn account(&self) -> &str {
        &self.account
    }

    #[tracing::instrument(skip_all, fields(destination = %self.name, key = %envelope.key()))]
    async fn submit(&self, envelope: &Envelope) -> Result<Receipt, SubmitError> {
        let request = SubmitRequest {
            vaa: hex::encode(&envelope.raw),
            account: &self.account,
            emitter_chain: envelope.origin_chain.0,
            emitter_address: envelope.origin_address.to_string(),
            sequence: envelope.sequence,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(Self::transport_error)?;
        let body: GatewayResponse = if text.trim().is_empty() {
            GatewayResponse::default()
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| GatewayResponse {
                error: Some(text.clone()),
                ..Default::default()
            })
        };
        tracing::debug!(%status, "gateway answered");
        classify_response(&self.name, status, body)
    }

    async fn balance(&self) -> Result<Option<f64>, SubmitError> {
        let url = self
            .endpoint
            .join("balance")
            .map_err(|e| SubmitError::Permanent(e.to_string()))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.credential.expose())
            .query(&[("account", self.account.as_str())])
            .send()
            .await
            .map_err(Self::transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: BalanceResponse = response
            .error_for_status()
            .map_err(Self::transport_error)?
            .json()
            .await
            .map_err(Self::transport_error)?;
        Ok(Some(body.balance))
    }
}
