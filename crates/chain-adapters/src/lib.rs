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

//! # Chain Adapters
//!
//! A chain adapter is the single capability the dispatcher needs from a
//! destination ledger: submit an envelope and get a receipt back, or a
//! failure classified as retryable or permanent. Fee estimation, signing and
//! broadcast all live behind it.

use attestation_relayer_types::{Envelope, Receipt};

/// Adapter talking to a submit gateway over HTTP.
pub mod http;
/// Maps destination names to adapters and envelopes to destinations.
pub mod registry;

pub use http::HttpChainAdapter;
pub use registry::AdapterRegistry;

/// Why a submission did not produce a fresh receipt.
///
/// The dispatcher relies on this classification: a wrong variant is a
/// correctness bug, not a crash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Transient failure, the same submission may succeed later: network
    /// timeout, RPC hiccup, fee estimate too low, nonce conflict.
    #[error("retryable submit error: {0}")]
    Retryable(String),
    /// The submission will never succeed: malformed payload, rejected by
    /// the destination contract.
    #[error("permanent submit error: {0}")]
    Permanent(String),
    /// The destination already applied this message.
    #[error("message already delivered")]
    AlreadyDelivered {
        /// Hash of the earlier delivery, when the destination reports it.
        tx_hash: Option<String>,
    },
}

/// Submit capability of one destination ledger.
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Name of the destination, as configured.
    fn name(&self) -> &str;
    /// The relayer account used on the destination. Submissions sharing an
    /// account are serialized by the dispatcher.
    fn account(&self) -> &str;
    /// Builds, signs and broadcasts a transaction delivering `envelope`.
    async fn submit(&self, envelope: &Envelope) -> Result<Receipt, SubmitError>;
    /// Current balance of [`ChainAdapter::account`], if the destination exposes it.
    async fn balance(&self) -> Result<Option<f64>, SubmitError> {
        Ok(None)
    }
}
