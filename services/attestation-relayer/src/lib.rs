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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Attestation Relayer Crate
//!
//! Relays signed attestations, produced by a guardian network, to the
//! destination ledgers that consume them.
//!
//! ## Overview
//!
//! The relayer is a pipeline of long running tasks sharing one persistent
//! store:
//!
//!   1. The attestation watcher subscribes to the attestation source, decodes
//!      and filters what it receives, and records every new message exactly
//!      once under its identity key `(origin chain, emitter, sequence)`.
//!   2. The dispatcher picks queued messages up and submits them through the
//!      chain adapter of their destination, retrying transient failures with
//!      exponential backoff until the message is delivered or given up on.
//!   3. An HTTP server exposes prometheus metrics and the relay state of any
//!      message by its identity key.
//!
//! Because every status change goes through the store, a restarted relayer
//! neither loses queued work nor submits a delivered message twice.

/// A module for starting the long-running tasks of the relayer.
pub mod service;

pub use attestation_relayer_utils::{Error, Result};
