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

//!
//! A module for managing the relay state of the relayer.
//!
//! ## Overview
//!
//! The relayer store keeps exactly one [`StoreEntry`] per attestation
//! identity key and is the durable queue between ingest and dispatch.
//! Every mutation goes through [`MessageStore::upsert`], an atomic
//! read-modify-write that is serialized per key.
//!
use std::sync::Arc;

use attestation_relayer_types::MessageKey;
use attestation_relayer_utils::Result;

/// Message status and the bookkeeping record stored per key.
pub mod entry;
/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

pub use entry::{MessageStatus, StoreEntry};
/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;

/// A lazy sequence of entries, each one a point-in-time read.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<StoreEntry>> + 'a>;

/// A keyed map from identity key to [`StoreEntry`].
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Atomically reads, mutates and writes back the entry under `key`.
    ///
    /// `f` receives the current entry, or a fresh [`MessageStatus::New`]
    /// entry if none exists yet. If `f` fails nothing is written and the
    /// error is returned. `f` may be called more than once when the backend
    /// retries a conflicting write, so it must not have side effects outside
    /// the entry.
    fn upsert<F>(&self, key: MessageKey, f: F) -> Result<StoreEntry>
    where
        F: FnMut(&mut StoreEntry) -> Result<()>;

    /// Point lookup.
    fn get(&self, key: &MessageKey) -> Result<Option<StoreEntry>>;

    /// Lazily yields every entry matching `predicate`.
    ///
    /// Calling it again restarts the scan from the beginning.
    fn scan<'a, P>(&'a self, predicate: P) -> EntryIter<'a>
    where
        P: Fn(&StoreEntry) -> bool + 'a;

    /// Number of stored entries.
    fn len(&self) -> Result<usize>;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }
}

impl<S> MessageStore for Arc<S>
where
    S: MessageStore,
{
    fn upsert<F>(&self, key: MessageKey, f: F) -> Result<StoreEntry>
    where
        F: FnMut(&mut StoreEntry) -> Result<()>,
    {
        S::upsert(self, key, f)
    }

    fn get(&self, key: &MessageKey) -> Result<Option<StoreEntry>> {
        S::get(self, key)
    }

    fn scan<'a, P>(&'a self, predicate: P) -> EntryIter<'a>
    where
        P: Fn(&StoreEntry) -> bool + 'a,
    {
        S::scan(self, predicate)
    }

    fn len(&self) -> Result<usize> {
        S::len(self)
    }
}
