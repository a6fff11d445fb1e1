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

use std::path::Path;

use attestation_relayer_types::MessageKey;
use attestation_relayer_utils::Error;

use super::{EntryIter, MessageStore, StoreEntry};

const MESSAGES_TREE: &str = "messages";
/// Dirty pages are written out in the background at this interval.
const FLUSH_EVERY_MS: u64 = 500;

/// SledStore is a store that keeps the relay state in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    messages: sled::Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    ///
    /// Writes reach disk within [`FLUSH_EVERY_MS`]; call [`SledStore::flush`]
    /// before exiting to persist the tail.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(Some(FLUSH_EVERY_MS))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        let messages = db.open_tree(MESSAGES_TREE)?;
        Ok(Self { db, messages })
    }

    /// Creates a temporary SledStore, removed from disk when dropped.
    pub fn temporary() -> crate::Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        let messages = db.open_tree(MESSAGES_TREE)?;
        Ok(Self { db, messages })
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    /// Writes every dirty buffer to disk.
    pub fn flush(&self) -> crate::Result<()> {
        self.db.flush().map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(e: sled::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

impl MessageStore for SledStore {
    #[tracing::instrument(skip_all, fields(key = %key))]
    fn upsert<F>(&self, key: MessageKey, mut f: F) -> crate::Result<StoreEntry>
    where
        F: FnMut(&mut StoreEntry) -> crate::Result<()>,
    {
        let db_key = key.to_bytes();
        // optimistic concurrency: re-run the mutation if another writer
        // changed the entry between our read and our swap.
        loop {
            let current = self.messages.get(db_key).map_err(unavailable)?;
            let mut entry = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => StoreEntry::new(key),
            };
            f(&mut entry)?;
            let bytes = serde_json::to_vec(&entry)?;
            let swapped = self
                .messages
                .compare_and_swap(db_key, current, Some(bytes))
                .map_err(unavailable)?;
            match swapped {
                Ok(()) => return Ok(entry),
                Err(_) => {
                    tracing::trace!("concurrent write on {}, retrying", key);
                    continue;
                }
            }
        }
    }

    #[tracing::instrument(skip(self))]
    fn get(&self, key: &MessageKey) -> crate::Result<Option<StoreEntry>> {
        let value = self.messages.get(key.to_bytes()).map_err(unavailable)?;
        match value {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<'a, P>(&'a self, predicate: P) -> EntryIter<'a>
    where
        P: Fn(&StoreEntry) -> bool + 'a,
    {
        let iter = self.messages.iter().filter_map(move |item| {
            let entry = item.map_err(unavailable).and_then(|(_, bytes)| {
                serde_json::from_slice::<StoreEntry>(&bytes).map_err(Error::from)
            });
            match entry {
                Ok(entry) if predicate(&entry) => Some(Ok(entry)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        });
        Box::new(iter)
    }

    fn len(&self) -> crate::Result<usize> {
        Ok(self.messages.len())
    }
}
