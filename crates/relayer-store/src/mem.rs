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

use std::collections::HashMap;
use std::sync::Arc;

use attestation_relayer_types::MessageKey;
use parking_lot::{Mutex, RwLock};

use super::{EntryIter, MessageStore, StoreEntry};

/// One lock per key, so same-key upserts serialize and different keys don't
/// contend beyond the short map lookup. `None` until a first upsert succeeds.
type Slot = Arc<Mutex<Option<StoreEntry>>>;

/// InMemoryStore is a store that keeps the relay state in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<MessageKey, Slot>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl InMemoryStore {
    fn slot(&self, key: &MessageKey) -> Slot {
        if let Some(slot) = self.entries.read().get(key) {
            return slot.clone();
        }
        self.entries.write().entry(*key).or_default().clone()
    }
}

impl MessageStore for InMemoryStore {
    #[tracing::instrument(skip_all, fields(key = %key))]
    fn upsert<F>(&self, key: MessageKey, mut f: F) -> crate::Result<StoreEntry>
    where
        F: FnMut(&mut StoreEntry) -> crate::Result<()>,
    {
        let slot = self.slot(&key);
        let mut guard = slot.lock();
        let mut entry = guard.clone().unwrap_or_else(|| StoreEntry::new(key));
        f(&mut entry)?;
        *guard = Some(entry.clone());
        Ok(entry)
    }

    fn get(&self, key: &MessageKey) -> crate::Result<Option<StoreEntry>> {
        let slot = match self.entries.read().get(key) {
            Some(slot) => slot.clone(),
            None => return Ok(None),
        };
        let entry = slot.lock().clone();
        Ok(entry)
    }

    fn scan<'a, P>(&'a self, predicate: P) -> EntryIter<'a>
    where
        P: Fn(&StoreEntry) -> bool + 'a,
    {
        // only the slot handles are copied, each entry is read when reached.
        let slots: Vec<Slot> = self.entries.read().values().cloned().collect();
        Box::new(
            slots
                .into_iter()
                .filter_map(|slot| slot.lock().clone())
                .filter(move |entry| predicate(entry))
                .map(Ok),
        )
    }

    fn len(&self) -> crate::Result<usize> {
        let slots: Vec<Slot> = self.entries.read().values().cloned().collect();
        Ok(slots.iter().filter(|s| s.lock().is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use attestation_relayer_types::{ChainId, EmitterAddress};
    use attestation_relayer_utils::Error;

    use super::*;
    use crate::MessageStatus;

    fn key(sequence: u64) -> MessageKey {
        MessageKey::new(ChainId(2), EmitterAddress([7; 32]), sequence)
    }

    #[test]
    fn duplicate_upserts_keep_one_entry() {
        let store = InMemoryStore::default();
        for _ in 0..5 {
            store
                .upsert(key(1), |e| {
                    if e.is_new() {
                        e.transition(MessageStatus::Queued)?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(store.len().unwrap(), 1);
        let e = store.get(&key(1)).unwrap().unwrap();
        assert_eq!(e.status, MessageStatus::Queued);
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let store = InMemoryStore::default();
        let err = store
            .upsert(key(1), |e| e.transition(MessageStatus::Succeeded))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(store.get(&key(1)).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn concurrent_same_key_upserts_serialize() {
        let store = InMemoryStore::default();
        store
            .upsert(key(1), |e| e.transition(MessageStatus::Queued))
            .unwrap();
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.upsert(key(1), |e| e.begin_attempt()).is_ok()
                })
            })
            .collect();
        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        // only one thread can claim a queued entry.
        assert_eq!(claimed, 1);
        assert_eq!(store.get(&key(1)).unwrap().unwrap().attempts, 1);
    }

    #[test]
    fn scan_filters_lazily() {
        let store = InMemoryStore::default();
        for seq in 0..10 {
            store
                .upsert(key(seq), |e| {
                    if seq % 2 == 0 {
                        e.transition(MessageStatus::Queued)
                    } else {
                        e.transition(MessageStatus::Filtered)
                    }
                })
                .unwrap();
        }
        let mut queued: Vec<u64> = store
            .scan(|e| e.status == MessageStatus::Queued)
            .map(|e| e.unwrap().key.sequence)
            .collect();
        queued.sort();
        assert_eq!(queued, vec![0, 2, 4, 6, 8]);
        // restartable.
        assert_eq!(store.scan(|_| true).count(), 10);
    }
}
