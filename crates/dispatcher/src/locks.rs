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

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

/// One async lock per destination account.
///
/// A destination account has a single nonce/sequence, so two transactions
/// from it can not be built concurrently.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    /// Returns the lock of `account`, creating it on first use.
    pub fn get(&self, account: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(account.to_string())
            .or_default()
            .clone()
    }

    /// Takes the lock of `account` if nobody holds it.
    pub fn try_acquire(&self, account: &str) -> Option<OwnedMutexGuard<()>> {
        self.get(account).try_lock_owned().ok()
    }
}
