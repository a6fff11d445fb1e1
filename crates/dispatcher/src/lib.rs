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

//! # Dispatcher
//!
//! Picks queued and due messages from the store and hands them to the chain
//! adapter of their destination, recording every outcome back in the store:
//!
//! ```text
//! Queued ──► Dispatching ──► Succeeded
//!               │  ▲   └───► FailedPermanent
//!               ▼  │
//!             Retrying
//! ```
//!
//! The `Queued | Retrying -> Dispatching` upsert is the claim: it is atomic
//! per key, so a message is never submitted twice at the same time, no matter
//! how many passes run concurrently.
//!
//! A pass only picks messages whose destination account is idle, and holds
//! that account until the outcome is written. Messages of a busy account stay
//! due and are picked by the pass that runs once it frees up, so a slow
//! account never keeps a worker waiting while other accounts have work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use attestation_chain_adapters::{AdapterRegistry, SubmitError};
use attestation_envelope_decoder::{EnvelopeDecoder, VaaDecoder};
use attestation_relayer_config::DispatcherConfig;
use attestation_relayer_context::Shutdown;
use attestation_relayer_store::{MessageStatus, MessageStore, StoreEntry};
use attestation_relayer_types::{MessageKey, Receipt};
use attestation_relayer_utils::metric::Metrics;
use attestation_relayer_utils::retry::{ConstantWithMaxRetryCount, RetrySchedule};
use attestation_relayer_utils::{now_millis, probe, Error};
use backoff::backoff::Backoff;
use tokio::sync::{Notify, OwnedMutexGuard, Semaphore};

mod locks;

pub use locks::AccountLocks;

/// How many times a store write is retried before giving up on it.
const MAX_STORE_RETRIES: usize = 5;
/// Upper bound between two tries of writing a dispatch outcome.
const OUTCOME_RETRY_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Delivers queued messages through their destination adapter.
#[derive(Clone)]
pub struct Dispatcher<S> {
    store: S,
    registry: AdapterRegistry,
    decoder: Arc<dyn EnvelopeDecoder>,
    metrics: Arc<Metrics>,
    work_available: Arc<Notify>,
    config: DispatcherConfig,
    schedule: RetrySchedule,
    worker_count: u32,
    workers: Arc<Semaphore>,
    locks: Arc<AccountLocks>,
}

impl<S: MessageStore> Dispatcher<S> {
    pub fn new(
        store: S,
        registry: AdapterRegistry,
        metrics: Arc<Metrics>,
        work_available: Arc<Notify>,
        config: DispatcherConfig,
    ) -> Self {
        let worker_count = u32::try_from(config.workers.max(1))
            .unwrap_or(u32::MAX)
            .min(Semaphore::MAX_PERMITS as u32);
        Self {
            store,
            registry,
            decoder: Arc::new(VaaDecoder::trusting()),
            metrics,
            work_available,
            schedule: config.retry_schedule(),
            config,
            worker_count,
            workers: Arc::new(Semaphore::new(worker_count as usize)),
            locks: Arc::new(AccountLocks::default()),
        }
    }

    /// Replaces the decoder used to turn stored payloads back into envelopes.
    pub fn with_decoder(mut self, decoder: Arc<dyn EnvelopeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Runs the dispatch loop until `shutdown` fires, then waits for the
    /// in-flight attempts to finish.
    ///
    /// A pass runs on startup, whenever the watcher queues new work and every
    /// poll interval, which is what picks up due retries.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        self,
        mut shutdown: Shutdown,
    ) -> attestation_relayer_utils::Result<()> {
        let recovered = self.recover().await?;
        if recovered > 0 {
            tracing::warn!(
                recovered,
                "Rescheduled attempts interrupted by the previous run"
            );
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Dispatch,
            starting = true,
            workers = self.worker_count,
        );
        loop {
            match self.dispatch_due().await {
                // a full batch means there is probably more, go again.
                Ok(claimed) if claimed >= self.config.batch_size => {
                    self.work_available.notify_one();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(%e, "Dispatcher pass failed"),
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.work_available.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        tracing::debug!("Dispatcher waiting for in-flight attempts");
        self.wait_idle().await;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Dispatch,
            stopped = true,
        );
        Ok(())
    }

    /// Moves entries left in `Dispatching` by a previous process back to
    /// `Retrying`, due immediately. Returns how many were moved.
    pub async fn recover(&self) -> attestation_relayer_utils::Result<usize> {
        let stuck = self.keys_where(
            |e| e.status == MessageStatus::Dispatching,
            usize::MAX,
        )?;
        let now = now_millis();
        for key in &stuck {
            self.update(*key, |e| {
                e.transition(MessageStatus::Retrying)?;
                e.next_attempt_at = Some(now);
                Ok(())
            })
            .await?;
            tracing::debug!(%key, "Recovered interrupted attempt");
        }
        Ok(stuck.len())
    }

    /// Claims up to `batch_size` due entries, at most one per destination
    /// account, and starts an attempt for each. Entries of an account with an
    /// attempt in flight are left for a later pass. Returns the number of
    /// claimed entries.
    pub async fn dispatch_due(&self) -> attestation_relayer_utils::Result<usize> {
        let picked = self.pick_due(now_millis())?;
        let mut claimed = 0;
        for (key, account) in picked {
            // every pick holds a distinct account, so this only waits on
            // attempts of other accounts.
            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Generic("dispatcher worker pool is closed"))?;
            let Some(entry) = self.claim(key).await else {
                continue;
            };
            claimed += 1;
            let this = self.clone();
            tokio::spawn(async move {
                this.attempt(entry).await;
                drop(account);
                drop(permit);
                // the account is free again, its next message may be due.
                this.work_available.notify_one();
            });
        }
        Ok(claimed)
    }

    /// Waits until no attempt is in flight.
    pub async fn wait_idle(&self) {
        // every worker permit is free once all attempts are done.
        let _ = self.workers.acquire_many(self.worker_count).await;
    }

    /// Due keys in store order, each with the guard of its destination
    /// account. Keys whose account is held are skipped. Keys without a
    /// resolvable account carry no guard, their attempt fails without a
    /// submit.
    fn pick_due(
        &self,
        now: u64,
    ) -> attestation_relayer_utils::Result<
        Vec<(MessageKey, Option<OwnedMutexGuard<()>>)>,
    > {
        let mut picked = Vec::new();
        for entry in self.store.scan(move |e| e.is_due(now)) {
            if picked.len() >= self.config.batch_size {
                break;
            }
            let entry = entry?;
            let guard = match self.account_of(&entry) {
                Some(account) => match self.locks.try_acquire(&account) {
                    Some(guard) => Some(guard),
                    None => {
                        tracing::trace!(
                            key = %entry.key,
                            %account,
                            "Account busy, skipping"
                        );
                        continue;
                    }
                },
                None => None,
            };
            picked.push((entry.key, guard));
        }
        Ok(picked)
    }

    fn account_of(&self, entry: &StoreEntry) -> Option<String> {
        let name = entry.destination.as_deref()?;
        self.registry.get(name).map(|a| a.account().to_string())
    }

    fn keys_where<P>(
        &self,
        predicate: P,
        limit: usize,
    ) -> attestation_relayer_utils::Result<Vec<MessageKey>>
    where
        P: Fn(&StoreEntry) -> bool + 'static,
    {
        self.store
            .scan(predicate)
            .take(limit)
            .map(|entry| entry.map(|e| e.key))
            .collect()
    }

    async fn claim(&self, key: MessageKey) -> Option<StoreEntry> {
        let now = now_millis();
        let result = self
            .update(key, |e| {
                if !e.is_due(now) {
                    return Err(Error::InvalidTransition {
                        key: e.key.to_string(),
                        from: e.status.to_string(),
                        to: MessageStatus::Dispatching.to_string(),
                    });
                }
                e.begin_attempt()
            })
            .await;
        match result {
            Ok(entry) => Some(entry),
            // someone else got it first, or it is no longer due.
            Err(Error::InvalidTransition { .. }) => None,
            Err(e) => {
                tracing::error!(%key, %e, "Failed to claim message");
                None
            }
        }
    }

    async fn submit(&self, entry: &StoreEntry) -> Result<Receipt, SubmitError> {
        let name = entry.destination.as_deref().ok_or_else(|| {
            SubmitError::Permanent("no destination routes this message".into())
        })?;
        let adapter = self.registry.get(name).ok_or_else(|| {
            SubmitError::Permanent(format!("destination `{name}` is not configured"))
        })?;
        let envelope = self.decoder.decode(&entry.payload).map_err(|e| {
            SubmitError::Permanent(format!("stored payload does not decode: {e}"))
        })?;

        match tokio::time::timeout(
            self.config.submit_timeout(),
            adapter.submit(&envelope),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Retryable(format!(
                "submit timed out after {:?}",
                self.config.submit_timeout()
            ))),
        }
    }

    #[tracing::instrument(skip_all, fields(key = %entry.key, attempt = entry.attempts))]
    async fn attempt(&self, entry: StoreEntry) {
        let key = entry.key;
        let started = Instant::now();
        let outcome = self.submit(&entry).await;
        self.metrics
            .dispatch_latency
            .observe(started.elapsed().as_secs_f64());

        let now = now_millis();
        let retry_at = now.saturating_add(
            self.schedule.delay_for(entry.attempts).as_millis() as u64,
        );
        let max_attempts = self.config.max_attempts;
        let destination = entry.destination.clone().unwrap_or_default();
        let result = self
            .record(key, |e| {
                match &outcome {
                    Ok(receipt) => {
                        e.transition(MessageStatus::Succeeded)?;
                        e.receipt = Some(receipt.clone());
                        e.last_error = None;
                    }
                    Err(SubmitError::AlreadyDelivered { tx_hash }) => {
                        e.transition(MessageStatus::Succeeded)?;
                        e.receipt = Some(Receipt {
                            destination: destination.clone(),
                            tx_hash: tx_hash.clone(),
                            height: None,
                            already_delivered: true,
                        });
                        e.last_error = None;
                    }
                    Err(SubmitError::Retryable(reason))
                        if e.attempts < max_attempts =>
                    {
                        e.transition(MessageStatus::Retrying)?;
                        e.next_attempt_at = Some(retry_at);
                        e.last_error = Some(reason.clone());
                    }
                    Err(SubmitError::Retryable(reason)) => {
                        e.transition(MessageStatus::FailedPermanent)?;
                        e.last_error = Some(format!(
                            "gave up after {} attempts: {reason}",
                            e.attempts
                        ));
                    }
                    Err(SubmitError::Permanent(reason)) => {
                        e.transition(MessageStatus::FailedPermanent)?;
                        e.last_error = Some(reason.clone());
                    }
                }
                Ok(())
            })
            .await;

        let updated = match result {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!(%e, "Dispatch outcome rejected by the store");
                return;
            }
        };
        match updated.status {
            MessageStatus::Succeeded => {
                self.metrics.relay_successes.inc();
                self.metrics.observe_dispatched_sequence(key.sequence);
                tracing::info!(
                    destination = %destination,
                    tx_hash = ?updated.receipt.as_ref().and_then(|r| r.tx_hash.as_deref()),
                    "Message delivered"
                );
            }
            MessageStatus::Retrying => {
                self.metrics.relay_retries.inc();
                tracing::warn!(
                    error = ?updated.last_error,
                    retry_in = ?Duration::from_millis(retry_at - now),
                    "Dispatch failed, will retry"
                );
            }
            MessageStatus::FailedPermanent => {
                self.metrics.relay_failures.inc();
                tracing::error!(error = ?updated.last_error, "Dispatch failed permanently");
            }
            _ => {}
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Dispatch,
            %key,
            status = %updated.status,
            attempts = updated.attempts,
        );
    }

    /// Upsert with a few retries on store unavailability.
    async fn update<F>(
        &self,
        key: MessageKey,
        f: F,
    ) -> attestation_relayer_utils::Result<StoreEntry>
    where
        F: Fn(&mut StoreEntry) -> attestation_relayer_utils::Result<()>
            + Send
            + Sync,
    {
        let backoff = ConstantWithMaxRetryCount::new(
            Duration::from_millis(100),
            MAX_STORE_RETRIES,
        );
        self.update_with(key, backoff, f, || {}).await
    }

    /// Writes the outcome of an attempt, retrying for as long as the store is
    /// unavailable. The entry stays `Dispatching` until this succeeds.
    async fn record<F>(
        &self,
        key: MessageKey,
        f: F,
    ) -> attestation_relayer_utils::Result<StoreEntry>
    where
        F: Fn(&mut StoreEntry) -> attestation_relayer_utils::Result<()>
            + Send
            + Sync,
    {
        let backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(OUTCOME_RETRY_MAX_INTERVAL)
            .with_max_elapsed_time(None)
            .build();
        self.update_with(key, backoff, f, || {
            self.metrics.outcome_write_retries.inc();
            tracing::warn!(%key, "Store unavailable, retrying outcome write");
        })
        .await
    }

    async fn update_with<B, F, R>(
        &self,
        key: MessageKey,
        backoff: B,
        f: F,
        on_retry: R,
    ) -> attestation_relayer_utils::Result<StoreEntry>
    where
        B: Backoff,
        F: Fn(&mut StoreEntry) -> attestation_relayer_utils::Result<()>
            + Send
            + Sync,
        R: Fn(),
    {
        let task = || async {
            self.store.upsert(key, &f).map_err(|e| match e {
                Error::StoreUnavailable(_) => {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::Retry,
                        %key,
                        error = %e,
                    );
                    on_retry();
                    backoff::Error::transient(e)
                }
                e => backoff::Error::permanent(e),
            })
        };
        backoff::future::retry(backoff, task).await
    }
}
