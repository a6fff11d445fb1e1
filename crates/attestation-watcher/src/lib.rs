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

//! # Attestation Watcher
//!
//! Keeps a subscription to the attestation source open, decodes whatever
//! arrives, decides whether it is relevant and records the outcome in the
//! store. Relevant messages are queued for the dispatcher, which is woken up
//! through a shared [`Notify`].
//!
//! The store is the durable side: the stream is never replayed, and a
//! reconnect simply picks up whatever the source sends next.

use std::sync::Arc;
use std::time::Duration;

use attestation_chain_adapters::AdapterRegistry;
use attestation_envelope_decoder::{EnvelopeDecoder, VaaDecoder};
use attestation_relayer_context::Shutdown;
use attestation_relayer_store::{MessageStatus, MessageStore};
use attestation_relayer_types::Envelope;
use attestation_relayer_utils::metric::Metrics;
use attestation_relayer_utils::retry::ConstantWithMaxRetryCount;
use attestation_relayer_utils::{probe, Error};
use backoff::backoff::Backoff;
use futures::StreamExt;
use tokio::sync::Notify;

mod filter;
mod source;

pub use filter::{
    from_config as filters_from_config, AcceptAll, EmitterFilter,
    PayloadClassifier, PayloadPrefixClassifier,
};
pub use source::{
    AttestationSource, AttestationStream, SourceError, WsAttestationSource,
};

/// How many times a store write is retried before the item is dropped.
const MAX_STORE_RETRIES: usize = 5;

/// What happened to one observed attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Matched the filters and waits for the dispatcher.
    Queued,
    /// Did not match, recorded for audit.
    Filtered,
    /// The key was already known, nothing changed.
    Duplicate,
    /// Could not be decoded or stored.
    Rejected,
}

/// Watches the attestation source and feeds the store.
#[derive(typed_builder::TypedBuilder)]
pub struct AttestationWatcher<S> {
    store: S,
    source: Arc<dyn AttestationSource>,
    #[builder(default = Arc::new(VaaDecoder::trusting()) as Arc<dyn EnvelopeDecoder>)]
    decoder: Arc<dyn EnvelopeDecoder>,
    #[builder(default)]
    filter: EmitterFilter,
    #[builder(default = Arc::new(AcceptAll) as Arc<dyn PayloadClassifier>)]
    classifier: Arc<dyn PayloadClassifier>,
    /// Picks the destination of queued messages.
    registry: AdapterRegistry,
    metrics: Arc<Metrics>,
    /// Notified whenever new work is queued.
    work_available: Arc<Notify>,
    #[builder(default = Duration::from_secs(2))]
    decode_timeout: Duration,
    /// A stream that stays silent for this long is considered dead.
    #[builder(default = Duration::from_secs(60))]
    read_timeout: Duration,
    #[builder(default = Duration::from_secs(30))]
    reconnect_max_interval: Duration,
}

impl<S: MessageStore> AttestationWatcher<S> {
    /// Opens the first subscription. Failing here is a startup error.
    #[tracing::instrument(skip_all)]
    pub async fn connect_at_boot(
        &self,
    ) -> attestation_relayer_utils::Result<AttestationStream> {
        let stream = self
            .source
            .connect(&self.filter)
            .await
            .map_err(|e| Error::SourceUnavailable(e.to_string()))?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Source,
            connected = true,
            filters = self.filter.emitters().len(),
        );
        Ok(stream)
    }

    /// Consumes `stream` and reconnects whenever it ends, errors or goes
    /// silent, until `shutdown` fires.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        self,
        stream: AttestationStream,
        mut shutdown: Shutdown,
    ) -> attestation_relayer_utils::Result<()> {
        let mut backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(
                Duration::from_millis(500).min(self.reconnect_max_interval),
            )
            .with_max_interval(self.reconnect_max_interval)
            .with_max_elapsed_time(None)
            .build();
        let mut current = Some(stream);
        loop {
            let mut stream = match current.take() {
                Some(stream) => stream,
                None => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.reconnect_max_interval);
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::Retry,
                        reconnect_in = ?delay,
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.metrics.source_reconnects.inc();
                    match self.source.connect(&self.filter).await {
                        Ok(stream) => {
                            tracing::info!("Reconnected to the attestation source");
                            tracing::event!(
                                target: probe::TARGET,
                                tracing::Level::DEBUG,
                                kind = %probe::Kind::Source,
                                connected = true,
                            );
                            stream
                        }
                        Err(e) => {
                            tracing::warn!(%e, "Failed to reconnect");
                            continue;
                        }
                    }
                }
            };

            loop {
                let next = tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("Attestation watcher shutting down");
                        return Ok(());
                    }
                    next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
                };
                match next {
                    Ok(Some(Ok(raw))) => {
                        backoff.reset();
                        self.ingest(raw).await;
                    }
                    Ok(Some(Err(SourceError::Undecodable(reason)))) => {
                        self.metrics.attestations_received.inc();
                        self.metrics.decode_failures.inc();
                        tracing::warn!(%reason, "Dropping undecodable frame");
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!(%e, "Attestation stream broke");
                        break;
                    }
                    Ok(None) => {
                        tracing::warn!("Attestation stream ended");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout = ?self.read_timeout,
                            "No attestation received in time"
                        );
                        break;
                    }
                }
            }
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Source,
                connected = false,
            );
        }
    }

    /// Decodes, classifies and records one raw attestation.
    pub async fn ingest(&self, raw: Vec<u8>) -> Ingested {
        self.metrics.attestations_received.inc();
        let envelope = match self.decode(raw).await {
            Ok(envelope) => envelope,
            Err(reason) => {
                self.metrics.decode_failures.inc();
                tracing::warn!(%reason, "Dropping attestation");
                return Ingested::Rejected;
            }
        };
        let key = envelope.key();
        let relevant = self.filter.matches(&envelope)
            && self.classifier.classify(&envelope);
        let destination = if relevant {
            self.registry.route(&envelope)
        } else {
            None
        };

        let backoff = ConstantWithMaxRetryCount::new(
            Duration::from_millis(100),
            MAX_STORE_RETRIES,
        );
        let task = || async {
            let mut outcome = Ingested::Duplicate;
            self.store
                .upsert(key, |entry| {
                    if !entry.is_new() {
                        if !entry.status.is_terminal() {
                            entry.touch();
                        }
                        outcome = Ingested::Duplicate;
                        return Ok(());
                    }
                    entry.payload = envelope.raw.clone();
                    if relevant {
                        entry.destination = destination.clone();
                        entry.transition(MessageStatus::Queued)?;
                        outcome = Ingested::Queued;
                    } else {
                        entry.transition(MessageStatus::Filtered)?;
                        outcome = Ingested::Filtered;
                    }
                    Ok(())
                })
                .map_err(|e| match e {
                    Error::StoreUnavailable(_) => backoff::Error::transient(e),
                    e => backoff::Error::permanent(e),
                })?;
            Ok::<_, backoff::Error<Error>>(outcome)
        };
        let outcome = match backoff::future::retry(backoff, task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%key, %e, "Failed to record attestation");
                return Ingested::Rejected;
            }
        };

        match outcome {
            Ingested::Queued => {
                if destination.is_none() {
                    tracing::warn!(%key, "No destination routes this emitter");
                }
                self.work_available.notify_one();
            }
            Ingested::Filtered => self.metrics.attestations_filtered.inc(),
            _ => {}
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Ingest,
            %key,
            outcome = ?outcome,
            destination = ?destination,
        );
        outcome
    }

    async fn decode(&self, raw: Vec<u8>) -> Result<Envelope, String> {
        let decoder = self.decoder.clone();
        let task = tokio::task::spawn_blocking(move || decoder.decode(&raw));
        match tokio::time::timeout(self.decode_timeout, task).await {
            Ok(Ok(Ok(envelope))) => Ok(envelope),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(format!("decoder task failed: {e}")),
            Err(_) => Err("decoding timed out".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use attestation_envelope_decoder::SignedVaa;
    use attestation_relayer_store::InMemoryStore;
    use attestation_relayer_types::{ChainId, EmitterAddress, MessageKey};
    use parking_lot::Mutex;

    use super::*;

    /// Hands out one scripted session per `connect`.
    struct ScriptedSource {
        sessions: Mutex<VecDeque<Vec<Result<Vec<u8>, SourceError>>>>,
    }

    impl ScriptedSource {
        fn new(
            sessions: Vec<Vec<Result<Vec<u8>, SourceError>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl AttestationSource for ScriptedSource {
        async fn connect(
            &self,
            _: &EmitterFilter,
        ) -> Result<AttestationStream, SourceError> {
            let session = self.sessions.lock().pop_front().ok_or_else(|| {
                SourceError::Unavailable("no more sessions".into())
            })?;
            // the last session stays open.
            let open = self.sessions.lock().is_empty();
            let items = futures::stream::iter(session);
            if open {
                Ok(items.chain(futures::stream::pending()).boxed())
            } else {
                Ok(items.boxed())
            }
        }
    }

    fn vaa(chain: u16, emitter: u8, sequence: u64, payload: &[u8]) -> Vec<u8> {
        SignedVaa::builder()
            .emitter_chain(chain)
            .emitter_address([emitter; 32])
            .sequence(sequence)
            .payload(payload.to_vec())
            .build()
            .to_bytes()
    }

    fn key(chain: u16, emitter: u8, sequence: u64) -> MessageKey {
        MessageKey::new(ChainId(chain), EmitterAddress([emitter; 32]), sequence)
    }

    struct Harness {
        store: InMemoryStore,
        metrics: Arc<Metrics>,
        notify: Arc<Notify>,
    }

    fn harness() -> Harness {
        Harness {
            store: InMemoryStore::default(),
            metrics: Arc::new(Metrics::new("watcher_test").unwrap()),
            notify: Arc::new(Notify::new()),
        }
    }

    fn watcher(
        h: &Harness,
        source: Arc<dyn AttestationSource>,
    ) -> AttestationWatcher<InMemoryStore> {
        AttestationWatcher::builder()
            .store(h.store.clone())
            .source(source)
            .filter(EmitterFilter::new([(ChainId(2), EmitterAddress([7; 32]))]))
            .classifier(Arc::new(PayloadPrefixClassifier::new(*b"P2WH")))
            .registry(AdapterRegistry::new())
            .metrics(h.metrics.clone())
            .work_available(h.notify.clone())
            .reconnect_max_interval(Duration::from_millis(50))
            .build()
    }

    #[tokio::test]
    async fn queues_matching_and_records_filtered() {
        let h = harness();
        let w = watcher(&h, ScriptedSource::new(vec![]));

        assert_eq!(w.ingest(vaa(2, 7, 1, b"P2WH-a")).await, Ingested::Queued);
        let entry = h.store.get(&key(2, 7, 1)).unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Queued);
        assert_eq!(entry.payload, vaa(2, 7, 1, b"P2WH-a"));
        tokio::time::timeout(Duration::from_secs(1), h.notify.notified())
            .await
            .expect("dispatcher should be woken up");

        // wrong emitter, and wrong payload kind.
        assert_eq!(w.ingest(vaa(2, 8, 1, b"P2WH-a")).await, Ingested::Filtered);
        assert_eq!(w.ingest(vaa(2, 7, 2, b"other")).await, Ingested::Filtered);
        assert_eq!(
            h.store.get(&key(2, 8, 1)).unwrap().unwrap().status,
            MessageStatus::Filtered
        );
        assert_eq!(h.metrics.attestations_received.get(), 3);
        assert_eq!(h.metrics.attestations_filtered.get(), 2);
    }

    #[tokio::test]
    async fn duplicates_do_not_change_state_or_renotify() {
        let h = harness();
        let w = watcher(&h, ScriptedSource::new(vec![]));
        let raw = vaa(2, 7, 5, b"P2WH");
        assert_eq!(w.ingest(raw.clone()).await, Ingested::Queued);
        h.notify.notified().await;

        // simulate the dispatcher having claimed it.
        h.store
            .upsert(key(2, 7, 5), |e| e.begin_attempt())
            .unwrap();
        for _ in 0..3 {
            assert_eq!(w.ingest(raw.clone()).await, Ingested::Duplicate);
        }
        let entry = h.store.get(&key(2, 7, 5)).unwrap().unwrap();
        assert_eq!(entry.status, MessageStatus::Dispatching);
        assert_eq!(entry.attempts, 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), h.notify.notified())
                .await
                .is_err()
        );
        assert_eq!(h.store.len().unwrap(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn undecodable_input_is_dropped() {
        let h = harness();
        let w = watcher(&h, ScriptedSource::new(vec![]));
        let mut raw = vaa(2, 7, 1, b"P2WH");
        raw[0] = 9;
        assert_eq!(w.ingest(raw).await, Ingested::Rejected);
        assert_eq!(w.ingest(vec![1, 2]).await, Ingested::Rejected);
        assert_eq!(h.metrics.decode_failures.get(), 2);
        assert!(h.store.is_empty().unwrap());
        assert!(logs_contain("Dropping attestation"));
    }

    #[tokio::test]
    async fn reconnects_after_the_stream_ends() {
        let h = harness();
        let source = ScriptedSource::new(vec![
            vec![
                Ok(vaa(2, 7, 1, b"P2WH")),
                Err(SourceError::Undecodable("garbage".into())),
            ],
            vec![Err(SourceError::Unavailable("reset".into()))],
            vec![Ok(vaa(2, 7, 2, b"P2WH")), Ok(vaa(2, 7, 1, b"P2WH"))],
        ]);
        let w = watcher(&h, source);
        let first = w.connect_at_boot().await.unwrap();
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(w.run(first, Shutdown::new(rx)));

        let store = h.store.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while store.get(&key(2, 7, 2)).unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second session should be consumed");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(h.metrics.source_reconnects.get(), 2);
        assert_eq!(h.metrics.decode_failures.get(), 1);
        assert_eq!(h.store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn failing_first_connect_is_an_error() {
        let h = harness();
        let w = watcher(&h, ScriptedSource::new(vec![]));
        assert!(matches!(
            w.connect_at_boot().await,
            Err(Error::SourceUnavailable(_))
        ));
    }
}
