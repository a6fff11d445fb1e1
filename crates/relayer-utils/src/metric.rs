// Copyright (C) 2022-2024 Webb Technologies Inc.
//
// Tangle is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Tangle is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should receive a copy of the GNU General Public License
// If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::{
    histogram_opts, labels, opts, Encoder, Gauge, Histogram, IntCounter,
    IntGauge, Registry, TextEncoder,
};

/// Buckets of the dispatch latency histogram, in seconds.
pub const DISPATCH_LATENCY_BUCKETS: &[f64] =
    &[0.2, 0.4, 0.6, 0.8, 1.0, 2.0, 5.0, 10.0];

/// A struct definition for collecting metrics in the relayer.
///
/// Every metric is registered in a registry owned by this instance, so two
/// relayers (or two tests) in the same process never share counters.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    /// Highest sequence number successfully dispatched so far.
    pub last_dispatched_sequence: IntGauge,
    /// Messages that reached `Succeeded`.
    pub relay_successes: IntCounter,
    /// Messages that reached `FailedPermanent`.
    pub relay_failures: IntCounter,
    /// Retryable dispatch failures that were rescheduled.
    pub relay_retries: IntCounter,
    /// Raw attestations read from the source.
    pub attestations_received: IntCounter,
    /// Attestations recorded as filtered.
    pub attestations_filtered: IntCounter,
    /// Raw attestations that could not be decoded.
    pub decode_failures: IntCounter,
    /// How many times the attestation source was reconnected.
    pub source_reconnects: IntCounter,
    /// Failed store writes of a dispatch outcome that had to be retried.
    pub outcome_write_retries: IntCounter,
    /// Time from claiming a message to a terminal or retry outcome.
    pub dispatch_latency: Histogram,
    /// Number of entries in the relay store.
    pub store_entries: IntGauge,
    /// Total amount of data stored metric
    pub total_amount_of_data_stored: IntGauge,
    highest_sequence: Mutex<Option<u64>>,
    account_balance: Mutex<HashMap<String, Gauge>>,
}

impl Metrics {
    /// Instantiates the various metrics and registers them in a fresh registry
    /// where every sample carries the `app` label.
    pub fn new(app: &str) -> Result<Self, prometheus::Error> {
        let registry =
            Registry::new_custom(None, Some(labels! { "app".to_string() => app.to_string() }))?;

        let last_dispatched_sequence = register(
            &registry,
            IntGauge::with_opts(opts!(
                "last_dispatched_sequence",
                "Last sequence number successfully dispatched"
            ))?,
        )?;
        let relay_successes = register(
            &registry,
            IntCounter::with_opts(opts!(
                "relay_successes",
                "Number of messages successfully delivered"
            ))?,
        )?;
        let relay_failures = register(
            &registry,
            IntCounter::with_opts(opts!(
                "relay_failures",
                "Number of messages that failed permanently"
            ))?,
        )?;
        let relay_retries = register(
            &registry,
            IntCounter::with_opts(opts!(
                "relay_retries",
                "Number of dispatch attempts rescheduled after a retryable error"
            ))?,
        )?;
        let attestations_received = register(
            &registry,
            IntCounter::with_opts(opts!(
                "attestations_received",
                "Number of raw attestations read from the source"
            ))?,
        )?;
        let attestations_filtered = register(
            &registry,
            IntCounter::with_opts(opts!(
                "attestations_filtered",
                "Number of attestations that did not match the filters"
            ))?,
        )?;
        let decode_failures = register(
            &registry,
            IntCounter::with_opts(opts!(
                "decode_failures",
                "Number of attestations dropped because they failed to decode"
            ))?,
        )?;
        let source_reconnects = register(
            &registry,
            IntCounter::with_opts(opts!(
                "source_reconnects",
                "How many times the attestation source was reconnected"
            ))?,
        )?;
        let outcome_write_retries = register(
            &registry,
            IntCounter::with_opts(opts!(
                "outcome_write_retries",
                "Number of failed store writes of a dispatch outcome"
            ))?,
        )?;
        let dispatch_latency = register(
            &registry,
            Histogram::with_opts(histogram_opts!(
                "dispatch_latency_seconds",
                "Time spent on a single dispatch attempt",
                DISPATCH_LATENCY_BUCKETS.to_vec()
            ))?,
        )?;
        let store_entries = register(
            &registry,
            IntGauge::with_opts(opts!(
                "store_entries",
                "Number of messages tracked by the relay store"
            ))?,
        )?;
        let total_amount_of_data_stored = register(
            &registry,
            IntGauge::with_opts(opts!(
                "total_amount_of_data_stored",
                "The Total number of bytes stored on disk"
            ))?,
        )?;

        Ok(Self {
            registry,
            last_dispatched_sequence,
            relay_successes,
            relay_failures,
            relay_retries,
            attestations_received,
            attestations_filtered,
            decode_failures,
            source_reconnects,
            outcome_write_retries,
            dispatch_latency,
            store_entries,
            total_amount_of_data_stored,
            highest_sequence: Mutex::new(None),
            account_balance: Default::default(),
        })
    }

    /// Records a successfully dispatched sequence. The gauge only moves forward.
    pub fn observe_dispatched_sequence(&self, sequence: u64) {
        let mut highest = self.highest_sequence.lock();
        if highest.map_or(true, |h| sequence > h) {
            *highest = Some(sequence);
            self.last_dispatched_sequence
                .set(i64::try_from(sequence).unwrap_or(i64::MAX));
        }
    }

    /// Sets the last known balance of a destination account.
    pub fn set_account_balance(
        &self,
        destination: &str,
        balance: f64,
    ) -> Result<(), prometheus::Error> {
        let mut balances = self.account_balance.lock();
        if let Some(gauge) = balances.get(destination) {
            gauge.set(balance);
            return Ok(());
        }
        let gauge = register(
            &self.registry,
            Gauge::with_opts(opts!(
                "destination_account_balance",
                "Balance of the relayer account on the destination",
                labels! { "destination" => destination }
            ))?,
        )?;
        gauge.set(balance);
        balances.insert(destination.to_string(), gauge);
        Ok(())
    }

    /// Gathers the whole relayer metrics in the text exposition format.
    pub fn gather_metrics(&self) -> Result<String, GatherMetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, prometheus::Error>
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

#[derive(Debug, thiserror::Error)]
pub enum GatherMetricsError {
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_gauge_is_monotonic() {
        let metrics = Metrics::new("test").unwrap();
        metrics.observe_dispatched_sequence(7);
        metrics.observe_dispatched_sequence(3);
        assert_eq!(metrics.last_dispatched_sequence.get(), 7);
        metrics.observe_dispatched_sequence(9);
        assert_eq!(metrics.last_dispatched_sequence.get(), 9);
    }

    #[test]
    fn two_instances_do_not_collide() {
        let a = Metrics::new("a").unwrap();
        let b = Metrics::new("b").unwrap();
        a.relay_successes.inc();
        assert_eq!(a.relay_successes.get(), 1);
        assert_eq!(b.relay_successes.get(), 0);
    }

    #[test]
    fn exposition_carries_app_label() {
        let metrics = Metrics::new("pyth_relay").unwrap();
        metrics.relay_failures.inc();
        metrics.set_account_balance("terra", 12.5).unwrap();
        metrics.set_account_balance("terra", 10.0).unwrap();
        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("relay_failures{app=\"pyth_relay\"} 1"));
        assert!(text.contains("dispatch_latency_seconds_bucket"));
        assert!(text.contains(
            "destination_account_balance{app=\"pyth_relay\",destination=\"terra\"} 10"
        ));
    }
}
