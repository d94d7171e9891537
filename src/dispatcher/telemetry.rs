//! Dispatcher telemetry instruments and outcome counters.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

struct DispatcherInstruments {
    accepted_samples: Counter<u64>,
    failed_samples: Counter<u64>,
    batch_send_duration_seconds: Histogram<f64>,
    schema_creations: Counter<u64>,
}

fn instruments() -> &'static DispatcherInstruments {
    static INSTRUMENTS: OnceLock<DispatcherInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("labelhouse.writer");
        DispatcherInstruments {
            accepted_samples: meter
                .u64_counter("accepted_samples_total")
                .with_description("Total number of samples committed to the store")
                .init(),
            failed_samples: meter
                .u64_counter("failed_samples_total")
                .with_description("Total number of samples dropped, by failure reason")
                .init(),
            batch_send_duration_seconds: meter
                .f64_histogram("batch_send_duration_seconds")
                .with_description("Time from cycle start to group commit")
                .with_unit("s")
                .init(),
            schema_creations: meter
                .u64_counter("schema_creations_total")
                .with_description("Metric table creation attempts by outcome")
                .init(),
        }
    })
}

/// Process-local view of the dispatcher's outcomes.
///
/// Every update is also forwarded to the OpenTelemetry instruments.
#[derive(Debug, Default)]
pub struct DispatchStats {
    accepted: AtomicU64,
    failed: AtomicU64,
    cycles: AtomicU64,
    groups_committed: AtomicU64,
    groups_failed: AtomicU64,
    schemas_created: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub failed: u64,
    pub cycles: u64,
    pub groups_committed: u64,
    pub groups_failed: u64,
    pub schemas_created: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self, samples: u64) {
        if samples == 0 {
            return;
        }
        self.accepted.fetch_add(samples, Ordering::Relaxed);
        instruments().accepted_samples.add(samples, &[]);
    }

    pub(crate) fn record_failed(&self, samples: u64, reason: &'static str) {
        if samples == 0 {
            return;
        }
        self.failed.fetch_add(samples, Ordering::Relaxed);
        instruments()
            .failed_samples
            .add(samples, &[KeyValue::new("reason", reason)]);
    }

    pub(crate) fn record_group_committed(&self, duration_seconds: f64) {
        self.groups_committed.fetch_add(1, Ordering::Relaxed);
        instruments()
            .batch_send_duration_seconds
            .record(duration_seconds, &[]);
    }

    pub(crate) fn record_group_failed(&self) {
        self.groups_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_schema_creation(&self, outcome: &'static str) {
        if outcome == "created" {
            self.schemas_created.fetch_add(1, Ordering::Relaxed);
        }
        instruments()
            .schema_creations
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            groups_committed: self.groups_committed.load(Ordering::Relaxed),
            groups_failed: self.groups_failed.load(Ordering::Relaxed),
            schemas_created: self.schemas_created.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = DispatchStats::new();
        stats.record_accepted(3);
        stats.record_accepted(0);
        stats.record_failed(2, "insert");
        stats.record_group_committed(0.01);
        stats.record_group_failed();
        stats.record_schema_creation("created");
        stats.record_schema_creation("failed");
        stats.record_cycle();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                accepted: 3,
                failed: 2,
                cycles: 1,
                groups_committed: 1,
                groups_failed: 1,
                schemas_created: 1,
            }
        );
    }
}
