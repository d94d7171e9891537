//! Batch dispatcher
//!
//! The dispatcher is the single consumer of the inbound sample queue. Each
//! flush cycle it:
//! - Collects up to `batch_size` samples (or whatever arrived before the
//!   batch timeout or the queue closing)
//! - Groups them by metric name, keeping arrival order
//! - Creates the metric's table and routing view on first sight
//! - Inserts each group in its own transaction and records the outcome
//!
//! Failures never stop the dispatcher. Rows, groups and schemas that fail
//! are counted and dropped; only the queue closing ends the run.

mod batch;
pub mod telemetry;

pub use batch::{collect, Batch, Collected, MetricGroup};
pub use telemetry::{DispatchStats, StatsSnapshot};

use crate::sample::{Label, Sample};
use crate::schema::{
    bind_row, LabelNormalizer, SchemaConfig, SchemaGenerator, SchemaRegistry, StatementBuilder,
};
use crate::store::{Statement, Store, StoreError, Value};
use crate::{Error, Result};

use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum samples per flush cycle
    pub batch_size: usize,
    /// Maximum time a cycle waits for more samples after the first one
    pub batch_timeout: Duration,
    /// Metric groups processed concurrently within a cycle
    pub group_parallelism: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            batch_timeout: Duration::from_secs(1),
            group_parallelism: 1,
        }
    }
}

/// Outcome of one metric group within a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub accepted: u64,
    pub failed: u64,
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub groups: usize,
    pub accepted: u64,
    pub failed: u64,
}

/// Consumes samples and commits them per metric.
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn Store>,
    registry: Arc<SchemaRegistry>,
    normalizer: LabelNormalizer,
    generator: SchemaGenerator,
    builder: StatementBuilder,
    /// Insert templates by metric name
    templates: DashMap<String, Arc<Statement>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        config: DispatcherConfig,
        schema: &SchemaConfig,
        store: Arc<dyn Store>,
        registry: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            normalizer: schema.normalizer(),
            generator: SchemaGenerator::new(schema),
            builder: StatementBuilder::new(schema.database.clone()),
            templates: DashMap::new(),
            stats: Arc::new(DispatchStats::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Run the dispatcher on its own task.
    pub fn spawn(self, rx: mpsc::Receiver<Sample>) -> DispatcherHandle {
        let stats = self.stats.clone();
        let join = tokio::spawn(async move { self.run(rx).await });
        DispatcherHandle { join, stats }
    }

    /// Drain `rx` cycle by cycle until it is closed and empty.
    pub async fn run(&self, mut rx: mpsc::Receiver<Sample>) {
        info!(
            batch_size = self.config.batch_size,
            group_parallelism = self.config.group_parallelism,
            "Dispatcher starting"
        );

        let batch_size = self.config.batch_size.max(1);
        while let Some(Collected { batch, closed }) =
            collect(&mut rx, batch_size, self.config.batch_timeout).await
        {
            self.flush(batch).await;
            if closed {
                break;
            }
        }

        let stats = self.stats.snapshot();
        info!(
            accepted = stats.accepted,
            failed = stats.failed,
            cycles = stats.cycles,
            "Dispatcher stopped"
        );
    }

    /// Process one collected batch.
    pub async fn flush(&self, batch: Batch) -> CycleReport {
        if batch.is_empty() {
            return CycleReport::default();
        }

        let started = Instant::now();
        let samples = batch.len();
        let groups = batch.into_groups();
        let group_count = groups.len();

        let reports: Vec<GroupReport> = futures::stream::iter(groups)
            .map(|group| self.process_group(group, started))
            .buffered(self.config.group_parallelism.max(1))
            .collect()
            .await;

        let report = reports.iter().fold(
            CycleReport {
                groups: group_count,
                ..Default::default()
            },
            |mut acc, r| {
                acc.accepted += r.accepted;
                acc.failed += r.failed;
                acc
            },
        );
        self.stats.record_cycle();
        debug!(
            samples,
            groups = report.groups,
            accepted = report.accepted,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flush cycle complete"
        );
        report
    }

    fn fail(&self, report: &mut GroupReport, samples: u64, reason: &'static str) {
        report.failed += samples;
        self.stats.record_failed(samples, reason);
    }

    async fn process_group(&self, group: MetricGroup, started: Instant) -> GroupReport {
        let mut report = GroupReport::default();
        let metric = group.metric_name;

        let mut parsed: Vec<(Sample, Vec<Label>)> = Vec::with_capacity(group.samples.len());
        for sample in group.samples {
            match sample.parse() {
                Ok(labels) => parsed.push((sample, labels)),
                Err(e) => {
                    warn!(metric = %metric, error = %e, "Rejected sample");
                    self.fail(&mut report, 1, "validation");
                }
            }
        }
        let Some((_, first_labels)) = parsed.first() else {
            return report;
        };

        let candidate = self.normalizer.normalize(&metric, first_labels);
        let schema = match self
            .generator
            .ensure(self.store.as_ref(), &self.registry, candidate)
            .await
        {
            Ok(outcome) => {
                if outcome.created() {
                    self.stats.record_schema_creation("created");
                }
                outcome.schema().clone()
            }
            Err(e) => {
                error!(metric = %metric, error = %e, "Skipping group: schema unavailable");
                let outcome = match &e {
                    Error::Validation(_) => "rejected",
                    _ => "failed",
                };
                self.stats.record_schema_creation(outcome);
                self.stats.record_group_failed();
                self.fail(&mut report, parsed.len() as u64, e.reason());
                return report;
            }
        };

        let template = self
            .templates
            .entry(metric.clone())
            .or_insert_with(|| Arc::new(self.builder.build_insert(&schema)))
            .clone();

        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(parsed.len());
        for (sample, labels) in &parsed {
            match bind_row(&schema, sample, labels) {
                Ok(args) => rows.push(args),
                Err(e) => {
                    warn!(metric = %metric, error = %e, "Rejected sample");
                    self.fail(&mut report, 1, "validation");
                }
            }
        }
        if rows.is_empty() {
            return report;
        }

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(source) => {
                let e = transaction_error(&metric, source);
                error!(metric = %metric, error = %e, "Begin transaction failed");
                self.stats.record_group_failed();
                self.fail(&mut report, rows.len() as u64, e.reason());
                return report;
            }
        };

        let mut executed = 0u64;
        for args in &rows {
            match tx.execute(&template, args).await {
                Ok(()) => executed += 1,
                Err(source) => {
                    let e = Error::InsertExecution {
                        metric: metric.clone(),
                        source,
                    };
                    warn!(error = %e, sql = %template.text, "Row dropped");
                    self.fail(&mut report, 1, e.reason());
                }
            }
        }

        if executed == 0 {
            if let Err(e) = tx.rollback().await {
                debug!(metric = %metric, error = %e, "Rollback failed");
            }
            self.stats.record_group_failed();
            return report;
        }

        match tx.commit().await {
            Ok(()) => {
                report.accepted += executed;
                self.stats.record_accepted(executed);
                self.stats
                    .record_group_committed(started.elapsed().as_secs_f64());
            }
            Err(source) => {
                let e = transaction_error(&metric, source);
                error!(rows = executed, error = %e, "Group lost");
                self.stats.record_group_failed();
                self.fail(&mut report, executed, e.reason());
            }
        }
        report
    }
}

/// Begin and commit failures; only an unreachable store counts as a connection error.
fn transaction_error(metric: &str, source: StoreError) -> Error {
    match source {
        StoreError::Connection(_) => Error::Connection(source),
        source => Error::Commit {
            metric: metric.to_string(),
            source,
        },
    }
}

/// Handle to a spawned dispatcher.
pub struct DispatcherHandle {
    join: JoinHandle<()>,
    stats: Arc<DispatchStats>,
}

impl DispatcherHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait until the queue is closed and fully drained.
    pub async fn wait(self) -> Result<StatsSnapshot> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("dispatcher task failed: {e}")))?;
        Ok(self.stats.snapshot())
    }
}
