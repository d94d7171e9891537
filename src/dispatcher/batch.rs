//! Per-cycle batching of inbound samples

use crate::sample::Sample;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Samples of one metric, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricGroup {
    pub metric_name: String,
    pub samples: Vec<Sample>,
}

/// Samples collected in one flush cycle, partitioned by metric name.
///
/// Groups keep the order in which their metric first arrived; samples keep
/// arrival order within their group.
#[derive(Debug, Default)]
pub struct Batch {
    groups: Vec<MetricGroup>,
    index: HashMap<String, usize>,
    len: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.len += 1;
        match self.index.get(&sample.metric_name) {
            Some(&i) => self.groups[i].samples.push(sample),
            None => {
                self.index
                    .insert(sample.metric_name.clone(), self.groups.len());
                self.groups.push(MetricGroup {
                    metric_name: sample.metric_name.clone(),
                    samples: vec![sample],
                });
            }
        }
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn into_groups(self) -> Vec<MetricGroup> {
        self.groups
    }
}

impl FromIterator<Sample> for Batch {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        let mut batch = Batch::new();
        for sample in iter {
            batch.push(sample);
        }
        batch
    }
}

/// Outcome of collecting one batch.
#[derive(Debug)]
pub struct Collected {
    pub batch: Batch,
    /// The channel was closed while collecting
    pub closed: bool,
}

/// Wait for a sample, then keep reading until `max_samples` are collected,
/// the channel closes, or `timeout` passes since the first sample.
///
/// Returns `None` once the channel is closed and drained.
pub async fn collect(
    rx: &mut mpsc::Receiver<Sample>,
    max_samples: usize,
    timeout: Duration,
) -> Option<Collected> {
    let first = rx.recv().await?;
    let mut batch = Batch::new();
    batch.push(first);

    let deadline = Instant::now() + timeout;
    let mut closed = false;
    while batch.len() < max_samples {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(sample)) => batch.push(sample),
            Ok(None) => {
                closed = true;
                break;
            }
            Err(_) => break,
        }
    }

    Some(Collected { batch, closed })
}
