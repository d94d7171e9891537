//! Inbound samples and label parsing
//!
//! A [`Sample`] arrives from the ingestion protocol with its labels still in
//! `key=value` form. [`parse_labels`] turns them into [`Label`] pairs and
//! rejects anything that could corrupt column derivation, so everything
//! downstream can assume well-formed identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Reserved label key carrying the metric name itself.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// One observation of a named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Metric name, also the physical table name
    #[serde(alias = "name")]
    pub metric_name: String,
    /// Labels in `key=value` form, in any order
    #[serde(default)]
    pub labels: Vec<String>,
    /// Sample value
    pub value: f64,
    /// Event time
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        metric_name: impl Into<String>,
        labels: impl IntoIterator<Item = impl Into<String>>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            labels: labels.into_iter().map(Into::into).collect(),
            value,
            timestamp,
        }
    }

    /// Validate the metric name and parse the label set.
    pub fn parse(&self) -> std::result::Result<Vec<Label>, ValidationError> {
        validate_metric_name(&self.metric_name)?;
        parse_labels(&self.labels)
    }
}

/// A parsed label pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether this label is the reserved metric-name label (any casing).
    pub fn is_reserved(&self) -> bool {
        is_reserved_key(&self.key)
    }
}

pub fn is_reserved_key(key: &str) -> bool {
    key.eq_ignore_ascii_case(METRIC_NAME_LABEL)
}

/// Reasons a sample is rejected before it reaches normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyMetricName,
    InvalidMetricName(String),
    /// Label does not decompose into `key=value`
    MalformedLabel(String),
    InvalidLabelName(String),
    DuplicateLabel(String),
    /// Metric name is, or would own, another metric's routing view
    ViewNameCollision(String),
    /// Label keys differ from the column set already established for the metric
    SchemaDrift {
        metric: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyMetricName => write!(f, "metric name is empty"),
            ValidationError::InvalidMetricName(name) => {
                write!(f, "invalid metric name '{}'", name)
            }
            ValidationError::MalformedLabel(raw) => {
                write!(f, "label '{}' is not of the form key=value", raw)
            }
            ValidationError::InvalidLabelName(key) => write!(f, "invalid label name '{}'", key),
            ValidationError::DuplicateLabel(key) => write!(f, "duplicate label '{}'", key),
            ValidationError::ViewNameCollision(name) => {
                write!(f, "metric name '{}' collides with a routing view", name)
            }
            ValidationError::SchemaDrift {
                metric,
                expected,
                actual,
            } => write!(
                f,
                "label keys {:?} do not match established columns {:?} of metric {}",
                actual, expected, metric
            ),
        }
    }
}

/// Metric names follow the Prometheus grammar `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn validate_metric_name(name: &str) -> std::result::Result<(), ValidationError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ValidationError::EmptyMetricName);
    };
    let valid = (first.is_ascii_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if !valid {
        return Err(ValidationError::InvalidMetricName(name.to_string()));
    }
    Ok(())
}

/// Label names follow `[a-zA-Z_][a-zA-Z0-9_]*`.
fn validate_label_name(key: &str) -> std::result::Result<(), ValidationError> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(ValidationError::InvalidLabelName(key.to_string()));
    }
    Ok(())
}

/// Parse `key=value` strings into labels.
///
/// The split happens at the first `=`, so values may contain `=`. The
/// reserved `__name__` label is kept in the output (in any casing) and left
/// for the normalizer to drop.
pub fn parse_labels(raw: &[String]) -> std::result::Result<Vec<Label>, ValidationError> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut labels = Vec::with_capacity(raw.len());

    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ValidationError::MalformedLabel(entry.clone()));
        };
        if key.is_empty() {
            return Err(ValidationError::MalformedLabel(entry.clone()));
        }
        if !is_reserved_key(key) {
            validate_label_name(key)?;
            if !seen.insert(key) {
                return Err(ValidationError::DuplicateLabel(key.to_string()));
            }
        }
        labels.push(Label::new(key, value));
    }

    Ok(labels)
}
