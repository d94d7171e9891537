//! Label set normalization
//!
//! Every place that needs the column order of a metric goes through
//! [`LabelNormalizer::normalize`]. Table DDL, the insert template and row
//! binding all read the same [`NormalizedSchema`], so positional arguments
//! line up with declared columns.

use crate::sample::{Label, ValidationError};
use std::collections::HashMap;

/// Prefix applied to label keys to form storage column names.
pub const DEFAULT_COLUMN_PREFIX: &str = "col_";

/// Storage columns that label columns must never collide with.
pub const DATE_COLUMN: &str = "date";
pub const VALUE_COLUMN: &str = "val";
pub const TIMESTAMP_COLUMN: &str = "ts";
pub const UPDATED_COLUMN: &str = "updated";
pub const RESERVED_COLUMNS: [&str; 4] = [DATE_COLUMN, VALUE_COLUMN, TIMESTAMP_COLUMN, UPDATED_COLUMN];

/// One label-derived column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelColumn {
    /// Original label key
    pub key: String,
    /// Storage column name (prefix + key)
    pub name: String,
}

/// Deterministic, metric-specific ordered column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSchema {
    pub metric_name: String,
    /// Label columns; sorted byte-wise by key when derived from a label set,
    /// declared order when recovered from an existing table
    pub columns: Vec<LabelColumn>,
}

impl NormalizedSchema {
    /// Storage column names in normalized order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Label keys in normalized order.
    pub fn label_keys(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.key.as_str()).collect()
    }

    /// Label values of a sample in column order.
    ///
    /// Columns keep whatever order the schema declares, which for tables
    /// recovered from the catalog need not be sorted. Fails with
    /// [`ValidationError::SchemaDrift`] unless the sample's label keys
    /// (reserved key excluded) are exactly this schema's keys.
    pub fn bind_labels<'a>(
        &self,
        labels: &'a [Label],
    ) -> std::result::Result<Vec<&'a str>, ValidationError> {
        let present: HashMap<&str, &'a str> = labels
            .iter()
            .filter(|l| !l.is_reserved())
            .map(|l| (l.key.as_str(), l.value.as_str()))
            .collect();

        let values: Option<Vec<&'a str>> = if present.len() == self.columns.len() {
            self.columns
                .iter()
                .map(|c| present.get(c.key.as_str()).copied())
                .collect()
        } else {
            None
        };

        values.ok_or_else(|| {
            let mut actual: Vec<String> = present.keys().map(|k| k.to_string()).collect();
            actual.sort();
            ValidationError::SchemaDrift {
                metric: self.metric_name.clone(),
                expected: self.columns.iter().map(|c| c.key.clone()).collect(),
                actual,
            }
        })
    }
}

/// Maps label sets to normalized schemas.
#[derive(Debug, Clone)]
pub struct LabelNormalizer {
    prefix: String,
}

impl LabelNormalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Storage column name for a label key.
    pub fn column_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Label key for a storage column, if the column is label-derived.
    pub fn label_key<'a>(&self, column: &'a str) -> Option<&'a str> {
        column.strip_prefix(self.prefix.as_str())
    }

    /// Derive the column list for a metric from one of its label sets.
    pub fn normalize(&self, metric_name: &str, labels: &[Label]) -> NormalizedSchema {
        let mut keys: Vec<&str> = labels
            .iter()
            .filter(|l| !l.is_reserved())
            .map(|l| l.key.as_str())
            .collect();
        keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        keys.dedup();

        NormalizedSchema {
            metric_name: metric_name.to_string(),
            columns: keys
                .into_iter()
                .map(|key| LabelColumn {
                    key: key.to_string(),
                    name: self.column_name(key),
                })
                .collect(),
        }
    }

    /// Rebuild a schema from a table's declared columns, keeping their order.
    pub fn from_columns<'a>(
        &self,
        metric_name: &str,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> NormalizedSchema {
        NormalizedSchema {
            metric_name: metric_name.to_string(),
            columns: columns
                .into_iter()
                .filter(|c| !RESERVED_COLUMNS.contains(c))
                .filter_map(|c| {
                    self.label_key(c).map(|key| LabelColumn {
                        key: key.to_string(),
                        name: c.to_string(),
                    })
                })
                .collect(),
        }
    }
}

impl Default for LabelNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COLUMN_PREFIX)
    }
}
