//! Insert templates and row binding

use super::ddl::{quote_ident, view_name};
use super::normalizer::{NormalizedSchema, DATE_COLUMN, TIMESTAMP_COLUMN, VALUE_COLUMN};
use crate::sample::{Label, Sample, ValidationError};
use crate::store::{Statement, StatementKind, Value};

/// Builds parameterized inserts targeting a metric's routing view.
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    database: String,
}

impl StatementBuilder {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }

    /// Insert template with parameters `[date, label columns..., val, ts]`.
    pub fn build_insert(&self, schema: &NormalizedSchema) -> Statement {
        let mut columns = Vec::with_capacity(schema.columns.len() + 3);
        columns.push(DATE_COLUMN.to_string());
        columns.extend(schema.columns.iter().map(|c| c.name.clone()));
        columns.push(VALUE_COLUMN.to_string());
        columns.push(TIMESTAMP_COLUMN.to_string());

        let placeholders = vec!["?"; columns.len()].join(", ");
        let target = view_name(&schema.metric_name);
        let text = format!(
            "INSERT INTO {}.{} ({}) VALUES ({})",
            self.database,
            quote_ident(&target),
            columns.join(", "),
            placeholders
        );

        Statement {
            kind: StatementKind::Insert,
            database: self.database.clone(),
            target,
            text,
            columns,
        }
    }
}

/// Arguments for one sample, in the template's parameter order.
///
/// `labels` must be the parsed labels of `sample`. Fails when the sample's
/// label keys drift from the established schema.
pub fn bind_row(
    schema: &NormalizedSchema,
    sample: &Sample,
    labels: &[Label],
) -> std::result::Result<Vec<Value>, ValidationError> {
    let values = schema.bind_labels(labels)?;

    let mut args = Vec::with_capacity(values.len() + 3);
    args.push(Value::Date(sample.timestamp.date_naive()));
    args.extend(values.into_iter().map(|v| Value::Text(v.to_string())));
    args.push(Value::Float(sample.value));
    args.push(Value::DateTime(sample.timestamp));
    Ok(args)
}
