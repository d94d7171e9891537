//! Per-metric storage schemas
//!
//! Labels are stored as columns: every metric gets its own table whose
//! label columns are derived from the first label set seen for it. The
//! normalizer fixes the column order, the generator turns it into DDL, the
//! statement builder into an insert template, and the registry remembers
//! which metrics already have storage.

mod ddl;
mod insert;
mod normalizer;
mod registry;

pub use ddl::{view_name, EnsureOutcome, SchemaDdl, SchemaGenerator, VIEW_SUFFIX};
pub use insert::{bind_row, StatementBuilder};
pub use normalizer::{
    LabelColumn, LabelNormalizer, NormalizedSchema, DATE_COLUMN, DEFAULT_COLUMN_PREFIX,
    RESERVED_COLUMNS, TIMESTAMP_COLUMN, UPDATED_COLUMN, VALUE_COLUMN,
};
pub use registry::SchemaRegistry;

/// Where and how metric tables are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaConfig {
    /// Target database
    pub database: String,
    /// Cluster name used for `ON CLUSTER` and the Distributed engine
    pub cluster: String,
    /// Prefix turning label keys into column names
    pub column_prefix: String,
}

impl SchemaConfig {
    pub fn normalizer(&self) -> LabelNormalizer {
        LabelNormalizer::new(self.column_prefix.clone())
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            database: "metrics".to_string(),
            cluster: "monitor".to_string(),
            column_prefix: DEFAULT_COLUMN_PREFIX.to_string(),
        }
    }
}
