//! # labelhouse
//!
//! Schema-on-write ingestion of labeled time-series samples into a columnar
//! analytical store.
//!
//! Every metric name gets its own table the first time it is seen. The
//! table's label columns are derived from the sample's label set, so labels
//! are stored as columns rather than as an opaque tag blob.
//!
//! ## Architecture
//!
//! - **Schema**: normalizes label sets into a fixed column order, generates
//!   table and routing view DDL, builds insert templates, and tracks which
//!   metrics already have storage
//! - **Dispatcher**: drains the inbound queue in bounded batches, groups by
//!   metric, creates missing schemas and commits each group transactionally
//! - **Store**: the driver capability the dispatcher executes against

pub mod config;
pub mod dispatcher;
pub mod sample;
pub mod schema;
pub mod store;
pub mod telemetry;
pub mod writer;

mod error;

pub use error::{Error, Result};

/// Configuration for the writer pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Table naming and placement
    pub schema: schema::SchemaConfig,
    /// Batching and concurrency
    pub dispatcher: dispatcher::DispatcherConfig,
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, StatsSnapshot};
    pub use crate::sample::{Label, Sample, ValidationError};
    pub use crate::schema::{
        LabelNormalizer, NormalizedSchema, SchemaConfig, SchemaGenerator, SchemaRegistry,
        StatementBuilder,
    };
    pub use crate::store::{MemoryStore, Statement, Store, StoreError, Transaction, Value};
    pub use crate::writer::Writer;
    pub use crate::{Config, Error, Result};
}
