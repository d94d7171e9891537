//! Registry of metrics that already have backing storage

use super::ddl::view_name;
use super::normalizer::{LabelNormalizer, NormalizedSchema};
use crate::store::Store;
use crate::{Error, Result};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Process-wide record of which metrics have a table and routing view.
///
/// Entries are only ever added, and only after the creating transactions
/// committed. Each entry may carry the column list the table was created
/// with; a bootstrapped table whose columns could not be described has
/// none until [`SchemaRegistry::establish`] pins one.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: DashMap<String, Option<Arc<NormalizedSchema>>>,
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether storage for `metric` is known to exist.
    pub fn exists(&self, metric: &str) -> bool {
        self.tables.contains_key(metric)
    }

    /// Record a committed creation. Idempotent: the first schema recorded
    /// for a metric is kept.
    pub fn mark_created(&self, schema: Arc<NormalizedSchema>) {
        match self.tables.entry(schema.metric_name.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_none() {
                    entry.insert(Some(schema));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Some(schema));
            }
        }
    }

    /// Preload metrics found in the store's catalog. Returns how many were new.
    pub fn bootstrap<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Option<NormalizedSchema>)>,
    {
        let mut added = 0;
        for (metric, schema) in entries {
            if let Entry::Vacant(entry) = self.tables.entry(metric) {
                entry.insert(schema.map(Arc::new));
                added += 1;
            }
        }
        added
    }

    /// Column list established for `metric`, if known.
    pub fn schema(&self, metric: &str) -> Option<Arc<NormalizedSchema>> {
        self.tables.get(metric).and_then(|entry| entry.value().clone())
    }

    /// Pin `schema` for a known metric that has no column list yet, and
    /// return whichever schema is now established.
    ///
    /// For an unknown metric nothing is recorded.
    pub fn establish(&self, schema: NormalizedSchema) -> Arc<NormalizedSchema> {
        match self.tables.get_mut(&schema.metric_name) {
            Some(mut entry) => {
                if let Some(existing) = entry.value() {
                    return existing.clone();
                }
                let schema = Arc::new(schema);
                *entry.value_mut() = Some(schema.clone());
                schema
            }
            None => Arc::new(schema),
        }
    }

    /// Serialize the exists -> create -> mark sequence for one metric.
    pub async fn lock_metric(&self, metric: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .creation_locks
            .entry(metric.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Preload from the store's catalog.
    ///
    /// A metric counts as created only when both its table and its routing
    /// view exist, so a half-finished creation is retried. Column lists are
    /// recovered by describing each table.
    pub async fn bootstrap_from_store(
        &self,
        store: &dyn Store,
        database: &str,
        normalizer: &LabelNormalizer,
    ) -> Result<usize> {
        let tables = store.list_tables(database).await.map_err(Error::Connection)?;
        let names: HashSet<&str> = tables.iter().map(String::as_str).collect();

        let mut entries = Vec::new();
        for table in &tables {
            if !names.contains(view_name(table).as_str()) {
                continue;
            }
            let schema = match store.describe_table(database, table).await {
                Ok(columns) => Some(normalizer.from_columns(table, columns.iter().map(String::as_str))),
                Err(e) => {
                    warn!(metric = %table, error = %e, "Could not describe table; columns will be pinned by the next sample");
                    None
                }
            };
            entries.push((table.clone(), schema));
        }

        let added = self.bootstrap(entries);
        info!(database, tables = tables.len(), metrics = added, "Schema registry bootstrapped");
        Ok(added)
    }
}
