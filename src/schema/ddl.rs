//! Table and routing view generation
//!
//! Each metric gets a physical MergeTree table ordered by its label columns
//! and timestamp, plus a Distributed table named `<metric>_view` that is the
//! actual write target. Column naming, the reserved column names and the
//! view suffix are part of the on-disk contract with existing deployments.

use super::normalizer::{
    LabelNormalizer, NormalizedSchema, DATE_COLUMN, TIMESTAMP_COLUMN, UPDATED_COLUMN, VALUE_COLUMN,
};
use super::registry::SchemaRegistry;
use super::SchemaConfig;
use crate::sample::ValidationError;
use crate::store::{Statement, StatementKind, Store, StoreError, StoreResult};
use crate::{Error, Result};

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of the routing view created next to every metric table.
pub const VIEW_SUFFIX: &str = "_view";

/// MergeTree index granularity of physical tables.
const INDEX_GRANULARITY: u32 = 8192;

/// Name of the routing view for a metric.
pub fn view_name(metric: &str) -> String {
    format!("{}{}", metric, VIEW_SUFFIX)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name)
}

/// The two DDL statements backing one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDdl {
    pub table: Statement,
    pub view: Statement,
}

/// Result of ensuring a metric's storage exists.
#[derive(Debug, Clone)]
pub enum EnsureOutcome {
    /// Storage was already registered
    Existing(Arc<NormalizedSchema>),
    /// Table and view were created by this call
    Created(Arc<NormalizedSchema>),
}

impl EnsureOutcome {
    /// The column list established for the metric.
    pub fn schema(&self) -> &Arc<NormalizedSchema> {
        match self {
            EnsureOutcome::Existing(schema) | EnsureOutcome::Created(schema) => schema,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, EnsureOutcome::Created(_))
    }
}

/// Derives and executes per-metric DDL.
#[derive(Debug, Clone)]
pub struct SchemaGenerator {
    database: String,
    cluster: String,
    normalizer: LabelNormalizer,
}

impl SchemaGenerator {
    pub fn new(config: &SchemaConfig) -> Self {
        Self {
            database: config.database.clone(),
            cluster: config.cluster.clone(),
            normalizer: config.normalizer(),
        }
    }

    /// Column declarations shared by the table and the view.
    fn column_definitions(schema: &NormalizedSchema) -> (String, Vec<String>) {
        let mut defs = Vec::with_capacity(schema.columns.len() + 4);
        let mut names = Vec::with_capacity(schema.columns.len() + 4);

        defs.push(format!("{} Date DEFAULT toDate(0)", DATE_COLUMN));
        names.push(DATE_COLUMN.to_string());
        for column in &schema.columns {
            defs.push(format!("{} String", column.name));
            names.push(column.name.clone());
        }
        defs.push(format!("{} Float64", VALUE_COLUMN));
        names.push(VALUE_COLUMN.to_string());
        defs.push(format!("{} DateTime", TIMESTAMP_COLUMN));
        names.push(TIMESTAMP_COLUMN.to_string());
        defs.push(format!("{} DateTime DEFAULT now()", UPDATED_COLUMN));
        names.push(UPDATED_COLUMN.to_string());

        (defs.join(",\n    "), names)
    }

    /// Generate the table and routing view statements for a metric.
    pub fn generate_ddl(&self, schema: &NormalizedSchema) -> SchemaDdl {
        let (defs, columns) = Self::column_definitions(schema);
        let table = quote_ident(&schema.metric_name);
        let view = view_name(&schema.metric_name);

        let mut order_by: Vec<&str> = schema.column_names();
        order_by.push(TIMESTAMP_COLUMN);

        let table_sql = format!(
            "CREATE TABLE IF NOT EXISTS {db}.{table} ON CLUSTER {cluster} (\n    {defs}\n) \
             ENGINE = MergeTree() PARTITION BY toYYYYMM({date}) ORDER BY ({order}) \
             SETTINGS index_granularity = {granularity}",
            db = self.database,
            table = table,
            cluster = self.cluster,
            defs = defs,
            date = DATE_COLUMN,
            order = order_by.join(", "),
            granularity = INDEX_GRANULARITY,
        );

        let view_sql = format!(
            "CREATE TABLE IF NOT EXISTS {db}.{view} ON CLUSTER {cluster} (\n    {defs}\n) \
             ENGINE = Distributed({cluster}, {db}, {table}, rand())",
            db = self.database,
            view = quote_ident(&view),
            cluster = self.cluster,
            defs = defs,
            table = table,
        );

        SchemaDdl {
            table: Statement {
                kind: StatementKind::CreateTable,
                database: self.database.clone(),
                target: schema.metric_name.clone(),
                text: table_sql,
                columns: columns.clone(),
            },
            view: Statement {
                kind: StatementKind::CreateView,
                database: self.database.clone(),
                target: view,
                text: view_sql,
                columns,
            },
        }
    }

    /// Make sure `schema.metric_name` has a table and routing view.
    ///
    /// Serialized per metric through the registry. The table commits before
    /// the view is attempted; the registry is updated only after both
    /// committed. A store reporting "already exists" counts as success.
    ///
    /// The physical table is described after its DDL, and its columns win
    /// over `schema`: a table left by an earlier partial creation keeps
    /// its shape, and the view and registry entry follow it.
    pub async fn ensure(
        &self,
        store: &dyn Store,
        registry: &SchemaRegistry,
        schema: NormalizedSchema,
    ) -> Result<EnsureOutcome> {
        if registry.exists(&schema.metric_name) {
            return Ok(EnsureOutcome::Existing(registry.establish(schema)));
        }
        check_view_collision(registry, &schema.metric_name)?;

        let _guard = registry.lock_metric(&schema.metric_name).await;
        if registry.exists(&schema.metric_name) {
            return Ok(EnsureOutcome::Existing(registry.establish(schema)));
        }

        let table_ddl = self.generate_ddl(&schema).table;
        self.run_ddl(store, &schema.metric_name, &table_ddl).await?;

        let schema = self.physical_schema(store, schema).await?;
        let view_ddl = self.generate_ddl(&schema).view;
        self.run_ddl(store, &schema.metric_name, &view_ddl).await?;

        let schema = Arc::new(schema);
        registry.mark_created(schema.clone());
        info!(
            metric = %schema.metric_name,
            columns = schema.columns.len(),
            "Created metric table and routing view"
        );
        Ok(EnsureOutcome::Created(
            registry.schema(&schema.metric_name).unwrap_or(schema),
        ))
    }

    async fn run_ddl(&self, store: &dyn Store, metric: &str, statement: &Statement) -> Result<()> {
        execute_ddl(store, statement).await.map_err(|source| {
            warn!(
                metric = %metric,
                table = %statement.target,
                error = %source,
                sql = %statement.text,
                "Schema creation failed"
            );
            creation_error(metric, source)
        })
    }

    /// Label columns the metric's table actually declares.
    async fn physical_schema(
        &self,
        store: &dyn Store,
        candidate: NormalizedSchema,
    ) -> Result<NormalizedSchema> {
        let columns = store
            .describe_table(&self.database, &candidate.metric_name)
            .await
            .map_err(|source| creation_error(&candidate.metric_name, source))?;
        let physical = self
            .normalizer
            .from_columns(&candidate.metric_name, columns.iter().map(String::as_str));

        if physical.columns != candidate.columns {
            warn!(
                metric = %candidate.metric_name,
                table_columns = ?physical.column_names(),
                sample_columns = ?candidate.column_names(),
                "Table already exists with other columns; keeping the table's"
            );
        }
        Ok(physical)
    }
}

fn creation_error(metric: &str, source: StoreError) -> Error {
    match source {
        StoreError::Connection(_) => Error::Connection(source),
        source => Error::SchemaCreation {
            metric: metric.to_string(),
            source,
        },
    }
}

/// `<m>_view` is both a legal metric name and the routing view of `<m>`.
/// Whichever of the two is registered first keeps the name.
fn check_view_collision(registry: &SchemaRegistry, metric: &str) -> Result<()> {
    let shadows_view = metric
        .strip_suffix(VIEW_SUFFIX)
        .is_some_and(|base| registry.exists(base));
    if shadows_view || registry.exists(&view_name(metric)) {
        return Err(Error::Validation(ValidationError::ViewNameCollision(
            metric.to_string(),
        )));
    }
    Ok(())
}

/// Run one DDL statement in its own transaction.
async fn execute_ddl(store: &dyn Store, statement: &Statement) -> StoreResult<()> {
    let mut tx = store.begin().await?;
    match tx.execute(statement, &[]).await {
        Ok(()) => tx.commit().await,
        Err(e) if e.is_already_exists() => {
            debug!(target_table = %statement.target, "Table already exists");
            if let Err(e) = tx.rollback().await {
                debug!(error = %e, "Rollback after duplicate create failed");
            }
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Label;
    use crate::schema::LabelNormalizer;
    use crate::store::MemoryStore;

    fn config() -> SchemaConfig {
        SchemaConfig {
            database: "metrics".to_string(),
            cluster: "monitor".to_string(),
            column_prefix: "col_".to_string(),
        }
    }

    fn schema(metric: &str, keys: &[&str]) -> NormalizedSchema {
        let labels: Vec<Label> = keys.iter().map(|k| Label::new(*k, "v")).collect();
        LabelNormalizer::default().normalize(metric, &labels)
    }

    #[test]
    fn test_table_ddl() {
        let ddl = SchemaGenerator::new(&config()).generate_ddl(&schema("cpu_usage", &["region", "host"]));

        assert_eq!(ddl.table.kind, StatementKind::CreateTable);
        assert_eq!(ddl.table.target, "cpu_usage");
        assert_eq!(
            ddl.table.columns,
            vec!["date", "col_host", "col_region", "val", "ts", "updated"]
        );
        assert!(ddl
            .table
            .text
            .starts_with("CREATE TABLE IF NOT EXISTS metrics.`cpu_usage` ON CLUSTER monitor ("));
        assert!(ddl.table.text.contains("date Date DEFAULT toDate(0)"));
        assert!(ddl.table.text.contains("col_host String,\n    col_region String"));
        assert!(ddl.table.text.contains("updated DateTime DEFAULT now()"));
        assert!(ddl.table.text.contains("ORDER BY (col_host, col_region, ts)"));
        assert!(ddl.table.text.contains("ENGINE = MergeTree()"));
    }

    #[test]
    fn test_view_ddl() {
        let ddl = SchemaGenerator::new(&config()).generate_ddl(&schema("cpu_usage", &["host"]));

        assert_eq!(ddl.view.kind, StatementKind::CreateView);
        assert_eq!(ddl.view.target, "cpu_usage_view");
        assert_eq!(ddl.view.columns, ddl.table.columns);
        assert!(ddl.view.text.contains("metrics.`cpu_usage_view` ON CLUSTER monitor"));
        assert!(ddl
            .view
            .text
            .contains("ENGINE = Distributed(monitor, metrics, `cpu_usage`, rand())"));
    }

    #[test]
    fn test_ddl_without_labels() {
        let ddl = SchemaGenerator::new(&config()).generate_ddl(&schema("up", &[]));
        assert!(ddl.table.text.contains("ORDER BY (ts)"));
        assert_eq!(ddl.table.columns, vec!["date", "val", "ts", "updated"]);
    }

    #[tokio::test]
    async fn test_ensure_creates_once() {
        let store = MemoryStore::new();
        let registry = SchemaRegistry::new();
        let generator = SchemaGenerator::new(&config());

        let first = generator
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .unwrap();
        let second = generator
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .unwrap();

        assert!(first.created());
        assert!(!second.created());
        assert_eq!(store.ddl_commits("cpu"), 1);
        assert_eq!(store.ddl_commits("cpu_view"), 1);
        assert!(registry.exists("cpu"));
    }

    #[tokio::test]
    async fn test_ensure_failure_leaves_registry_untouched() {
        let store = MemoryStore::new();
        store.fail_ddl_for("cpu_view");
        let registry = SchemaRegistry::new();
        let generator = SchemaGenerator::new(&config());

        let err = generator
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaCreation { .. }));
        assert!(!registry.exists("cpu"));
        // The table itself committed before the view failed.
        assert!(store.has_table("metrics", "cpu"));
        assert!(!store.has_table("metrics", "cpu_view"));

        // Retried on the next sighting; the existing table is tolerated.
        store.clear_faults();
        let outcome = generator
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .unwrap();
        assert!(outcome.created());
        assert!(registry.exists("cpu"));
    }

    #[tokio::test]
    async fn test_retry_keeps_existing_table_columns() {
        let store = MemoryStore::new();
        store.fail_ddl_for("cpu_view");
        let registry = SchemaRegistry::new();
        let generator = SchemaGenerator::new(&config());

        assert!(generator
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .is_err());

        // The next sighting carries another label set.
        store.clear_faults();
        let outcome = generator
            .ensure(&store, &registry, schema("cpu", &["zone"]))
            .await
            .unwrap();

        assert_eq!(outcome.schema().label_keys(), vec!["host"]);
        assert_eq!(registry.schema("cpu").unwrap().label_keys(), vec!["host"]);
        let view_columns = store.describe_table("metrics", "cpu_view").await.unwrap();
        let table_columns = store.describe_table("metrics", "cpu").await.unwrap();
        assert_eq!(view_columns, table_columns);
    }

    #[tokio::test]
    async fn test_orphan_table_shapes_the_view() {
        let store = MemoryStore::new().with_table(
            "metrics",
            "cpu",
            &["date", "col_region", "col_host", "val", "ts", "updated"],
        );
        let registry = SchemaRegistry::new();

        let outcome = SchemaGenerator::new(&config())
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .unwrap();

        assert_eq!(outcome.schema().column_names(), vec!["col_region", "col_host"]);
        assert_eq!(
            store.describe_table("metrics", "cpu_view").await.unwrap(),
            vec!["date", "col_region", "col_host", "val", "ts", "updated"]
        );
    }

    #[tokio::test]
    async fn test_view_name_collisions_are_rejected() {
        let store = MemoryStore::new();
        let registry = SchemaRegistry::new();
        let generator = SchemaGenerator::new(&config());

        generator
            .ensure(&store, &registry, schema("cpu", &["host"]))
            .await
            .unwrap();
        let err = generator
            .ensure(&store, &registry, schema("cpu_view", &["host"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::ViewNameCollision(ref name)) if name == "cpu_view"
        ));

        generator
            .ensure(&store, &registry, schema("mem_view", &[]))
            .await
            .unwrap();
        let err = generator
            .ensure(&store, &registry, schema("mem", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "validation");
        assert!(!registry.exists("mem"));
    }

    #[tokio::test]
    async fn test_ensure_tolerates_already_exists() {
        let store = MemoryStore::new();
        let registry = SchemaRegistry::new();
        let generator = SchemaGenerator::new(&config());

        let mut ddl = generator.generate_ddl(&schema("cpu", &["host"]));
        ddl.table.text = ddl.table.text.replace(" IF NOT EXISTS", "");
        execute_ddl(&store, &ddl.table).await.unwrap();
        execute_ddl(&store, &ddl.table).await.unwrap();
        assert_eq!(store.ddl_commits("cpu"), 1);
    }

    #[tokio::test]
    async fn test_ensure_unreachable_is_connection_error() {
        let store = MemoryStore::new();
        store.set_unreachable(true);
        let err = SchemaGenerator::new(&config())
            .ensure(&store, &SchemaRegistry::new(), schema("cpu", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SchemaRegistry::new());
        let generator = Arc::new(SchemaGenerator::new(&config()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (store, registry, generator) = (store.clone(), registry.clone(), generator.clone());
            handles.push(tokio::spawn(async move {
                generator
                    .ensure(store.as_ref(), &registry, schema("cpu", &["host"]))
                    .await
                    .unwrap()
                    .created()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.ddl_commits("cpu"), 1);
    }
}
