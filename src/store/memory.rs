//! In-memory store for development and testing
//!
//! Committed DDL creates tables, committed inserts append rows, and rolled
//! back or failed transactions leave no trace. Faults can be injected per
//! target table to exercise the writer's failure paths.

use super::{Statement, StatementKind, Store, StoreError, StoreResult, Transaction, Value};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type RowFault = Arc<dyn Fn(&Statement, &[Value]) -> bool + Send + Sync>;

/// A committed row, kept with the column order it was bound in.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl StoredRow {
    /// Value bound to a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Default)]
struct State {
    /// Key: (database, table)
    tables: BTreeMap<(String, String), Table>,
    /// Committed DDL statements per target table
    ddl_commits: HashMap<String, usize>,
}

#[derive(Default)]
struct Faults {
    begin: bool,
    ddl_targets: HashSet<String>,
    commit_targets: HashSet<String>,
    describe: bool,
    row: Option<RowFault>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    faults: RwLock<Faults>,
    unreachable: AtomicBool,
}

/// In-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table, as if left behind by an earlier process.
    pub fn with_table(self, database: &str, table: &str, columns: &[&str]) -> Self {
        self.inner.state.lock().tables.insert(
            (database.to_string(), table.to_string()),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    /// Make `ping` and `begin` fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::Release);
    }

    /// Make `begin` fail with a transaction error.
    pub fn fail_begin(&self, fail: bool) {
        self.inner.faults.write().begin = fail;
    }

    /// Reject any DDL targeting `table`.
    pub fn fail_ddl_for(&self, table: &str) {
        self.inner.faults.write().ddl_targets.insert(table.to_string());
    }

    /// Fail commits of transactions that touched `table`.
    pub fn fail_commit_for(&self, table: &str) {
        self.inner
            .faults
            .write()
            .commit_targets
            .insert(table.to_string());
    }

    /// Make `describe_table` fail.
    pub fn fail_describe(&self, fail: bool) {
        self.inner.faults.write().describe = fail;
    }

    /// Fail individual executions for which `predicate` returns true.
    pub fn fail_rows_where<F>(&self, predicate: F)
    where
        F: Fn(&Statement, &[Value]) -> bool + Send + Sync + 'static,
    {
        self.inner.faults.write().row = Some(Arc::new(predicate));
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        *self.inner.faults.write() = Faults::default();
    }

    /// Whether a table exists.
    pub fn has_table(&self, database: &str, table: &str) -> bool {
        self.inner
            .state
            .lock()
            .tables
            .contains_key(&(database.to_string(), table.to_string()))
    }

    /// Committed rows of a table.
    pub fn rows(&self, database: &str, table: &str) -> Vec<StoredRow> {
        self.inner
            .state
            .lock()
            .tables
            .get(&(database.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of committed DDL statements that targeted `table`.
    pub fn ddl_commits(&self, table: &str) -> usize {
        self.inner
            .state
            .lock()
            .ddl_commits
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.inner.unreachable.load(Ordering::Acquire) {
            return Err(StoreError::Connection("store unreachable".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tables", &self.inner.state.lock().tables.len())
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check_reachable()
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        self.check_reachable()?;
        if self.inner.faults.read().begin {
            return Err(StoreError::Transaction("begin rejected".to_string()));
        }
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            pending: Vec::new(),
        }))
    }

    async fn list_tables(&self, database: &str) -> StoreResult<Vec<String>> {
        self.check_reachable()?;
        Ok(self
            .inner
            .state
            .lock()
            .tables
            .keys()
            .filter(|(db, _)| db == database)
            .map(|(_, table)| table.clone())
            .collect())
    }

    async fn describe_table(&self, database: &str, table: &str) -> StoreResult<Vec<String>> {
        self.check_reachable()?;
        if self.inner.faults.read().describe {
            return Err(StoreError::Statement(format!("DESC {}.{} rejected", database, table)));
        }
        self.inner
            .state
            .lock()
            .tables
            .get(&(database.to_string(), table.to_string()))
            .map(|t| t.columns.clone())
            .ok_or_else(|| StoreError::Statement(format!("unknown table {}.{}", database, table)))
    }
}

enum PendingOp {
    Create { statement: Statement },
    Insert { statement: Statement, args: Vec<Value> },
}

impl PendingOp {
    fn target(&self) -> &str {
        match self {
            PendingOp::Create { statement } | PendingOp::Insert { statement, .. } => {
                &statement.target
            }
        }
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    pending: Vec<PendingOp>,
}

impl MemoryTransaction {
    /// Declared columns of a committed or pending table.
    fn table_columns(&self, database: &str, table: &str) -> Option<Vec<String>> {
        let key = (database.to_string(), table.to_string());
        if let Some(t) = self.inner.state.lock().tables.get(&key) {
            return Some(t.columns.clone());
        }
        self.pending.iter().find_map(|op| match op {
            PendingOp::Create { statement }
                if statement.database == database && statement.target == table =>
            {
                Some(statement.columns.clone())
            }
            _ => None,
        })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, statement: &Statement, args: &[Value]) -> StoreResult<()> {
        match statement.kind {
            StatementKind::CreateTable | StatementKind::CreateView => {
                if self
                    .inner
                    .faults
                    .read()
                    .ddl_targets
                    .contains(&statement.target)
                {
                    return Err(StoreError::Statement(format!(
                        "DDL rejected for {}",
                        statement.target
                    )));
                }
                let exists = self
                    .table_columns(&statement.database, &statement.target)
                    .is_some();
                if exists && !statement.text.contains("IF NOT EXISTS") {
                    return Err(StoreError::AlreadyExists(statement.target.clone()));
                }
                self.pending.push(PendingOp::Create {
                    statement: statement.clone(),
                });
            }
            StatementKind::Insert => {
                let Some(declared) = self.table_columns(&statement.database, &statement.target)
                else {
                    return Err(StoreError::Statement(format!(
                        "unknown table {}.{}",
                        statement.database, statement.target
                    )));
                };
                if let Some(missing) = statement.columns.iter().find(|c| !declared.contains(c)) {
                    return Err(StoreError::Statement(format!(
                        "no column {} in {}.{}",
                        missing, statement.database, statement.target
                    )));
                }
                let expected = statement.placeholder_count();
                if args.len() != expected || args.len() != statement.columns.len() {
                    return Err(StoreError::Statement(format!(
                        "expected {} arguments, got {}",
                        expected,
                        args.len()
                    )));
                }
                if let Some(fault) = self.inner.faults.read().row.as_ref() {
                    if fault(statement, args) {
                        return Err(StoreError::Statement("row rejected".to_string()));
                    }
                }
                self.pending.push(PendingOp::Insert {
                    statement: statement.clone(),
                    args: args.to_vec(),
                });
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { inner, pending } = *self;
        {
            let faults = inner.faults.read();
            if let Some(op) = pending
                .iter()
                .find(|op| faults.commit_targets.contains(op.target()))
            {
                return Err(StoreError::Transaction(format!(
                    "commit rejected for {}",
                    op.target()
                )));
            }
        }

        let mut state = inner.state.lock();
        for op in pending {
            match op {
                PendingOp::Create { statement } => {
                    *state.ddl_commits.entry(statement.target.clone()).or_default() += 1;
                    state
                        .tables
                        .entry((statement.database, statement.target))
                        .or_insert_with(|| Table {
                            columns: statement.columns,
                            rows: Vec::new(),
                        });
                }
                PendingOp::Insert { statement, args } => {
                    // Tables are never dropped, and execute() checked existence.
                    if let Some(table) = state
                        .tables
                        .get_mut(&(statement.database, statement.target))
                    {
                        table.rows.push(StoredRow {
                            columns: statement.columns,
                            values: args,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
