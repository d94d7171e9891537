//! Storage execution capability
//!
//! The writer never talks SQL transport directly. It hands structured
//! [`Statement`]s and positional [`Value`]s to a [`Store`], which owns the
//! connection and dialect details.

mod memory;

pub use memory::{MemoryStore, StoredRow};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

/// What a statement does to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Physical table DDL
    CreateTable,
    /// Routing view DDL
    CreateView,
    /// Parameterized insert into a routing view
    Insert,
}

/// A generated statement together with the column order it declares or binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    /// Target database
    pub database: String,
    /// Table the statement creates or writes to
    pub target: String,
    /// Statement text in the store's dialect
    pub text: String,
    /// Declared columns (DDL) or bound parameter order (insert)
    pub columns: Vec<String>,
}

impl Statement {
    /// Number of positional placeholders in the statement.
    pub fn placeholder_count(&self) -> usize {
        self.text.matches('?').count()
    }
}

/// A positional statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Date(NaiveDate),
    Text(String),
    Float(f64),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Errors surfaced by a store driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached
    Connection(String),
    /// The created object is already present; ignorable for DDL
    AlreadyExists(String),
    /// Statement failed to bind or execute
    Statement(String),
    /// Begin, commit or rollback failed
    Transaction(String),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "connection: {}", msg),
            StoreError::AlreadyExists(name) => write!(f, "{} already exists", name),
            StoreError::Statement(msg) => write!(f, "statement: {}", msg),
            StoreError::Transaction(msg) => write!(f, "transaction: {}", msg),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store driver interface.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Open a new all-or-nothing transaction
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    /// List table names in a database
    async fn list_tables(&self, database: &str) -> StoreResult<Vec<String>>;

    /// Column names of a table, in declared order
    async fn describe_table(&self, database: &str, table: &str) -> StoreResult<Vec<String>>;
}

/// An open transaction.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &Statement, args: &[Value]) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
