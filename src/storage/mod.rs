pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

use crate::error::Result;
use crate::schema::Table;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use uuid::Uuid;

/// One stored record, keyed by column name.
pub type Row = Map<String, Value>;

/// Equality filters plus paging for a list call. A `Value::Null` filter
/// matches rows where the column is null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<(String, Value)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert { table: Table, row: Row },
    Update { table: Table, id: Uuid, changes: Row },
    Delete { table: Table, id: Uuid },
}

/// Storage trait for persisting resource rows
#[async_trait]
pub trait Storage: Send + Sync {
    /// Rows matching `query`, ordered by `created_at` then `id`.
    async fn list(&self, table: Table, query: &ListQuery) -> Result<Vec<Row>>;

    async fn get(&self, table: Table, id: Uuid) -> Result<Option<Row>>;

    /// Applies every mutation or none of them.
    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()>;
}

/// Row id, if the row carries a well-formed one.
pub fn row_id(row: &Row) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Insertion order used by every backend.
pub(crate) fn creation_order(a: &Row, b: &Row) -> Ordering {
    let key = |row: &Row| {
        (
            row.get("created_at").and_then(Value::as_str).map(str::to_owned),
            row.get("id").and_then(Value::as_str).map(str::to_owned),
        )
    };
    key(a).cmp(&key(b))
}
