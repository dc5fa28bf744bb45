use super::{creation_order, ListQuery, Mutation, Row, Storage};
use crate::error::{Result, TimetableError};
use crate::schema::Table;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

type Tables = HashMap<Table, BTreeMap<Uuid, Row>>;

/// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| TimetableError::Storage("in-memory store lock poisoned".to_string()))
    }
}

/// A row's state before one mutation touched it; `None` if it was absent.
struct Undo {
    table: Table,
    id: Uuid,
    previous: Option<Row>,
}

fn apply_one(tables: &mut Tables, mutation: Mutation) -> Result<Undo> {
    match mutation {
        Mutation::Insert { table, row } => {
            let id = super::row_id(&row).ok_or_else(|| {
                TimetableError::Storage(format!("insert into {table} without a valid id"))
            })?;
            let rows = tables.entry(table).or_default();
            if rows.contains_key(&id) {
                return Err(TimetableError::Conflict(format!(
                    "A {} with id {id} already exists",
                    table.label()
                )));
            }
            rows.insert(id, row);
            debug!("Inserted {} {}", table.label(), id);
            Ok(Undo {
                table,
                id,
                previous: None,
            })
        }
        Mutation::Update { table, id, changes } => {
            let row = tables
                .get_mut(&table)
                .and_then(|rows| rows.get_mut(&id))
                .ok_or(TimetableError::NotFound {
                    resource: table.label(),
                    id,
                })?;
            let previous = row.clone();
            for (column, value) in changes {
                row.insert(column, value);
            }
            debug!("Updated {} {}", table.label(), id);
            Ok(Undo {
                table,
                id,
                previous: Some(previous),
            })
        }
        Mutation::Delete { table, id } => {
            let previous = tables
                .get_mut(&table)
                .and_then(|rows| rows.remove(&id))
                .ok_or(TimetableError::NotFound {
                    resource: table.label(),
                    id,
                })?;
            debug!("Deleted {} {}", table.label(), id);
            Ok(Undo {
                table,
                id,
                previous: Some(previous),
            })
        }
    }
}

fn roll_back(tables: &mut Tables, applied: Vec<Undo>) {
    for Undo {
        table,
        id,
        previous,
    } in applied.into_iter().rev()
    {
        let rows = tables.entry(table).or_default();
        match previous {
            Some(row) => {
                rows.insert(id, row);
            }
            None => {
                rows.remove(&id);
            }
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn list(&self, table: Table, query: &ListQuery) -> Result<Vec<Row>> {
        let tables = self.lock()?;
        let mut rows: Vec<Row> = tables
            .get(&table)
            .map(|rows| rows.values().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(creation_order);

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, table: Table, id: Uuid) -> Result<Option<Row>> {
        let tables = self.lock()?;
        Ok(tables.get(&table).and_then(|rows| rows.get(&id)).cloned())
    }

    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        let mut tables = self.lock()?;
        let mut applied = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            match apply_one(&mut tables, mutation) {
                Ok(undo) => applied.push(undo),
                Err(e) => {
                    roll_back(&mut tables, applied);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
