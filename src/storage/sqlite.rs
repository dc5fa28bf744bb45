use super::{ListQuery, Mutation, Row, Storage};
use crate::error::{Result, TimetableError};
use crate::schema::Table;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION_001: &str = include_str!("migrations/001_initial.sql");
const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed storage. Calls run on the blocking pool.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                TimetableError::Storage("sqlite connection lock poisoned".to_string())
            })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| TimetableError::Storage(format!("sqlite task failed: {e}")))?
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute_batch(MIGRATION_001)
        .map_err(|e| TimetableError::Storage(format!("migration 001_initial failed: {e}")))?;
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    info!("Applied schema migrations up to version {}", SCHEMA_VERSION);
    Ok(())
}

fn check_column(table: Table, columns: &[&str], column: &str) -> Result<()> {
    if columns.contains(&column) {
        Ok(())
    } else {
        Err(TimetableError::Storage(format!(
            "unknown column '{column}' on {table}"
        )))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(table: Table, column: &str, value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) if table.is_bool_column(column) => Value::Bool(i != 0),
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Constraint failures are client conflicts; everything else is ours.
fn map_sqlite_error(e: rusqlite::Error) -> TimetableError {
    match &e {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            TimetableError::Conflict(
                message
                    .clone()
                    .unwrap_or_else(|| "constraint violation".to_string()),
            )
        }
        _ => TimetableError::Sqlite(e),
    }
}

fn select_rows(conn: &Connection, table: Table, query: &ListQuery) -> Result<Vec<Row>> {
    let columns = table.columns();
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (column, value) in &query.filters {
        check_column(table, &columns, column)?;
        if value.is_null() {
            clauses.push(format!("{column} IS NULL"));
        } else {
            params.push(to_sql(value));
            clauses.push(format!("{column} = ?{}", params.len()));
        }
    }

    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), table.name());
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at, id");
    if query.limit.is_some() || query.offset.is_some() {
        // A negative LIMIT means no limit. Out-of-range values saturate,
        // which skips everything just as the in-memory backend does.
        let bound = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        params.push(SqlValue::Integer(query.limit.map_or(-1, bound)));
        params.push(SqlValue::Integer(query.offset.map_or(0, bound)));
        sql.push_str(&format!(
            " LIMIT ?{} OFFSET ?{}",
            params.len() - 1,
            params.len()
        ));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut out = Row::new();
        for (i, column) in columns.iter().enumerate() {
            let value: SqlValue = row.get(i)?;
            out.insert(column.to_string(), from_sql(table, column, value));
        }
        Ok(out)
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn execute(conn: &Connection, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::Insert { table, row } => {
            let columns = table.columns();
            let mut names = Vec::with_capacity(row.len());
            let mut params = Vec::with_capacity(row.len());
            for (column, value) in row {
                check_column(*table, &columns, column)?;
                names.push(column.as_str());
                params.push(to_sql(value));
            }
            let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name(),
                names.join(", "),
                placeholders.join(", ")
            );
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(map_sqlite_error)?;
            debug!("Inserted into {}", table);
        }
        Mutation::Update { table, id, changes } => {
            if changes.is_empty() {
                return Ok(());
            }
            let columns = table.columns();
            let mut sets = Vec::with_capacity(changes.len());
            let mut params = Vec::with_capacity(changes.len() + 1);
            for (column, value) in changes {
                check_column(*table, &columns, column)?;
                params.push(to_sql(value));
                sets.push(format!("{column} = ?{}", params.len()));
            }
            params.push(SqlValue::Text(id.to_string()));
            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?{}",
                table.name(),
                sets.join(", "),
                params.len()
            );
            let changed = conn
                .execute(&sql, params_from_iter(params.iter()))
                .map_err(map_sqlite_error)?;
            if changed == 0 {
                return Err(not_found(*table, *id));
            }
            debug!("Updated {} {}", table, id);
        }
        Mutation::Delete { table, id } => {
            let sql = format!("DELETE FROM {} WHERE id = ?1", table.name());
            let changed = conn
                .execute(&sql, [id.to_string()])
                .map_err(map_sqlite_error)?;
            if changed == 0 {
                return Err(not_found(*table, *id));
            }
            debug!("Deleted {} {}", table, id);
        }
    }
    Ok(())
}

fn not_found(table: Table, id: Uuid) -> TimetableError {
    TimetableError::NotFound {
        resource: table.label(),
        id,
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn list(&self, table: Table, query: &ListQuery) -> Result<Vec<Row>> {
        let query = query.clone();
        self.with_conn(move |conn| select_rows(conn, table, &query))
            .await
    }

    async fn get(&self, table: Table, id: Uuid) -> Result<Option<Row>> {
        let query = ListQuery::new().filter("id", id.to_string());
        let mut rows = self
            .with_conn(move |conn| select_rows(conn, table, &query))
            .await?;
        Ok(rows.pop())
    }

    async fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for mutation in &mutations {
                execute(&tx, mutation)?;
            }
            // Deferred foreign keys are checked here.
            tx.commit().map_err(map_sqlite_error)?;
            Ok(())
        })
        .await
    }
}
