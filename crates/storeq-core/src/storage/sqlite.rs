//! SQLite storage backend.

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, ToSql};
use storeq_proto::value::{datetime_from_timestamp, format_datetime};
use storeq_proto::Value;
use tracing::{debug, instrument};

use super::config::SqliteConfig;
use super::pool::ConnectionPool;
use super::{RawRow, Storage};
use crate::error::StorageError;
use crate::query::sql::{count_sql, select_sql, SqlStatement};
use crate::query::RenderedClause;
use crate::schema::EntitySchema;

/// Binds a [`Value`] as a SQLite parameter.
struct SqlParam<'a>(&'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(*b as i64)),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Timestamp(t) => match datetime_from_timestamp(*t) {
                Some(dt) => ToSqlOutput::Owned(SqlValue::Text(format_datetime(&dt))),
                None => ToSqlOutput::Owned(SqlValue::Null),
            },
        })
    }
}

fn value_from_ref(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

/// Storage backed by a SQLite database through a connection pool.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: ConnectionPool,
}

impl SqliteStorage {
    /// Open the database.
    pub fn open(config: SqliteConfig) -> Result<Self, StorageError> {
        Ok(Self {
            pool: ConnectionPool::open(&config)?,
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Create the table for a schema if it does not exist.
    pub fn create_table(&self, schema: &EntitySchema) -> Result<(), StorageError> {
        let columns: Vec<String> = schema
            .columns
            .iter()
            .map(|c| {
                if c.name == schema.primary_key {
                    format!("{} {} PRIMARY KEY", c.name, c.column_type.sql_type())
                } else {
                    format!("{} {}", c.name, c.column_type.sql_type())
                }
            })
            .collect();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            schema.table,
            columns.join(", ")
        );
        debug!(table = %schema.table, "creating table");
        self.pool.acquire()?.execute_batch(&ddl)?;
        Ok(())
    }

    fn query_rows(&self, stmt: &SqlStatement) -> Result<Vec<RawRow>, StorageError> {
        let conn = self.pool.acquire()?;
        let mut prepared = conn.prepare(&stmt.sql)?;
        let names: Vec<String> = prepared.column_names().into_iter().map(str::to_string).collect();

        let rows = prepared.query_map(params_from_iter(stmt.params.iter().map(SqlParam)), |row| {
            let mut raw = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                raw.push((name.clone(), value_from_ref(row.get_ref(i)?)));
            }
            Ok(raw)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, StorageError> {
        let conn = self.pool.acquire()?;
        Ok(conn.execute(sql, params_from_iter(params.iter().map(SqlParam)))?)
    }
}

impl Storage for SqliteStorage {
    #[instrument(skip(self, clause), fields(table = %clause.table))]
    fn select(&self, clause: &RenderedClause) -> Result<Vec<RawRow>, StorageError> {
        let stmt = select_sql(clause);
        debug!(sql = %stmt.sql, params = stmt.params.len(), "select");
        self.query_rows(&stmt)
    }

    #[instrument(skip(self, clause), fields(table = %clause.table))]
    fn count(&self, clause: &RenderedClause) -> Result<u64, StorageError> {
        let stmt = count_sql(clause);
        debug!(sql = %stmt.sql, params = stmt.params.len(), "count");
        let conn = self.pool.acquire()?;
        let count: i64 = conn.query_row(
            &stmt.sql,
            params_from_iter(stmt.params.iter().map(SqlParam)),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn insert(&self, schema: &EntitySchema, row: RawRow) -> Result<Value, StorageError> {
        let row: RawRow = row
            .into_iter()
            .filter(|(name, value)| {
                schema.has_column(name) && !(name == &schema.primary_key && value.is_null())
            })
            .collect();
        let explicit_id = row
            .iter()
            .find(|(name, _)| name == &schema.primary_key)
            .map(|(_, v)| v.clone());

        let sql = if row.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", schema.table)
        } else {
            let names: Vec<&str> = row.iter().map(|(n, _)| n.as_str()).collect();
            let placeholders = vec!["?"; row.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                names.join(", "),
                placeholders
            )
        };
        let params: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();

        let conn = self.pool.acquire()?;
        conn.execute(&sql, params_from_iter(params.iter().map(SqlParam)))?;
        Ok(explicit_id.unwrap_or_else(|| Value::Int(conn.last_insert_rowid())))
    }

    fn update(&self, schema: &EntitySchema, id: &Value, changes: RawRow) -> Result<bool, StorageError> {
        let changes: RawRow = changes
            .into_iter()
            .filter(|(name, _)| name != &schema.primary_key && schema.has_column(name))
            .collect();
        if changes.is_empty() {
            let probe = format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?",
                schema.table, schema.primary_key
            );
            let conn = self.pool.acquire()?;
            let found: i64 = conn.query_row(&probe, params_from_iter(std::iter::once(SqlParam(id))), |row| {
                row.get(0)
            })?;
            return Ok(found > 0);
        }

        let assignments: Vec<String> = changes.iter().map(|(n, _)| format!("{} = ?", n)).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            schema.table,
            assignments.join(", "),
            schema.primary_key
        );
        let mut params: Vec<Value> = changes.into_iter().map(|(_, v)| v).collect();
        params.push(id.clone());

        Ok(self.execute(&sql, &params)? > 0)
    }

    fn delete(&self, schema: &EntitySchema, id: &Value) -> Result<bool, StorageError> {
        let sql = format!("DELETE FROM {} WHERE {} = ?", schema.table, schema.primary_key);
        Ok(self.execute(&sql, std::slice::from_ref(id))? > 0)
    }
}
