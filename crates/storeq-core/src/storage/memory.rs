//! In-memory storage backend.

use std::collections::HashMap;

use parking_lot::RwLock;
use storeq_proto::Value;

use super::{RawRow, Storage};
use crate::error::StorageError;
use crate::query::clause::{OrderDirection, OrderSpec, Projection, RenderedClause};
use crate::query::filter::PredicateEvaluator;
use crate::schema::EntitySchema;

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<RawRow>,
    next_id: i64,
}

/// Row store held in process memory.
///
/// Evaluates clauses with the same SQL semantics the SQLite backend has,
/// which makes it the reference backend in tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Does nothing if it already exists.
    pub fn create_table(&self, schema: &EntitySchema) {
        self.tables
            .write()
            .entry(schema.table.clone())
            .or_insert_with(|| MemoryTable {
                rows: Vec::new(),
                next_id: 1,
            });
    }

    /// Builder form of [`MemoryStorage::create_table`].
    pub fn with_table(self, schema: &EntitySchema) -> Self {
        self.create_table(schema);
        self
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    fn matching(&self, clause: &RenderedClause) -> Result<Vec<RawRow>, StorageError> {
        let tables = self.tables.read();
        let table = tables
            .get(&clause.table)
            .ok_or_else(|| StorageError::UnknownTable(clause.table.clone()))?;
        let filter = clause.filter();

        Ok(table
            .rows
            .iter()
            .filter(|row| match &filter {
                Some(predicate) => PredicateEvaluator::evaluate(predicate, row),
                None => true,
            })
            .cloned()
            .collect())
    }

    fn sort_rows(rows: &mut [RawRow], order_by: &[OrderSpec]) {
        if order_by.is_empty() {
            return;
        }

        rows.sort_by(|a, b| {
            for spec in order_by {
                let a_val = lookup(a, &spec.column);
                let b_val = lookup(b, &spec.column);

                let cmp = PredicateEvaluator::compare_for_sort(a_val, b_val);
                let cmp = match spec.direction {
                    OrderDirection::Asc => cmp,
                    OrderDirection::Desc => cmp.reverse(),
                };

                if cmp.is_ne() {
                    return cmp;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    fn apply_pagination(rows: &mut Vec<RawRow>, limit: Option<u64>, offset: u64) {
        let offset = offset as usize;
        if offset > 0 {
            if offset >= rows.len() {
                rows.clear();
                return;
            }
            rows.drain(0..offset);
        }

        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
    }

    fn project(row: RawRow, projection: &Projection) -> RawRow {
        match projection {
            Projection::All => row,
            Projection::Columns(columns) => row
                .into_iter()
                .filter(|(name, _)| columns.contains(name))
                .collect(),
        }
    }
}

fn lookup<'a>(row: &'a [(String, Value)], column: &str) -> Option<&'a Value> {
    row.iter().find(|(name, _)| name == column).map(|(_, v)| v)
}

fn find_row(table: &MemoryTable, pk: &str, id: &Value) -> Option<usize> {
    table.rows.iter().position(|row| {
        lookup(row, pk)
            .and_then(|v| PredicateEvaluator::compare_values(v, id))
            .is_some_and(|ord| ord.is_eq())
    })
}

impl Storage for MemoryStorage {
    fn select(&self, clause: &RenderedClause) -> Result<Vec<RawRow>, StorageError> {
        let mut rows = self.matching(clause)?;
        Self::sort_rows(&mut rows, &clause.order_by);
        Self::apply_pagination(&mut rows, clause.limit, clause.offset);
        Ok(rows
            .into_iter()
            .map(|row| Self::project(row, &clause.projection))
            .collect())
    }

    fn count(&self, clause: &RenderedClause) -> Result<u64, StorageError> {
        Ok(self.matching(clause)?.len() as u64)
    }

    fn insert(&self, schema: &EntitySchema, mut row: RawRow) -> Result<Value, StorageError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&schema.table)
            .ok_or_else(|| StorageError::UnknownTable(schema.table.clone()))?;
        let pk = &schema.primary_key;

        row.retain(|(name, _)| schema.has_column(name));

        let explicit = lookup(&row, pk).filter(|v| !v.is_null()).cloned();
        let id = match explicit {
            Some(id) => {
                if find_row(table, pk, &id).is_some() {
                    return Err(StorageError::InvalidRow(format!(
                        "duplicate primary key {} in {}",
                        id, schema.table
                    )));
                }
                if let Some(n) = id.as_i64() {
                    table.next_id = table.next_id.max(n.saturating_add(1));
                }
                id
            }
            None => {
                let id = Value::Int(table.next_id);
                table.next_id += 1;
                row.retain(|(name, _)| name != pk);
                row.insert(0, (pk.clone(), id.clone()));
                id
            }
        };

        table.rows.push(row);
        Ok(id)
    }

    fn update(&self, schema: &EntitySchema, id: &Value, changes: RawRow) -> Result<bool, StorageError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&schema.table)
            .ok_or_else(|| StorageError::UnknownTable(schema.table.clone()))?;
        let Some(index) = find_row(table, &schema.primary_key, id) else {
            return Ok(false);
        };

        let row = &mut table.rows[index];
        for (name, value) in changes {
            if name == schema.primary_key || !schema.has_column(&name) {
                continue;
            }
            match row.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => *existing = value,
                None => row.push((name, value)),
            }
        }
        Ok(true)
    }

    fn delete(&self, schema: &EntitySchema, id: &Value) -> Result<bool, StorageError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&schema.table)
            .ok_or_else(|| StorageError::UnknownTable(schema.table.clone()))?;
        match find_row(table, &schema.primary_key, id) {
            Some(index) => {
                table.rows.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
