//! Entity hydration: raw storage rows to typed [`Entity`] values.

use storeq_proto::value::{parse_datetime, timestamp_from_datetime};
use storeq_proto::{Entity, Value};

use super::clause::Projection;
use crate::schema::{ColumnDef, ColumnType, EntitySchema};

/// Hydrate a row with every schema column.
///
/// Missing or unconvertible columns take the declared default (or NULL).
/// Columns that are not part of the schema are dropped.
pub fn hydrate(schema: &EntitySchema, row: &[(String, Value)]) -> Entity {
    let attributes = schema
        .columns
        .iter()
        .map(|column| (column.name.clone(), convert(column, lookup(row, &column.name))))
        .collect();
    Entity::new(schema.primary_key.clone(), attributes)
}

/// Hydrate a row restricted to a projection.
pub fn hydrate_projected(
    schema: &EntitySchema,
    row: &[(String, Value)],
    projection: &Projection,
) -> Entity {
    match projection {
        Projection::All => hydrate(schema, row),
        Projection::Columns(columns) => {
            let attributes = schema
                .columns
                .iter()
                .filter(|c| columns.contains(&c.name))
                .map(|column| (column.name.clone(), convert(column, lookup(row, &column.name))))
                .collect();
            Entity::new(schema.primary_key.clone(), attributes)
        }
    }
}

fn lookup<'a>(row: &'a [(String, Value)], column: &str) -> Option<&'a Value> {
    row.iter().find(|(name, _)| name == column).map(|(_, v)| v)
}

/// Convert a raw value to the column's semantic type.
fn convert(column: &ColumnDef, raw: Option<&Value>) -> Value {
    let Some(raw) = raw else {
        return column.fallback();
    };
    if raw.is_null() {
        return Value::Null;
    }

    let converted = match column.column_type {
        ColumnType::Integer => match raw {
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 => Some(Value::Int(*f as i64)),
            Value::Bool(b) => Some(Value::Int(*b as i64)),
            Value::String(s) => s.trim().parse().ok().map(Value::Int),
            _ => None,
        },
        ColumnType::Float => match raw {
            Value::Float(f) => Some(Value::Float(*f)),
            Value::Int(i) => Some(Value::Float(*i as f64)),
            Value::String(s) => s.trim().parse().ok().map(Value::Float),
            _ => None,
        },
        ColumnType::Bool => match raw {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int(i) => Some(Value::Bool(*i != 0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Some(Value::Bool(true)),
                "0" | "false" | "" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ColumnType::DateTime => match raw {
            Value::Timestamp(t) => Some(Value::Timestamp(*t)),
            // zero dates such as 0000-00-00 00:00:00 mean "no date"
            Value::String(s) => {
                Some(parse_datetime(s).map_or(Value::Null, |dt| Value::Timestamp(timestamp_from_datetime(&dt))))
            }
            Value::Int(secs) => Some(Value::Timestamp(secs.saturating_mul(1_000_000))),
            _ => None,
        },
        ColumnType::Text => Some(raw.clone()),
    };

    converted.unwrap_or_else(|| column.fallback())
}
