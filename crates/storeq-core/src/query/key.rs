//! Cache key derivation.
//!
//! A list key is the blake3 hash of a canonical encoding of the normalized
//! specification, mixed with the cache group. Normalization applies the same
//! defaults the clause builder applies, so `{}` and `{"number": 100}` share a
//! key, and canonical encoding sorts object keys and set values, so insertion
//! order never matters. Empty or null exact filters are dropped, as the
//! clause builder drops them. `update_cache` and unrecognized keys do not affect
//! the rows returned and are excluded.

use serde_json::{json, Map, Value as Json};
use storeq_proto::spec::{IN_SUFFIX, NOT_IN_SUFFIX};
use storeq_proto::{Fields, FilterValue, OrderBy, QuerySpec, Value};

use super::clause::{is_unset, OrderDirection};
use crate::config::EngineConfig;
use crate::schema::EntitySchema;

/// Namespace suffix for list and count entries of a group.
pub const QUERY_NAMESPACE_SUFFIX: &str = ":queries";

/// Namespace holding list and count entries for a group.
pub fn query_namespace(group: &str) -> String {
    format!("{}{}", group, QUERY_NAMESPACE_SUFFIX)
}

/// Key of a single item within its group.
pub fn item_key(group: &str, id: &Value) -> String {
    format!("{}:{}", group, id)
}

/// Key of a list (or count) query.
pub fn list_key(schema: &EntitySchema, config: &EngineConfig, spec: &QuerySpec) -> String {
    let normalized = normalize(schema, config, spec);
    let mut canonical = String::new();
    write_canonical(&normalized, &mut canonical);

    let mut hasher = blake3::Hasher::new();
    hasher.update(schema.cache_group.as_bytes());
    hasher.update(&[0]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Normalized JSON form of a specification.
pub fn normalize(schema: &EntitySchema, config: &EngineConfig, spec: &QuerySpec) -> Json {
    let filters: Map<String, Json> = spec
        .filters
        .iter()
        .filter_map(|(key, value)| {
            let is_set = key.ends_with(IN_SUFFIX) || key.ends_with(NOT_IN_SUFFIX);
            if !is_set && is_unset(value) {
                return None;
            }
            let encoded = match value {
                FilterValue::Many(values) if is_set => sorted_set(values),
                FilterValue::One(v) if is_set => sorted_set(std::slice::from_ref(v)),
                FilterValue::One(v) => v.to_json(),
                FilterValue::Many(values) => Json::Array(values.iter().map(Value::to_json).collect()),
            };
            Some((key.clone(), encoded))
        })
        .collect();

    let search = spec
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let search_columns = spec.search_columns.as_ref().map(|columns| {
        let mut columns = columns.clone();
        columns.sort();
        columns.dedup();
        columns
    });

    let fields = match &spec.fields {
        Fields::All => json!("all"),
        Fields::Ids => json!("ids"),
        Fields::Columns(columns) => {
            let mut columns = columns.clone();
            columns.sort();
            columns.dedup();
            json!(columns)
        }
    };

    let number = spec.number.unwrap_or(config.default_number).max(0);
    let orderby = match &spec.orderby {
        Some(OrderBy::Disabled) => json!("none"),
        Some(OrderBy::Columns(columns)) => json!(columns),
        None => json!([schema.primary_key]),
    };
    let order = spec
        .order
        .as_deref()
        .map(OrderDirection::parse)
        .unwrap_or_default()
        .as_sql();

    json!({
        "filters": filters,
        "date_queries": spec.date_queries,
        "search": search,
        "search_columns": search_columns,
        "count": spec.count,
        "fields": fields,
        "number": number,
        "offset": spec.offset.unwrap_or(0),
        "orderby": orderby,
        "order": order,
        "no_found_rows": spec.no_found_rows.unwrap_or(true),
    })
}

fn sorted_set(values: &[Value]) -> Json {
    let mut encoded: Vec<Json> = values.iter().map(Value::to_json).collect();
    encoded.sort_by_key(|v| v.to_string());
    encoded.dedup();
    Json::Array(encoded)
}

/// Write JSON with object keys in sorted order.
fn write_canonical(value: &Json, out: &mut String) {
    match value {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Json::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
