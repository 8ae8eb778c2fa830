//! Query specification: the caller-facing description of a list query.
//!
//! A [`QuerySpec`] is a mapping of recognized keys to values. Per-column keys
//! (`F`, `F__in`, `F__not_in`) are kept in a filter map because the set of
//! columns is only known once a schema is applied; everything else is a typed
//! global option. Keys that are neither are parked in [`QuerySpec::extra`] and
//! never change query behavior.

use std::collections::BTreeMap;

use crate::date::DateQuery;
use crate::error::Error;
use crate::value::Value;

/// Suffix marking a set-membership filter.
pub const IN_SUFFIX: &str = "__in";

/// Suffix marking a set-exclusion filter.
pub const NOT_IN_SUFFIX: &str = "__not_in";

/// Key of the generic date query.
pub const DATE_QUERY_KEY: &str = "date_query";

/// Suffix of per-column date query keys (`date_created_query`).
pub const DATE_QUERY_SUFFIX: &str = "_query";

/// Default page size.
pub const DEFAULT_NUMBER: i64 = 100;

/// Value attached to a per-column filter key.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// A single scalar.
    One(Value),
    /// A list of scalars.
    Many(Vec<Value>),
}

impl FilterValue {
    /// View as a list, wrapping a single scalar.
    pub fn values(&self) -> Vec<Value> {
        match self {
            FilterValue::One(v) => vec![v.clone()],
            FilterValue::Many(vs) => vs.clone(),
        }
    }
}

/// Which columns to project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fields {
    /// Every column of the schema.
    #[default]
    All,
    /// Only the primary key.
    Ids,
    /// The listed columns (the primary key is always added).
    Columns(Vec<String>),
}

/// Requested ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    /// Order by these columns, in priority order.
    Columns(Vec<String>),
    /// No ORDER BY clause at all.
    Disabled,
}

/// A list query specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// Per-column filters keyed by `F`, `F__in` or `F__not_in`.
    pub filters: BTreeMap<String, FilterValue>,
    /// Date queries keyed by `date_query` or `<column>_query`, in raw form.
    pub date_queries: BTreeMap<String, serde_json::Value>,
    /// Free-text search term.
    pub search: Option<String>,
    /// Restrict search to these columns.
    pub search_columns: Option<Vec<String>>,
    /// Return a count instead of rows.
    pub count: bool,
    /// Projection.
    pub fields: Fields,
    /// Page size; `<= 0` means unbounded.
    pub number: Option<i64>,
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Ordering columns.
    pub orderby: Option<OrderBy>,
    /// `ASC` or `DESC`.
    pub order: Option<String>,
    /// Skip computing the total number of matches.
    pub no_found_rows: Option<bool>,
    /// Prime the per-item cache with fetched rows.
    pub update_cache: bool,
    /// Unrecognized or malformed keys, kept for logging only.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl QuerySpec {
    /// Create an empty specification (all defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a specification from a JSON object.
    ///
    /// Only a non-object input is an error. Malformed values for recognized
    /// keys fall back to defaults and are recorded in `extra`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, Error> {
        let object = json.as_object().ok_or_else(|| {
            Error::InvalidSpec(format!("expected an object, got {}", json_kind(json)))
        })?;

        let mut spec = QuerySpec::new();
        for (key, value) in object {
            if !spec.apply_json_key(key, value) {
                spec.extra.insert(key.clone(), value.clone());
            }
        }
        Ok(spec)
    }

    /// Parse a specification from JSON text.
    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        let json: serde_json::Value = serde_json::from_str(input)?;
        Self::from_json(&json)
    }

    /// Apply one key. Returns false if the key or its value was not usable.
    fn apply_json_key(&mut self, key: &str, value: &serde_json::Value) -> bool {
        match key {
            "search" => match value {
                serde_json::Value::String(s) => {
                    self.search = Some(s.clone());
                    true
                }
                serde_json::Value::Number(n) => {
                    self.search = Some(n.to_string());
                    true
                }
                _ => false,
            },
            "search_columns" => match string_list(value) {
                Some(columns) => {
                    self.search_columns = Some(columns);
                    true
                }
                None => false,
            },
            "count" => set_flag(value, |b| self.count = b),
            "update_cache" => set_flag(value, |b| self.update_cache = b),
            "no_found_rows" => set_flag(value, |b| self.no_found_rows = Some(b)),
            "fields" => match parse_fields(value) {
                Some(fields) => {
                    self.fields = fields;
                    true
                }
                None => false,
            },
            "number" => match json_int(value) {
                Some(n) => {
                    self.number = Some(n);
                    true
                }
                None => false,
            },
            "offset" => match json_int(value) {
                Some(n) if n >= 0 => {
                    self.offset = Some(n as u64);
                    true
                }
                _ => false,
            },
            "orderby" => match parse_orderby(value) {
                Some(orderby) => {
                    self.orderby = Some(orderby);
                    true
                }
                None => false,
            },
            "order" => match value.as_str() {
                Some(s) => {
                    self.order = Some(s.to_string());
                    true
                }
                None => false,
            },
            _ if is_date_query_key(key) => {
                self.date_queries.insert(key.to_string(), value.clone());
                true
            }
            _ => match parse_filter_value(value) {
                Some(filter) => {
                    self.filters.insert(key.to_string(), filter);
                    true
                }
                None => false,
            },
        }
    }

    /// Exact-match filter on a column.
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters
            .insert(column.into(), FilterValue::One(value.into()));
        self
    }

    /// Set-membership filter on a column.
    pub fn filter_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.insert(
            format!("{}{}", column, IN_SUFFIX),
            FilterValue::Many(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Set-exclusion filter on a column.
    pub fn filter_not_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.insert(
            format!("{}{}", column, NOT_IN_SUFFIX),
            FilterValue::Many(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Attach a date query under `date_query` or `<column>_query`.
    pub fn with_date_query(mut self, key: impl Into<String>, query: impl Into<DateQuery>) -> Self {
        self.date_queries.insert(key.into(), query.into().to_json());
        self
    }

    /// Attach a raw (untyped) date query.
    pub fn with_raw_date_query(mut self, key: impl Into<String>, raw: serde_json::Value) -> Self {
        self.date_queries.insert(key.into(), raw);
        self
    }

    /// Free-text search.
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Restrict the search to some columns.
    pub fn with_search_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.search_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Return only a count.
    pub fn count_only(mut self) -> Self {
        self.count = true;
        self
    }

    /// Set the projection.
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Set the page size; `<= 0` is unbounded.
    pub fn with_number(mut self, number: i64) -> Self {
        self.number = Some(number);
        self
    }

    /// Set the number of rows to skip.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order by a single column.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.orderby = Some(OrderBy::Columns(vec![column.into()]));
        self
    }

    /// Order by several columns.
    pub fn order_by_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.orderby = Some(OrderBy::Columns(
            columns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Disable ordering.
    pub fn without_order(mut self) -> Self {
        self.orderby = Some(OrderBy::Disabled);
        self
    }

    /// Set the direction (`ASC` / `DESC`).
    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Compute the total number of matches.
    pub fn with_found_rows(mut self) -> Self {
        self.no_found_rows = Some(false);
        self
    }

    /// Prime the per-item cache after fetching.
    pub fn with_update_cache(mut self) -> Self {
        self.update_cache = true;
        self
    }
}

/// Check whether a key names a date query.
pub fn is_date_query_key(key: &str) -> bool {
    key == DATE_QUERY_KEY || (key.len() > DATE_QUERY_SUFFIX.len() && key.ends_with(DATE_QUERY_SUFFIX))
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn set_flag(value: &serde_json::Value, mut apply: impl FnMut(bool)) -> bool {
    match json_bool(value) {
        Some(b) => {
            apply(b);
            true
        }
        None => false,
    }
}

fn json_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::String(s) => Some(split_list(s)),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(|s| s.trim().to_string()))
            .collect(),
        _ => None,
    }
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_fields(value: &serde_json::Value) -> Option<Fields> {
    match value {
        serde_json::Value::Null => Some(Fields::All),
        serde_json::Value::String(s) => match s.trim() {
            "" | "all" => Some(Fields::All),
            "ids" => Some(Fields::Ids),
            other => Some(Fields::Columns(split_list(other))),
        },
        serde_json::Value::Array(_) => string_list(value).map(|columns| {
            if columns.is_empty() {
                Fields::All
            } else {
                Fields::Columns(columns)
            }
        }),
        _ => None,
    }
}

fn parse_orderby(value: &serde_json::Value) -> Option<OrderBy> {
    match value {
        serde_json::Value::Bool(false) => Some(OrderBy::Disabled),
        serde_json::Value::String(s) => {
            let columns = split_list(s);
            if columns.is_empty() || (columns.len() == 1 && columns[0] == "none") {
                Some(OrderBy::Disabled)
            } else {
                Some(OrderBy::Columns(columns))
            }
        }
        serde_json::Value::Array(_) => string_list(value).map(|columns| {
            if columns.is_empty() {
                OrderBy::Disabled
            } else {
                OrderBy::Columns(columns)
            }
        }),
        _ => None,
    }
}

fn parse_filter_value(value: &serde_json::Value) -> Option<FilterValue> {
    match value {
        serde_json::Value::Array(items) => Some(FilterValue::Many(
            items.iter().filter_map(Value::from_json).collect(),
        )),
        other => Value::from_json(other).map(FilterValue::One),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::DateRange;
    use serde_json::json;

    #[test]
    fn test_from_json_recognized_keys() {
        let spec = QuerySpec::from_json(&json!({
            "order_id": 5,
            "country__in": ["US", "PT"],
            "search": "Main St",
            "number": 10,
            "offset": "20",
            "orderby": "date_created, id",
            "order": "asc",
            "no_found_rows": false,
            "update_cache": 1,
            "fields": "ids",
        }))
        .unwrap();

        assert_eq!(spec.filters.get("order_id"), Some(&FilterValue::One(Value::Int(5))));
        assert_eq!(
            spec.filters.get("country__in"),
            Some(&FilterValue::Many(vec!["US".into(), "PT".into()]))
        );
        assert_eq!(spec.search.as_deref(), Some("Main St"));
        assert_eq!(spec.number, Some(10));
        assert_eq!(spec.offset, Some(20));
        assert_eq!(
            spec.orderby,
            Some(OrderBy::Columns(vec!["date_created".into(), "id".into()]))
        );
        assert_eq!(spec.order.as_deref(), Some("asc"));
        assert_eq!(spec.no_found_rows, Some(false));
        assert!(spec.update_cache);
        assert_eq!(spec.fields, Fields::Ids);
        assert!(spec.extra.is_empty());
    }

    #[test]
    fn test_malformed_globals_fall_back() {
        let spec = QuerySpec::from_json(&json!({
            "number": "lots",
            "offset": -3,
            "count": "maybe",
            "orderby": 12,
        }))
        .unwrap();

        assert_eq!(spec.number, None);
        assert_eq!(spec.offset, None);
        assert!(!spec.count);
        assert_eq!(spec.orderby, None);
        assert_eq!(spec.extra.len(), 4);
    }

    #[test]
    fn test_orderby_disable_forms() {
        for raw in [json!("none"), json!(false), json!([]), json!("")] {
            let spec = QuerySpec::from_json(&json!({ "orderby": raw })).unwrap();
            assert_eq!(spec.orderby, Some(OrderBy::Disabled));
        }
    }

    #[test]
    fn test_date_query_keys_kept_raw() {
        let spec = QuerySpec::from_json(&json!({
            "date_query": { "after": "2024-01-01" },
            "date_created_query": "garbage",
        }))
        .unwrap();

        assert_eq!(spec.date_queries.len(), 2);
        assert_eq!(spec.date_queries["date_created_query"], json!("garbage"));
    }

    #[test]
    fn test_object_filter_value_goes_to_extra() {
        let spec = QuerySpec::from_json(&json!({ "city": { "nested": true } })).unwrap();
        assert!(spec.filters.is_empty());
        assert!(spec.extra.contains_key("city"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            QuerySpec::from_json(&json!([1, 2, 3])),
            Err(Error::InvalidSpec(_))
        ));
        assert!(QuerySpec::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_builder() {
        let spec = QuerySpec::new()
            .filter("order_id", 5)
            .filter_in("city", ["Lisbon", "Porto"])
            .with_date_query("date_created_query", DateRange::new().after("2024-01-01"))
            .with_number(0)
            .without_order();

        assert_eq!(spec.filters.len(), 2);
        assert!(spec.filters.contains_key("city__in"));
        assert!(spec.date_queries.contains_key("date_created_query"));
        assert_eq!(spec.number, Some(0));
        assert_eq!(spec.orderby, Some(OrderBy::Disabled));
    }

    #[test]
    fn test_is_date_query_key() {
        assert!(is_date_query_key("date_query"));
        assert!(is_date_query_key("date_modified_query"));
        assert!(!is_date_query_key("_query"));
        assert!(!is_date_query_key("order_id"));
    }
}
