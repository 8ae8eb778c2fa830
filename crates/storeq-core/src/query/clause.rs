//! Clause builder: turns a [`QuerySpec`] into a structured, backend-neutral
//! query against one [`EntitySchema`].
//!
//! Rendering never fails. Inputs that cannot be used (a malformed date query,
//! a value that cannot be coerced to its column type) are dropped and reported
//! in [`RenderedClause::diagnostics`], so a bad fragment can only narrow the
//! query by being left out, never widen it into something else.

use storeq_proto::spec::{DATE_QUERY_KEY, DATE_QUERY_SUFFIX, IN_SUFFIX, NOT_IN_SUFFIX};
use storeq_proto::value::{format_datetime, parse_datetime};
use storeq_proto::{Fields, FilterValue, OrderBy, QuerySpec, Value};
use tracing::debug;

use super::date::DateQueryParser;
use crate::config::EngineConfig;
use crate::error::BuildError;
use crate::schema::{ColumnDef, ColumnType, EntitySchema};

/// A single condition over the columns of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`.
    Eq {
        column: String,
        value: Value,
        case_insensitive: bool,
    },
    /// `column IN (values)`.
    In {
        column: String,
        values: Vec<Value>,
        case_insensitive: bool,
    },
    /// `column NOT IN (values)`.
    NotIn {
        column: String,
        values: Vec<Value>,
        case_insensitive: bool,
    },
    /// `column < value`.
    Lt { column: String, value: Value },
    /// `column <= value`.
    Le { column: String, value: Value },
    /// `column > value`.
    Gt { column: String, value: Value },
    /// `column >= value`.
    Ge { column: String, value: Value },
    /// Case-insensitive `LIKE`. The pattern is lower-cased and escaped.
    Like { column: String, pattern: String },
    /// All must hold.
    And(Vec<Predicate>),
    /// At least one must hold.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Combine predicates with AND, collapsing the trivial cases.
    pub fn all(mut predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(Predicate::And(predicates)),
        }
    }

    /// Combine predicates with OR, collapsing the trivial cases.
    pub fn any(mut predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(Predicate::Or(predicates)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    /// Parse a direction. Anything other than `ASC` (any case) is `DESC`.
    pub fn parse(input: &str) -> Self {
        if input.trim().eq_ignore_ascii_case("asc") {
            OrderDirection::Asc
        } else {
            OrderDirection::Desc
        }
    }

    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub column: String,
    pub direction: OrderDirection,
}

/// Columns to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Every column.
    All,
    /// These columns, primary key first.
    Columns(Vec<String>),
}

impl Projection {
    /// Check if every column is fetched.
    pub fn is_all(&self) -> bool {
        matches!(self, Projection::All)
    }
}

/// The structured query produced by [`ClauseBuilder::render`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedClause {
    /// Table to query.
    pub table: String,
    /// Table alias used to qualify column references.
    pub alias: Option<String>,
    /// Columns to fetch.
    pub projection: Projection,
    /// Conditions, implicitly ANDed.
    pub predicates: Vec<Predicate>,
    /// Sort terms in priority order.
    pub order_by: Vec<OrderSpec>,
    /// Page size; None means unbounded.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: u64,
    /// Count matches instead of fetching rows.
    pub count: bool,
    /// Inputs that were dropped while rendering.
    pub diagnostics: Vec<BuildError>,
}

impl RenderedClause {
    /// A clause matching every row of the schema's table.
    pub fn scan(schema: &EntitySchema) -> Self {
        Self {
            table: schema.table.clone(),
            alias: schema.alias.clone(),
            projection: Projection::All,
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            count: false,
            diagnostics: Vec::new(),
        }
    }

    /// All conditions as a single predicate.
    pub fn filter(&self) -> Option<Predicate> {
        Predicate::all(self.predicates.clone())
    }

    /// The same conditions without ordering or pagination.
    pub fn unpaged(&self) -> Self {
        Self {
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            ..self.clone()
        }
    }
}

/// Builds [`RenderedClause`]s for one schema.
pub struct ClauseBuilder<'a> {
    schema: &'a EntitySchema,
    default_number: i64,
    max_number: Option<u64>,
}

impl<'a> ClauseBuilder<'a> {
    /// Create a builder with the default page size.
    pub fn new(schema: &'a EntitySchema) -> Self {
        let defaults = EngineConfig::default();
        Self {
            schema,
            default_number: defaults.default_number,
            max_number: defaults.max_number,
        }
    }

    /// Apply page size settings from an engine configuration.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.default_number = config.default_number;
        self.max_number = config.max_number;
        self
    }

    /// Render a specification.
    pub fn render(&self, spec: &QuerySpec) -> RenderedClause {
        let mut clause = RenderedClause::scan(self.schema);
        clause.count = spec.count;

        self.column_filters(spec, &mut clause);
        self.date_filters(spec, &mut clause);
        if let Some(search) = self.search(spec) {
            clause.predicates.push(search);
        }

        if !spec.count {
            clause.projection = self.projection(&spec.fields);
            clause.order_by = self.ordering(spec);
            clause.limit = self.limit(spec);
            clause.offset = spec.offset.unwrap_or(0);
        }

        for key in spec.extra.keys() {
            debug!(key = %key, "ignoring unrecognized query key");
        }

        clause
    }

    /// Columns fetched for a projection.
    pub fn projection(&self, fields: &Fields) -> Projection {
        let pk = &self.schema.primary_key;
        match fields {
            Fields::All => Projection::All,
            Fields::Ids => Projection::Columns(vec![pk.clone()]),
            Fields::Columns(requested) => {
                let mut columns = vec![pk.clone()];
                for name in requested {
                    if !self.schema.has_column(name) {
                        debug!(column = %name, "ignoring unknown projected column");
                        continue;
                    }
                    if !columns.contains(name) {
                        columns.push(name.clone());
                    }
                }
                Projection::Columns(columns)
            }
        }
    }

    fn column_filters(&self, spec: &QuerySpec, clause: &mut RenderedClause) {
        for column in &self.schema.columns {
            let name = &column.name;
            let case_insensitive = column.case_insensitive;

            // An exact match makes the set filters on the same column redundant.
            let exact = spec
                .filters
                .get(name)
                .cloned()
                .or_else(|| self.query_named_filter(spec, column))
                .filter(|filter| !is_unset(filter));
            if let Some(filter) = &exact {
                match filter {
                    FilterValue::One(value) => match coerce(column, value) {
                        Some(value) => clause.predicates.push(Predicate::Eq {
                            column: name.clone(),
                            value,
                            case_insensitive,
                        }),
                        None => clause.diagnostics.push(invalid_value(name, value)),
                    },
                    FilterValue::Many(_) => clause.diagnostics.push(BuildError::InvalidFilterValue {
                        key: name.clone(),
                        reason: "exact match expects a single value".to_string(),
                    }),
                }
                continue;
            }

            let in_key = format!("{}{}", name, IN_SUFFIX);
            if let Some(filter) = spec.filters.get(&in_key) {
                let values = coerce_set(column, &in_key, filter, &mut clause.diagnostics);
                if !values.is_empty() {
                    clause.predicates.push(Predicate::In {
                        column: name.clone(),
                        values,
                        case_insensitive,
                    });
                }
            }

            let not_in_key = format!("{}{}", name, NOT_IN_SUFFIX);
            if let Some(filter) = spec.filters.get(&not_in_key) {
                let values = coerce_set(column, &not_in_key, filter, &mut clause.diagnostics);
                if !values.is_empty() {
                    clause.predicates.push(Predicate::NotIn {
                        column: name.clone(),
                        values,
                        case_insensitive,
                    });
                }
            }
        }

        for key in spec.filters.keys() {
            if self.filter_column(key).is_none() {
                debug!(key = %key, "ignoring filter on unknown column");
            }
        }
    }

    /// Exact filter on a non-date column whose name ends in `_query`. Such
    /// keys are parsed as date queries, so the value is read back from there.
    fn query_named_filter(&self, spec: &QuerySpec, column: &ColumnDef) -> Option<FilterValue> {
        if column.column_type.is_datetime() || !column.name.ends_with(DATE_QUERY_SUFFIX) {
            return None;
        }
        let raw = spec.date_queries.get(&column.name)?;
        match raw {
            serde_json::Value::Array(items) => Some(FilterValue::Many(
                items.iter().filter_map(Value::from_json).collect(),
            )),
            other => Value::from_json(other).map(FilterValue::One),
        }
    }

    fn filter_column(&self, key: &str) -> Option<&ColumnDef> {
        let name = key
            .strip_suffix(NOT_IN_SUFFIX)
            .or_else(|| key.strip_suffix(IN_SUFFIX))
            .unwrap_or(key);
        self.schema.column(name)
    }

    fn date_filters(&self, spec: &QuerySpec, clause: &mut RenderedClause) {
        for (key, raw) in &spec.date_queries {
            let default_column = if key == DATE_QUERY_KEY {
                self.schema.primary_date_column().map(|c| c.name.as_str())
            } else {
                let name = key.strip_suffix(DATE_QUERY_SUFFIX).unwrap_or(key);
                match self.schema.column(name) {
                    Some(column) if column.column_type.is_datetime() => Some(column.name.as_str()),
                    // read as an exact filter by column_filters
                    _ if self.schema.has_column(key) => continue,
                    _ => {
                        debug!(key = %key, "ignoring date query on unknown column");
                        continue;
                    }
                }
            };

            let parser = DateQueryParser::new(self.schema, key, default_column);
            if let Some(predicate) = parser.parse(raw, &mut clause.diagnostics) {
                clause.predicates.push(predicate);
            }
        }
    }

    fn search(&self, spec: &QuerySpec) -> Option<Predicate> {
        let term = spec.search.as_deref()?.trim();
        if term.is_empty() {
            return None;
        }

        let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
        let columns: Vec<Predicate> = self
            .schema
            .searchable_columns()
            .filter(|c| match &spec.search_columns {
                Some(only) => only.iter().any(|name| name == &c.name),
                None => true,
            })
            .map(|c| Predicate::Like {
                column: c.name.clone(),
                pattern: pattern.clone(),
            })
            .collect();

        if columns.is_empty() {
            debug!(term = %term, "no searchable columns, ignoring search");
        }
        Predicate::any(columns)
    }

    fn ordering(&self, spec: &QuerySpec) -> Vec<OrderSpec> {
        let direction = spec
            .order
            .as_deref()
            .map(OrderDirection::parse)
            .unwrap_or_default();
        let pk = &self.schema.primary_key;

        let requested = match &spec.orderby {
            Some(OrderBy::Disabled) => return Vec::new(),
            Some(OrderBy::Columns(columns)) => columns.clone(),
            None => vec![pk.clone()],
        };

        let mut order_by: Vec<OrderSpec> = Vec::new();
        for name in requested {
            let sortable = name == *pk
                || self.schema.column(&name).map(|c| c.sortable).unwrap_or(false);
            if !sortable {
                debug!(column = %name, "ignoring unsortable orderby column");
                continue;
            }
            if order_by.iter().any(|o| o.column == name) {
                continue;
            }
            order_by.push(OrderSpec {
                column: name,
                direction,
            });
        }

        if order_by.is_empty() {
            order_by.push(OrderSpec {
                column: pk.clone(),
                direction,
            });
        }
        order_by
    }

    fn limit(&self, spec: &QuerySpec) -> Option<u64> {
        let number = spec.number.unwrap_or(self.default_number);
        if number <= 0 {
            return self.max_number;
        }
        let number = number as u64;
        Some(match self.max_number {
            Some(max) => number.min(max),
            None => number,
        })
    }
}

/// Escape `%`, `_` and `\` so a term matches literally inside a LIKE pattern.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Coerce a filter value to the type of its column.
pub(crate) fn coerce(column: &ColumnDef, value: &Value) -> Option<Value> {
    match column.column_type {
        ColumnType::Integer => match value {
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 => Some(Value::Int(*f as i64)),
            Value::Bool(b) => Some(Value::Int(*b as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().map(Value::Int).or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| Value::Int(f as i64))
                })
            }
            _ => None,
        },
        ColumnType::Float => match value {
            Value::Int(i) => Some(Value::Float(*i as f64)),
            Value::Float(f) => Some(Value::Float(*f)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
            _ => None,
        },
        ColumnType::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int(0) => Some(Value::Bool(false)),
            Value::Int(1) => Some(Value::Bool(true)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Some(Value::Bool(true)),
                "0" | "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ColumnType::Text => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Int(i) => Some(Value::String(i.to_string())),
            Value::Float(f) => Some(Value::String(f.to_string())),
            Value::Timestamp(_) => value
                .as_datetime()
                .map(|dt| Value::String(format_datetime(&dt))),
            _ => None,
        },
        ColumnType::DateTime => match value {
            Value::String(s) => parse_datetime(s).map(|dt| Value::String(format_datetime(&dt))),
            Value::Timestamp(_) => value
                .as_datetime()
                .map(|dt| Value::String(format_datetime(&dt))),
            _ => None,
        },
    }
}

/// An exact-match value that means "no filter": NULL or the empty string.
pub(crate) fn is_unset(filter: &FilterValue) -> bool {
    match filter {
        FilterValue::One(Value::Null) => true,
        FilterValue::One(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn coerce_set(
    column: &ColumnDef,
    key: &str,
    filter: &FilterValue,
    diagnostics: &mut Vec<BuildError>,
) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::new();
    for value in filter.values() {
        match coerce(column, &value) {
            Some(v) => {
                if !values.contains(&v) {
                    values.push(v);
                }
            }
            None => diagnostics.push(invalid_value(key, &value)),
        }
    }
    values
}

fn invalid_value(key: &str, value: &Value) -> BuildError {
    BuildError::InvalidFilterValue {
        key: key.to_string(),
        reason: format!("cannot use {} value {}", value.type_name(), value),
    }
}
