//! Typed construction of date query inputs.
//!
//! Date queries travel inside a [`QuerySpec`](crate::QuerySpec) as JSON so
//! that hand-written (and possibly malformed) inputs and typed ones share a
//! single parser. These builders serialize into the accepted shape:
//!
//! ```json
//! { "relation": "OR", "clauses": [ { "column": "date_created", "after": "2024-01-01" } ] }
//! ```

use serde::{Deserialize, Serialize};

/// How sibling date clauses combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    /// Every clause must match.
    #[default]
    And,
    /// Any clause may match.
    Or,
}

impl Relation {
    /// Parse a relation keyword. Anything other than `OR` means `AND`.
    pub fn parse(input: &str) -> Self {
        if input.trim().eq_ignore_ascii_case("or") {
            Relation::Or
        } else {
            Relation::And
        }
    }

    /// SQL keyword for this relation.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Relation::And => "AND",
            Relation::Or => "OR",
        }
    }
}

/// One end of a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateBound {
    /// A date string such as `2024-01-31` or `2024-01-31 08:00:00`.
    Text(String),
    /// Seconds since the Unix epoch.
    Unix(i64),
    /// A calendar period; missing parts widen the period.
    Parts {
        year: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        month: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day: Option<u32>,
    },
}

impl DateBound {
    /// A whole year.
    pub fn year(year: i32) -> Self {
        DateBound::Parts {
            year,
            month: None,
            day: None,
        }
    }

    /// A whole month.
    pub fn month(year: i32, month: u32) -> Self {
        DateBound::Parts {
            year,
            month: Some(month),
            day: None,
        }
    }
}

impl From<&str> for DateBound {
    fn from(v: &str) -> Self {
        DateBound::Text(v.to_string())
    }
}

impl From<String> for DateBound {
    fn from(v: String) -> Self {
        DateBound::Text(v)
    }
}

/// A range predicate over one timestamp column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<DateBound>,
    #[serde(default)]
    pub inclusive: bool,
}

impl DateRange {
    /// Create an empty range on the default column.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a specific timestamp column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Upper bound.
    pub fn before(mut self, bound: impl Into<DateBound>) -> Self {
        self.before = Some(bound.into());
        self
    }

    /// Lower bound.
    pub fn after(mut self, bound: impl Into<DateBound>) -> Self {
        self.after = Some(bound.into());
        self
    }

    /// Make both bounds inclusive.
    pub fn inclusive(mut self) -> Self {
        self.inclusive = true;
        self
    }
}

/// A clause of a date query: a range or a nested group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateClause {
    /// Nested group with its own relation.
    Group(DateQuery),
    /// Single range.
    Range(DateRange),
}

/// A compound date query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateQuery {
    #[serde(default)]
    pub relation: Relation,
    pub clauses: Vec<DateClause>,
}

impl DateQuery {
    /// All clauses must match.
    pub fn all(clauses: impl IntoIterator<Item = DateClause>) -> Self {
        Self {
            relation: Relation::And,
            clauses: clauses.into_iter().collect(),
        }
    }

    /// Any clause may match.
    pub fn any(clauses: impl IntoIterator<Item = DateClause>) -> Self {
        Self {
            relation: Relation::Or,
            clauses: clauses.into_iter().collect(),
        }
    }

    /// Serialize into the JSON shape carried by a query specification.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<DateRange> for DateClause {
    fn from(range: DateRange) -> Self {
        DateClause::Range(range)
    }
}

impl From<DateQuery> for DateClause {
    fn from(query: DateQuery) -> Self {
        DateClause::Group(query)
    }
}

impl From<DateRange> for DateQuery {
    fn from(range: DateRange) -> Self {
        DateQuery::all([DateClause::Range(range)])
    }
}
