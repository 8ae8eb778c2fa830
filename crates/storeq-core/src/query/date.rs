//! Date query parsing.
//!
//! A date query is either a single range (`{"column", "after", "before",
//! "inclusive"}`), a group (`{"relation", "clauses": [...]}`), a group written
//! with keyed children (`{"relation": "OR", "0": {...}, "1": {...}}`), or a
//! plain array of clauses (AND). Groups nest. A `column` on a group becomes
//! the default for its children.
//!
//! Bounds are resolved to `YYYY-MM-DD HH:MM:SS` strings. A bound that names a
//! period (a year, a month or a bare day) resolves to the start or the end of
//! that period depending on the comparison, so that `after: 2024` exclusive
//! means "from 2025 on" and `before: 2024-03` inclusive means "through the
//! last second of March".

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value as Json};
use storeq_proto::value::{format_datetime, parse_datetime};
use storeq_proto::{Relation, Value};

use super::clause::Predicate;
use crate::error::BuildError;
use crate::schema::EntitySchema;

const RESERVED_KEYS: [&str; 6] = ["column", "relation", "clauses", "before", "after", "inclusive"];

/// Which end of a period a bound resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Start,
    End,
}

/// A resolved bound: an exact instant or a calendar period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Instant(NaiveDateTime),
    Span {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl Period {
    fn year(year: i32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
        Self::days(start, end)
    }

    fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Self::days(start, next.pred_opt()?)
    }

    fn day(date: NaiveDate) -> Option<Self> {
        Self::days(date, date)
    }

    fn days(first: NaiveDate, last: NaiveDate) -> Option<Self> {
        Some(Period::Span {
            start: first.and_hms_opt(0, 0, 0)?,
            end: last.and_hms_opt(23, 59, 59)?,
        })
    }

    fn from_text(input: &str) -> Option<Self> {
        let input = input.trim();
        let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

        match input.len() {
            4 if digits(input) => Self::year(input.parse().ok()?),
            7 => {
                let (year, month) = input.split_once('-')?;
                if !digits(year) || !digits(month) {
                    return None;
                }
                Self::month(year.parse().ok()?, month.parse().ok()?)
            }
            10 if !input.contains(':') => {
                Self::day(NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?)
            }
            _ => parse_datetime(input).map(Period::Instant),
        }
    }

    fn from_parts(parts: &Map<String, Json>) -> Option<Self> {
        let year = i32::try_from(json_int(parts.get("year")?)?).ok()?;
        let month = match parts.get("month") {
            Some(raw) => Some(u32::try_from(json_int(raw)?).ok()?),
            None => None,
        };
        let day = match parts.get("day") {
            Some(raw) => Some(u32::try_from(json_int(raw)?).ok()?),
            None => None,
        };

        match (month, day) {
            (None, None) => Self::year(year),
            (Some(month), None) => Self::month(year, month),
            (Some(month), Some(day)) => Self::day(NaiveDate::from_ymd_opt(year, month, day)?),
            (None, Some(_)) => None,
        }
    }

    fn edge(&self, edge: Edge) -> NaiveDateTime {
        match (self, edge) {
            (Period::Instant(at), _) => *at,
            (Period::Span { start, .. }, Edge::Start) => *start,
            (Period::Span { end, .. }, Edge::End) => *end,
        }
    }
}

/// Parses the raw value of one date query key into a predicate.
pub(crate) struct DateQueryParser<'a> {
    schema: &'a EntitySchema,
    key: &'a str,
    default_column: Option<&'a str>,
}

impl<'a> DateQueryParser<'a> {
    pub(crate) fn new(schema: &'a EntitySchema, key: &'a str, default_column: Option<&'a str>) -> Self {
        Self {
            schema,
            key,
            default_column,
        }
    }

    /// Parse, recording anything dropped in `diagnostics`.
    pub(crate) fn parse(&self, raw: &Json, diagnostics: &mut Vec<BuildError>) -> Option<Predicate> {
        self.parse_node(raw, self.default_column.map(str::to_string), diagnostics)
    }

    fn parse_node(
        &self,
        raw: &Json,
        default_column: Option<String>,
        diagnostics: &mut Vec<BuildError>,
    ) -> Option<Predicate> {
        match raw {
            Json::Array(children) => {
                self.parse_group(children.iter().collect(), Relation::And, default_column, diagnostics)
            }
            Json::Object(map) => {
                let column = match map.get("column") {
                    None | Some(Json::Null) => default_column,
                    Some(Json::String(name)) => Some(self.date_column(name, diagnostics)?),
                    Some(other) => {
                        diagnostics.push(self.malformed(format!("column must be a string, got {}", other)));
                        return None;
                    }
                };
                let relation = map
                    .get("relation")
                    .and_then(Json::as_str)
                    .map(Relation::parse)
                    .unwrap_or_default();

                if let Some(clauses) = map.get("clauses") {
                    return match clauses {
                        Json::Array(children) => {
                            self.parse_group(children.iter().collect(), relation, column, diagnostics)
                        }
                        _ => {
                            diagnostics.push(self.malformed("clauses must be an array"));
                            None
                        }
                    };
                }

                let children: Vec<&Json> = map
                    .iter()
                    .filter(|(k, v)| !RESERVED_KEYS.contains(&k.as_str()) && (v.is_object() || v.is_array()))
                    .map(|(_, v)| v)
                    .collect();
                if !children.is_empty() {
                    return self.parse_group(children, relation, column, diagnostics);
                }

                self.parse_range(map, column, diagnostics)
            }
            other => {
                diagnostics.push(self.malformed(format!("expected an object or array, got {}", other)));
                None
            }
        }
    }

    fn parse_group(
        &self,
        children: Vec<&Json>,
        relation: Relation,
        default_column: Option<String>,
        diagnostics: &mut Vec<BuildError>,
    ) -> Option<Predicate> {
        if children.is_empty() {
            diagnostics.push(self.malformed("date query has no clauses"));
            return None;
        }

        let predicates: Vec<Predicate> = children
            .into_iter()
            .filter_map(|child| self.parse_node(child, default_column.clone(), diagnostics))
            .collect();

        match relation {
            Relation::And => Predicate::all(predicates),
            Relation::Or => Predicate::any(predicates),
        }
    }

    fn parse_range(
        &self,
        range: &Map<String, Json>,
        column: Option<String>,
        diagnostics: &mut Vec<BuildError>,
    ) -> Option<Predicate> {
        let Some(column) = column else {
            diagnostics.push(self.malformed("no datetime column to apply the range to"));
            return None;
        };

        let inclusive = range.get("inclusive").map(json_truthy).unwrap_or(false);
        let after = range.get("after").filter(|v| !v.is_null());
        let before = range.get("before").filter(|v| !v.is_null());
        if after.is_none() && before.is_none() {
            diagnostics.push(self.malformed("clause has neither before nor after"));
            return None;
        }

        let mut predicates = Vec::with_capacity(2);
        if let Some(raw) = after {
            let edge = if inclusive { Edge::Start } else { Edge::End };
            let value = Value::String(self.resolve(raw, edge, diagnostics)?);
            predicates.push(if inclusive {
                Predicate::Ge {
                    column: column.clone(),
                    value,
                }
            } else {
                Predicate::Gt {
                    column: column.clone(),
                    value,
                }
            });
        }
        if let Some(raw) = before {
            let edge = if inclusive { Edge::End } else { Edge::Start };
            let value = Value::String(self.resolve(raw, edge, diagnostics)?);
            predicates.push(if inclusive {
                Predicate::Le { column, value }
            } else {
                Predicate::Lt { column, value }
            });
        }

        Predicate::all(predicates)
    }

    fn resolve(&self, raw: &Json, edge: Edge, diagnostics: &mut Vec<BuildError>) -> Option<String> {
        let period = match raw {
            Json::String(s) => Period::from_text(s),
            Json::Number(n) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|dt| Period::Instant(dt.naive_utc())),
            Json::Object(parts) => Period::from_parts(parts),
            _ => None,
        };

        match period {
            Some(period) => Some(format_datetime(&period.edge(edge))),
            None => {
                diagnostics.push(BuildError::InvalidDate {
                    key: self.key.to_string(),
                    value: raw.to_string(),
                });
                None
            }
        }
    }

    fn date_column(&self, name: &str, diagnostics: &mut Vec<BuildError>) -> Option<String> {
        match self.schema.column(name) {
            Some(column) if column.column_type.is_datetime() => Some(column.name.clone()),
            _ => {
                diagnostics.push(BuildError::UnknownDateColumn {
                    key: self.key.to_string(),
                    column: name.to_string(),
                });
                None
            }
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> BuildError {
        BuildError::MalformedDateQuery {
            key: self.key.to_string(),
            reason: reason.into(),
        }
    }
}

fn json_int(value: &Json) -> Option<i64> {
    match value {
        Json::Number(n) => n.as_i64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_truthy(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(false),
        Json::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use serde_json::json;
    use storeq_proto::{DateBound, DateQuery, DateRange};

    fn schema() -> EntitySchema {
        EntitySchema::new("orders", "id")
            .with_column(ColumnDef::integer("id"))
            .with_column(ColumnDef::text("status"))
            .with_column(ColumnDef::datetime("date_created"))
            .with_column(ColumnDef::datetime("date_modified"))
    }

    fn parse(raw: Json) -> (Option<Predicate>, Vec<BuildError>) {
        let schema = schema();
        let parser = DateQueryParser::new(&schema, "date_query", Some("date_created"));
        let mut diagnostics = Vec::new();
        let predicate = parser.parse(&raw, &mut diagnostics);
        (predicate, diagnostics)
    }

    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn test_exclusive_after_day_resolves_to_end_of_day() {
        let (predicate, diagnostics) = parse(json!({ "after": "2024-01-01" }));
        assert!(diagnostics.is_empty());
        assert_eq!(
            predicate,
            Some(Predicate::Gt {
                column: "date_created".into(),
                value: text("2024-01-01 23:59:59"),
            })
        );
    }

    #[test]
    fn test_inclusive_range() {
        let (predicate, _) = parse(json!({
            "after": "2024-01-01",
            "before": "2024-01-31",
            "inclusive": true,
        }));
        assert_eq!(
            predicate,
            Some(Predicate::And(vec![
                Predicate::Ge {
                    column: "date_created".into(),
                    value: text("2024-01-01 00:00:00"),
                },
                Predicate::Le {
                    column: "date_created".into(),
                    value: text("2024-01-31 23:59:59"),
                },
            ]))
        );
    }

    #[test]
    fn test_exclusive_before_resolves_to_start() {
        let (predicate, _) = parse(json!({ "before": { "year": 2024, "month": 3 } }));
        assert_eq!(
            predicate,
            Some(Predicate::Lt {
                column: "date_created".into(),
                value: text("2024-03-01 00:00:00"),
            })
        );
    }

    #[test]
    fn test_period_edges() {
        let (predicate, _) = parse(json!({ "after": 2023 }));
        // a bare number is a unix timestamp, not a year
        assert_eq!(
            predicate,
            Some(Predicate::Gt {
                column: "date_created".into(),
                value: text("1970-01-01 00:33:43"),
            })
        );

        let (predicate, _) = parse(json!({ "after": "2023" }));
        assert_eq!(
            predicate,
            Some(Predicate::Gt {
                column: "date_created".into(),
                value: text("2023-12-31 23:59:59"),
            })
        );

        let (predicate, _) = parse(json!({ "before": "2024-02", "inclusive": true }));
        assert_eq!(
            predicate,
            Some(Predicate::Le {
                column: "date_created".into(),
                value: text("2024-02-29 23:59:59"),
            })
        );

        let (predicate, _) = parse(json!({ "before": { "year": 2023, "month": 12 }, "inclusive": true }));
        assert_eq!(
            predicate,
            Some(Predicate::Le {
                column: "date_created".into(),
                value: text("2023-12-31 23:59:59"),
            })
        );
    }

    #[test]
    fn test_full_datetime_is_exact() {
        let (predicate, _) = parse(json!({ "after": "2024-05-06 07:08:09", "inclusive": true }));
        assert_eq!(
            predicate,
            Some(Predicate::Ge {
                column: "date_created".into(),
                value: text("2024-05-06 07:08:09"),
            })
        );
    }

    #[test]
    fn test_or_group_with_columns() {
        let query = DateQuery::any([
            DateRange::new().after("2024-01-01").inclusive().into(),
            DateRange::new()
                .column("date_modified")
                .before(DateBound::year(2020))
                .into(),
        ]);
        let (predicate, diagnostics) = parse(query.to_json());
        assert!(diagnostics.is_empty());
        assert_eq!(
            predicate,
            Some(Predicate::Or(vec![
                Predicate::Ge {
                    column: "date_created".into(),
                    value: text("2024-01-01 00:00:00"),
                },
                Predicate::Lt {
                    column: "date_modified".into(),
                    value: text("2020-01-01 00:00:00"),
                },
            ]))
        );
    }

    #[test]
    fn test_keyed_children_and_group_column() {
        let (predicate, diagnostics) = parse(json!({
            "relation": "OR",
            "column": "date_modified",
            "0": { "after": "2024-01-01", "inclusive": true },
            "1": { "before": "2000-01-01", "inclusive": true },
        }));
        assert!(diagnostics.is_empty());
        assert_eq!(
            predicate,
            Some(Predicate::Or(vec![
                Predicate::Ge {
                    column: "date_modified".into(),
                    value: text("2024-01-01 00:00:00"),
                },
                Predicate::Le {
                    column: "date_modified".into(),
                    value: text("2000-01-01 23:59:59"),
                },
            ]))
        );
    }

    #[test]
    fn test_array_is_and_group() {
        let (predicate, _) = parse(json!([
            { "after": "2024-01-01", "inclusive": true },
            { "before": "2024-02-01" },
        ]));
        assert!(matches!(predicate, Some(Predicate::And(ref parts)) if parts.len() == 2));
    }

    #[test]
    fn test_invalid_inputs_produce_diagnostics() {
        let (predicate, diagnostics) = parse(json!("last tuesday"));
        assert!(predicate.is_none());
        assert!(matches!(diagnostics[0], BuildError::MalformedDateQuery { .. }));

        let (predicate, diagnostics) = parse(json!({ "after": "not a date" }));
        assert!(predicate.is_none());
        assert!(matches!(diagnostics[0], BuildError::InvalidDate { .. }));

        let (predicate, diagnostics) = parse(json!({ "inclusive": true }));
        assert!(predicate.is_none());
        assert!(matches!(diagnostics[0], BuildError::MalformedDateQuery { .. }));

        let (predicate, diagnostics) = parse(json!({ "column": "status", "after": "2024-01-01" }));
        assert!(predicate.is_none());
        assert!(matches!(diagnostics[0], BuildError::UnknownDateColumn { .. }));

        let (predicate, diagnostics) = parse(json!({ "after": { "year": 2024, "month": 13 } }));
        assert!(predicate.is_none());
        assert!(matches!(diagnostics[0], BuildError::InvalidDate { .. }));

        let (predicate, diagnostics) = parse(json!({ "clauses": "nope" }));
        assert!(predicate.is_none());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_bad_child_dropped_from_group() {
        let (predicate, diagnostics) = parse(json!({
            "relation": "AND",
            "clauses": [
                { "after": "2024-01-01", "inclusive": true },
                { "before": "garbage" },
            ],
        }));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            predicate,
            Some(Predicate::Ge {
                column: "date_created".into(),
                value: text("2024-01-01 00:00:00"),
            })
        );
    }

    #[test]
    fn test_no_default_column() {
        let schema = schema();
        let parser = DateQueryParser::new(&schema, "date_query", None);
        let mut diagnostics = Vec::new();
        assert!(parser.parse(&json!({ "after": "2024-01-01" }), &mut diagnostics).is_none());
        assert_eq!(diagnostics.len(), 1);

        let mut diagnostics = Vec::new();
        let predicate = parser.parse(
            &json!({ "column": "date_modified", "after": "2024-01-01", "inclusive": true }),
            &mut diagnostics,
        );
        assert!(predicate.is_some());
        assert!(diagnostics.is_empty());
    }
}
