//! Predicate evaluation against in-memory rows.
//!
//! Comparison follows SQL semantics so that the memory backend returns what a
//! SQL backend would: a NULL or missing column never satisfies a comparison,
//! including `NOT IN`.

use std::cmp::Ordering;

use storeq_proto::value::parse_datetime;
use storeq_proto::Value;

use super::clause::Predicate;

/// Evaluates predicates against rows of column values.
pub struct PredicateEvaluator;

impl PredicateEvaluator {
    /// Evaluate a predicate against a row.
    pub fn evaluate(predicate: &Predicate, row: &[(String, Value)]) -> bool {
        match predicate {
            Predicate::Eq {
                column,
                value,
                case_insensitive,
            } => Self::compare_field(row, column, |fv| {
                Self::values_equal(fv, value, *case_insensitive)
            }),
            Predicate::In {
                column,
                values,
                case_insensitive,
            } => Self::compare_field(row, column, |fv| {
                values
                    .iter()
                    .any(|v| Self::values_equal(fv, v, *case_insensitive))
            }),
            Predicate::NotIn {
                column,
                values,
                case_insensitive,
            } => Self::compare_field(row, column, |fv| {
                !values
                    .iter()
                    .any(|v| Self::values_equal(fv, v, *case_insensitive))
            }),
            Predicate::Lt { column, value } => {
                Self::compare_field(row, column, |fv| Self::ordered(fv, value, Ordering::is_lt))
            }
            Predicate::Le { column, value } => {
                Self::compare_field(row, column, |fv| Self::ordered(fv, value, Ordering::is_le))
            }
            Predicate::Gt { column, value } => {
                Self::compare_field(row, column, |fv| Self::ordered(fv, value, Ordering::is_gt))
            }
            Predicate::Ge { column, value } => {
                Self::compare_field(row, column, |fv| Self::ordered(fv, value, Ordering::is_ge))
            }
            Predicate::Like { column, pattern } => Self::compare_field(row, column, |fv| {
                Self::text_of(fv)
                    .map(|s| Self::like_match(&s.to_lowercase(), pattern))
                    .unwrap_or(false)
            }),
            Predicate::And(predicates) => predicates.iter().all(|p| Self::evaluate(p, row)),
            Predicate::Or(predicates) => predicates.iter().any(|p| Self::evaluate(p, row)),
        }
    }

    /// Get a column value from a row by name.
    fn get_field_value<'a>(row: &'a [(String, Value)], column: &str) -> Option<&'a Value> {
        row.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    /// Apply a check to a non-NULL column value.
    fn compare_field<F>(row: &[(String, Value)], column: &str, check: F) -> bool
    where
        F: FnOnce(&Value) -> bool,
    {
        match Self::get_field_value(row, column) {
            Some(Value::Null) | None => false,
            Some(fv) => check(fv),
        }
    }

    fn ordered(a: &Value, b: &Value, test: fn(Ordering) -> bool) -> bool {
        Self::compare_values(a, b).map(test).unwrap_or(false)
    }

    fn values_equal(a: &Value, b: &Value, case_insensitive: bool) -> bool {
        if case_insensitive {
            if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
                return a.to_lowercase() == b.to_lowercase();
            }
        }
        Self::compare_values(a, b) == Some(Ordering::Equal)
    }

    /// Compare two values, coercing across numeric, boolean and datetime forms.
    /// Returns None for NULLs and incompatible types.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Int(b)) => Some((*a as i64).cmp(b)),
            (Value::Int(a), Value::Bool(b)) => Some(a.cmp(&(*b as i64))),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Timestamp(_), Value::String(s)) => {
                let at = a.as_datetime()?;
                Some(at.cmp(&parse_datetime(s)?))
            }
            (Value::String(s), Value::Timestamp(_)) => {
                let at = b.as_datetime()?;
                Some(parse_datetime(s)?.cmp(&at))
            }
            (Value::String(s), Value::Int(_) | Value::Float(_)) => {
                let parsed = Value::Float(s.trim().parse().ok()?);
                Self::compare_values(&parsed, b)
            }
            (Value::Int(_) | Value::Float(_), Value::String(s)) => {
                let parsed = Value::Float(s.trim().parse().ok()?);
                Self::compare_values(a, &parsed)
            }
            _ => None,
        }
    }

    /// Total order used for sorting: NULLs first, incompatible types equal.
    pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let a = a.filter(|v| !v.is_null());
        let b = b.filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => Self::compare_values(a, b).unwrap_or(Ordering::Equal),
        }
    }

    fn text_of(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Int(_) | Value::Float(_) => Some(value.to_string()),
            Value::Timestamp(_) => value.to_json().as_str().map(str::to_string),
            _ => None,
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\\%`, `\\_` and `\\\\` match the literal character
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let mut chars = value.chars().peekable();
        let mut pattern_chars = pattern.chars().peekable();

        Self::like_match_recursive(&mut chars, &mut pattern_chars)
    }

    fn like_match_recursive(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        pattern: &mut std::iter::Peekable<std::str::Chars>,
    ) -> bool {
        loop {
            match (pattern.peek().copied(), chars.peek().copied()) {
                (None, None) => return true,
                (None, Some(_)) => return false,
                (Some('%'), _) => {
                    pattern.next();
                    if pattern.peek().is_none() {
                        return true;
                    }

                    // Try % against 0, 1, 2, ... characters
                    loop {
                        let mut pattern_clone = pattern.clone();
                        let mut chars_clone = chars.clone();

                        if Self::like_match_recursive(&mut chars_clone, &mut pattern_clone) {
                            return true;
                        }
                        if chars.next().is_none() {
                            return false;
                        }
                    }
                }
                (Some('_'), Some(_)) => {
                    pattern.next();
                    chars.next();
                }
                (Some('_'), None) => return false,
                (Some('\\'), _) => {
                    pattern.next();
                    match (pattern.peek().copied(), chars.peek().copied()) {
                        (Some(p), Some(c)) if p == c => {
                            pattern.next();
                            chars.next();
                        }
                        _ => return false,
                    }
                }
                (Some(p), Some(c)) => {
                    if p == c {
                        pattern.next();
                        chars.next();
                    } else {
                        return false;
                    }
                }
                (Some(_), None) => return false,
            }
        }
    }
}
