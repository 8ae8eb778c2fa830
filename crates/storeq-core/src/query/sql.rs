//! SQL rendering for [`RenderedClause`]s (SQLite dialect).
//!
//! Identifiers come from a validated schema and are spliced into the text;
//! every value travels as a positional `?` parameter.

use std::fmt::Write;

use storeq_proto::Value;

use super::clause::{Predicate, Projection, RenderedClause};

/// SQL function that lower-cases text with Unicode rules. Registered on every
/// SQLite connection the storage backend opens.
pub const LOWER_FUNCTION: &str = "storeq_lower";

/// A SQL statement with its bound parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render the row-fetching statement.
pub fn select_sql(clause: &RenderedClause) -> SqlStatement {
    let mut renderer = Renderer::new(clause);
    let mut sql = String::from("SELECT ");

    match &clause.projection {
        Projection::All => sql.push_str(&renderer.column("*")),
        Projection::Columns(columns) => {
            let list: Vec<String> = columns
                .iter()
                .map(|c| format!("{} AS {}", renderer.column(c), c))
                .collect();
            sql.push_str(&list.join(", "));
        }
    }

    renderer.from_where(&mut sql);

    if !clause.order_by.is_empty() {
        let terms: Vec<String> = clause
            .order_by
            .iter()
            .map(|o| format!("{} {}", renderer.column(&o.column), o.direction.as_sql()))
            .collect();
        let _ = write!(sql, " ORDER BY {}", terms.join(", "));
    }

    match (clause.limit, clause.offset) {
        (Some(limit), 0) => {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        (Some(limit), offset) => {
            let _ = write!(sql, " LIMIT {} OFFSET {}", limit, offset);
        }
        (None, 0) => {}
        (None, offset) => {
            let _ = write!(sql, " LIMIT -1 OFFSET {}", offset);
        }
    }

    renderer.finish(sql)
}

/// Render the counting statement. Ordering and pagination are ignored.
pub fn count_sql(clause: &RenderedClause) -> SqlStatement {
    let mut renderer = Renderer::new(clause);
    let mut sql = String::from("SELECT COUNT(*)");
    renderer.from_where(&mut sql);
    renderer.finish(sql)
}

struct Renderer<'a> {
    clause: &'a RenderedClause,
    params: Vec<Value>,
}

impl<'a> Renderer<'a> {
    fn new(clause: &'a RenderedClause) -> Self {
        Self {
            clause,
            params: Vec::new(),
        }
    }

    fn column(&self, name: &str) -> String {
        match &self.clause.alias {
            Some(alias) => format!("{}.{}", alias, name),
            None => name.to_string(),
        }
    }

    fn from_where(&mut self, sql: &mut String) {
        let _ = write!(sql, " FROM {}", self.clause.table);
        if let Some(alias) = &self.clause.alias {
            let _ = write!(sql, " {}", alias);
        }

        if self.clause.predicates.is_empty() {
            return;
        }
        let clause = self.clause;
        let conditions: Vec<String> = clause
            .predicates
            .iter()
            .map(|p| self.predicate(p))
            .collect();
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Eq {
                column,
                value,
                case_insensitive,
            } => {
                let lhs = self.operand(column, *case_insensitive);
                let rhs = self.param(value, *case_insensitive);
                format!("{} = {}", lhs, rhs)
            }
            Predicate::In {
                column,
                values,
                case_insensitive,
            } => self.membership(column, values, *case_insensitive, false),
            Predicate::NotIn {
                column,
                values,
                case_insensitive,
            } => self.membership(column, values, *case_insensitive, true),
            Predicate::Lt { column, value } => self.comparison(column, "<", value),
            Predicate::Le { column, value } => self.comparison(column, "<=", value),
            Predicate::Gt { column, value } => self.comparison(column, ">", value),
            Predicate::Ge { column, value } => self.comparison(column, ">=", value),
            Predicate::Like { column, pattern } => {
                self.params.push(Value::String(pattern.clone()));
                format!(
                    "{}({}) LIKE ? ESCAPE '\\'",
                    LOWER_FUNCTION,
                    self.column(column)
                )
            }
            Predicate::And(parts) => self.group(parts, " AND ", "1 = 1"),
            Predicate::Or(parts) => self.group(parts, " OR ", "1 = 0"),
        }
    }

    fn membership(&mut self, column: &str, values: &[Value], ci: bool, negated: bool) -> String {
        if values.is_empty() {
            return if negated { "1 = 1" } else { "1 = 0" }.to_string();
        }
        let lhs = self.operand(column, ci);
        let placeholders: Vec<&str> = values.iter().map(|v| self.param(v, ci)).collect();
        let op = if negated { "NOT IN" } else { "IN" };
        format!("{} {} ({})", lhs, op, placeholders.join(", "))
    }

    fn comparison(&mut self, column: &str, op: &str, value: &Value) -> String {
        let lhs = self.column(column);
        let rhs = self.param(value, false);
        format!("{} {} {}", lhs, op, rhs)
    }

    fn group(&mut self, parts: &[Predicate], joiner: &str, empty: &str) -> String {
        if parts.is_empty() {
            return empty.to_string();
        }
        let rendered: Vec<String> = parts.iter().map(|p| self.predicate(p)).collect();
        format!("({})", rendered.join(joiner))
    }

    fn operand(&self, column: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            format!("{}({})", LOWER_FUNCTION, self.column(column))
        } else {
            self.column(column)
        }
    }

    fn param(&mut self, value: &Value, case_insensitive: bool) -> &'static str {
        self.params.push(value.clone());
        if case_insensitive {
            "storeq_lower(?)"
        } else {
            "?"
        }
    }

    fn finish(self, sql: String) -> SqlStatement {
        SqlStatement {
            sql,
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::clause::{ClauseBuilder, OrderDirection, OrderSpec};
    use crate::schema::{ColumnDef, EntitySchema};
    use storeq_proto::QuerySpec;

    fn schema() -> EntitySchema {
        EntitySchema::new("wc_order_addresses", "id")
            .with_alias("ca")
            .with_column(ColumnDef::integer("id").sortable())
            .with_column(ColumnDef::integer("order_id"))
            .with_column(ColumnDef::text("city").searchable())
            .with_column(ColumnDef::text("email").case_insensitive())
            .with_column(ColumnDef::datetime("date_created").sortable())
    }

    fn render(spec: &QuerySpec) -> RenderedClause {
        let schema = schema();
        ClauseBuilder::new(&schema).render(spec)
    }

    #[test]
    fn test_select_with_filters_and_paging() {
        let clause = render(
            &QuerySpec::new()
                .filter("order_id", 5)
                .with_number(10)
                .with_offset(20),
        );
        let stmt = select_sql(&clause);
        assert_eq!(
            stmt.sql,
            "SELECT ca.* FROM wc_order_addresses ca WHERE ca.order_id = ? \
             ORDER BY ca.id DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(stmt.params, vec![Value::Int(5)]);
    }

    #[test]
    fn test_select_projection_and_sets() {
        let clause = render(
            &QuerySpec::new()
                .filter_in("order_id", [1, 2])
                .filter_not_in("city", ["Porto"])
                .with_fields(storeq_proto::Fields::Columns(vec!["city".into()]))
                .without_order()
                .with_number(0),
        );
        let stmt = select_sql(&clause);
        assert_eq!(
            stmt.sql,
            "SELECT ca.id AS id, ca.city AS city FROM wc_order_addresses ca \
             WHERE ca.order_id IN (?, ?) AND ca.city NOT IN (?)"
        );
        assert_eq!(
            stmt.params,
            vec![Value::Int(1), Value::Int(2), Value::String("Porto".into())]
        );
    }

    #[test]
    fn test_case_insensitive_and_search() {
        let clause = render(
            &QuerySpec::new()
                .filter("email", "A@B.COM")
                .with_search("50%"),
        );
        let stmt = select_sql(&clause);
        assert!(stmt.sql.contains("storeq_lower(ca.email) = storeq_lower(?)"));
        assert!(stmt.sql.contains("storeq_lower(ca.city) LIKE ? ESCAPE '\\'"));
        assert_eq!(stmt.params[1], Value::String("%50\\%%".into()));
    }

    #[test]
    fn test_offset_without_limit() {
        let clause = render(&QuerySpec::new().with_number(0).with_offset(3).without_order());
        assert_eq!(
            select_sql(&clause).sql,
            "SELECT ca.* FROM wc_order_addresses ca LIMIT -1 OFFSET 3"
        );
    }

    #[test]
    fn test_count_ignores_order_and_paging() {
        let mut clause = render(&QuerySpec::new().filter("order_id", 5).with_number(2));
        clause.order_by = vec![OrderSpec {
            column: "id".into(),
            direction: OrderDirection::Asc,
        }];
        let stmt = count_sql(&clause);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM wc_order_addresses ca WHERE ca.order_id = ?"
        );
        assert_eq!(stmt.params, vec![Value::Int(5)]);
    }

    #[test]
    fn test_nested_groups() {
        let mut clause = RenderedClause::scan(&schema());
        clause.predicates = vec![Predicate::Or(vec![
            Predicate::Gt {
                column: "date_created".into(),
                value: Value::String("2024-01-01 23:59:59".into()),
            },
            Predicate::And(vec![]),
        ])];
        let stmt = count_sql(&clause);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM wc_order_addresses ca WHERE (ca.date_created > ? OR 1 = 1)"
        );
    }

    #[test]
    fn test_no_alias() {
        let schema = EntitySchema::new("notes", "id").with_column(ColumnDef::integer("id"));
        let clause = ClauseBuilder::new(&schema).render(&QuerySpec::new().filter("id", 1));
        assert_eq!(
            select_sql(&clause).sql,
            "SELECT * FROM notes WHERE id = ? ORDER BY id DESC LIMIT 100"
        );
    }
}
