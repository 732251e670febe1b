//! The query-builder capability the replayer drives, and its SQL renderer.

use std::collections::BTreeSet;

use crate::error::{ReplayError, Result};
use crate::value::SqlValue;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    GtEq,
    /// `<=`
    LtEq,
}

impl Comparison {
    /// SQL operator text.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
        }
    }
}

/// Pattern match flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeMode {
    /// `LIKE`
    Like,
    /// Case-insensitive `LIKE`.
    ILike,
    /// `NOT LIKE`
    NotLike,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand<E> {
    /// Another expression.
    Expr(E),
    /// A bound value.
    Value(SqlValue),
}

/// Query construction operations available to replayed ASTs.
///
/// Implementations must be free of side effects: nothing runs until the
/// caller executes the finished expression.
pub trait QueryBuilder {
    /// Expression type produced by the builder.
    type Expr;

    /// A reference to a column of the queried table.
    fn column(&mut self, name: &str) -> Result<Self::Expr>;

    /// `left <op> right`.
    fn compare(&mut self, left: Self::Expr, op: Comparison, right: Operand<Self::Expr>) -> Self::Expr;

    /// `expr [NOT] IN (values)`.
    fn in_list(&mut self, expr: Self::Expr, values: Vec<SqlValue>, negated: bool) -> Self::Expr;

    /// `expr IS [NOT] NULL`.
    fn null_check(&mut self, expr: Self::Expr, negated: bool) -> Self::Expr;

    /// Pattern match against a text pattern.
    fn like(&mut self, expr: Self::Expr, pattern: String, mode: LikeMode) -> Self::Expr;

    /// `expr BETWEEN low AND high`.
    fn between(&mut self, expr: Self::Expr, low: SqlValue, high: SqlValue) -> Self::Expr;

    /// Logical AND.
    fn and(&mut self, left: Self::Expr, right: Self::Expr) -> Self::Expr;

    /// Logical OR.
    fn or(&mut self, left: Self::Expr, right: Self::Expr) -> Self::Expr;

    /// Logical NOT.
    fn not(&mut self, expr: Self::Expr) -> Self::Expr;
}

/// A parameterized SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExpr {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlExpr {
    fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: vec![],
        }
    }

    fn value(value: SqlValue) -> Self {
        Self {
            sql: String::from("?"),
            params: vec![value],
        }
    }

    fn binary(left: Self, op: &str, right: Self) -> Self {
        let mut params = left.params;
        params.extend(right.params);
        Self {
            sql: format!("{} {op} {}", left.sql, right.sql),
            params,
        }
    }

    fn postfix(operand: Self, op: &str) -> Self {
        Self {
            sql: format!("{} {op}", operand.sql),
            params: operand.params,
        }
    }

    fn paren(self) -> Self {
        Self {
            sql: format!("({})", self.sql),
            params: self.params,
        }
    }

    /// Returns the SQL string.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the parameters, in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Consumes the expression and returns the SQL and parameters.
    #[must_use]
    pub fn build(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }

    /// The SQL with parameters inlined, for logs.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        let mut params = self.params.iter();
        let mut out = String::with_capacity(self.sql.len());
        let mut in_identifier = false;
        for c in self.sql.chars() {
            match c {
                '"' => {
                    in_identifier = !in_identifier;
                    out.push(c);
                }
                '?' if !in_identifier => match params.next() {
                    Some(value) => out.push_str(&value.to_sql_inline()),
                    None => out.push(c),
                },
                _ => out.push(c),
            }
        }
        out
    }
}

/// Renders replayed expressions as a parameterized SQL `WHERE` fragment.
#[derive(Debug, Clone, Default)]
pub struct SqlBuilder {
    columns: Option<BTreeSet<String>>,
}

impl SqlBuilder {
    /// A builder that accepts any column name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder restricted to the given columns.
    #[must_use]
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: Some(columns.into_iter().map(Into::into).collect()),
        }
    }

    fn quote(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl QueryBuilder for SqlBuilder {
    type Expr = SqlExpr;

    fn column(&mut self, name: &str) -> Result<SqlExpr> {
        if let Some(ref columns) = self.columns {
            if !columns.contains(name) {
                return Err(ReplayError::UnknownColumn(name.to_string()));
            }
        }
        Ok(SqlExpr::raw(Self::quote(name)))
    }

    fn compare(&mut self, left: SqlExpr, op: Comparison, right: Operand<SqlExpr>) -> SqlExpr {
        let right = match right {
            Operand::Expr(expr) => expr,
            Operand::Value(value) => SqlExpr::value(value),
        };
        SqlExpr::binary(left, op.as_sql(), right)
    }

    fn in_list(&mut self, expr: SqlExpr, values: Vec<SqlValue>, negated: bool) -> SqlExpr {
        if values.is_empty() {
            return SqlExpr::raw(if negated { "(1 = 1)" } else { "(1 = 0)" });
        }
        let keyword = if negated { "NOT IN" } else { "IN" };
        let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
        let mut params = expr.params;
        params.extend(values);
        SqlExpr {
            sql: format!("{} {keyword} ({})", expr.sql, placeholders.join(", ")),
            params,
        }
    }

    fn null_check(&mut self, expr: SqlExpr, negated: bool) -> SqlExpr {
        SqlExpr::postfix(expr, if negated { "IS NOT NULL" } else { "IS NULL" })
    }

    fn like(&mut self, expr: SqlExpr, pattern: String, mode: LikeMode) -> SqlExpr {
        let pattern = SqlExpr::value(SqlValue::Text(pattern));
        match mode {
            LikeMode::Like => SqlExpr::binary(expr, "LIKE", pattern),
            LikeMode::NotLike => SqlExpr::binary(expr, "NOT LIKE", pattern),
            LikeMode::ILike => {
                let lower = |e: SqlExpr| SqlExpr {
                    sql: format!("lower({})", e.sql),
                    params: e.params,
                };
                SqlExpr::binary(lower(expr), "LIKE", lower(pattern))
            }
        }
    }

    fn between(&mut self, expr: SqlExpr, low: SqlValue, high: SqlValue) -> SqlExpr {
        let mut params = expr.params;
        params.push(low);
        params.push(high);
        SqlExpr {
            sql: format!("{} BETWEEN ? AND ?", expr.sql),
            params,
        }
    }

    fn and(&mut self, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(left, "AND", right).paren()
    }

    fn or(&mut self, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(left, "OR", right).paren()
    }

    fn not(&mut self, expr: SqlExpr) -> SqlExpr {
        let inner = expr.paren();
        SqlExpr {
            sql: format!("NOT {}", inner.sql),
            params: inner.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(b: &mut SqlBuilder, name: &str) -> SqlExpr {
        b.column(name).unwrap()
    }

    #[test]
    fn test_compare_is_parameterized() {
        let mut b = SqlBuilder::new();
        let name = col(&mut b, "name");
        let malicious = "'; DROP TABLE users; --";
        let expr = b.compare(name, Comparison::Eq, Operand::Value(SqlValue::from(malicious)));
        assert_eq!(expr.sql(), "\"name\" = ?");
        assert!(matches!(&expr.params()[0], SqlValue::Text(s) if s == malicious));
    }

    #[test]
    fn test_quoted_identifiers() {
        let mut b = SqlBuilder::new();
        assert_eq!(col(&mut b, "we\"ird").sql(), "\"we\"\"ird\"");
    }

    #[test]
    fn test_column_allowlist() {
        let mut b = SqlBuilder::with_columns(["id", "name"]);
        assert!(b.column("name").is_ok());
        assert_eq!(
            b.column("password").unwrap_err(),
            ReplayError::UnknownColumn(String::from("password"))
        );
    }

    #[test]
    fn test_in_list_and_empty_list() {
        let mut b = SqlBuilder::new();
        let status = col(&mut b, "status");
        let expr = b.in_list(status.clone(), vec!["active".into(), "pending".into()], false);
        assert_eq!(expr.sql(), "\"status\" IN (?, ?)");
        assert_eq!(expr.params().len(), 2);
        assert_eq!(b.in_list(status, vec![], false).sql(), "(1 = 0)");
    }

    #[test]
    fn test_boolean_composition() {
        let mut b = SqlBuilder::new();
        let active = col(&mut b, "active");
        let left = b.compare(active, Comparison::Eq, Operand::Value(true.into()));
        let age = col(&mut b, "age");
        let right = b.between(age, 18.into(), 65.into());
        let both = b.and(left, right);
        let expr = b.not(both);
        assert_eq!(
            expr.sql(),
            "NOT ((\"active\" = ? AND \"age\" BETWEEN ? AND ?))"
        );
        assert_eq!(expr.params().len(), 3);
    }

    #[test]
    fn test_ilike_lowers_both_sides() {
        let mut b = SqlBuilder::new();
        let email = col(&mut b, "email");
        let expr = b.like(email, String::from("%@EXAMPLE.com"), LikeMode::ILike);
        assert_eq!(expr.sql(), "lower(\"email\") LIKE lower(?)");
    }

    #[test]
    fn test_inline_rendering_skips_quoted_question_marks() {
        let mut b = SqlBuilder::new();
        let odd = col(&mut b, "why?");
        let expr = b.compare(odd, Comparison::Gt, Operand::Value(SqlValue::Int(3)));
        assert_eq!(expr.to_sql_inline(), "\"why?\" > 3");
    }
}
