//! Evaluation of accepted query ASTs against a [`QueryBuilder`].

use serde_json::Value;
use tracing::debug;

use crate::ast::{Method, Node};
use crate::builder::{Comparison, LikeMode, Operand, QueryBuilder};
use crate::error::{ReplayError, Result};
use crate::value::SqlValue;

/// Result of replaying a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Replayed<E> {
    /// A builder expression.
    Expr(E),
    /// A scalar literal.
    Value(SqlValue),
    /// A literal array.
    List(Vec<SqlValue>),
}

impl<E> Replayed<E> {
    /// The expression, if this is one.
    pub fn into_expr(self) -> Option<E> {
        match self {
            Self::Expr(expr) => Some(expr),
            Self::Value(_) | Self::List(_) => None,
        }
    }
}

/// Parses `ast` and replays it against `builder`.
///
/// The whole tree is validated before the builder sees any call.
pub fn replay<B: QueryBuilder>(ast: &Value, builder: &mut B) -> Result<Replayed<B::Expr>> {
    let node = Node::parse(ast)?;
    eval(&node, builder)
}

/// Replays `ast` and requires an expression result, as for a `WHERE` clause.
pub fn replay_condition<B: QueryBuilder>(ast: &Value, builder: &mut B) -> Result<B::Expr> {
    replay(ast, builder)?.into_expr().ok_or_else(|| {
        ReplayError::InvalidNode(format!("query does not produce a condition: {ast}"))
    })
}

/// Evaluates an accepted node. The receiver goes first, then the
/// arguments left to right.
pub fn eval<B: QueryBuilder>(node: &Node, builder: &mut B) -> Result<Replayed<B::Expr>> {
    match node {
        Node::Literal(value) => Ok(Replayed::Value(value.clone())),
        Node::List(values) => Ok(Replayed::List(values.clone())),
        Node::Column(name) => builder.column(name).map(Replayed::Expr),
        Node::Call {
            receiver,
            method,
            args,
        } => {
            let receiver = eval(receiver, builder)?;
            let args = args
                .iter()
                .map(|arg| eval(arg, builder))
                .collect::<Result<Vec<_>>>()?;
            debug!(method = %method, "Replaying query call");
            call(builder, *method, receiver, args).map(Replayed::Expr)
        }
    }
}

fn call<B: QueryBuilder>(
    builder: &mut B,
    method: Method,
    receiver: Replayed<B::Expr>,
    args: Vec<Replayed<B::Expr>>,
) -> Result<B::Expr> {
    let name = method.name();
    let receiver = receiver
        .into_expr()
        .ok_or_else(|| ReplayError::type_mismatch(name, "receiver must be an expression"))?;
    let mut args = args.into_iter();
    let mut next = || {
        args.next().ok_or(ReplayError::Arity {
            method: name.to_string(),
            expected: method.arity(),
            got: 0,
        })
    };

    let expr = match method {
        Method::And | Method::Or => {
            let right = next()?
                .into_expr()
                .ok_or_else(|| ReplayError::type_mismatch(name, "operand must be an expression"))?;
            if method == Method::And {
                builder.and(receiver, right)
            } else {
                builder.or(receiver, right)
            }
        }
        Method::Not => builder.not(receiver),
        Method::Gt | Method::Lt | Method::GtEq | Method::LtEq => {
            let op = match method {
                Method::Gt => Comparison::Gt,
                Method::Lt => Comparison::Lt,
                Method::GtEq => Comparison::GtEq,
                _ => Comparison::LtEq,
            };
            let right = comparable(name, next()?)?;
            builder.compare(receiver, op, right)
        }
        Method::Matches | Method::NotMatches => {
            let negated = method == Method::NotMatches;
            match next()? {
                Replayed::Value(SqlValue::Null) => builder.null_check(receiver, negated),
                Replayed::List(values) => builder.in_list(receiver, values, negated),
                other => {
                    let op = if negated { Comparison::NotEq } else { Comparison::Eq };
                    let right = comparable(name, other)?;
                    builder.compare(receiver, op, right)
                }
            }
        }
        Method::Like | Method::ILike | Method::NotLike => {
            let pattern = match next()? {
                Replayed::Value(SqlValue::Text(pattern)) => pattern,
                _ => return Err(ReplayError::type_mismatch(name, "pattern must be a string")),
            };
            let mode = match method {
                Method::Like => LikeMode::Like,
                Method::ILike => LikeMode::ILike,
                _ => LikeMode::NotLike,
            };
            builder.like(receiver, pattern, mode)
        }
        Method::Between => {
            let low = bound(name, next()?)?;
            let high = bound(name, next()?)?;
            builder.between(receiver, low, high)
        }
        Method::IsNull => builder.null_check(receiver, false),
        Method::NotNull => builder.null_check(receiver, true),
    };
    Ok(expr)
}

fn comparable<E>(method: &str, operand: Replayed<E>) -> Result<Operand<E>> {
    match operand {
        Replayed::Expr(expr) => Ok(Operand::Expr(expr)),
        Replayed::Value(value) => Ok(Operand::Value(value)),
        Replayed::List(_) => Err(ReplayError::type_mismatch(method, "cannot compare with an array")),
    }
}

fn bound<E>(method: &str, operand: Replayed<E>) -> Result<SqlValue> {
    match operand {
        Replayed::Value(value) if !value.is_null() => Ok(value),
        _ => Err(ReplayError::type_mismatch(method, "bounds must be non-null scalars")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SqlBuilder;
    use serde_json::json;

    /// Records the order in which the builder is driven.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl QueryBuilder for Recorder {
        type Expr = String;

        fn column(&mut self, name: &str) -> Result<String> {
            self.calls.push(format!("column {name}"));
            Ok(name.to_string())
        }

        fn compare(&mut self, left: String, op: Comparison, right: Operand<String>) -> String {
            self.calls.push(format!("compare {}", op.as_sql()));
            let right = match right {
                Operand::Expr(e) => e,
                Operand::Value(v) => v.to_sql_inline(),
            };
            format!("{left}{}{right}", op.as_sql())
        }

        fn in_list(&mut self, expr: String, values: Vec<SqlValue>, _negated: bool) -> String {
            format!("{expr} in {}", values.len())
        }

        fn null_check(&mut self, expr: String, negated: bool) -> String {
            format!("{expr} null {negated}")
        }

        fn like(&mut self, expr: String, pattern: String, _mode: LikeMode) -> String {
            format!("{expr}~{pattern}")
        }

        fn between(&mut self, expr: String, _low: SqlValue, _high: SqlValue) -> String {
            expr
        }

        fn and(&mut self, left: String, right: String) -> String {
            self.calls.push(String::from("and"));
            format!("{left}&{right}")
        }

        fn or(&mut self, left: String, right: String) -> String {
            format!("{left}|{right}")
        }

        fn not(&mut self, expr: String) -> String {
            format!("!{expr}")
        }
    }

    #[test]
    fn test_ident_attribute_resolves_to_column() {
        let mut b = Recorder::default();
        let result = replay(&json!(["c", "ident", "name"]), &mut b).unwrap();
        assert_eq!(result, Replayed::Expr(String::from("name")));
    }

    #[test]
    fn test_receiver_before_arguments() {
        let mut b = Recorder::default();
        let ast = json!([
            "c",
            ["c", ["c", "ident", "a"], ">", 1],
            "&",
            ["c", ["c", "ident", "b"], "<", 2]
        ]);
        replay(&ast, &mut b).unwrap();
        assert_eq!(
            b.calls,
            ["column a", "compare >", "column b", "compare <", "and"]
        );
    }

    #[test]
    fn test_nothing_evaluated_when_rejected() {
        let mut b = Recorder::default();
        let ast = json!(["c", ["c", "ident", "a"], "&", ["c", ["c", "ident", "b"], "send", "x"]]);
        let err = replay(&ast, &mut b).unwrap_err();
        assert!(err.is_security());
        assert!(b.calls.is_empty());
    }

    #[test]
    fn test_match_dispatches_on_operand() {
        let mut b = SqlBuilder::new();
        let eq = replay_condition(&json!(["c", ["c", "ident", "name"], "=~", "Bob"]), &mut b).unwrap();
        assert_eq!(eq.sql(), "\"name\" = ?");

        let within = replay_condition(
            &json!(["c", ["c", "ident", "id"], "=~", ["a", 1, 2, 3]]),
            &mut b,
        )
        .unwrap();
        assert_eq!(within.sql(), "\"id\" IN (?, ?, ?)");

        let null = replay_condition(&json!(["c", ["c", "ident", "deleted_at"], "=~", null]), &mut b)
            .unwrap();
        assert_eq!(null.sql(), "\"deleted_at\" IS NULL");

        let not_null =
            replay_condition(&json!(["c", ["c", "ident", "deleted_at"], "!~", null]), &mut b)
                .unwrap();
        assert_eq!(not_null.sql(), "\"deleted_at\" IS NOT NULL");
    }

    #[test]
    fn test_type_mismatches() {
        let mut b = SqlBuilder::new();
        let err = replay(&json!(["c", 5, ">", 3]), &mut b).unwrap_err();
        assert!(matches!(err, ReplayError::TypeMismatch { .. }));

        let err = replay(&json!(["c", ["c", "ident", "a"], "&", true]), &mut b).unwrap_err();
        assert!(matches!(err, ReplayError::TypeMismatch { .. }));

        let err = replay(&json!(["c", ["c", "ident", "name"], "like", 3]), &mut b).unwrap_err();
        assert!(matches!(err, ReplayError::TypeMismatch { .. }));
    }

    #[test]
    fn test_condition_requires_expression() {
        let mut b = SqlBuilder::new();
        assert!(matches!(
            replay_condition(&json!(42), &mut b),
            Err(ReplayError::InvalidNode(_))
        ));
    }
}
