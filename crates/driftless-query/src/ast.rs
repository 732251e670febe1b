//! Typed query AST and the method dispatch table.
//!
//! The wire form is JSON. A method call is `["c", receiver, method, args...]`
//! and a literal array is `["a", elements...]`; anything that is not an array
//! is a scalar literal. The receiver `"ident"` stands for the query context,
//! and any identifier called on it is a column reference.
//!
//! Every method name is checked while parsing. Nothing is evaluated until
//! the whole tree has been accepted.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::{ReplayError, Result, SecurityViolation};
use crate::value::SqlValue;

/// Receiver placeholder for the query context.
pub const IDENT: &str = "ident";

/// Operator symbols that may be called even though they are not identifiers.
pub const OPERATORS: [&str; 9] = ["&", "|", "~", ">", "<", ">=", "<=", "=~", "!~"];

/// Invoke-by-name and evaluation primitives. Rejected on every receiver.
const META_DISPATCH: &[&str] = &[
    "send",
    "__send__",
    "public_send",
    "method",
    "public_method",
    "instance_method",
    "instance_eval",
    "instance_exec",
    "instance_variable_get",
    "instance_variable_set",
    "class_eval",
    "class_exec",
    "module_eval",
    "module_exec",
    "define_method",
    "const_get",
    "eval",
    "system",
    "exec",
    "spawn",
];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern is valid"))
}

/// A method the replayer knows how to dispatch on an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `&`: logical AND.
    And,
    /// `|`: logical OR.
    Or,
    /// `~`: logical NOT.
    Not,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    GtEq,
    /// `<=`
    LtEq,
    /// `=~`: equality, `IN` for arrays, `IS NULL` for null.
    Matches,
    /// `!~`: negation of `=~`.
    NotMatches,
    /// `like`
    Like,
    /// `ilike`: case-insensitive `like`.
    ILike,
    /// `not_like`
    NotLike,
    /// `between(low, high)`
    Between,
    /// `is_null`
    IsNull,
    /// `not_null`
    NotNull,
}

/// Name to handler mapping. Names not listed here cannot be called.
const DISPATCH: [(&str, Method); 15] = [
    ("&", Method::And),
    ("|", Method::Or),
    ("~", Method::Not),
    (">", Method::Gt),
    ("<", Method::Lt),
    (">=", Method::GtEq),
    ("<=", Method::LtEq),
    ("=~", Method::Matches),
    ("!~", Method::NotMatches),
    ("like", Method::Like),
    ("ilike", Method::ILike),
    ("not_like", Method::NotLike),
    ("between", Method::Between),
    ("is_null", Method::IsNull),
    ("not_null", Method::NotNull),
];

impl Method {
    /// Looks a name up in the dispatch table.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        DISPATCH
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, method)| *method)
    }

    /// The wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        DISPATCH
            .iter()
            .find(|(_, m)| *m == self)
            .map_or("?", |(n, _)| n)
    }

    /// Number of arguments the method takes.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Not | Self::IsNull | Self::NotNull => 0,
            Self::Between => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed, accepted query node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Scalar literal.
    Literal(SqlValue),
    /// Literal array (`["a", ...]`).
    List(Vec<SqlValue>),
    /// `ident.<name>`.
    Column(String),
    /// A dispatched method call.
    Call {
        /// Receiver, resolved before the arguments.
        receiver: Box<Node>,
        /// Handler from the dispatch table.
        method: Method,
        /// Arguments, left to right.
        args: Vec<Node>,
    },
}

impl Node {
    /// Parses and validates a JSON query AST.
    pub fn parse(value: &Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(_) => {
                return Err(ReplayError::InvalidNode(format!(
                    "objects are not query nodes: {value}"
                )))
            }
            scalar => {
                return SqlValue::from_json(scalar)
                    .map(Self::Literal)
                    .ok_or_else(|| ReplayError::InvalidNode(scalar.to_string()));
            }
        };

        match items.first().and_then(Value::as_str) {
            Some("c") => Self::parse_call(&items[1..]),
            Some("a") => items[1..]
                .iter()
                .map(|item| {
                    SqlValue::from_json(item).ok_or_else(|| {
                        ReplayError::InvalidNode(format!("array elements must be scalars: {item}"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::List),
            _ => Err(ReplayError::InvalidNode(format!("invalid op in {value}"))),
        }
    }

    fn parse_call(parts: &[Value]) -> Result<Self> {
        let (receiver, rest) = parts
            .split_first()
            .ok_or_else(|| ReplayError::InvalidNode(String::from("call without a receiver")))?;
        let (name, args) = rest
            .split_first()
            .ok_or_else(|| ReplayError::InvalidNode(String::from("call without a method")))?;
        let name = name
            .as_str()
            .ok_or_else(|| ReplayError::InvalidNode(format!("method name must be a string: {name}")))?;

        let receiver = if receiver.as_str() == Some(IDENT) {
            None
        } else {
            Some(Self::parse(receiver)?)
        };

        check_name(name)?;

        let Some(receiver) = receiver else {
            if OPERATORS.contains(&name) {
                return Err(ReplayError::InvalidNode(format!(
                    "operator `{name}` needs an expression receiver"
                )));
            }
            if !args.is_empty() {
                return Err(ReplayError::Arity {
                    method: name.to_string(),
                    expected: 0,
                    got: args.len(),
                });
            }
            return Ok(Self::Column(name.to_string()));
        };

        let method = Method::lookup(name).ok_or_else(|| {
            warn!(method = %name, "Rejected unknown query method");
            SecurityViolation::UnknownMethod(name.to_string())
        })?;
        if args.len() != method.arity() {
            return Err(ReplayError::Arity {
                method: name.to_string(),
                expected: method.arity(),
                got: args.len(),
            });
        }

        Ok(Self::Call {
            receiver: Box::new(receiver),
            method,
            args: args.iter().map(Self::parse).collect::<Result<_>>()?,
        })
    }
}

/// Rejects meta-dispatch names and anything that is neither an identifier
/// nor an allowed operator.
pub fn check_name(name: &str) -> std::result::Result<(), SecurityViolation> {
    if META_DISPATCH.contains(&name) {
        warn!(method = %name, "Rejected meta-dispatch in query");
        return Err(SecurityViolation::MetaDispatch(name.to_string()));
    }
    if !identifier_pattern().is_match(name) && !OPERATORS.contains(&name) {
        warn!(method = %name, "Rejected invalid method name in query");
        return Err(SecurityViolation::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_table_round_trip() {
        for (name, method) in DISPATCH {
            assert_eq!(Method::lookup(name), Some(method));
            assert_eq!(method.name(), name);
        }
        assert_eq!(Method::lookup("drop"), None);
    }

    #[test]
    fn test_every_operator_is_dispatchable() {
        for op in OPERATORS {
            assert!(Method::lookup(op).is_some(), "{op}");
        }
    }

    #[test]
    fn test_parse_column() {
        let node = Node::parse(&json!(["c", "ident", "name"])).unwrap();
        assert_eq!(node, Node::Column(String::from("name")));
    }

    #[test]
    fn test_parse_nested_comparison() {
        let node = Node::parse(&json!(["c", ["c", "ident", "lat"], ">", 80])).unwrap();
        assert_eq!(
            node,
            Node::Call {
                receiver: Box::new(Node::Column(String::from("lat"))),
                method: Method::Gt,
                args: vec![Node::Literal(SqlValue::Int(80))],
            }
        );
    }

    #[test]
    fn test_parse_literal_array() {
        let node = Node::parse(&json!(["a", 1, "two", null])).unwrap();
        assert_eq!(
            node,
            Node::List(vec![
                SqlValue::Int(1),
                SqlValue::from("two"),
                SqlValue::Null
            ])
        );
        assert!(Node::parse(&json!(["a", [1]])).is_err());
    }

    #[test]
    fn test_send_rejected_before_arguments() {
        // The argument is malformed; the method name must be rejected first.
        let err = Node::parse(&json!(["c", ["c", "ident", "name"], "send", {"bad": true}]))
            .unwrap_err();
        assert_eq!(
            err,
            ReplayError::Security(SecurityViolation::MetaDispatch(String::from("send")))
        );
    }

    #[test]
    fn test_meta_dispatch_rejected_on_ident() {
        for name in ["send", "__send__", "instance_eval", "public_send"] {
            let err = Node::parse(&json!(["c", "ident", name])).unwrap_err();
            assert!(err.is_security(), "{name}");
        }
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["name; DROP", "a.b", "==", "!", ""] {
            let err = Node::parse(&json!(["c", "ident", name])).unwrap_err();
            assert_eq!(
                err,
                ReplayError::Security(SecurityViolation::InvalidName(name.to_string()))
            );
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = Node::parse(&json!(["c", ["c", "ident", "name"], "destroy"])).unwrap_err();
        assert_eq!(
            err,
            ReplayError::Security(SecurityViolation::UnknownMethod(String::from("destroy")))
        );
    }

    #[test]
    fn test_arity_checked() {
        let err = Node::parse(&json!(["c", ["c", "ident", "age"], "between", 1])).unwrap_err();
        assert!(matches!(err, ReplayError::Arity { expected: 2, got: 1, .. }));

        let err = Node::parse(&json!(["c", "ident", "name", 1])).unwrap_err();
        assert!(matches!(err, ReplayError::Arity { expected: 0, .. }));
    }

    #[test]
    fn test_malformed_nodes() {
        assert!(matches!(
            Node::parse(&json!(["x", 1])),
            Err(ReplayError::InvalidNode(_))
        ));
        assert!(matches!(Node::parse(&json!([])), Err(ReplayError::InvalidNode(_))));
        assert!(matches!(
            Node::parse(&json!(["c", "ident"])),
            Err(ReplayError::InvalidNode(_))
        ));
        assert!(matches!(
            Node::parse(&json!(["c", "ident", ">", 1])),
            Err(ReplayError::InvalidNode(_))
        ));
    }
}
