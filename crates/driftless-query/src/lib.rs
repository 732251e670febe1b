//! # driftless-query
//!
//! Safe replay of query expression trees captured on an untrusted client.
//!
//! A client builds a condition such as `ident.lat > 80` and ships it as a
//! JSON AST. This crate parses that AST into a typed tree, checking every
//! method name against a closed dispatch table, and only then replays it
//! against a [`QueryBuilder`]. [`SqlBuilder`] turns the result into a
//! parameterized `WHERE` fragment.
//!
//! ```
//! use driftless_query::{replay_condition, SqlBuilder, SqlValue};
//! use serde_json::json;
//!
//! let ast = json!(["c", ["c", "ident", "lat"], ">", 80]);
//! let expr = replay_condition(&ast, &mut SqlBuilder::new()).unwrap();
//! assert_eq!(expr.sql(), "\"lat\" > ?");
//! assert_eq!(expr.params(), &[SqlValue::Int(80)]);
//!
//! let evil = json!(["c", ["c", "ident", "name"], "send", "system", "rm -rf /"]);
//! assert!(replay_condition(&evil, &mut SqlBuilder::new()).unwrap_err().is_security());
//! ```

pub mod ast;
pub mod builder;
pub mod error;
pub mod replay;
pub mod value;

pub use ast::{Method, Node};
pub use builder::{Comparison, LikeMode, Operand, QueryBuilder, SqlBuilder, SqlExpr};
pub use error::{ReplayError, Result, SecurityViolation};
pub use replay::{eval, replay, replay_condition, Replayed};
pub use value::SqlValue;
