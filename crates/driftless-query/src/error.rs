//! Replay errors.

/// A method name the replayer refuses to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityViolation {
    /// Generic invoke-by-name primitives are never callable.
    #[error("`{0}` is not supported in queries")]
    MetaDispatch(String),

    /// The name is neither an identifier nor an allowed operator.
    #[error("Only method names matching /^[A-Za-z0-9_]+$/ or allowed operators may be called (called `{0}`)")]
    InvalidName(String),

    /// A well-formed name with no handler.
    #[error("Unknown query method `{0}`")]
    UnknownMethod(String),
}

/// Errors raised while parsing or evaluating a query AST.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    /// A disallowed method was requested.
    #[error("Query rejected: {0}")]
    Security(#[from] SecurityViolation),

    /// The JSON does not describe a valid node.
    #[error("Invalid query node: {0}")]
    InvalidNode(String),

    /// A method was called with the wrong number of arguments.
    #[error("`{method}` takes {expected} argument(s), got {got}")]
    Arity {
        /// Method name.
        method: String,
        /// Expected argument count.
        expected: usize,
        /// Supplied argument count.
        got: usize,
    },

    /// An operand of the wrong kind reached a method.
    #[error("`{method}`: {message}")]
    TypeMismatch {
        /// Method name.
        method: String,
        /// What was wrong.
        message: String,
    },

    /// The builder does not know the column.
    #[error("Unknown column `{0}`")]
    UnknownColumn(String),
}

impl ReplayError {
    /// Whether the error is a security rejection.
    #[must_use]
    pub const fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }

    pub(crate) fn type_mismatch(method: &str, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

/// Result alias for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;
