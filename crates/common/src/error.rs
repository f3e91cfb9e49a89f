use thiserror::Error;

/// Canonical compiler error taxonomy used across quarry crates.
///
/// Classification guidance:
/// - [`CompilerError::UnsupportedOperator`]: a pass met an operator kind it
///   does not implement in that position (a compiler defect, not bad input)
/// - [`CompilerError::InvalidPlan`]: structural contract violations in the
///   input plan (dangling ids, asymmetric edges, cycles, arity mismatches)
/// - [`CompilerError::Generic`]: unexpected internal failures wrapped with a
///   descriptive message (for example a malformed table location URL)
///
/// Every compilation phase returns on the first error; no partial plan is
/// ever produced and nothing is retried.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// A combine or result-building pass was asked to handle an operator
    /// kind it does not implement.
    ///
    /// Examples:
    /// - `SqlUnary` reaching the result builder, which only accepts base
    ///   operators
    /// - a coarse operator appearing inside a join chain being collected
    #[error("unsupported operator {operator} in {context}")]
    UnsupportedOperator {
        /// Operator kind name.
        operator: String,
        /// Pass or position that could not handle it.
        context: String,
    },

    /// Structural violations in the compile plan.
    ///
    /// Examples:
    /// - a child id with no arena entry
    /// - parent/child edge lists that are not symmetric
    /// - attribute and type lists of different arity
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Unexpected internal failure with a descriptive message.
    #[error("compiler error: {0}")]
    Generic(String),
}

impl CompilerError {
    /// Shorthand for [`CompilerError::UnsupportedOperator`].
    pub fn unsupported(operator: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnsupportedOperator {
            operator: operator.into(),
            context: context.into(),
        }
    }
}

/// Standard quarry result alias.
pub type Result<T> = std::result::Result<T, CompilerError>;
