//! Error types for the form IR passes.
//!
//! Errors fall into two groups:
//! - **Input errors**: the integrand uses a construct the IR cannot
//!   represent (argument in a denominator, non-integer power in a monomial,
//!   restriction applied twice). These abort the offending integral only.
//! - **Invariant violations**: a pass received data an earlier pass should
//!   have ruled out (unexpected node kind in the scalar graph, factor arity
//!   mismatch, conflicting tables under one name). See
//!   [`IrError::is_invariant_violation`].
//!
//! Variants carry rendered expressions rather than `Expr` handles so errors
//! stay cheap to move across threads and compare in tests.

use thiserror::Error;

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;

/// Errors produced while building the IR of an integral.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum IrError {
    /// A terminal is restricted to an interior-facet side more than once.
    #[error("terminal restricted twice in {expr}")]
    DuplicateRestriction { expr: String },

    /// A terminal is cell- or facet-averaged more than once.
    #[error("terminal averaged twice in {expr}")]
    DuplicateAveraging { expr: String },

    /// Global (physical) and local (reference) derivatives on one terminal.
    #[error("global and reference derivatives mixed in {expr}")]
    MixedDerivativeFrames { expr: String },

    /// A node kind the scalar graph cannot represent.
    #[error("unexpected {kind} node in scalar graph: {expr}")]
    UnexpectedNodeType { kind: &'static str, expr: String },

    /// The integrand is not a polynomial in scalar basis-function factors.
    #[error("cannot extract monomials from {construct}: {detail}")]
    MonomialExtraction {
        construct: &'static str,
        detail: String,
    },

    /// A divisor depends on an argument.
    #[error("argument-dependent divisor in {expr}")]
    ArgumentInDenominator { expr: String },

    /// An operator that is not linear in its operands sees an argument.
    #[error("{operator} applied to argument-dependent operand in {expr}")]
    UnsupportedArgumentOperator {
        operator: &'static str,
        expr: String,
    },

    /// A sum merges terms that depend on different numbers of arguments.
    #[error("sum mixes terms of argument rank {left} and {right} in {expr}")]
    MixedArgumentRank {
        left: usize,
        right: usize,
        expr: String,
    },

    /// A factorized target does not have the rank of the form.
    #[error("term of argument rank {found} in a form of rank {expected}: {expr}")]
    ArgumentRankMismatch {
        expected: usize,
        found: usize,
        expr: String,
    },

    /// Two different tables were produced under the same name.
    #[error("table values mismatch with same name {name}")]
    TableNameCollision { name: String },

    /// The caller supplied no raw basis values for a terminal that needs them.
    #[error("no basis table for {key}")]
    MissingBasisTable { key: String },

    /// A terminal has no table and is not cellwise constant.
    #[error("terminal {expr} has no table and is not cellwise constant")]
    UnclassifiedTerminal { expr: String },

    /// A compiler parameter override was rejected.
    #[error("invalid parameter {key} = {value:?}: {reason}")]
    InvalidParameter {
        key: String,
        value: String,
        reason: String,
    },
}

impl IrError {
    /// Whether this error indicates a defect in an earlier pass rather than
    /// unsupported input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            IrError::UnexpectedNodeType { .. }
                | IrError::MixedArgumentRank { .. }
                | IrError::TableNameCollision { .. }
                | IrError::UnclassifiedTerminal { .. }
        )
    }
}
