//! Shared test utilities for the IR passes.
//!
//! Terminal factories on a fixed triangle domain, and a numeric evaluator
//! for scalar expressions used to check that rewrites preserve values.
//! Only compiled in test builds.

use form_expr::constructors::{argument, coefficient};
use form_expr::{CellType, Domain, ElementId, Expr, ExprKind, FiniteElement};

use crate::modified_terminal::is_modified_terminal;

/// Affine triangle with a P1 vector coordinate element (`ElementId(0)`).
pub(crate) fn triangle() -> Domain {
    Domain::new(CellType::Triangle, ElementId::new(0))
}

/// Scalar P1 (`ElementId(1)`).
pub(crate) fn p1() -> FiniteElement {
    FiniteElement::scalar(ElementId::new(1), 1)
}

/// Vector P1 with two components (`ElementId(2)`).
pub(crate) fn vector_p1() -> FiniteElement {
    FiniteElement::new(ElementId::new(2), 1, &[2])
}

/// Scalar DG0 (`ElementId(3)`), cellwise constant.
pub(crate) fn dg0() -> FiniteElement {
    FiniteElement::scalar(ElementId::new(3), 0)
}

/// Test function `v_0` in P1.
pub(crate) fn test_fn() -> Expr {
    argument(0, p1(), triangle())
}

/// Trial function `v_1` in P1.
pub(crate) fn trial_fn() -> Expr {
    argument(1, p1(), triangle())
}

/// Coefficient `w_count` in P1.
pub(crate) fn coeff(count: u32) -> Expr {
    coefficient(count, p1(), triangle())
}

/// Deterministic value in `[0.5, 2.0)` for a modified terminal.
pub(crate) fn leaf_value(expr: &Expr) -> f64 {
    if let Some(v) = expr.as_scalar_value() {
        return v;
    }
    0.5 + (expr.structural_hash() % 997) as f64 / 997.0 * 1.5
}

/// Evaluate a scalar expression, reading modified terminals from
/// [`leaf_value`].
pub(crate) fn evaluate(expr: &Expr) -> f64 {
    match expr.kind() {
        ExprKind::Sum(a, b) => evaluate(a) + evaluate(b),
        ExprKind::Product(a, b) => evaluate(a) * evaluate(b),
        ExprKind::Division(a, b) => evaluate(a) / evaluate(b),
        ExprKind::Power(a, b) => evaluate(a).powf(evaluate(b)),
        ExprKind::Math(f, a) => f.apply(evaluate(a)),
        ExprKind::Abs(a) => evaluate(a).abs(),
        _ if is_modified_terminal(expr) => leaf_value(expr),
        _ => panic!("cannot evaluate {expr}"),
    }
}

/// Relative closeness for evaluated values.
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-10 * (1.0 + a.abs().max(b.abs()))
}
