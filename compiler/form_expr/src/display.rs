//! Human-readable rendering of expressions for diagnostics.
//!
//! Arguments print as `v_{number}`, coefficients as `w_{count}`, free
//! indices as `i_{id}`. Binary operators are parenthesized except products,
//! so `u * (v + w)` prints unambiguously without a precedence table.

use std::fmt;

use form_stack::ensure_sufficient_stack;

use crate::expr::{Expr, ExprKind};
use crate::index::Index;

fn write_indices(f: &mut fmt::Formatter<'_>, indices: &[Index]) -> fmt::Result {
    for (i, index) in indices.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{index}")?;
    }
    Ok(())
}

fn write_shape(f: &mut fmt::Formatter<'_>, shape: &[usize]) -> fmt::Result {
    f.write_str("(")?;
    for (i, d) in shape.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{d}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ensure_sufficient_stack(|| match self.kind() {
            ExprKind::Argument(a) => match a.part {
                Some(part) => write!(f, "v_{}^{}", a.number, part),
                None => write!(f, "v_{}", a.number),
            },
            ExprKind::Coefficient(c) => write!(f, "w_{}", c.count),
            ExprKind::Geometry(g) => f.write_str(g.name()),
            ExprKind::Scalar(v) => write!(f, "{v}"),
            ExprKind::Zero { shape, .. } => {
                if shape.is_empty() {
                    f.write_str("0")
                } else {
                    f.write_str("0<")?;
                    write_shape(f, shape)?;
                    f.write_str(">")
                }
            }
            ExprKind::Sum(a, b) => write!(f, "({a} + {b})"),
            ExprKind::Product(a, b) => write!(f, "{a} * {b}"),
            ExprKind::Division(a, b) => write!(f, "({a} / {b})"),
            ExprKind::Power(a, b) => write!(f, "({a} ** {b})"),
            ExprKind::Math(func, a) => write!(f, "{}({a})", func.name()),
            ExprKind::Abs(a) => write!(f, "|{a}|"),
            ExprKind::IndexSum { summand, index } => {
                write!(f, "sum_{{i_{}}}({summand})", index.raw())
            }
            ExprKind::Indexed { operand, indices } => {
                write!(f, "{operand}[")?;
                write_indices(f, indices)?;
                f.write_str("]")
            }
            ExprKind::ComponentTensor { operand, indices } => {
                write!(f, "{{ A | A_{{")?;
                write_indices(f, indices)?;
                write!(f, "}} = {operand} }}")
            }
            ExprKind::ListTensor(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ExprKind::Restricted(side, a) => write!(f, "{a}('{side}')"),
            ExprKind::Grad(a) => write!(f, "grad({a})"),
            ExprKind::ReferenceGrad(a) => write!(f, "reference_grad({a})"),
            ExprKind::SpatialDerivative { operand, indices } => {
                write!(f, "{operand}.dx(")?;
                write_indices(f, indices)?;
                f.write_str(")")
            }
            ExprKind::CellAvg(a) => write!(f, "cell_avg({a})"),
            ExprKind::FacetAvg(a) => write!(f, "facet_avg({a})"),
            ExprKind::Variable { label, expr } => write!(f, "var{label}({expr})"),
        })
    }
}
