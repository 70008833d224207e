//! Modified terminal analysis.
//!
//! A *modified terminal* is a terminal (argument, coefficient, geometric
//! quantity or literal) wrapped in any nesting of indexing, derivatives,
//! restriction and averaging, e.g. `grad(u)('+')[0, 1]`. These are the
//! leaves of the scalar graph: each one is evaluated by a single table
//! lookup (or is a cellwise constant) in generated code.
//!
//! # Algorithm
//!
//! Peel modifiers from the outside in. Indexing records the component;
//! each `grad` / `reference_grad` consumes the last component entry as its
//! derivative direction; `dx(i, ..)` contributes its directions directly.
//! Directions are collected outermost first and reversed at the end, so
//! the result lists derivatives in application order.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use form_expr::{
    flatten_component, Argument, Averaging, Expr, ExprKind, FiniteElement, Restriction,
};

use crate::error::{IrError, IrResult};

/// Component or derivative directions of a modified terminal.
pub type Directions = SmallVec<[usize; 4]>;

/// Canonical description of a modified terminal.
///
/// Equality and hashing ignore [`ModifiedTerminal::expr`]: `u.dx(0)` and
/// `grad(u)[0]` describe the same quantity.
#[derive(Clone, Debug)]
pub struct ModifiedTerminal {
    /// The analysed scalar expression.
    pub expr: Expr,
    /// The terminal at the core.
    pub terminal: Expr,
    /// Physical derivative directions in application order.
    pub global_derivatives: Directions,
    /// Reference derivative directions in application order.
    pub local_derivatives: Directions,
    /// Component of the terminal's value shape.
    pub component: Directions,
    /// `component` flattened row-major against the terminal's value shape.
    pub flat_component: usize,
    pub restriction: Option<Restriction>,
    pub averaged: Option<Averaging>,
}

impl ModifiedTerminal {
    pub fn argument(&self) -> Option<&Argument> {
        match self.terminal.kind() {
            ExprKind::Argument(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_argument(&self) -> bool {
        self.argument().is_some()
    }

    /// Finite element of a form-argument terminal.
    pub fn element(&self) -> Option<&FiniteElement> {
        match self.terminal.kind() {
            ExprKind::Argument(a) => Some(&a.element),
            ExprKind::Coefficient(c) => Some(&c.element),
            _ => None,
        }
    }

    pub fn has_derivatives(&self) -> bool {
        !self.global_derivatives.is_empty() || !self.local_derivatives.is_empty()
    }

    /// Ordering used to lay out the argument vector: argument number, part,
    /// component, derivatives, restriction, averaging.
    ///
    /// Returns `None` unless both terminals are arguments.
    pub fn cmp_arguments(&self, other: &Self) -> Option<Ordering> {
        let (a, b) = (self.argument()?, other.argument()?);
        Some(
            (a.number, a.part)
                .cmp(&(b.number, b.part))
                .then_with(|| self.component.cmp(&other.component))
                .then_with(|| self.global_derivatives.cmp(&other.global_derivatives))
                .then_with(|| self.local_derivatives.cmp(&other.local_derivatives))
                .then_with(|| self.restriction.cmp(&other.restriction))
                .then_with(|| self.averaged.cmp(&other.averaged)),
        )
    }
}

impl PartialEq for ModifiedTerminal {
    fn eq(&self, other: &Self) -> bool {
        self.terminal == other.terminal
            && self.global_derivatives == other.global_derivatives
            && self.local_derivatives == other.local_derivatives
            && self.component == other.component
            && self.restriction == other.restriction
            && self.averaged == other.averaged
    }
}

impl Eq for ModifiedTerminal {}

impl Hash for ModifiedTerminal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.terminal.hash(state);
        self.global_derivatives.hash(state);
        self.local_derivatives.hash(state);
        self.component.hash(state);
        self.restriction.hash(state);
        self.averaged.hash(state);
    }
}

/// Whether `expr` is a terminal wrapped only in terminal modifiers.
///
/// Purely structural: the result may still be tensor-valued or carry free
/// indices.
pub fn is_modified_terminal(expr: &Expr) -> bool {
    let mut t = expr;
    loop {
        match t.kind() {
            ExprKind::Argument(_)
            | ExprKind::Coefficient(_)
            | ExprKind::Geometry(_)
            | ExprKind::Scalar(_)
            | ExprKind::Zero { .. } => return true,
            ExprKind::Indexed { operand, .. }
            | ExprKind::SpatialDerivative { operand, .. }
            | ExprKind::Restricted(_, operand)
            | ExprKind::Grad(operand)
            | ExprKind::ReferenceGrad(operand)
            | ExprKind::CellAvg(operand)
            | ExprKind::FacetAvg(operand) => t = operand,
            _ => return false,
        }
    }
}

/// Analyse a scalar expression as a modified terminal.
///
/// Returns `Ok(None)` when `expr` is not a scalar modified terminal with
/// fixed indices (an operator, a free index, or indexing applied beneath a
/// derivative).
pub fn analyse_modified_terminal(expr: &Expr) -> IrResult<Option<ModifiedTerminal>> {
    if !expr.is_scalar() {
        return Ok(None);
    }

    let mut component: Option<Directions> = None;
    let mut global = Directions::new();
    let mut local = Directions::new();
    let mut restriction = None;
    let mut averaged = None;

    let mut t = expr;
    while !t.is_terminal() {
        match t.kind() {
            ExprKind::Indexed { operand, indices } => {
                if component.is_some() || !global.is_empty() || !local.is_empty() {
                    return Ok(None);
                }
                let Some(fixed) = indices
                    .iter()
                    .map(|i| i.as_fixed())
                    .collect::<Option<Directions>>()
                else {
                    return Ok(None);
                };
                component = Some(fixed);
                t = operand;
            }
            ExprKind::Grad(operand) => {
                let Some(d) = component.as_mut().and_then(SmallVec::pop) else {
                    return Ok(None);
                };
                global.push(d);
                t = operand;
            }
            ExprKind::ReferenceGrad(operand) => {
                let Some(d) = component.as_mut().and_then(SmallVec::pop) else {
                    return Ok(None);
                };
                local.push(d);
                t = operand;
            }
            ExprKind::SpatialDerivative { operand, indices } => {
                for index in indices.iter().rev() {
                    let Some(d) = index.as_fixed() else {
                        return Ok(None);
                    };
                    global.push(d);
                }
                t = operand;
            }
            ExprKind::Restricted(side, operand) => {
                if restriction.is_some() {
                    return Err(IrError::DuplicateRestriction {
                        expr: expr.to_string(),
                    });
                }
                restriction = Some(*side);
                t = operand;
            }
            ExprKind::CellAvg(operand) | ExprKind::FacetAvg(operand) => {
                if averaged.is_some() {
                    return Err(IrError::DuplicateAveraging {
                        expr: expr.to_string(),
                    });
                }
                averaged = Some(if matches!(t.kind(), ExprKind::CellAvg(_)) {
                    Averaging::Cell
                } else {
                    Averaging::Facet
                });
                t = operand;
            }
            _ => return Ok(None),
        }
    }

    if !global.is_empty() && !local.is_empty() {
        return Err(IrError::MixedDerivativeFrames {
            expr: expr.to_string(),
        });
    }
    global.reverse();
    local.reverse();

    let component = component.unwrap_or_default();
    if component.len() != t.rank() {
        return Ok(None);
    }
    let flat_component = flatten_component(&component, t.shape());

    Ok(Some(ModifiedTerminal {
        expr: expr.clone(),
        terminal: t.clone(),
        global_derivatives: global,
        local_derivatives: local,
        component,
        flat_component,
        restriction,
        averaged,
    }))
}

/// Count derivatives per direction: `[0, 1, 1]` in 2D gives `[1, 2]`.
pub fn derivative_counts(directions: &[usize], dim: usize) -> SmallVec<[u8; 3]> {
    let mut counts: SmallVec<[u8; 3]> = SmallVec::from_elem(0, dim);
    for &d in directions {
        counts[d] += 1;
    }
    counts
}

#[cfg(test)]
mod tests;
