//! Integrand normalization ahead of scalarization.
//!
//! The scalar graph builder accepts only scalar algebra over modified
//! terminals in canonical form. This pass rewrites an integrand into that
//! shape without changing its value:
//!
//! - quadrature weights become `1.0`, since generated code applies the
//!   weight once per point outside the factorized expression;
//! - labels (`Variable`) are stripped;
//! - `Indexed(ComponentTensor(a, i), j)` becomes `a` with `i` renamed to `j`;
//! - `Indexed(ListTensor(..), [c, ..])` with a fixed leading index selects
//!   item `c`;
//! - modifier chains are balanced into the order
//!   `terminal → derivatives → averaging → restriction → indexing`.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use form_expr::constructors::{float, indexed};
use form_expr::{
    map_terminals, replace_nodes, substitute_indices, Expr, ExprKind, GeometryKind, Index,
    IndexId,
};
use form_stack::ensure_sufficient_stack;

use crate::modified_terminal::is_modified_terminal;

/// Normalize an integrand for scalarization.
pub fn normalize(expr: &Expr) -> Expr {
    let result = Normalizer::default().visit(&replace_quadrature_weights(expr));
    tracing::trace!(before = %expr, after = %result, "normalized integrand");
    result
}

/// Replace every quadrature-weight terminal with `1.0`.
pub fn replace_quadrature_weights(expr: &Expr) -> Expr {
    map_terminals(expr, |t| match t.kind() {
        ExprKind::Geometry(g) if g.kind == GeometryKind::QuadratureWeight => Some(float(1.0)),
        _ => None,
    })
}

/// Eliminate `Indexed(ListTensor(..), fixed)` only, leaving everything else
/// in place.
pub fn purge_list_tensors(expr: &Expr) -> Expr {
    replace_nodes(expr, &mut |e: &Expr| match e.kind() {
        ExprKind::Indexed { operand, indices } => match operand.kind() {
            ExprKind::ListTensor(_) => {
                select_list_item(operand, indices).map(|item| purge_list_tensors(&item))
            }
            _ => None,
        },
        _ => None,
    })
}

/// `items[c][rest..]` for a fixed leading index `c`.
fn select_list_item(list: &Expr, indices: &[Index]) -> Option<Expr> {
    let ExprKind::ListTensor(items) = list.kind() else {
        return None;
    };
    let (first, rest) = indices.split_first()?;
    let item = items.get(first.as_fixed()?)?;
    Some(indexed(item, rest))
}

#[derive(Default)]
struct Normalizer {
    memo: FxHashMap<Expr, Expr>,
}

impl Normalizer {
    fn visit(&mut self, expr: &Expr) -> Expr {
        if expr.is_terminal() {
            return expr.clone();
        }
        if let Some(done) = self.memo.get(expr) {
            return done.clone();
        }
        let result = ensure_sufficient_stack(|| self.rewrite(expr));
        self.memo.insert(expr.clone(), result.clone());
        result
    }

    fn rewrite(&mut self, expr: &Expr) -> Expr {
        if is_modified_terminal(expr) {
            return balance_modifiers(expr);
        }
        match expr.kind() {
            ExprKind::Variable { expr: inner, .. } => self.visit(inner),
            ExprKind::Indexed { operand, indices } => {
                let operand = self.visit(operand);
                match operand.kind() {
                    ExprKind::ComponentTensor {
                        operand: body,
                        indices: bound,
                    } => {
                        let map: FxHashMap<IndexId, Index> = bound
                            .iter()
                            .filter_map(|b| b.as_free())
                            .zip(indices.iter().copied())
                            .collect();
                        let renamed = substitute_indices(body, &map);
                        self.visit(&renamed)
                    }
                    ExprKind::ListTensor(_) => match select_list_item(&operand, indices) {
                        Some(item) => self.visit(&item),
                        None => indexed(&operand, indices),
                    },
                    _ => finish(indexed(&operand, indices)),
                }
            }
            _ => {
                let operands: Vec<Expr> = expr
                    .operands()
                    .into_iter()
                    .map(|op| self.visit(op))
                    .collect();
                finish(expr.reconstruct(&operands))
            }
        }
    }
}

/// Rebuilding can fold an operator away and expose a modifier chain.
fn finish(rebuilt: Expr) -> Expr {
    if !rebuilt.is_terminal() && is_modified_terminal(&rebuilt) {
        balance_modifiers(&rebuilt)
    } else {
        rebuilt
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Layer {
    Derivative,
    Average,
    Restriction,
    Index,
}

fn layer(expr: &Expr) -> Option<Layer> {
    match expr.kind() {
        ExprKind::Grad(_) | ExprKind::ReferenceGrad(_) | ExprKind::SpatialDerivative { .. } => {
            Some(Layer::Derivative)
        }
        ExprKind::CellAvg(_) | ExprKind::FacetAvg(_) => Some(Layer::Average),
        ExprKind::Restricted(..) => Some(Layer::Restriction),
        ExprKind::Indexed { .. } => Some(Layer::Index),
        _ => None,
    }
}

/// Reorder the modifiers of a modified terminal canonically.
///
/// Chains that differentiate an indexed quantity (`grad(v[0])`) cannot be
/// reordered without changing shapes; those are returned unchanged and
/// rejected later by the scalar graph builder.
pub fn balance_modifiers(expr: &Expr) -> Expr {
    let mut layers: SmallVec<[&Expr; 4]> = SmallVec::new();
    let mut t = expr;
    while !t.is_terminal() {
        layers.push(t);
        match t.operands().first().copied() {
            Some(op) => t = op,
            None => return expr.clone(),
        }
    }
    let terminal = t;

    // Application order: innermost first.
    layers.reverse();
    let mut seen_index = false;
    for l in &layers {
        match layer(l) {
            Some(Layer::Index) => seen_index = true,
            Some(Layer::Derivative) if seen_index => {
                if !matches!(l.kind(), ExprKind::SpatialDerivative { .. }) {
                    return expr.clone();
                }
            }
            Some(_) => {}
            None => return expr.clone(),
        }
    }

    let mut sorted: SmallVec<[(Layer, &Expr); 4]> = layers
        .iter()
        .filter_map(|l| Some((layer(l)?, *l)))
        .collect();
    sorted.sort_by_key(|(kind, _)| *kind);
    if sorted.iter().map(|(_, l)| *l).eq(layers.iter().copied()) {
        return expr.clone();
    }

    let mut rebuilt = terminal.clone();
    for (_, l) in sorted {
        rebuilt = l.reconstruct(std::slice::from_ref(&rebuilt));
    }
    rebuilt
}
