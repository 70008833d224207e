//! Rewriting expressions: free-index substitution and node replacement.
//!
//! All rewrites are memoized on structural identity, so a DAG with heavy
//! sharing is rebuilt in time linear in its number of distinct nodes, and
//! shared subexpressions stay shared in the result. Unchanged subtrees are
//! returned as the original `Arc`s.

use rustc_hash::FxHashMap;

use form_stack::ensure_sufficient_stack;

use crate::constructors::{
    component_tensor, index_sum, indexed, spatial_derivative, zero_with_free,
};
use crate::expr::{Expr, ExprKind};
use crate::index::{FreeIndex, FreeIndices, Index, IndexId, MultiIndex};

/// Replace free indices of `expr` according to `map`.
///
/// An index mapped to [`Index::Fixed`] disappears from the free-index set;
/// an index mapped to another free index is renamed. Indices bound inside
/// `expr` by an index sum or a component tensor shadow the map within their
/// scope.
pub fn substitute_indices(expr: &Expr, map: &FxHashMap<IndexId, Index>) -> Expr {
    if map.is_empty() {
        return expr.clone();
    }
    IndexSubstitution::new(map.clone()).visit(expr)
}

/// Substitute fixed values for free indices, pairing `ids` with `values`.
///
/// # Panics
///
/// Panics if the slices differ in length.
pub fn fix_indices(expr: &Expr, ids: &[IndexId], values: &[usize]) -> Expr {
    assert_eq!(ids.len(), values.len(), "index/value count mismatch");
    let map: FxHashMap<IndexId, Index> = ids
        .iter()
        .zip(values)
        .map(|(&id, &v)| (id, Index::Fixed(v)))
        .collect();
    substitute_indices(expr, &map)
}

struct IndexSubstitution {
    map: FxHashMap<IndexId, Index>,
    memo: FxHashMap<Expr, Expr>,
}

impl IndexSubstitution {
    fn new(map: FxHashMap<IndexId, Index>) -> Self {
        Self {
            map,
            memo: FxHashMap::default(),
        }
    }

    fn affects(&self, expr: &Expr) -> bool {
        expr.free_indices()
            .iter()
            .any(|fi| self.map.contains_key(&fi.id))
    }

    fn map_indices(&self, indices: &[Index]) -> MultiIndex {
        indices
            .iter()
            .map(|&index| match index {
                Index::Free(id) => self.map.get(&id).copied().unwrap_or(index),
                Index::Fixed(_) => index,
            })
            .collect()
    }

    /// Visit `operand` with `bound` removed from the map.
    fn visit_scoped(&mut self, operand: &Expr, bound: &[Index]) -> Expr {
        let shadows = bound
            .iter()
            .filter_map(|i| i.as_free())
            .any(|id| self.map.contains_key(&id));
        if !shadows {
            return self.visit(operand);
        }
        let mut inner = self.map.clone();
        for id in bound.iter().filter_map(|i| i.as_free()) {
            inner.remove(&id);
        }
        if inner.is_empty() {
            return operand.clone();
        }
        IndexSubstitution::new(inner).visit(operand)
    }

    fn visit(&mut self, expr: &Expr) -> Expr {
        if !self.affects(expr) {
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
        match expr.kind() {
            ExprKind::Zero { shape, free } => {
                let mut renamed: FreeIndices = free
                    .iter()
                    .filter_map(|fi| match self.map.get(&fi.id) {
                        None => Some(*fi),
                        Some(Index::Free(id)) => Some(FreeIndex {
                            id: *id,
                            dim: fi.dim,
                        }),
                        Some(Index::Fixed(_)) => None,
                    })
                    .collect();
                renamed.sort_unstable();
                zero_with_free(shape, &renamed)
            }
            ExprKind::Indexed { operand, indices } => {
                let operand = self.visit(operand);
                indexed(&operand, &self.map_indices(indices))
            }
            ExprKind::SpatialDerivative { operand, indices } => {
                let operand = self.visit(operand);
                spatial_derivative(&operand, &self.map_indices(indices))
            }
            ExprKind::ComponentTensor { operand, indices } => {
                let operand = self.visit_scoped(operand, indices);
                component_tensor(&operand, indices)
            }
            ExprKind::IndexSum { summand, index } => {
                let summand = self.visit_scoped(summand, &[Index::Free(*index)]);
                index_sum(&summand, *index)
            }
            _ => {
                let operands: Vec<Expr> = expr
                    .operands()
                    .into_iter()
                    .map(|op| self.visit(op))
                    .collect();
                expr.reconstruct(&operands)
            }
        }
    }
}

/// Rebuild `expr` with every node for which `f` returns `Some` replaced.
///
/// `f` sees the original nodes top-down; a replaced node is not descended
/// into. Parents of replaced nodes are rebuilt through the constructors, so
/// replacing a factor with zero folds the enclosing product away.
pub fn replace_nodes<F>(expr: &Expr, f: &mut F) -> Expr
where
    F: FnMut(&Expr) -> Option<Expr>,
{
    let mut memo = FxHashMap::default();
    replace_rec(expr, f, &mut memo)
}

fn replace_rec<F>(expr: &Expr, f: &mut F, memo: &mut FxHashMap<Expr, Expr>) -> Expr
where
    F: FnMut(&Expr) -> Option<Expr>,
{
    if let Some(done) = memo.get(expr) {
        return done.clone();
    }
    let result = ensure_sufficient_stack(|| {
        if let Some(replacement) = f(expr) {
            return replacement;
        }
        let operands = expr.operands();
        if operands.is_empty() {
            return expr.clone();
        }
        let rebuilt: Vec<Expr> = operands
            .iter()
            .map(|op| replace_rec(op, f, memo))
            .collect();
        if rebuilt.iter().zip(&operands).all(|(new, old)| new == *old) {
            expr.clone()
        } else {
            expr.reconstruct(&rebuilt)
        }
    });
    memo.insert(expr.clone(), result.clone());
    result
}

/// Replace subexpressions found as keys of `map`.
pub fn replace(expr: &Expr, map: &FxHashMap<Expr, Expr>) -> Expr {
    if map.is_empty() {
        return expr.clone();
    }
    replace_nodes(expr, &mut |e: &Expr| map.get(e).cloned())
}

/// Replace terminals for which `f` returns `Some`.
pub fn map_terminals<F>(expr: &Expr, mut f: F) -> Expr
where
    F: FnMut(&Expr) -> Option<Expr>,
{
    replace_nodes(expr, &mut |e: &Expr| if e.is_terminal() { f(e) } else { None })
}
