//! Argument factorization.
//!
//! Splits every target of a scalar graph into terms that are linear in the
//! form arguments:
//!
//! ```text
//! target = sum over keys k of  FV[k] * AV[k_0] * AV[k_1] * ...
//! ```
//!
//! where `AV` is the sorted list of modified arguments and each `FV[k]` is
//! an argument-free factor. Code generation evaluates the factors once per
//! quadrature point (or once per cell, if piecewise) and multiplies them
//! into the element tensor block addressed by the argument dofs.
//!
//! # Algorithm
//!
//! Forward sweep over the scalar graph. Each node maps either to a single
//! argument-free factor or to a map from argument key (sorted `AV`
//! positions) to factor:
//!
//! - An argument leaf is `{(own position): 1}`; other leaves are factors.
//! - A sum merges maps key-wise. Both operands must have the same argument
//!   rank.
//! - A product distributes an argument-free operand over the other map;
//!   two maps multiply pairwise with concatenated, sorted keys.
//! - A division distributes over an argument-dependent dividend. Argument
//!   dependence in a divisor, or under any other operator, is rejected.
//!
//! Factors live in a new scalar graph whose first nodes are the `AV`
//! leaves, so the position of an argument in `AV` equals its node id.
//!
//! # References
//!
//! - Ølgaard, Wells: "Optimisations for quadrature representations of
//!   finite element tensors through automated code generation", 2010

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use form_expr::constructors::{division, float, product, sum};
use form_expr::{Expr, ExprKind};

use crate::error::{IrError, IrResult};
use crate::graph::{NodeId, ScalarGraph};
use crate::modified_terminal::{analyse_modified_terminal, ModifiedTerminal};

/// Sorted positions in the argument vector, one per argument axis.
pub type ArgKey = SmallVec<[usize; 2]>;

/// Factors of one argument-dependent value, by argument key.
pub type FactorMap = BTreeMap<ArgKey, NodeId>;

/// Factor map of a value that vanishes.
static EMPTY_FACTORS: FactorMap = BTreeMap::new();

/// Result of [`compute_argument_factorization`].
#[derive(Clone, Debug)]
pub struct Factorization {
    /// Factor graph. Nodes `0..num_arguments` are the modified arguments;
    /// targets are the factor nodes in use.
    pub graph: ScalarGraph,
    pub num_arguments: usize,
    /// Modified argument at each argument position.
    pub modified_arguments: Vec<ModifiedTerminal>,
    /// For each argument key, the `(factor, target component)` pairs
    /// contributing to it, components ascending.
    pub argument_factorization: BTreeMap<ArgKey, Vec<(NodeId, usize)>>,
    /// Number of target components of the factorized graph.
    pub num_components: usize,
}

impl Factorization {
    /// Argument-vector entry `position`.
    pub fn argument(&self, position: usize) -> &Expr {
        self.graph.expr(NodeId::new(position as u32))
    }

    /// Reassemble target `component` from its factors.
    pub fn target_expr(&self, component: usize) -> Expr {
        let mut acc = float(0.0);
        for (key, contributions) in &self.argument_factorization {
            for &(factor, c) in contributions {
                if c != component {
                    continue;
                }
                let term = key.iter().fold(self.graph.expr(factor).clone(), |t, &k| {
                    product(&t, self.argument(k))
                });
                acc = sum(&acc, &term);
            }
        }
        acc
    }
}

/// Factors of one scalar graph node.
enum Factors {
    /// Does not depend on any argument.
    Free(NodeId),
    /// Linear in the arguments named by each key.
    Args(FactorMap),
}

impl Factors {
    fn rank(&self) -> usize {
        match self {
            Factors::Free(_) => 0,
            Factors::Args(map) => map.keys().next().map_or(0, SmallVec::len),
        }
    }
}

/// Factorize the targets of `graph` with respect to the form arguments.
///
/// `rank` is the number of arguments of the form: every target term must
/// depend on exactly that many.
#[tracing::instrument(level = "debug", skip_all, fields(nodes = graph.len(), rank = rank))]
pub fn compute_argument_factorization(graph: &ScalarGraph, rank: usize) -> IrResult<Factorization> {
    let terminals = leaf_terminals(graph)?;

    // Argument vector: distinct modified arguments in canonical order.
    let mut arguments: Vec<(NodeId, &ModifiedTerminal)> = terminals
        .iter()
        .filter_map(|(&id, mt)| mt.is_argument().then_some((id, mt)))
        .collect();
    arguments.sort_by(|a, b| {
        a.1.cmp_arguments(b.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    let mut modified_arguments: Vec<ModifiedTerminal> = Vec::new();
    let mut position: FxHashMap<NodeId, usize> = FxHashMap::default();
    for (id, mt) in &arguments {
        let p = match modified_arguments.iter().position(|m| m == *mt) {
            Some(p) => p,
            None => {
                modified_arguments.push((*mt).clone());
                modified_arguments.len() - 1
            }
        };
        position.insert(*id, p);
    }

    let mut fgraph = ScalarGraph::new();
    for mt in &modified_arguments {
        fgraph.insert(&mt.expr)?;
    }
    let num_arguments = modified_arguments.len();
    let one = fgraph.insert(&float(1.0))?;

    let mut factors: Vec<Factors> = Vec::with_capacity(graph.len());
    for id in graph.ids() {
        let expr = graph.expr(id);
        let argument_free = graph
            .dependencies(id)
            .iter()
            .all(|d| matches!(factors[d.index()], Factors::Free(_)));
        let f = if let Some(&p) = position.get(&id) {
            let mut map = FactorMap::new();
            map.insert(SmallVec::from_slice(&[p]), one);
            Factors::Args(map)
        } else if argument_free {
            Factors::Free(fgraph.insert(expr)?)
        } else {
            factorize_operator(&mut fgraph, expr, graph.dependencies(id), &factors)?
        };
        factors.push(f);
    }

    let mut argument_factorization: BTreeMap<ArgKey, Vec<(NodeId, usize)>> = BTreeMap::new();
    let mut rank_zero = FactorMap::new();
    for (component, &t) in graph.targets().iter().enumerate() {
        let map = match &factors[t.index()] {
            Factors::Args(map) => map,
            Factors::Free(f) if rank == 0 => {
                rank_zero.clear();
                rank_zero.insert(ArgKey::new(), *f);
                &rank_zero
            }
            Factors::Free(f) if fgraph.expr(*f).is_zero() => &EMPTY_FACTORS,
            Factors::Free(_) => {
                return Err(IrError::ArgumentRankMismatch {
                    expected: rank,
                    found: 0,
                    expr: graph.expr(t).to_string(),
                })
            }
        };
        for (key, &f) in map {
            if key.len() != rank {
                return Err(IrError::ArgumentRankMismatch {
                    expected: rank,
                    found: key.len(),
                    expr: graph.expr(t).to_string(),
                });
            }
            argument_factorization
                .entry(key.clone())
                .or_default()
                .push((f, component));
        }
    }

    for contributions in argument_factorization.values() {
        for &(f, _) in contributions {
            if !fgraph.is_target(f) {
                fgraph.push_target(f);
            }
        }
    }

    tracing::debug!(
        arguments = num_arguments,
        factors = fgraph.len() - num_arguments,
        keys = argument_factorization.len(),
        "factorized arguments"
    );
    Ok(Factorization {
        graph: fgraph,
        num_arguments,
        modified_arguments,
        argument_factorization,
        num_components: graph.targets().len(),
    })
}

/// Modified terminal of every leaf, from the graph annotation when present.
fn leaf_terminals(graph: &ScalarGraph) -> IrResult<BTreeMap<NodeId, ModifiedTerminal>> {
    let mut terminals = BTreeMap::new();
    for id in graph.ids().filter(|&id| graph.is_leaf(id)) {
        let mt = match graph.modified_terminal(id) {
            Some(mt) => mt.clone(),
            None => analyse_modified_terminal(graph.expr(id))?.ok_or_else(|| {
                IrError::UnexpectedNodeType {
                    kind: graph.expr(id).kind().name(),
                    expr: graph.expr(id).to_string(),
                }
            })?,
        };
        terminals.insert(id, mt);
    }
    Ok(terminals)
}

fn factorize_operator(
    fgraph: &mut ScalarGraph,
    expr: &Expr,
    deps: &[NodeId],
    factors: &[Factors],
) -> IrResult<Factors> {
    let operand = |k: usize| &factors[deps[k].index()];
    match expr.kind() {
        ExprKind::Sum(..) => {
            let (Factors::Args(a), Factors::Args(b)) = (operand(0), operand(1)) else {
                return Err(mixed_rank(expr, operand(0).rank(), operand(1).rank()));
            };
            let (ra, rb) = (operand(0).rank(), operand(1).rank());
            if a.keys().chain(b.keys()).any(|k| k.len() != ra) {
                return Err(mixed_rank(expr, ra, rb));
            }
            let mut merged = a.clone();
            for (key, &fb) in b {
                let f = match merged.get(key) {
                    Some(&fa) => fgraph.insert(&sum(fgraph.expr(fa), fgraph.expr(fb)))?,
                    None => fb,
                };
                merged.insert(key.clone(), f);
            }
            Ok(Factors::Args(merged))
        }
        ExprKind::Product(..) => match (operand(0), operand(1)) {
            (Factors::Free(x), Factors::Args(map)) | (Factors::Args(map), Factors::Free(x)) => {
                scale(fgraph, map, *x, product).map(Factors::Args)
            }
            (Factors::Args(a), Factors::Args(b)) => {
                let mut out = FactorMap::new();
                for (ka, &fa) in a {
                    for (kb, &fb) in b {
                        let mut key: ArgKey = ka.iter().chain(kb).copied().collect();
                        key.sort_unstable();
                        let mut f = fgraph.insert(&product(fgraph.expr(fa), fgraph.expr(fb)))?;
                        if let Some(&prev) = out.get(&key) {
                            f = fgraph.insert(&sum(fgraph.expr(prev), fgraph.expr(f)))?;
                        }
                        out.insert(key, f);
                    }
                }
                Ok(Factors::Args(out))
            }
            (Factors::Free(_), Factors::Free(_)) => Ok(Factors::Free(fgraph.insert(expr)?)),
        },
        ExprKind::Division(..) => match (operand(0), operand(1)) {
            (_, Factors::Args(_)) => Err(IrError::ArgumentInDenominator {
                expr: expr.to_string(),
            }),
            (Factors::Args(map), Factors::Free(x)) => {
                scale(fgraph, map, *x, division).map(Factors::Args)
            }
            (Factors::Free(_), Factors::Free(_)) => Ok(Factors::Free(fgraph.insert(expr)?)),
        },
        kind => Err(IrError::UnsupportedArgumentOperator {
            operator: kind.name(),
            expr: expr.to_string(),
        }),
    }
}

/// Combine every factor of `map` with the argument-free factor `x`.
fn scale<F>(fgraph: &mut ScalarGraph, map: &FactorMap, x: NodeId, combine: F) -> IrResult<FactorMap>
where
    F: Fn(&Expr, &Expr) -> Expr,
{
    let mut out = FactorMap::new();
    for (key, &f) in map {
        let scaled = combine(fgraph.expr(f), fgraph.expr(x));
        out.insert(key.clone(), fgraph.insert(&scaled)?);
    }
    Ok(out)
}

fn mixed_rank(expr: &Expr, left: usize, right: usize) -> IrError {
    IrError::MixedArgumentRank {
        left,
        right,
        expr: expr.to_string(),
    }
}

#[cfg(test)]
mod tests;
