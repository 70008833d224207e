//! Liveness, variability partitioning and cache scoring.
//!
//! # Algorithm
//!
//! Node ids of a [`ScalarGraph`] are a topological order, so both passes are
//! single sweeps:
//!
//! 1. **Liveness** (backward): targets are active; the dependencies of an
//!    active node are active.
//! 2. **Variability** (forward): an active leaf is `Varying` if its table
//!    changes between quadrature points, or if it is point-dependent
//!    geometry without a table; other leaves are `Piecewise`. An active
//!    operator is `Varying` iff some dependency is.
//!
//! A table-less leaf that is neither point-dependent nor cellwise constant
//! cannot be evaluated and is reported as
//! [`IrError::UnclassifiedTerminal`].
//!
//! Cache scores estimate how much recomputation a cached node saves:
//! `dependency_count * consumer_count^3`, scaled up for math functions.
//! [`allocate_registers`] greedily caches the best scoring nodes up to a
//! register budget.
//!
//! # References
//!
//! - Alnæs, Logg, Ølgaard, Rognes, Wells: "Unified form language", 2014

use std::cmp::Reverse;

use form_expr::{Expr, ExprKind};

use crate::error::{IrError, IrResult};
use crate::graph::{NodeId, NodeStatus, ScalarGraph};
use crate::params::IrParams;

/// Annotate every node of `graph` with its [`NodeStatus`].
#[tracing::instrument(level = "debug", skip_all, fields(nodes = graph.len()))]
pub fn analyse_dependencies(graph: &mut ScalarGraph) -> IrResult<()> {
    let mut active = vec![false; graph.len()];
    for &t in graph.targets() {
        active[t.index()] = true;
    }
    for id in graph.ids().rev() {
        if active[id.index()] {
            for &dep in graph.dependencies(id) {
                active[dep.index()] = true;
            }
        }
    }

    for id in graph.ids() {
        let status = if !active[id.index()] {
            NodeStatus::Inactive
        } else if graph.is_leaf(id) {
            leaf_status(graph, id)?
        } else if graph
            .dependencies(id)
            .iter()
            .any(|&dep| graph.status(dep) == NodeStatus::Varying)
        {
            NodeStatus::Varying
        } else {
            NodeStatus::Piecewise
        };
        graph.set_status(id, status);
    }

    let (inactive, piecewise, varying) = graph.status_counts();
    tracing::debug!(inactive, piecewise, varying, "partitioned graph");
    Ok(())
}

fn leaf_status(graph: &ScalarGraph, id: NodeId) -> IrResult<NodeStatus> {
    if let Some(table) = graph.table(id) {
        return Ok(if table.ttype.is_varying() {
            NodeStatus::Varying
        } else {
            NodeStatus::Piecewise
        });
    }
    let expr = graph.expr(id);
    match core_terminal(expr).kind() {
        ExprKind::Geometry(g) if g.is_point_dependent() => Ok(NodeStatus::Varying),
        _ if expr.is_cellwise_constant() => Ok(NodeStatus::Piecewise),
        _ => Err(IrError::UnclassifiedTerminal {
            expr: expr.to_string(),
        }),
    }
}

/// Terminal at the core of a modified terminal.
fn core_terminal(expr: &Expr) -> &Expr {
    let mut t = expr;
    while let Some(&inner) = t.operands().first() {
        t = inner;
    }
    t
}

/// Cache-worthiness of each active node; `None` for inactive nodes.
pub fn compute_cache_scores(graph: &ScalarGraph, params: &IrParams) -> Vec<Option<u64>> {
    let inverse = graph.inverse_dependencies();
    graph
        .ids()
        .map(|id| {
            if graph.status(id) == NodeStatus::Inactive {
                return None;
            }
            let ndeps = graph.dependencies(id).len() as u64;
            let consumers = inverse[id.index()].len() as u64;
            let mut score = ndeps * consumers.pow(3);
            if matches!(graph.expr(id).kind(), ExprKind::Math(..)) {
                score *= params.expensive_multiplier;
            }
            Some(score)
        })
        .collect()
}

/// Choose the nodes whose values are kept in registers and number them
/// densely in node order.
///
/// Targets are always allocated. Up to
/// `max(targets, min(max_registers, nodes) - targets)` other nodes are
/// taken on top of them, by descending score (ties by node order), while
/// the score exceeds [`IrParams::score_threshold`].
pub fn allocate_registers(
    graph: &ScalarGraph,
    scores: &[Option<u64>],
    params: &IrParams,
) -> Vec<Option<u32>> {
    let n = graph.len();
    let mut allocated = vec![false; n];
    for &t in graph.targets() {
        allocated[t.index()] = true;
    }
    let num_targets = allocated.iter().filter(|&&a| a).count();
    let num_to_allocate = num_targets.max(params.max_registers.min(n).saturating_sub(num_targets));

    let mut queue: Vec<(u64, NodeId)> = graph
        .ids()
        .filter_map(|id| scores[id.index()].map(|s| (s, id)))
        .collect();
    queue.sort_by_key(|&(score, id)| (Reverse(score), id));
    let mut num_extra = 0;
    for (score, id) in queue {
        if num_extra >= num_to_allocate || score <= params.score_threshold {
            break;
        }
        if !allocated[id.index()] {
            allocated[id.index()] = true;
            num_extra += 1;
        }
    }

    let mut next = 0u32;
    let registers = allocated
        .into_iter()
        .map(|a| {
            a.then(|| {
                next += 1;
                next - 1
            })
        })
        .collect();
    tracing::debug!(registers = next, budget = num_to_allocate, "allocated registers");
    registers
}
