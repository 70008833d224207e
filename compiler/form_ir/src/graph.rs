//! Scalar dependency graph.
//!
//! [`ScalarGraph`] is an arena of scalar subexpressions in struct-of-arrays
//! layout, indexed by [`NodeId`]. Node `i` depends on the nodes holding its
//! operands; operands are always inserted first, so ids are a topological
//! order and every pass can run a single forward or backward sweep.
//!
//! Nodes are deduplicated on the expression itself. `Expr` equality is
//! structural and its hash is a content hash over the operator, operand
//! hashes and literal payload, so inserting a subexpression that is already
//! present returns the existing node (common subexpression elimination).
//!
//! Passes annotate nodes in place: the modified terminal descriptor and the
//! table reference of leaves, and the liveness status computed by
//! [`crate::dependencies::analyse_dependencies`].

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use form_expr::{Expr, ExprKind};
use form_stack::ensure_sufficient_stack;

use crate::error::{IrError, IrResult};
use crate::modified_terminal::{is_modified_terminal, ModifiedTerminal};
use crate::tables::TableReference;

mod scalarize;

pub use scalarize::{build_scalar_graph, build_scalar_graph_from_targets};

/// Node index within a [`ScalarGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Create a node ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Liveness and variability of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeStatus {
    /// Not needed by any target.
    #[default]
    Inactive,
    /// Needed, and constant over the quadrature points of a cell.
    Piecewise,
    /// Needed, and recomputed at every quadrature point.
    Varying,
}

/// Dependency lists are short: binary operators have two operands.
pub type Dependencies = SmallVec<[NodeId; 2]>;

/// DAG of scalar subexpressions.
#[derive(Clone, Debug, Default)]
pub struct ScalarGraph {
    /// Scalar expression of each node.
    exprs: Vec<Expr>,
    /// Operand nodes of each node, in operand order.
    deps: Vec<Dependencies>,
    status: Vec<NodeStatus>,
    terminals: Vec<Option<ModifiedTerminal>>,
    tables: Vec<Option<TableReference>>,
    /// Target node per output component (a node may appear more than once).
    targets: Vec<NodeId>,
    index: FxHashMap<Expr, NodeId>,
}

impl ScalarGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// All node ids in topological (insertion) order.
    pub fn ids(&self) -> impl DoubleEndedIterator<Item = NodeId> + ExactSizeIterator {
        (0..self.exprs.len() as u32).map(NodeId::new)
    }

    pub fn expr(&self, id: NodeId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        &self.deps[id.index()]
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.deps[id.index()].is_empty()
    }

    pub fn lookup(&self, expr: &Expr) -> Option<NodeId> {
        self.index.get(expr).copied()
    }

    pub fn status(&self, id: NodeId) -> NodeStatus {
        self.status[id.index()]
    }

    pub fn set_status(&mut self, id: NodeId, status: NodeStatus) {
        self.status[id.index()] = status;
    }

    pub fn modified_terminal(&self, id: NodeId) -> Option<&ModifiedTerminal> {
        self.terminals[id.index()].as_ref()
    }

    pub fn set_modified_terminal(&mut self, id: NodeId, mt: ModifiedTerminal) {
        self.terminals[id.index()] = Some(mt);
    }

    pub fn table(&self, id: NodeId) -> Option<&TableReference> {
        self.tables[id.index()].as_ref()
    }

    pub fn set_table(&mut self, id: NodeId, table: TableReference) {
        self.tables[id.index()] = Some(table);
    }

    /// Target node of each output component.
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    pub fn push_target(&mut self, id: NodeId) {
        self.targets.push(id);
    }

    pub fn is_target(&self, id: NodeId) -> bool {
        self.targets.contains(&id)
    }

    /// Insert a scalar expression and, recursively, its operands.
    ///
    /// Leaves are modified terminals (including literals); inner nodes are
    /// sums, products, divisions, powers, math functions and absolute
    /// values. Anything else is an [`IrError::UnexpectedNodeType`].
    ///
    /// # Panics
    ///
    /// Panics if `expr` is not scalar: scalarization guarantees that.
    pub fn insert(&mut self, expr: &Expr) -> IrResult<NodeId> {
        if let Some(id) = self.lookup(expr) {
            return Ok(id);
        }
        ensure_sufficient_stack(|| self.insert_new(expr))
    }

    fn insert_new(&mut self, expr: &Expr) -> IrResult<NodeId> {
        assert!(expr.is_scalar(), "scalar graph node {expr} is not scalar");
        let deps = match expr.kind() {
            ExprKind::Sum(..)
            | ExprKind::Product(..)
            | ExprKind::Division(..)
            | ExprKind::Power(..)
            | ExprKind::Math(..)
            | ExprKind::Abs(_) => expr
                .operands()
                .into_iter()
                .map(|op| self.insert(op))
                .collect::<IrResult<Dependencies>>()?,
            _ if is_modified_terminal(expr) => Dependencies::new(),
            kind => {
                return Err(IrError::UnexpectedNodeType {
                    kind: kind.name(),
                    expr: expr.to_string(),
                })
            }
        };
        let id = NodeId::new(self.exprs.len() as u32);
        self.exprs.push(expr.clone());
        self.deps.push(deps);
        self.status.push(NodeStatus::Inactive);
        self.terminals.push(None);
        self.tables.push(None);
        self.index.insert(expr.clone(), id);
        Ok(id)
    }

    /// Consumers of each node, deduplicated, in ascending order.
    pub fn inverse_dependencies(&self) -> Vec<SmallVec<[NodeId; 4]>> {
        let mut inverse: Vec<SmallVec<[NodeId; 4]>> = vec![SmallVec::new(); self.len()];
        for id in self.ids() {
            for &dep in self.dependencies(id) {
                let consumers = &mut inverse[dep.index()];
                if consumers.last() != Some(&id) {
                    consumers.push(id);
                }
            }
        }
        inverse
    }

    /// Number of nodes with each status.
    pub fn status_counts(&self) -> (usize, usize, usize) {
        self.status.iter().fold((0, 0, 0), |(i, p, v), s| match s {
            NodeStatus::Inactive => (i + 1, p, v),
            NodeStatus::Piecewise => (i, p + 1, v),
            NodeStatus::Varying => (i, p, v + 1),
        })
    }
}
