//! The expression node type.
//!
//! [`Expr`] is an `Arc`-shared immutable node. Shape, free indices and a
//! structural hash are computed once at construction, so equality checks and
//! hash-map lookups on large integrands stay cheap: two nodes are compared
//! by pointer first, then by cached hash, and only then structurally.
//!
//! Nodes are built through the constructor functions in
//! [`crate::constructors`], which validate operand shapes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::index::{FreeIndex, FreeIndices, IndexId, MultiIndex, Shape};
use crate::terminal::{Argument, Coefficient, Domain, GeometricQuantity, ScalarValue};

/// Side of an interior facet a quantity is evaluated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Restriction {
    Positive,
    Negative,
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Restriction::Positive => "+",
            Restriction::Negative => "-",
        })
    }
}

/// Averaging of a quantity over the cell or facet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Averaging {
    Cell,
    Facet,
}

/// Elementary scalar functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MathFunction {
    Sqrt,
    Exp,
    Ln,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Erf,
}

impl MathFunction {
    pub fn name(self) -> &'static str {
        match self {
            MathFunction::Sqrt => "sqrt",
            MathFunction::Exp => "exp",
            MathFunction::Ln => "ln",
            MathFunction::Sin => "sin",
            MathFunction::Cos => "cos",
            MathFunction::Tan => "tan",
            MathFunction::Asin => "asin",
            MathFunction::Acos => "acos",
            MathFunction::Atan => "atan",
            MathFunction::Sinh => "sinh",
            MathFunction::Cosh => "cosh",
            MathFunction::Tanh => "tanh",
            MathFunction::Erf => "erf",
        }
    }

    /// Evaluate the function at `x`.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            MathFunction::Sqrt => x.sqrt(),
            MathFunction::Exp => x.exp(),
            MathFunction::Ln => x.ln(),
            MathFunction::Sin => x.sin(),
            MathFunction::Cos => x.cos(),
            MathFunction::Tan => x.tan(),
            MathFunction::Asin => x.asin(),
            MathFunction::Acos => x.acos(),
            MathFunction::Atan => x.atan(),
            MathFunction::Sinh => x.sinh(),
            MathFunction::Cosh => x.cosh(),
            MathFunction::Tanh => x.tanh(),
            MathFunction::Erf => libm::erf(x),
        }
    }
}

/// The closed set of expression node kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExprKind {
    // Terminals
    Argument(Argument),
    Coefficient(Coefficient),
    Geometry(GeometricQuantity),
    Scalar(ScalarValue),
    Zero { shape: Shape, free: FreeIndices },

    // Algebra
    Sum(Expr, Expr),
    Product(Expr, Expr),
    Division(Expr, Expr),
    Power(Expr, Expr),
    Math(MathFunction, Expr),
    Abs(Expr),

    // Indexing
    IndexSum { summand: Expr, index: IndexId },
    Indexed { operand: Expr, indices: MultiIndex },
    ComponentTensor { operand: Expr, indices: MultiIndex },
    ListTensor(Vec<Expr>),

    // Terminal modifiers
    Restricted(Restriction, Expr),
    Grad(Expr),
    ReferenceGrad(Expr),
    SpatialDerivative { operand: Expr, indices: MultiIndex },
    CellAvg(Expr),
    FacetAvg(Expr),

    // Labels
    Variable { label: u32, expr: Expr },
}

impl ExprKind {
    /// Operator or terminal name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Argument(_) => "argument",
            ExprKind::Coefficient(_) => "coefficient",
            ExprKind::Geometry(_) => "geometric_quantity",
            ExprKind::Scalar(_) => "scalar_value",
            ExprKind::Zero { .. } => "zero",
            ExprKind::Sum(..) => "sum",
            ExprKind::Product(..) => "product",
            ExprKind::Division(..) => "division",
            ExprKind::Power(..) => "power",
            ExprKind::Math(..) => "math_function",
            ExprKind::Abs(_) => "abs",
            ExprKind::IndexSum { .. } => "index_sum",
            ExprKind::Indexed { .. } => "indexed",
            ExprKind::ComponentTensor { .. } => "component_tensor",
            ExprKind::ListTensor(_) => "list_tensor",
            ExprKind::Restricted(Restriction::Positive, _) => "positive_restricted",
            ExprKind::Restricted(Restriction::Negative, _) => "negative_restricted",
            ExprKind::Grad(_) => "grad",
            ExprKind::ReferenceGrad(_) => "reference_grad",
            ExprKind::SpatialDerivative { .. } => "spatial_derivative",
            ExprKind::CellAvg(_) => "cell_avg",
            ExprKind::FacetAvg(_) => "facet_avg",
            ExprKind::Variable { .. } => "variable",
        }
    }
}

struct ExprNode {
    kind: ExprKind,
    shape: Shape,
    free: FreeIndices,
    hash: u64,
}

/// Shared handle to an immutable expression node.
#[derive(Clone)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    /// Wrap a validated kind. Shape and free indices are trusted.
    pub(crate) fn from_parts(kind: ExprKind, shape: Shape, free: FreeIndices) -> Self {
        let mut hasher = FxHasher::default();
        kind.hash(&mut hasher);
        shape.hash(&mut hasher);
        free.hash(&mut hasher);
        let hash = hasher.finish();
        Expr(Arc::new(ExprNode {
            kind,
            shape,
            free,
            hash,
        }))
    }

    #[inline]
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Value shape.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.0.shape.len()
    }

    /// Free indices sorted by id.
    #[inline]
    pub fn free_indices(&self) -> &[FreeIndex] {
        &self.0.free
    }

    /// `(index, dimension)` pairs of the free indices.
    pub fn index_dimensions(&self) -> impl Iterator<Item = (IndexId, usize)> + '_ {
        self.0.free.iter().map(|fi| (fi.id, fi.dim))
    }

    /// Cached structural hash.
    #[inline]
    pub fn structural_hash(&self) -> u64 {
        self.0.hash
    }

    /// Shape-free and index-free.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.0.shape.is_empty() && self.0.free.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ExprKind::Argument(_)
                | ExprKind::Coefficient(_)
                | ExprKind::Geometry(_)
                | ExprKind::Scalar(_)
                | ExprKind::Zero { .. }
        )
    }

    /// Expression operands in a fixed order. Index payloads are not operands.
    pub fn operands(&self) -> SmallVec<[&Expr; 2]> {
        match self.kind() {
            ExprKind::Argument(_)
            | ExprKind::Coefficient(_)
            | ExprKind::Geometry(_)
            | ExprKind::Scalar(_)
            | ExprKind::Zero { .. } => SmallVec::new(),
            ExprKind::Sum(a, b)
            | ExprKind::Product(a, b)
            | ExprKind::Division(a, b)
            | ExprKind::Power(a, b) => SmallVec::from_slice(&[a, b]),
            ExprKind::Math(_, a)
            | ExprKind::Abs(a)
            | ExprKind::Restricted(_, a)
            | ExprKind::Grad(a)
            | ExprKind::ReferenceGrad(a)
            | ExprKind::CellAvg(a)
            | ExprKind::FacetAvg(a)
            | ExprKind::IndexSum { summand: a, .. }
            | ExprKind::Indexed { operand: a, .. }
            | ExprKind::ComponentTensor { operand: a, .. }
            | ExprKind::SpatialDerivative { operand: a, .. }
            | ExprKind::Variable { expr: a, .. } => SmallVec::from_slice(&[a]),
            ExprKind::ListTensor(items) => items.iter().collect(),
        }
    }

    /// Literal value of a scalar constant (including scalar zero).
    pub fn as_scalar_value(&self) -> Option<f64> {
        match self.kind() {
            ExprKind::Scalar(v) => Some(v.value()),
            ExprKind::Zero { .. } if self.is_scalar() => Some(0.0),
            _ => None,
        }
    }

    /// `Zero` of any shape, or a literal zero.
    pub fn is_zero(&self) -> bool {
        match self.kind() {
            ExprKind::Zero { .. } => true,
            ExprKind::Scalar(v) => v.is_zero(),
            _ => false,
        }
    }

    pub fn is_one(&self) -> bool {
        matches!(self.kind(), ExprKind::Scalar(v) if v.is_one())
    }

    /// Literal constants of any shape.
    pub fn is_constant_value(&self) -> bool {
        matches!(self.kind(), ExprKind::Scalar(_) | ExprKind::Zero { .. })
    }

    /// Whether the value is constant over each cell.
    pub fn is_cellwise_constant(&self) -> bool {
        match self.kind() {
            ExprKind::Argument(a) => a.element.is_cellwise_constant(),
            ExprKind::Coefficient(c) => c.element.is_cellwise_constant(),
            ExprKind::Geometry(g) => g.is_cellwise_constant(),
            ExprKind::Scalar(_) | ExprKind::Zero { .. } => true,
            _ => self.operands().iter().all(|op| op.is_cellwise_constant()),
        }
    }

    /// Domain of the first terminal found in a depth-first walk.
    pub fn domain(&self) -> Option<Domain> {
        form_stack::ensure_sufficient_stack(|| match self.kind() {
            ExprKind::Argument(a) => Some(a.domain),
            ExprKind::Coefficient(c) => Some(c.domain),
            ExprKind::Geometry(g) => Some(g.domain),
            ExprKind::Scalar(_) | ExprKind::Zero { .. } => None,
            _ => self.operands().iter().find_map(|op| op.domain()),
        })
    }

    /// Rebuild this operator over new operands (same count and order as
    /// [`Expr::operands`]). Terminals are returned unchanged.
    ///
    /// Construction goes through the validating constructors, so constant
    /// folding applies to the result.
    pub fn reconstruct(&self, operands: &[Expr]) -> Expr {
        use crate::constructors as c;
        let op = |i: usize| operands[i].clone();
        match self.kind() {
            ExprKind::Argument(_)
            | ExprKind::Coefficient(_)
            | ExprKind::Geometry(_)
            | ExprKind::Scalar(_)
            | ExprKind::Zero { .. } => self.clone(),
            ExprKind::Sum(..) => c::sum(&op(0), &op(1)),
            ExprKind::Product(..) => c::product(&op(0), &op(1)),
            ExprKind::Division(..) => c::division(&op(0), &op(1)),
            ExprKind::Power(..) => c::power(&op(0), &op(1)),
            ExprKind::Math(f, _) => c::math(*f, &op(0)),
            ExprKind::Abs(_) => c::abs(&op(0)),
            ExprKind::IndexSum { index, .. } => c::index_sum(&op(0), *index),
            ExprKind::Indexed { indices, .. } => c::indexed(&op(0), indices),
            ExprKind::ComponentTensor { indices, .. } => c::component_tensor(&op(0), indices),
            ExprKind::ListTensor(_) => c::list_tensor(operands),
            ExprKind::Restricted(side, _) => c::restricted(*side, &op(0)),
            ExprKind::Grad(_) => c::grad(&op(0)),
            ExprKind::ReferenceGrad(_) => c::reference_grad(&op(0)),
            ExprKind::SpatialDerivative { indices, .. } => c::spatial_derivative(&op(0), indices),
            ExprKind::CellAvg(_) => c::cell_avg(&op(0)),
            ExprKind::FacetAvg(_) => c::facet_avg(&op(0)),
            ExprKind::Variable { label, .. } => c::variable(*label, &op(0)),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash
                && self.0.shape == other.0.shape
                && self.0.free == other.0.free
                && self.0.kind == other.0.kind)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
