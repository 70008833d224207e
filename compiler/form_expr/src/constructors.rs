//! Validating expression constructors.
//!
//! Every [`Expr`] is built through one of these functions. Each checks the
//! shape and free-index rules of its operator and panics on a malformed
//! operand, since a malformed expression is a bug in whoever built it. The
//! constructors also perform the elementary simplifications the rest of the
//! workspace relies on:
//!
//! - `0 + a = a`, `0 · a = 0`, `1 · a = a`, `a / 1 = a`, `0 / a = 0`, `a ^ 1 = a`
//! - arithmetic on two literals folds to a literal
//! - index operators, sums and averages of `Zero` stay `Zero`
//! - derivatives of cellwise constant operands are `Zero`
//! - modifiers applied to literals return the literal

use crate::expr::{Averaging, Expr, ExprKind, MathFunction, Restriction};
use crate::index::{
    free_index_dim, merge_free_indices, remove_free_index, FreeIndex, FreeIndices, Index,
    IndexId, MultiIndex, Shape,
};
use crate::terminal::{
    Argument, Coefficient, Domain, FiniteElement, GeometricQuantity, GeometryKind, ScalarValue,
};

// Terminals

/// Test (`number == 0`) or trial (`number == 1`) function.
pub fn argument(number: u32, element: FiniteElement, domain: Domain) -> Expr {
    let shape = element.value_shape.clone();
    let arg = Argument {
        number,
        part: None,
        element,
        domain,
    };
    Expr::from_parts(ExprKind::Argument(arg), shape, FreeIndices::new())
}

/// Argument with an explicit block part.
pub fn argument_part(number: u32, part: u32, element: FiniteElement, domain: Domain) -> Expr {
    let shape = element.value_shape.clone();
    let arg = Argument {
        number,
        part: Some(part),
        element,
        domain,
    };
    Expr::from_parts(ExprKind::Argument(arg), shape, FreeIndices::new())
}

pub fn coefficient(count: u32, element: FiniteElement, domain: Domain) -> Expr {
    let shape = element.value_shape.clone();
    let coeff = Coefficient {
        count,
        element,
        domain,
    };
    Expr::from_parts(ExprKind::Coefficient(coeff), shape, FreeIndices::new())
}

pub fn geometry(kind: GeometryKind, domain: Domain) -> Expr {
    let gq = GeometricQuantity { kind, domain };
    let shape = gq.shape();
    Expr::from_parts(ExprKind::Geometry(gq), shape, FreeIndices::new())
}

pub fn float(value: f64) -> Expr {
    scalar(ScalarValue::Float(value))
}

pub fn int(value: i64) -> Expr {
    scalar(ScalarValue::Int(value))
}

/// Literal scalar. A zero value becomes scalar `Zero`.
pub fn scalar(value: ScalarValue) -> Expr {
    if value.is_zero() {
        return zero(&[]);
    }
    Expr::from_parts(ExprKind::Scalar(value), Shape::new(), FreeIndices::new())
}

/// Zero of the given shape without free indices.
pub fn zero(shape: &[usize]) -> Expr {
    zero_with_free(shape, &[])
}

/// Zero of the given shape and free indices.
///
/// # Panics
///
/// Panics if `free` is not sorted by id or repeats an id.
pub fn zero_with_free(shape: &[usize], free: &[FreeIndex]) -> Expr {
    assert!(
        free.windows(2).all(|w| w[0].id < w[1].id),
        "zero free indices must be sorted and unique"
    );
    let shape: Shape = shape.iter().copied().collect();
    let free: FreeIndices = free.iter().copied().collect();
    Expr::from_parts(
        ExprKind::Zero {
            shape: shape.clone(),
            free: free.clone(),
        },
        shape,
        free,
    )
}

fn literal(expr: &Expr) -> Option<ScalarValue> {
    match expr.kind() {
        ExprKind::Scalar(v) => Some(*v),
        _ => None,
    }
}

fn fold_literals(
    a: ScalarValue,
    b: ScalarValue,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Expr {
    match (a, b) {
        (ScalarValue::Int(x), ScalarValue::Int(y)) => match int_op(x, y) {
            Some(v) => int(v),
            None => float(float_op(x as f64, y as f64)),
        },
        _ => float(float_op(a.value(), b.value())),
    }
}

// Algebra

/// `a + b`.
///
/// # Panics
///
/// Panics if the operands differ in shape or free indices.
pub fn sum(a: &Expr, b: &Expr) -> Expr {
    assert_eq!(a.shape(), b.shape(), "sum of operands with different shapes: {a} + {b}");
    assert_eq!(
        a.free_indices(),
        b.free_indices(),
        "sum of operands with different free indices: {a} + {b}"
    );
    if a.is_zero() {
        return b.clone();
    }
    if b.is_zero() {
        return a.clone();
    }
    if let (Some(x), Some(y)) = (literal(a), literal(b)) {
        return fold_literals(x, y, i64::checked_add, |p, q| p + q);
    }
    Expr::from_parts(
        ExprKind::Sum(a.clone(), b.clone()),
        a.shape().into(),
        a.free_indices().into(),
    )
}

/// `a * b`, the product of a scalar with a scalar or a tensor.
///
/// Free indices of the operands are united: a repeated index multiplies
/// matching components and is not summed.
///
/// # Panics
///
/// Panics if both operands are tensor-valued or a shared free index has
/// different dimensions.
pub fn product(a: &Expr, b: &Expr) -> Expr {
    assert!(
        a.rank() == 0 || b.rank() == 0,
        "product of two tensor-valued operands: {a} * {b}"
    );
    let shape: Shape = if a.rank() > 0 { a.shape().into() } else { b.shape().into() };
    let free = merge_free_indices(a.free_indices(), b.free_indices());
    if a.is_zero() || b.is_zero() {
        return zero_with_free(&shape, &free);
    }
    if a.is_one() {
        return b.clone();
    }
    if b.is_one() {
        return a.clone();
    }
    if let (Some(x), Some(y)) = (literal(a), literal(b)) {
        return fold_literals(x, y, i64::checked_mul, |p, q| p * q);
    }
    Expr::from_parts(ExprKind::Product(a.clone(), b.clone()), shape, free)
}

/// `a / b` with a scalar-shaped divisor.
///
/// # Panics
///
/// Panics if `b` is tensor-valued or literal zero, or if `b` carries free
/// indices and `a` is tensor-valued or has other free indices.
pub fn division(a: &Expr, b: &Expr) -> Expr {
    assert_eq!(b.rank(), 0, "division by tensor-valued expression {b}");
    assert!(!b.is_zero(), "division by zero: {a} / {b}");
    assert!(
        b.free_indices().is_empty()
            || (a.rank() == 0
                && (a.free_indices().is_empty() || a.free_indices() == b.free_indices())),
        "division with mismatched free indices: {a} / {b}"
    );
    let free = merge_free_indices(a.free_indices(), b.free_indices());
    if a.is_zero() {
        return zero_with_free(a.shape(), &free);
    }
    if b.is_one() {
        return a.clone();
    }
    if let (Some(x), Some(y)) = (literal(a), literal(b)) {
        return float(x.value() / y.value());
    }
    Expr::from_parts(ExprKind::Division(a.clone(), b.clone()), a.shape().into(), free)
}

/// `a ^ b` for scalar-shaped `a` and scalar `b`.
///
/// # Panics
///
/// Panics if `a` is tensor-valued or `b` is not scalar.
pub fn power(a: &Expr, b: &Expr) -> Expr {
    assert_eq!(a.rank(), 0, "power of tensor-valued expression {a}");
    assert!(b.is_scalar(), "power with non-scalar exponent {b}");
    if b.is_one() {
        return a.clone();
    }
    if a.is_scalar() {
        if let (Some(x), Some(y)) = (a.as_scalar_value(), b.as_scalar_value()) {
            if let (Some(ScalarValue::Int(p)), Some(ScalarValue::Int(q))) = (literal(a), literal(b)) {
                if let Some(v) = u32::try_from(q).ok().and_then(|q| p.checked_pow(q)) {
                    return int(v);
                }
            }
            return float(x.powf(y));
        }
    }
    Expr::from_parts(
        ExprKind::Power(a.clone(), b.clone()),
        Shape::new(),
        a.free_indices().into(),
    )
}

/// Elementary function of a scalar-shaped operand.
///
/// # Panics
///
/// Panics if `a` is tensor-valued.
pub fn math(function: MathFunction, a: &Expr) -> Expr {
    assert_eq!(a.rank(), 0, "{}() of tensor-valued expression {a}", function.name());
    if a.is_scalar() {
        if let Some(x) = a.as_scalar_value() {
            return float(function.apply(x));
        }
    }
    Expr::from_parts(ExprKind::Math(function, a.clone()), Shape::new(), a.free_indices().into())
}

pub fn sqrt(a: &Expr) -> Expr {
    math(MathFunction::Sqrt, a)
}

pub fn exp(a: &Expr) -> Expr {
    math(MathFunction::Exp, a)
}

/// Componentwise absolute value.
pub fn abs(a: &Expr) -> Expr {
    if a.is_zero() {
        return a.clone();
    }
    if let Some(v) = literal(a) {
        return match v {
            ScalarValue::Int(i) => int(i.abs()),
            ScalarValue::Float(f) => float(f.abs()),
        };
    }
    Expr::from_parts(ExprKind::Abs(a.clone()), a.shape().into(), a.free_indices().into())
}

// Indexing

/// Sum of `summand` over all values of its free index `index`.
///
/// # Panics
///
/// Panics if `index` is not free in `summand`.
pub fn index_sum(summand: &Expr, index: IndexId) -> Expr {
    assert!(
        free_index_dim(summand.free_indices(), index).is_some(),
        "index_sum over i_{} which is not free in {summand}",
        index.raw()
    );
    let free = remove_free_index(summand.free_indices(), index);
    if summand.is_zero() {
        return zero_with_free(summand.shape(), &free);
    }
    Expr::from_parts(
        ExprKind::IndexSum {
            summand: summand.clone(),
            index,
        },
        summand.shape().into(),
        free,
    )
}

/// `a[indices]`, one index per axis of `a`. The result is scalar-shaped.
///
/// # Panics
///
/// Panics on a rank mismatch, an out-of-range fixed index, a repeated free
/// index, or a free index already free in `a`.
pub fn indexed(a: &Expr, indices: &[Index]) -> Expr {
    assert_eq!(
        indices.len(),
        a.rank(),
        "indexing {a} of rank {} with {} indices",
        a.rank(),
        indices.len()
    );
    if indices.is_empty() {
        return a.clone();
    }
    let mut new_free = FreeIndices::new();
    for (axis, (&index, &dim)) in indices.iter().zip(a.shape()).enumerate() {
        match index {
            Index::Fixed(v) => assert!(v < dim, "index {v} out of range {dim} on axis {axis} of {a}"),
            Index::Free(id) => {
                assert!(
                    free_index_dim(a.free_indices(), id).is_none()
                        && free_index_dim(&new_free, id).is_none(),
                    "repeated free index i_{} indexing {a}",
                    id.raw()
                );
                new_free.push(FreeIndex { id, dim });
            }
        }
    }
    new_free.sort_unstable();
    let free = merge_free_indices(a.free_indices(), &new_free);
    if a.is_zero() {
        return zero_with_free(&[], &free);
    }
    Expr::from_parts(
        ExprKind::Indexed {
            operand: a.clone(),
            indices: indices.iter().copied().collect(),
        },
        Shape::new(),
        free,
    )
}

/// Tensor with axes ranging over the free `indices` of scalar-shaped `a`.
///
/// # Panics
///
/// Panics if `a` is tensor-valued or an index is fixed or not free in `a`.
pub fn component_tensor(a: &Expr, indices: &[Index]) -> Expr {
    assert_eq!(a.rank(), 0, "component tensor over tensor-valued {a}");
    if indices.is_empty() {
        return a.clone();
    }
    let mut shape = Shape::new();
    let mut free: FreeIndices = a.free_indices().into();
    for index in indices {
        let Index::Free(id) = *index else {
            panic!("component tensor over fixed index {index} in {a}");
        };
        let Some(dim) = free_index_dim(&free, id) else {
            panic!("component tensor over i_{} which is not free in {a}", id.raw());
        };
        shape.push(dim);
        free = remove_free_index(&free, id);
    }
    if a.is_zero() {
        return zero_with_free(&shape, &free);
    }
    Expr::from_parts(
        ExprKind::ComponentTensor {
            operand: a.clone(),
            indices: indices.iter().copied().collect(),
        },
        shape,
        free,
    )
}

/// Tensor stacking `items` along a new leading axis.
///
/// # Panics
///
/// Panics if `items` is empty or the items differ in shape or free indices.
pub fn list_tensor(items: &[Expr]) -> Expr {
    let Some(first) = items.first() else {
        panic!("list tensor without items");
    };
    for item in &items[1..] {
        assert_eq!(item.shape(), first.shape(), "list tensor items with different shapes");
        assert_eq!(
            item.free_indices(),
            first.free_indices(),
            "list tensor items with different free indices"
        );
    }
    let mut shape = Shape::with_capacity(first.rank() + 1);
    shape.push(items.len());
    shape.extend_from_slice(first.shape());
    if items.iter().all(Expr::is_zero) {
        return zero_with_free(&shape, first.free_indices());
    }
    Expr::from_parts(ExprKind::ListTensor(items.to_vec()), shape, first.free_indices().into())
}

/// Vector of scalar items.
pub fn as_vector(items: &[Expr]) -> Expr {
    list_tensor(items)
}

// Terminal modifiers

pub fn restricted(side: Restriction, a: &Expr) -> Expr {
    if a.is_constant_value() {
        return a.clone();
    }
    Expr::from_parts(ExprKind::Restricted(side, a.clone()), a.shape().into(), a.free_indices().into())
}

/// `a('+')`.
pub fn positive_restricted(a: &Expr) -> Expr {
    restricted(Restriction::Positive, a)
}

/// `a('-')`.
pub fn negative_restricted(a: &Expr) -> Expr {
    restricted(Restriction::Negative, a)
}

pub fn averaged(kind: Averaging, a: &Expr) -> Expr {
    match kind {
        Averaging::Cell => cell_avg(a),
        Averaging::Facet => facet_avg(a),
    }
}

pub fn cell_avg(a: &Expr) -> Expr {
    if a.is_constant_value() {
        return a.clone();
    }
    Expr::from_parts(ExprKind::CellAvg(a.clone()), a.shape().into(), a.free_indices().into())
}

pub fn facet_avg(a: &Expr) -> Expr {
    if a.is_constant_value() {
        return a.clone();
    }
    Expr::from_parts(ExprKind::FacetAvg(a.clone()), a.shape().into(), a.free_indices().into())
}

fn derivative_domain(a: &Expr, op: &str) -> Domain {
    match a.domain() {
        Some(domain) => domain,
        None => panic!("{op} of {a} which has no domain"),
    }
}

fn appended_shape(a: &Expr, dim: usize) -> Shape {
    let mut shape: Shape = a.shape().into();
    shape.push(dim);
    shape
}

/// Gradient with respect to physical coordinates: appends a `gdim` axis.
///
/// # Panics
///
/// Panics if `a` has no domain.
pub fn grad(a: &Expr) -> Expr {
    let gdim = derivative_domain(a, "grad").gdim;
    let shape = appended_shape(a, gdim);
    if a.is_cellwise_constant() {
        return zero_with_free(&shape, a.free_indices());
    }
    Expr::from_parts(ExprKind::Grad(a.clone()), shape, a.free_indices().into())
}

/// Gradient with respect to reference coordinates: appends a `tdim` axis.
///
/// # Panics
///
/// Panics if `a` has no domain.
pub fn reference_grad(a: &Expr) -> Expr {
    let tdim = derivative_domain(a, "reference_grad").tdim();
    let shape = appended_shape(a, tdim);
    if a.is_cellwise_constant() {
        return zero_with_free(&shape, a.free_indices());
    }
    Expr::from_parts(ExprKind::ReferenceGrad(a.clone()), shape, a.free_indices().into())
}

/// `a.dx(indices...)`: derivative in the physical directions `indices`,
/// keeping the shape of `a`. Free direction indices range over `gdim`.
///
/// # Panics
///
/// Panics if `a` has no domain, a fixed direction is out of range, or a
/// free direction index is already free in `a`.
pub fn spatial_derivative(a: &Expr, indices: &[Index]) -> Expr {
    if indices.is_empty() {
        return a.clone();
    }
    let gdim = derivative_domain(a, "spatial_derivative").gdim;
    let mut new_free = FreeIndices::new();
    for &index in indices {
        match index {
            Index::Fixed(v) => assert!(v < gdim, "derivative direction {v} out of range {gdim}"),
            Index::Free(id) => {
                assert!(
                    free_index_dim(a.free_indices(), id).is_none(),
                    "derivative direction i_{} already free in {a}",
                    id.raw()
                );
                if free_index_dim(&new_free, id).is_none() {
                    new_free.push(FreeIndex { id, dim: gdim });
                }
            }
        }
    }
    new_free.sort_unstable();
    let free = merge_free_indices(a.free_indices(), &new_free);
    if a.is_cellwise_constant() {
        return zero_with_free(a.shape(), &free);
    }
    let indices: MultiIndex = indices.iter().copied().collect();
    Expr::from_parts(
        ExprKind::SpatialDerivative {
            operand: a.clone(),
            indices,
        },
        a.shape().into(),
        free,
    )
}

/// `a.dx(i)` for a single direction.
pub fn dx(a: &Expr, index: Index) -> Expr {
    spatial_derivative(a, &[index])
}

// Labels

/// Labelled subexpression. Transparent to evaluation.
pub fn variable(label: u32, a: &Expr) -> Expr {
    Expr::from_parts(
        ExprKind::Variable {
            label,
            expr: a.clone(),
        },
        a.shape().into(),
        a.free_indices().into(),
    )
}

// Compound helpers

/// `a - b`.
pub fn difference(a: &Expr, b: &Expr) -> Expr {
    sum(a, &product(&int(-1), b))
}

/// `sum_i a[i] * b[i]` for vectors of equal length.
///
/// # Panics
///
/// Panics if `a` and `b` are not vectors of equal length.
pub fn dot(a: &Expr, b: &Expr) -> Expr {
    assert!(
        a.rank() == 1 && b.rank() == 1 && a.shape() == b.shape(),
        "dot of non-matching vectors {a} and {b}"
    );
    let id = IndexId::fresh();
    let i = Index::Free(id);
    index_sum(&product(&indexed(a, &[i]), &indexed(b, &[i])), id)
}

/// Sum of a non-empty list of same-shaped expressions as a left-nested chain.
///
/// # Panics
///
/// Panics if `terms` is empty.
pub fn sum_all(terms: &[Expr]) -> Expr {
    let Some((first, rest)) = terms.split_first() else {
        panic!("sum of an empty list");
    };
    rest.iter().fold(first.clone(), |acc, t| sum(&acc, t))
}

/// Product of a non-empty list of expressions as a left-nested chain.
///
/// # Panics
///
/// Panics if `factors` is empty.
pub fn product_all(factors: &[Expr]) -> Expr {
    let Some((first, rest)) = factors.split_first() else {
        panic!("product of an empty list");
    };
    rest.iter().fold(first.clone(), |acc, f| product(&acc, f))
}
