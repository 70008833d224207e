//! Form Expr - symbolic expressions for weak-form integrands
//!
//! This crate contains the expression layer the form IR compiler consumes:
//! - Terminals: arguments, coefficients, geometric quantities, literals
//! - Operators: algebra, indexing, derivatives, restrictions, averages
//! - Index model: fixed and free indices, free-index sets with dimensions
//! - Forms: integrals of integrands over measures
//!
//! # Design
//!
//! - **Immutable sharing**: [`Expr`] is an `Arc` handle; subexpressions are
//!   shared, never mutated, and safe to send across threads.
//! - **Cached metadata**: shape, free indices and a structural hash are
//!   computed once per node, so deduplication maps key directly on `Expr`.
//! - **Validated construction**: the functions in [`constructors`] enforce
//!   shape rules with assertions and fold trivial constants.
//!
//! Floats are hashed by bit pattern (see [`ScalarValue`]).

/// Compile-time assertion that a type has a specific size.
///
/// Used to prevent accidental size regressions in frequently-allocated types.
#[macro_export]
macro_rules! static_assert_size {
    ($ty:ty, $size:expr) => {
        const _: [(); $size] = [(); ::std::mem::size_of::<$ty>()];
    };
}

pub mod constructors;
mod display;
mod expr;
mod form;
mod index;
pub mod substitute;
mod terminal;

pub use expr::{Averaging, Expr, ExprKind, MathFunction, Restriction};
pub use form::{Form, Integral, IntegralType, Measure};
pub use index::{
    component_indices, fixed_indices, flatten_component, free_index_dim, free_size,
    merge_free_indices, remove_free_index, shape_size, FreeIndex, FreeIndices, Index, IndexId,
    MultiIndex, Shape,
};
pub use substitute::{fix_indices, map_terminals, replace, replace_nodes, substitute_indices};
pub use terminal::{
    Argument, CellType, Coefficient, Domain, ElementId, FiniteElement, GeometricQuantity,
    GeometryKind, ScalarValue,
};

// Expressions are passed and stored by handle everywhere; keep them one pointer.
#[cfg(target_pointer_width = "64")]
mod size_asserts {
    use super::{ElementId, Expr, IndexId};
    crate::static_assert_size!(IndexId, 4);
    crate::static_assert_size!(ElementId, 4);
    crate::static_assert_size!(Expr, 8);
}
