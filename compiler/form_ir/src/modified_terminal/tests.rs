#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use smallvec::smallvec;

use form_expr::constructors::{
    argument, cell_avg, dx, float, geometry, grad, indexed, negative_restricted,
    positive_restricted, reference_grad, sum,
};
use form_expr::{fixed_indices, Averaging, GeometryKind, Index, IndexId, Restriction};

use super::{analyse_modified_terminal, derivative_counts, is_modified_terminal, Directions};
use crate::error::IrError;
use crate::test_helpers::{coeff, test_fn, trial_fn, triangle, vector_p1};

#[test]
fn bare_terminal() {
    let w = coeff(0);
    let mt = analyse_modified_terminal(&w).unwrap().unwrap();
    assert_eq!(mt.terminal, w);
    assert!(mt.component.is_empty());
    assert!(!mt.has_derivatives());
    assert_eq!(mt.restriction, None);
    assert_eq!(mt.averaged, None);
}

#[test]
fn indexed_gradient_consumes_last_component() {
    let u = argument(1, vector_p1(), triangle());
    let e = indexed(&grad(&u), &fixed_indices(&[1, 0]));
    let mt = analyse_modified_terminal(&e).unwrap().unwrap();
    let component: Directions = smallvec![1];
    let derivatives: Directions = smallvec![0];
    assert_eq!(mt.component, component);
    assert_eq!(mt.flat_component, 1);
    assert_eq!(mt.global_derivatives, derivatives);
    assert!(mt.local_derivatives.is_empty());
    assert!(mt.is_argument());
}

#[test]
fn derivatives_keep_application_order() {
    let w = coeff(0);
    let e = indexed(&grad(&grad(&w)), &fixed_indices(&[1, 0]));
    let mt = analyse_modified_terminal(&e).unwrap().unwrap();
    let expected: Directions = smallvec![1, 0];
    assert_eq!(mt.global_derivatives, expected);

    let e = dx(&dx(&w, Index::Fixed(1)), Index::Fixed(0));
    let mt = analyse_modified_terminal(&e).unwrap().unwrap();
    assert_eq!(mt.global_derivatives, expected);
}

#[test]
fn equal_descriptors_from_different_spellings() {
    let w = coeff(2);
    let a = analyse_modified_terminal(&dx(&w, Index::Fixed(1)))
        .unwrap()
        .unwrap();
    let b = analyse_modified_terminal(&indexed(&grad(&w), &fixed_indices(&[1])))
        .unwrap()
        .unwrap();
    assert_eq!(a, b);
    assert!(a.expr != b.expr);
}

#[test]
fn restriction_and_averaging_in_any_order() {
    let w = coeff(0);
    let e = positive_restricted(&cell_avg(&w));
    let mt = analyse_modified_terminal(&e).unwrap().unwrap();
    assert_eq!(mt.restriction, Some(Restriction::Positive));
    assert_eq!(mt.averaged, Some(Averaging::Cell));

    let e = cell_avg(&positive_restricted(&w));
    let other = analyse_modified_terminal(&e).unwrap().unwrap();
    assert_eq!(mt, other);
}

#[test]
fn double_restriction_fails() {
    let e = negative_restricted(&positive_restricted(&coeff(0)));
    let err = analyse_modified_terminal(&e).unwrap_err();
    assert!(matches!(err, IrError::DuplicateRestriction { .. }));
}

#[test]
fn double_averaging_fails() {
    let e = cell_avg(&cell_avg(&coeff(0)));
    assert!(matches!(
        analyse_modified_terminal(&e),
        Err(IrError::DuplicateAveraging { .. })
    ));
}

#[test]
fn mixed_frames_fail() {
    let w = coeff(0);
    let e = indexed(&grad(&reference_grad(&w)), &fixed_indices(&[0, 1]));
    assert!(matches!(
        analyse_modified_terminal(&e),
        Err(IrError::MixedDerivativeFrames { .. })
    ));
}

#[test]
fn operators_and_free_indices_are_not_modified_terminals() {
    let e = sum(&test_fn(), &trial_fn());
    assert!(analyse_modified_terminal(&e).unwrap().is_none());
    assert!(!is_modified_terminal(&e));

    let i = IndexId::new(3);
    let e = indexed(&grad(&coeff(0)), &[Index::Free(i)]);
    assert!(is_modified_terminal(&e));
    assert!(analyse_modified_terminal(&e).unwrap().is_none());

    let tensor = grad(&coeff(0));
    assert!(is_modified_terminal(&tensor));
    assert!(analyse_modified_terminal(&tensor).unwrap().is_none());
}

#[test]
fn indexing_beneath_derivative_is_rejected() {
    let u = argument(0, vector_p1(), triangle());
    let e = dx(&indexed(&u, &fixed_indices(&[0])), Index::Fixed(1));
    assert!(analyse_modified_terminal(&e).unwrap().is_none());
}

#[test]
fn geometry_and_literals() {
    let x = geometry(GeometryKind::SpatialCoordinate, triangle());
    let mt = analyse_modified_terminal(&indexed(&x, &fixed_indices(&[1])))
        .unwrap()
        .unwrap();
    assert_eq!(mt.flat_component, 1);
    assert!(mt.element().is_none());

    let one = analyse_modified_terminal(&float(1.0)).unwrap().unwrap();
    assert!(one.terminal.is_one());
}

#[test]
fn argument_order() {
    let v = analyse_modified_terminal(&test_fn()).unwrap().unwrap();
    let u = analyse_modified_terminal(&trial_fn()).unwrap().unwrap();
    let du = analyse_modified_terminal(&dx(&trial_fn(), Index::Fixed(0)))
        .unwrap()
        .unwrap();
    let w = analyse_modified_terminal(&coeff(0)).unwrap().unwrap();
    assert_eq!(v.cmp_arguments(&u), Some(std::cmp::Ordering::Less));
    assert_eq!(du.cmp_arguments(&u), Some(std::cmp::Ordering::Greater));
    assert_eq!(w.cmp_arguments(&u), None);
}

#[test]
fn counts_per_direction() {
    assert_eq!(derivative_counts(&[0, 1, 1], 2).as_slice(), &[1, 2]);
    assert_eq!(derivative_counts(&[], 3).as_slice(), &[0, 0, 0]);
}
