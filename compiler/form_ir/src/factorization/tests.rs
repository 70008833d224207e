#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;

use form_expr::constructors::{
    division, dot, dx, exp, float, grad, indexed, product, product_all, sum,
};
use form_expr::{fixed_indices, Expr, Index};

use super::{compute_argument_factorization, ArgKey, Factorization};
use crate::error::IrError;
use crate::graph::{build_scalar_graph, ScalarGraph};
use crate::test_helpers::{approx_eq, coeff, evaluate, test_fn, trial_fn};

fn key(positions: &[usize]) -> ArgKey {
    positions.iter().copied().collect()
}

fn factorize(e: &Expr, rank: usize) -> (ScalarGraph, Factorization) {
    let graph = build_scalar_graph(e).unwrap();
    let f = compute_argument_factorization(&graph, rank).unwrap();
    (graph, f)
}

fn factor_expr(f: &Factorization, positions: &[usize], component: usize) -> Expr {
    let contributions = &f.argument_factorization[&key(positions)];
    let (node, _) = contributions
        .iter()
        .find(|&&(_, c)| c == component)
        .unwrap();
    f.graph.expr(*node).clone()
}

fn assert_sound(graph: &ScalarGraph, f: &Factorization) {
    for (component, &t) in graph.targets().iter().enumerate() {
        let expected = evaluate(graph.expr(t));
        let actual = evaluate(&f.target_expr(component));
        assert!(approx_eq(expected, actual), "component {component}: {expected} != {actual}");
    }
}

#[test]
fn mass_matrix_has_unit_factor() {
    let (v, u) = (test_fn(), trial_fn());
    let (_, f) = factorize(&product(&v, &u), 2);
    assert_eq!(f.num_arguments, 2);
    assert_eq!(f.argument(0), &v);
    assert_eq!(f.argument(1), &u);
    assert_eq!(
        f.argument_factorization.keys().cloned().collect::<Vec<_>>(),
        vec![key(&[0, 1])]
    );
    assert_eq!(factor_expr(&f, &[0, 1], 0), float(1.0));
}

#[test]
fn coefficient_becomes_the_factor() {
    let (v, u, w) = (test_fn(), trial_fn(), coeff(0));
    let (graph, f) = factorize(&product_all(&[w.clone(), v, u]), 2);
    assert_eq!(factor_expr(&f, &[0, 1], 0), w);
    assert_sound(&graph, &f);
    assert!(f.graph.is_target(f.graph.lookup(&w).unwrap()));
}

#[test]
fn shared_keys_add_their_factors() {
    let (v, u, w) = (test_fn(), trial_fn(), coeff(0));
    let uv = product(&v, &u);
    let (graph, f) = factorize(&sum(&uv, &product(&w, &uv)), 2);
    assert_eq!(f.argument_factorization.len(), 1);
    assert_eq!(factor_expr(&f, &[0, 1], 0), sum(&float(1.0), &w));
    assert_sound(&graph, &f);
}

#[test]
fn stiffness_and_mass_terms_have_separate_keys() {
    let (v, u) = (test_fn(), trial_fn());
    let e = sum(&product(&v, &u), &dot(&grad(&v), &grad(&u)));
    let (graph, f) = factorize(&e, 2);
    // v, v_x, v_y, u, u_x, u_y
    assert_eq!(f.num_arguments, 6);
    assert_eq!(f.modified_arguments[1].global_derivatives.as_slice(), &[0]);
    assert_eq!(
        f.argument_factorization.keys().cloned().collect::<Vec<_>>(),
        vec![key(&[0, 3]), key(&[1, 4]), key(&[2, 5])]
    );
    assert_sound(&graph, &f);
}

#[test]
fn nonlinear_coefficient_expression_is_sound() {
    let (v, u) = (test_fn(), trial_fn());
    let (w0, w1, w2) = (coeff(0), coeff(1), coeff(2));
    let scale = division(&exp(&sum(&w0, &w1)), &w2);
    let e = sum(
        &product_all(&[scale.clone(), v.clone(), u.clone()]),
        &product(&dx(&v, Index::Fixed(0)), &product(&u, &w1)),
    );
    let (graph, f) = factorize(&e, 2);
    assert_eq!(f.argument_factorization.len(), 2);
    assert_sound(&graph, &f);
}

#[test]
fn equal_products_of_sums_accumulate() {
    let v = test_fn();
    let s = sum(&v, &dx(&v, Index::Fixed(0)));
    let (graph, f) = factorize(&product(&s, &s), 2);
    // (v + v_x)^2 = v v + 2 v v_x + v_x v_x
    assert_eq!(factor_expr(&f, &[0, 1], 0), float(2.0));
    assert_eq!(f.argument_factorization.len(), 3);
    assert_sound(&graph, &f);
}

#[test]
fn functional_has_empty_key() {
    let (w0, w1) = (coeff(0), coeff(1));
    let (_, f) = factorize(&product(&w0, &w1), 0);
    assert_eq!(f.num_arguments, 0);
    assert_eq!(factor_expr(&f, &[], 0), product(&w0, &w1));
}

#[test]
fn vector_target_factorizes_per_component() {
    let (v, w) = (test_fn(), coeff(0));
    let (graph, f) = factorize(&product(&v, &grad(&w)), 1);
    assert_eq!(f.num_components, 2);
    let contributions = &f.argument_factorization[&key(&[0])];
    assert_eq!(contributions.iter().map(|&(_, c)| c).collect::<Vec<_>>(), vec![0, 1]);
    let gw1 = indexed(&grad(&w), &fixed_indices(&[1]));
    assert_eq!(factor_expr(&f, &[0], 1), gw1);
    assert_sound(&graph, &f);
}

#[test]
fn argument_in_divisor_is_rejected() {
    let graph = build_scalar_graph(&division(&coeff(0), &test_fn())).unwrap();
    assert!(matches!(
        compute_argument_factorization(&graph, 1),
        Err(IrError::ArgumentInDenominator { .. })
    ));
}

#[test]
fn nonlinear_operator_on_argument_is_rejected() {
    let graph = build_scalar_graph(&exp(&test_fn())).unwrap();
    match compute_argument_factorization(&graph, 1) {
        Err(IrError::UnsupportedArgumentOperator { operator, .. }) => {
            assert_eq!(operator, "math_function");
        }
        other => panic!("expected UnsupportedArgumentOperator, got {other:?}"),
    }
}

#[test]
fn sums_must_not_mix_argument_ranks() {
    let (v, u, w) = (test_fn(), trial_fn(), coeff(0));
    for e in [sum(&v, &w), sum(&product(&v, &u), &v)] {
        let graph = build_scalar_graph(&e).unwrap();
        let err = compute_argument_factorization(&graph, 1).unwrap_err();
        assert!(matches!(err, IrError::MixedArgumentRank { .. }), "{e}: {err}");
        assert!(err.is_invariant_violation());
    }
}

#[test]
fn target_rank_must_match_form() {
    let graph = build_scalar_graph(&test_fn()).unwrap();
    assert_eq!(
        compute_argument_factorization(&graph, 2).unwrap_err(),
        IrError::ArgumentRankMismatch {
            expected: 2,
            found: 1,
            expr: test_fn().to_string(),
        }
    );
    let graph = build_scalar_graph(&coeff(0)).unwrap();
    assert!(matches!(
        compute_argument_factorization(&graph, 1),
        Err(IrError::ArgumentRankMismatch { found: 0, .. })
    ));
}
