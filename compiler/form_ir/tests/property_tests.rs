//! Property-based tests for the IR passes.
//!
//! Random integrands over a small pool of terminals check that:
//! 1. Scalar graphs are deduplicated and topologically ordered
//! 2. Argument factorization reassembles to the same value
//! 3. Monomial extraction preserves the value of the integrand
//! 4. Table stripping and padding round-trip, and deduplication is
//!    idempotent

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]
#![allow(
    clippy::needless_pass_by_value,
    reason = "Proptest macros generate code with these patterns"
)]

use std::collections::HashSet;

use form_expr::constructors::{
    argument, coefficient, dx, float, product, product_all, sum, sum_all,
};
use form_expr::{CellType, Domain, ElementId, Expr, ExprKind, FiniteElement, Index};
use form_ir::tables::{build_unique_tables, equal_tables, strip_table_zeros, Table};
use form_ir::{
    build_scalar_graph, compute_argument_factorization, extract_monomial_integrand,
    is_modified_terminal,
};
use proptest::prelude::*;

// -- Terminals --

fn triangle() -> Domain {
    Domain::new(CellType::Triangle, ElementId::new(0))
}

fn p1() -> FiniteElement {
    FiniteElement::scalar(ElementId::new(1), 1)
}

fn w(count: u32) -> Expr {
    coefficient(count, p1(), triangle())
}

/// Argument-free scalar leaves, derivatives included.
fn factor_pool() -> Vec<Expr> {
    vec![
        w(0),
        w(1),
        w(2),
        dx(&w(0), Index::Fixed(0)),
        dx(&w(1), Index::Fixed(1)),
        float(2.0),
    ]
}

/// Leaves that are polynomial in the coefficients.
fn polynomial_pool() -> Vec<Expr> {
    vec![w(0), w(1), w(2), w(3), float(0.5)]
}

fn argument_variants(number: u32) -> Vec<Expr> {
    let v = argument(number, p1(), triangle());
    vec![v.clone(), dx(&v, Index::Fixed(0)), dx(&v, Index::Fixed(1))]
}

// -- Evaluation --

fn leaf_value(expr: &Expr) -> f64 {
    if let Some(v) = expr.as_scalar_value() {
        return v;
    }
    0.5 + (expr.structural_hash() % 997) as f64 / 997.0 * 1.5
}

fn evaluate(expr: &Expr) -> f64 {
    match expr.kind() {
        ExprKind::Sum(a, b) => evaluate(a) + evaluate(b),
        ExprKind::Product(a, b) => evaluate(a) * evaluate(b),
        ExprKind::Division(a, b) => evaluate(a) / evaluate(b),
        _ if is_modified_terminal(expr) => leaf_value(expr),
        _ => panic!("cannot evaluate {expr}"),
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
}

// -- Strategies --

/// Shape of a random sum/product tree over a leaf pool.
#[derive(Clone, Debug)]
enum Tree {
    Leaf(usize),
    Sum(Box<Tree>, Box<Tree>),
    Product(Box<Tree>, Box<Tree>),
}

impl Tree {
    fn build(&self, pool: &[Expr]) -> Expr {
        match self {
            Tree::Leaf(i) => pool[*i].clone(),
            Tree::Sum(a, b) => sum(&a.build(pool), &b.build(pool)),
            Tree::Product(a, b) => product(&a.build(pool), &b.build(pool)),
        }
    }
}

fn tree_strategy(pool_size: usize) -> impl Strategy<Value = Tree> {
    let leaf = (0..pool_size).prop_map(Tree::Leaf);
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Tree::Sum(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| Tree::Product(Box::new(a), Box::new(b))),
        ]
    })
}

/// Terms `factors * test * trial` of a bilinear integrand.
fn bilinear_terms_strategy() -> impl Strategy<Value = Vec<(Vec<usize>, usize, usize)>> {
    let term = (
        prop::collection::vec(0..factor_pool().len(), 1..3),
        0..3usize,
        0..3usize,
    );
    prop::collection::vec(term, 1..5)
}

fn bilinear_integrand(terms: &[(Vec<usize>, usize, usize)]) -> Expr {
    let pool = factor_pool();
    let (tests, trials) = (argument_variants(0), argument_variants(1));
    let summands: Vec<Expr> = terms
        .iter()
        .map(|(factors, t, s)| {
            let factors: Vec<Expr> = factors.iter().map(|&i| pool[i].clone()).collect();
            product(&product(&product_all(&factors), &tests[*t]), &trials[*s])
        })
        .collect();
    sum_all(&summands)
}

/// Table with zero dof columns around a block of random values.
fn padded_table_strategy() -> impl Strategy<Value = (Table, usize, usize)> {
    (
        1..3usize,
        1..3usize,
        1..4usize,
        0..3usize,
        1..4usize,
        0..3usize,
        prop::collection::vec(-2.0f64..2.0, 36),
    )
        .prop_map(|(np, ne, nq, lead, core, trail, seed)| {
            let table = Table::from_fn([np, ne, nq, lead + core + trail], |p, e, q, d| {
                if d < lead || d >= lead + core {
                    0.0
                } else {
                    seed[(((p * ne + e) * nq + q) * core + d - lead) % seed.len()]
                }
            });
            (table, lead, core)
        })
}

fn base_table(k: usize) -> Table {
    Table::from_fn([1, 1, 2, 2], |_, _, q, d| (k * 4 + q * 2 + d) as f64 * 0.25)
}

// -- Properties --

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    /// Every node is a distinct expression and depends only on earlier nodes.
    #[test]
    fn prop_graph_is_deduplicated(tree in tree_strategy(factor_pool().len())) {
        let expr = tree.build(&factor_pool());
        let graph = build_scalar_graph(&expr).unwrap();

        let mut seen = HashSet::new();
        for id in graph.ids() {
            prop_assert!(seen.insert(graph.expr(id).clone()), "duplicate node {}", graph.expr(id));
            prop_assert!(graph.dependencies(id).iter().all(|&d| d < id));
        }
        prop_assert_eq!(graph.targets().len(), 1);
        let target = graph.expr(graph.targets()[0]);
        prop_assert!(approx_eq(evaluate(target), evaluate(&expr)));
    }

    /// Rebuilding from the graph's own target adds no nodes.
    #[test]
    fn prop_graph_rebuild_is_stable(tree in tree_strategy(factor_pool().len())) {
        let graph = build_scalar_graph(&tree.build(&factor_pool())).unwrap();
        let rebuilt = build_scalar_graph(graph.expr(graph.targets()[0])).unwrap();
        prop_assert_eq!(rebuilt.len(), graph.len());
    }

    /// Summing factor times arguments over all keys gives back the target.
    #[test]
    fn prop_factorization_is_sound(terms in bilinear_terms_strategy()) {
        let expr = bilinear_integrand(&terms);
        let graph = build_scalar_graph(&expr).unwrap();
        let f = compute_argument_factorization(&graph, 2).unwrap();

        prop_assert_eq!(f.num_components, 1);
        prop_assert!(f.argument_factorization.keys().all(|key| key.len() == 2));
        prop_assert!(f.modified_arguments.iter().all(|mt| mt.is_argument()));
        prop_assert!(approx_eq(evaluate(&f.target_expr(0)), evaluate(&expr)));
    }

    /// The monomials of a polynomial add up to the polynomial.
    #[test]
    fn prop_monomials_preserve_value(tree in tree_strategy(polynomial_pool().len())) {
        let expr = tree.build(&polynomial_pool());
        let monomials = extract_monomial_integrand(&expr).unwrap();
        let value: f64 = monomials
            .monomials
            .iter()
            .map(|m| {
                m.factors
                    .iter()
                    .fold(m.coefficient, |acc, f| acc * leaf_value(&f.function))
            })
            .sum();
        prop_assert!(approx_eq(value, evaluate(&expr)), "{} != {}", monomials, expr);
    }

    /// Padding the stripped columns back restores the table.
    #[test]
    fn prop_strip_then_pad_round_trips((table, lead, core) in padded_table_strategy()) {
        let (begin, end, stripped) = strip_table_zeros(&table, 0.0);
        prop_assert!(begin <= end);
        if begin < end {
            prop_assert!(begin >= lead && end <= lead + core);
        }
        prop_assert_eq!(stripped.num_dofs(), end - begin);
        prop_assert_eq!(stripped.pad_dofs(begin, table.num_dofs()), table);
    }

    /// Each input maps to an equal unique table, and the unique set is a
    /// fixed point.
    #[test]
    fn prop_unique_tables_are_idempotent(picks in prop::collection::vec(0..3usize, 1..8)) {
        let tables: Vec<Table> = picks.iter().map(|&k| base_table(k)).collect();
        let (unique, mapping) = build_unique_tables(&tables, 1e-6, 1e-9);

        let distinct: HashSet<usize> = picks.iter().copied().collect();
        prop_assert_eq!(unique.len(), distinct.len());
        for (table, &u) in tables.iter().zip(&mapping) {
            prop_assert!(equal_tables(&unique[u], table, 1e-6, 1e-9));
        }

        let (again, identity) = build_unique_tables(&unique, 1e-6, 1e-9);
        prop_assert_eq!(again, unique.clone());
        prop_assert_eq!(identity, (0..unique.len()).collect::<Vec<_>>());
    }
}
