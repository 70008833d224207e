#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use smallvec::SmallVec;

use form_expr::constructors::{cell_avg, coefficient, geometry, indexed, reference_grad};
use form_expr::{
    fixed_indices, Averaging, Domain, ElementId, Expr, FiniteElement, GeometryKind, IntegralType,
};

use super::*;
use crate::error::IrError;
use crate::modified_terminal::{analyse_modified_terminal, ModifiedTerminal};
use crate::params::IrParams;
use crate::test_helpers::{dg0, test_fn, triangle, trial_fn};

const RTOL: f64 = 1e-6;
const ATOL: f64 = 1e-9;

/// Single permutation and entity, values given per point.
fn table(rows: &[&[f64]]) -> Table {
    let nq = rows.len();
    let nd = rows.first().map_or(0, |r| r.len());
    Table::from_fn([1, 1, nq, nd], |_, _, q, d| rows[q][d])
}

fn mt(expr: &Expr) -> ModifiedTerminal {
    analyse_modified_terminal(expr).unwrap().unwrap()
}

fn key(element: u32, entity: usize, derivatives: &[u8]) -> PsiKey {
    PsiKey {
        num_points: 1,
        element: ElementId::new(element),
        averaged: None,
        entity,
        frame: DerivativeFrame::Reference,
        derivatives: SmallVec::from_slice(derivatives),
    }
}

fn scalar_basis(values: &[f64]) -> BasisTable {
    BasisTable::from_fn(values.len(), 1, 1, |d, _, _| values[d])
}

fn build(
    integral_type: IntegralType,
    domain: &Domain,
    terminals: &[ModifiedTerminal],
    psi: &PsiTables,
) -> Result<OptimizedTables, IrError> {
    let exprs: Vec<Expr> = terminals.iter().map(|t| t.expr.clone()).collect();
    let numbering = ElementNumbering::from_exprs(&exprs);
    build_optimized_tables(
        1,
        integral_type,
        domain,
        terminals,
        &numbering,
        psi,
        &IrParams::default(),
    )
}

#[test]
fn all_zero_table_strips_to_empty_range() {
    let t = table(&[&[0.0, 0.0, 0.0, 0.0, 0.0]]);
    let (begin, end, stripped) = strip_table_zeros(&t, ATOL);
    assert_eq!((begin, end), (5, 5));
    assert_eq!(stripped.num_dofs(), 0);
    assert_eq!(analyse_table_type(&t, RTOL, ATOL), TableType::Zeros);
}

#[test]
fn strip_then_pad_reproduces_table() {
    let t = table(&[&[0.0, 0.25, 0.0, 0.5, 0.0], &[0.0, 0.75, 1.0, 0.0, 0.0]]);
    let (begin, end, stripped) = strip_table_zeros(&t, ATOL);
    assert_eq!((begin, end), (1, 4));
    assert_eq!(stripped.num_dofs(), 3);
    assert_eq!(stripped.pad_dofs(begin, t.num_dofs()), t);
}

#[test]
fn strip_ignores_values_below_tolerance() {
    let t = table(&[&[1e-12, 0.5, -1e-11]]);
    let (begin, end, _) = strip_table_zeros(&t, ATOL);
    assert_eq!((begin, end), (1, 2));
}

#[test]
fn clamping_snaps_to_zero_and_unit() {
    let t = table(&[&[1e-12, 1.0 + 1e-8, -1.0 + 1e-10, 0.5]]);
    let clamped = clamp_table_small_numbers(&t, RTOL, ATOL);
    assert_eq!(clamped.values(), &[0.0, 1.0, -1.0, 0.5]);
}

#[test]
fn ones_requires_a_single_column() {
    assert_eq!(
        analyse_table_type(&table(&[&[1.0], &[1.0]]), RTOL, ATOL),
        TableType::Ones
    );
    assert_eq!(
        analyse_table_type(&table(&[&[1.0, 1.0]]), RTOL, ATOL),
        TableType::Fixed
    );
}

#[test]
fn classification_by_varying_axes() {
    // Two entities, two points.
    let by = |f: fn(usize, usize) -> f64| {
        Table::from_fn([1, 2, 2, 2], move |_, e, q, d| f(e, q) + d as f64 * 0.1)
    };
    assert_eq!(analyse_table_type(&by(|_, _| 0.3), RTOL, ATOL), TableType::Fixed);
    assert_eq!(
        analyse_table_type(&by(|e, _| 0.3 + e as f64), RTOL, ATOL),
        TableType::Piecewise
    );
    assert_eq!(
        analyse_table_type(&by(|_, q| 0.3 + q as f64), RTOL, ATOL),
        TableType::Uniform
    );
    assert_eq!(
        analyse_table_type(&by(|e, q| 0.3 + (e * 2 + q) as f64), RTOL, ATOL),
        TableType::Varying
    );
}

#[test]
fn identity_blocks_are_quadrature_tables() {
    let t = Table::from_fn([1, 2, 3, 3], |_, _, q, d| if q == d { 1.0 } else { 0.0 });
    assert_eq!(analyse_table_type(&t, RTOL, ATOL), TableType::Quadrature);
    assert!(TableType::Quadrature.is_varying());
    assert!(!TableType::Quadrature.is_piecewise());
}

#[test]
fn compression_drops_constant_axes() {
    let piecewise = Table::from_fn([2, 3, 4, 2], |_, e, _, d| (e + d) as f64 + 0.5);
    let ttype = analyse_table_type(&piecewise, RTOL, ATOL);
    assert_eq!(ttype, TableType::Piecewise);
    assert_eq!(compress_table(&piecewise, ttype, RTOL, ATOL).shape(), [1, 3, 1, 2]);

    let permuted = Table::from_fn([2, 1, 2, 2], |p, _, q, d| (p * 4 + q * 2 + d) as f64 + 0.5);
    let ttype = analyse_table_type(&permuted, RTOL, ATOL);
    assert_eq!(ttype, TableType::Uniform);
    assert!(is_permuted_table(&permuted, RTOL, ATOL));
    assert_eq!(compress_table(&permuted, ttype, RTOL, ATOL).shape(), [2, 1, 2, 2]);
}

#[test]
fn unique_tables_map_duplicates_to_first_occurrence() {
    let zeros2 = table(&[&[0.0, 0.0]]);
    let ones2 = table(&[&[1.0, 1.0]]);
    let zeros3 = table(&[&[0.0, 0.0, 0.0]]);
    let twos = table(&[&[2.0, 2.0]]);
    let tables = [zeros2, ones2.clone(), zeros3, ones2, twos.clone(), twos];
    let (unique, mapping) = build_unique_tables(&tables, RTOL, ATOL);
    assert_eq!(unique.len(), 4);
    assert_eq!(mapping, vec![0, 1, 2, 1, 3, 3]);
}

#[test]
fn unique_tables_respect_tolerance() {
    let a = table(&[&[1.0, 0.5]]);
    let close = table(&[&[1.0 + 1e-8, 0.5]]);
    let far = table(&[&[1.001, 0.5]]);
    let (unique, mapping) = build_unique_tables(&[a, close, far], RTOL, ATOL);
    assert_eq!(unique.len(), 2);
    assert_eq!(mapping, vec![0, 0, 1]);
}

#[test]
fn first_sorted_name_is_canonical() {
    let t = table(&[&[0.5, 0.25]]);
    let mut named = BTreeMap::new();
    named.insert("FE1_Q1".to_string(), t.clone());
    named.insert("FE0_Q1".to_string(), t);
    named.insert("FE2_Q1".to_string(), table(&[&[0.75]]));
    let (unique, canonical) = build_unique_named_tables(&named, RTOL, ATOL);
    assert_eq!(unique.keys().collect::<Vec<_>>(), vec!["FE0_Q1", "FE2_Q1"]);
    assert_eq!(canonical["FE1_Q1"], "FE0_Q1");
    assert_eq!(canonical["FE2_Q1"], "FE2_Q1");
}

#[test]
fn table_names_encode_their_source() {
    assert_eq!(
        table_name(0, None, DerivativeFrame::Reference, &[0, 0], None, EntityType::Cell, 6),
        "FE0_Q6"
    );
    assert_eq!(
        table_name(
            3,
            Some(1),
            DerivativeFrame::Reference,
            &[1, 0],
            Some(Averaging::Cell),
            EntityType::Facet,
            4
        ),
        "FE3_C1_D10_AC_F_Q4"
    );
    assert_eq!(
        table_name(2, None, DerivativeFrame::Physical, &[0, 2], None, EntityType::Vertex, 1),
        "FE2_G02_V_Q1"
    );
}

#[test]
fn arguments_in_one_element_share_a_table() {
    let mut psi = PsiTables::new();
    psi.insert(key(1, 0, &[0, 0]), scalar_basis(&[1.0 / 3.0; 3]));
    let terminals = [mt(&test_fn()), mt(&trial_fn())];
    let tables = build(IntegralType::Cell, &triangle(), &terminals, &psi).unwrap();

    assert_eq!(tables.unique_tables.len(), 1);
    let reference = &tables.references[&terminals[0]];
    assert_eq!(reference.name, "FE0_Q1");
    assert_eq!(reference.ttype, TableType::Fixed);
    assert_eq!(reference.dofmap, vec![0, 1, 2]);
    assert_eq!((reference.begin, reference.end), (0, 3));
    assert!(reference.is_piecewise && reference.is_uniform && !reference.is_permuted);
    assert_eq!(tables.references[&terminals[1]], *reference);
}

#[test]
fn reference_derivative_table_is_stripped() {
    let v = test_fn();
    let mut psi = PsiTables::new();
    psi.insert(key(1, 0, &[1, 0]), scalar_basis(&[-1.0, 1.0, 0.0]));
    let terminals = [mt(&indexed(&reference_grad(&v), &fixed_indices(&[0])))];
    let tables = build(IntegralType::Cell, &triangle(), &terminals, &psi).unwrap();

    let reference = &tables.references[&terminals[0]];
    assert_eq!(reference.name, "FE0_D10_Q1");
    assert_eq!((reference.begin, reference.end), (0, 2));
    assert_eq!(tables.unique_tables["FE0_D10_Q1"].values(), &[-1.0, 1.0]);
}

#[test]
fn equal_values_from_different_elements_deduplicate() {
    let other = FiniteElement::scalar(ElementId::new(4), 1);
    let w = coefficient(0, other, triangle());
    let mut psi = PsiTables::new();
    psi.insert(key(1, 0, &[0, 0]), scalar_basis(&[0.2, 0.3, 0.5]));
    psi.insert(key(4, 0, &[0, 0]), scalar_basis(&[0.2, 0.3, 0.5]));
    let terminals = [mt(&test_fn()), mt(&w)];
    let tables = build(IntegralType::Cell, &triangle(), &terminals, &psi).unwrap();

    assert_eq!(tables.unique_tables.len(), 1);
    assert_eq!(tables.references[&terminals[1]].name, "FE0_Q1");
}

#[test]
fn constant_element_gives_ones_table() {
    let w = coefficient(0, dg0(), triangle());
    let mut psi = PsiTables::new();
    psi.insert(key(3, 0, &[0, 0]), scalar_basis(&[1.0]));
    let terminals = [mt(&w)];
    let tables = build(IntegralType::Cell, &triangle(), &terminals, &psi).unwrap();
    assert_eq!(tables.references[&terminals[0]].ttype, TableType::Ones);
}

#[test]
fn zero_table_has_empty_range() {
    let mut psi = PsiTables::new();
    psi.insert(key(1, 0, &[0, 1]), scalar_basis(&[0.0, 0.0, 0.0]));
    let terminals = [mt(&indexed(&reference_grad(&test_fn()), &fixed_indices(&[1])))];
    let tables = build(IntegralType::Cell, &triangle(), &terminals, &psi).unwrap();
    let reference = &tables.references[&terminals[0]];
    assert_eq!(reference.ttype, TableType::Zeros);
    assert_eq!((reference.begin, reference.end), (3, 3));
    assert!(reference.dofmap.is_empty());
}

#[test]
fn facet_tables_have_one_row_per_facet() {
    let mut psi = PsiTables::new();
    for facet in 0..3 {
        let mut values = [0.0; 3];
        values[facet] = 0.5;
        values[(facet + 1) % 3] = 0.5;
        psi.insert(key(1, facet, &[0, 0]), scalar_basis(&values));
    }
    let terminals = [mt(&test_fn())];
    let tables = build(IntegralType::ExteriorFacet, &triangle(), &terminals, &psi).unwrap();

    let reference = &tables.references[&terminals[0]];
    assert_eq!(reference.name, "FE0_F_Q1");
    assert_eq!(reference.ttype, TableType::Piecewise);
    assert_eq!(tables.unique_tables["FE0_F_Q1"].shape(), [1, 3, 1, 3]);
}

#[test]
fn jacobian_reads_differentiated_coordinate_element() {
    let domain = triangle();
    let jacobian = geometry(GeometryKind::Jacobian, domain);
    let j10 = indexed(&jacobian, &fixed_indices(&[1, 0]));
    let coordinate = BasisTable::from_fn(6, 2, 1, |d, c, _| {
        // Vector P1: dofs interleaved by component, d/dX0 of [1-X-Y, X, Y].
        if d % 2 == c {
            [-1.0, 1.0, 0.0][d / 2]
        } else {
            0.0
        }
    });
    let mut psi = PsiTables::new();
    psi.insert(key(0, 0, &[1, 0]), coordinate);
    let terminals = [mt(&j10)];
    let tables = build(IntegralType::Cell, &domain, &terminals, &psi).unwrap();

    let reference = &tables.references[&terminals[0]];
    assert_eq!(reference.name, "FE0_C1_D10_Q1");
    assert_eq!((reference.begin, reference.end), (1, 4));
    assert_eq!(tables.unique_tables["FE0_C1_D10_Q1"].values(), &[-1.0, 0.0, 1.0]);
}

#[test]
fn cell_average_uses_a_single_entity() {
    let v = test_fn();
    let mut psi = PsiTables::new();
    let mut k = key(1, 0, &[0, 0]);
    k.averaged = Some(Averaging::Cell);
    psi.insert(k, scalar_basis(&[1.0 / 3.0; 3]));
    let terminals = [mt(&cell_avg(&v))];
    let tables = build(IntegralType::ExteriorFacet, &triangle(), &terminals, &psi).unwrap();
    assert_eq!(tables.references[&terminals[0]].name, "FE0_AC_F_Q1");
}

#[test]
fn missing_basis_values_are_reported() {
    let terminals = [mt(&test_fn())];
    let err = build(IntegralType::Cell, &triangle(), &terminals, &PsiTables::new()).unwrap_err();
    assert!(matches!(err, IrError::MissingBasisTable { .. }));
}

#[test]
fn geometry_without_basis_expansion_has_no_table() {
    let x = geometry(GeometryKind::CellCoordinate, triangle());
    let terminals = [mt(&indexed(&x, &fixed_indices(&[0])))];
    let tables = build(IntegralType::Cell, &triangle(), &terminals, &PsiTables::new()).unwrap();
    assert!(tables.references.is_empty());
    assert!(tables.unique_tables.is_empty());
}
