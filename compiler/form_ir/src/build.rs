//! Integral IR assembly.
//!
//! [`build_integral_ir`] runs the IR passes over every quadrature point
//! count of one integral and collects the results into an [`IntegralIr`].
//!
//! # Algorithm
//!
//! Each point count is an independent unit:
//!
//! 1. Normalize the integrand and build its scalar graph.
//! 2. Analyse the leaves as modified terminals and build their tables.
//! 3. Replace terminals reading all-zero tables by `0` and rebuild the
//!    graph from the folded targets.
//! 4. Factorize the targets over the arguments, then annotate the factor
//!    graph with modified terminals and tables and partition it.
//! 5. Group the argument keys into element tensor blocks. A block goes to
//!    the piecewise IR when all its factors are piecewise, all its argument
//!    tables are piecewise and no quadrature weight is expected.
//! 6. Keep the tables referenced by active nodes or blocks, except `zeros`
//!    and `ones` tables, and allocate registers over the factor graph.
//!
//! Units run on the rayon pool. Their tables merge into the integral's
//! table map in ascending point count; a name already present must carry
//! the same values.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use form_expr::constructors::zero;
use form_expr::{Domain, Expr, ExprKind, GeometryKind, IntegralType, Restriction};

use crate::dependencies::{allocate_registers, analyse_dependencies, compute_cache_scores};
use crate::error::{IrError, IrResult};
use crate::factorization::{compute_argument_factorization, Factorization};
use crate::graph::{build_scalar_graph_from_targets, NodeId, NodeStatus, ScalarGraph};
use crate::modified_terminal::{analyse_modified_terminal, ModifiedTerminal};
use crate::normalize::normalize;
use crate::params::IrParams;
use crate::tables::{
    build_optimized_tables, equal_tables, ElementNumbering, EntityType, OptimizedTables,
    PsiTables, QuadratureRule, Table, TableReference, TableType,
};

/// Input of [`build_integral_ir`]: one integral, with an integrand per
/// quadrature point count.
#[derive(Clone, Debug)]
pub struct IntegralData {
    pub integral_type: IntegralType,
    pub domain: Domain,
    /// Integrand by number of quadrature points.
    pub integrands: BTreeMap<usize, Expr>,
    /// Number of arguments of the form.
    pub rank: usize,
    pub quadrature_rules: BTreeMap<usize, QuadratureRule>,
    pub psi_tables: PsiTables,
}

/// Dofmap of each argument axis of a block.
pub type BlockMap = Vec<Vec<usize>>;

/// A modified argument of a block and the table it reads.
#[derive(Clone, Debug, PartialEq)]
pub struct MaData {
    /// Position in the argument vector.
    pub ma_index: usize,
    pub table: TableReference,
}

/// Contribution of one argument key to an element tensor block.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockData {
    /// Table type of each argument axis.
    pub ttypes: Vec<TableType>,
    /// `(factor node, target component)` pairs summed into the block.
    pub factor_components: Vec<(NodeId, usize)>,
    pub factor_is_piecewise: bool,
    /// Unique table name of each argument axis.
    pub unames: Vec<String>,
    /// Restriction of each argument axis, `None` for uniform tables.
    pub restrictions: Vec<Option<Restriction>>,
    pub is_transposed: bool,
    pub is_uniform: bool,
    pub is_permuted: bool,
    pub ma_data: Vec<MaData>,
    /// Point count of the factor graph that `factor_components` indexes.
    pub num_points: usize,
}

/// IR of one quadrature loop.
#[derive(Clone, Debug)]
pub struct ExprIr {
    pub factorization: Factorization,
    pub block_contributions: BTreeMap<BlockMap, Vec<BlockData>>,
    /// Generated code reads the quadrature points.
    pub need_points: bool,
    /// Generated code reads the quadrature weights.
    pub need_weights: bool,
    /// Register of each factor graph node, for nodes kept in one.
    pub registers: Vec<Option<u32>>,
}

impl ExprIr {
    pub fn modified_arguments(&self) -> &[ModifiedTerminal] {
        &self.factorization.modified_arguments
    }
}

/// Blocks computed once per entity, outside every quadrature loop.
#[derive(Clone, Debug, Default)]
pub struct PiecewiseIr {
    pub block_contributions: BTreeMap<BlockMap, Vec<BlockData>>,
}

/// IR of one integral.
#[derive(Clone, Debug)]
pub struct IntegralIr {
    pub params: IrParams,
    pub integral_type: IntegralType,
    /// Tables read by generated code, by unique name.
    pub unique_tables: BTreeMap<String, Table>,
    /// Type of every unique table, including the dropped ones.
    pub unique_table_types: BTreeMap<String, TableType>,
    pub piecewise_ir: PiecewiseIr,
    pub varying_irs: BTreeMap<usize, ExprIr>,
    /// Dofmap of every table read, keyed by its name before
    /// deduplication: tables sharing a unique name may cover different dofs.
    pub table_dofmaps: BTreeMap<String, Vec<usize>>,
    /// Point counts in ascending order.
    pub all_num_points: Vec<usize>,
    pub quadrature_rules: BTreeMap<usize, QuadratureRule>,
}

/// Result of one point count, before merging.
struct UnitIr {
    num_points: usize,
    expr_ir: ExprIr,
    piecewise_blocks: Vec<(BlockMap, BlockData)>,
    tables: BTreeMap<String, Table>,
    table_types: BTreeMap<String, TableType>,
    table_dofmaps: BTreeMap<String, Vec<usize>>,
}

/// Whether generated code scales the integrand by the quadrature weight.
pub fn expect_weight(integral_type: IntegralType, domain: &Domain) -> bool {
    match integral_type {
        IntegralType::Vertex => false,
        IntegralType::Custom => true,
        _ => match EntityType::of(integral_type) {
            EntityType::Cell => true,
            EntityType::Facet => domain.tdim() > 1,
            EntityType::Vertex => false,
        },
    }
}

/// Build the IR of one integral.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(integral_type = data.integral_type.name(), units = data.integrands.len())
)]
pub fn build_integral_ir(data: &IntegralData, params: &IrParams) -> IrResult<IntegralIr> {
    let elements = ElementNumbering::from_exprs(data.integrands.values());
    let expect_weight = expect_weight(data.integral_type, &data.domain);

    let units = data
        .integrands
        .par_iter()
        .map(|(&num_points, integrand)| {
            build_unit(num_points, integrand, data, &elements, expect_weight, params)
        })
        .collect::<IrResult<Vec<_>>>()?;

    let mut ir = IntegralIr {
        params: params.clone(),
        integral_type: data.integral_type,
        unique_tables: BTreeMap::new(),
        unique_table_types: BTreeMap::new(),
        piecewise_ir: PiecewiseIr::default(),
        varying_irs: BTreeMap::new(),
        table_dofmaps: BTreeMap::new(),
        all_num_points: data.integrands.keys().copied().collect(),
        quadrature_rules: data.quadrature_rules.clone(),
    };
    for unit in units {
        merge_tables(&mut ir.unique_tables, unit.tables, params)?;
        ir.unique_table_types.extend(unit.table_types);
        ir.table_dofmaps.extend(unit.table_dofmaps);
        for (blockmap, block) in unit.piecewise_blocks {
            ir.piecewise_ir
                .block_contributions
                .entry(blockmap)
                .or_default()
                .push(block);
        }
        ir.varying_irs.insert(unit.num_points, unit.expr_ir);
    }

    tracing::debug!(
        tables = ir.unique_tables.len(),
        piecewise_blocks = ir.piecewise_ir.block_contributions.len(),
        "built integral IR"
    );
    Ok(ir)
}

/// Append-if-absent, compare-if-present.
fn merge_tables(
    global: &mut BTreeMap<String, Table>,
    tables: BTreeMap<String, Table>,
    params: &IrParams,
) -> IrResult<()> {
    for (name, table) in tables {
        match global.get(&name) {
            Some(existing) => {
                if !equal_tables(existing, &table, params.table_rtol, params.table_atol) {
                    return Err(IrError::TableNameCollision { name });
                }
            }
            None => {
                global.insert(name, table);
            }
        }
    }
    Ok(())
}

#[tracing::instrument(level = "debug", skip_all, fields(num_points = num_points))]
fn build_unit(
    num_points: usize,
    integrand: &Expr,
    data: &IntegralData,
    elements: &ElementNumbering,
    expect_weight: bool,
    params: &IrParams,
) -> IrResult<UnitIr> {
    let integrand = normalize(integrand);
    let mut graph = build_scalar_graph_from_targets(std::slice::from_ref(&integrand))?;
    let terminals: Vec<ModifiedTerminal> = annotate_terminals(&mut graph)?
        .into_iter()
        .map(|(_, mt)| mt)
        .collect();
    let tables = build_optimized_tables(
        num_points,
        data.integral_type,
        &data.domain,
        &terminals,
        elements,
        &data.psi_tables,
        params,
    )?;

    if tables
        .references
        .values()
        .any(|tr| tr.ttype == TableType::Zeros)
    {
        graph = eliminate_zero_tables(&graph, &tables)?;
    }

    let mut factorization = compute_argument_factorization(&graph, data.rank)?;
    for (id, mt) in annotate_terminals(&mut factorization.graph)? {
        if let Some(tr) = tables.references.get(&mt) {
            factorization.graph.set_table(id, tr.clone());
        }
    }
    analyse_dependencies(&mut factorization.graph)?;

    let argument_tables = factorization
        .modified_arguments
        .iter()
        .map(|ma| {
            tables
                .references
                .get(ma)
                .ok_or_else(|| IrError::MissingBasisTable {
                    key: format!("argument {}", ma.expr),
                })
        })
        .collect::<IrResult<Vec<_>>>()?;

    let fgraph = &factorization.graph;
    let mut block_contributions: BTreeMap<BlockMap, Vec<BlockData>> = BTreeMap::new();
    let mut piecewise_blocks = Vec::new();
    for (key, factor_components) in &factorization.argument_factorization {
        let trs: Vec<&TableReference> = key.iter().map(|&k| argument_tables[k]).collect();
        let factor_is_piecewise = factor_components
            .iter()
            .all(|&(f, _)| fgraph.status(f) == NodeStatus::Piecewise);
        let block = BlockData {
            ttypes: trs.iter().map(|tr| tr.ttype).collect(),
            factor_components: factor_components.clone(),
            factor_is_piecewise,
            unames: trs.iter().map(|tr| tr.name.clone()).collect(),
            restrictions: key
                .iter()
                .zip(&trs)
                .map(|(&k, tr)| {
                    if tr.is_uniform {
                        None
                    } else {
                        factorization.modified_arguments[k].restriction
                    }
                })
                .collect(),
            is_transposed: false,
            is_uniform: trs.iter().all(|tr| tr.is_uniform),
            is_permuted: trs.iter().any(|tr| tr.is_permuted),
            ma_data: key
                .iter()
                .zip(&trs)
                .map(|(&k, tr)| MaData {
                    ma_index: k,
                    table: (*tr).clone(),
                })
                .collect(),
            num_points,
        };
        let blockmap: BlockMap = trs.iter().map(|tr| tr.dofmap.clone()).collect();
        let is_piecewise =
            factor_is_piecewise && !expect_weight && trs.iter().all(|tr| tr.is_piecewise);
        tracing::trace!(key = ?key.as_slice(), is_piecewise, "block");
        if is_piecewise {
            piecewise_blocks.push((blockmap, block));
        } else {
            block_contributions.entry(blockmap).or_default().push(block);
        }
    }

    let mut active_names: BTreeSet<&str> = fgraph
        .ids()
        .filter(|&id| fgraph.status(id) != NodeStatus::Inactive)
        .filter_map(|id| fgraph.table(id))
        .map(|tr| tr.name.as_str())
        .collect();
    active_names.extend(argument_tables.iter().map(|tr| tr.name.as_str()));
    let kept: BTreeMap<String, Table> = tables
        .unique_tables
        .iter()
        .filter(|(name, _)| {
            active_names.contains(name.as_str())
                && !matches!(
                    tables.table_types.get(name.as_str()),
                    Some(TableType::Zeros | TableType::Ones)
                )
        })
        .map(|(name, table)| (name.clone(), table.clone()))
        .collect();

    let active_terminals: Vec<&ModifiedTerminal> = fgraph
        .ids()
        .filter(|&id| fgraph.status(id) != NodeStatus::Inactive)
        .filter_map(|id| fgraph.modified_terminal(id))
        .collect();
    let need_points = need_points(data.integral_type, &active_terminals);
    let need_weights = expect_weight
        || matches!(
            data.integral_type,
            IntegralType::Custom | IntegralType::Expression
        );

    let scores = compute_cache_scores(fgraph, params);
    let registers = allocate_registers(fgraph, &scores, params);

    let table_dofmaps = tables
        .references
        .values()
        .map(|tr| (tr.source.clone(), tr.dofmap.clone()))
        .collect();

    tracing::debug!(
        num_points,
        varying_blocks = block_contributions.len(),
        piecewise_blocks = piecewise_blocks.len(),
        tables = kept.len(),
        need_points,
        need_weights,
        "built expression IR"
    );
    Ok(UnitIr {
        num_points,
        table_types: tables.table_types.clone(),
        expr_ir: ExprIr {
            factorization,
            block_contributions,
            need_points,
            need_weights,
            registers,
        },
        piecewise_blocks,
        tables: kept,
        table_dofmaps,
    })
}

/// Attach the modified terminal of every leaf, returned in node order.
fn annotate_terminals(graph: &mut ScalarGraph) -> IrResult<Vec<(NodeId, ModifiedTerminal)>> {
    let leaves: Vec<NodeId> = graph.ids().filter(|&id| graph.is_leaf(id)).collect();
    let mut terminals = Vec::with_capacity(leaves.len());
    for id in leaves {
        let expr = graph.expr(id);
        let mt = analyse_modified_terminal(expr)?.ok_or_else(|| IrError::UnexpectedNodeType {
            kind: expr.kind().name(),
            expr: expr.to_string(),
        })?;
        graph.set_modified_terminal(id, mt.clone());
        terminals.push((id, mt));
    }
    Ok(terminals)
}

/// Rebuild `graph` with every terminal whose table is all zeros replaced by
/// literal zero. Constant folding in the expression constructors removes
/// the terms that vanish.
fn eliminate_zero_tables(graph: &ScalarGraph, tables: &OptimizedTables) -> IrResult<ScalarGraph> {
    let mut rebuilt: Vec<Expr> = Vec::with_capacity(graph.len());
    for id in graph.ids() {
        let expr = graph.expr(id);
        let new = if graph.is_leaf(id) {
            let is_zero = graph
                .modified_terminal(id)
                .and_then(|mt| tables.references.get(mt))
                .is_some_and(|tr| tr.ttype == TableType::Zeros);
            if is_zero {
                zero(&[])
            } else {
                expr.clone()
            }
        } else {
            let mut operands: Vec<Expr> = graph
                .dependencies(id)
                .iter()
                .map(|dep| rebuilt[dep.index()].clone())
                .collect();
            // A vanishing divisor keeps its terminals.
            if let ExprKind::Division(_, divisor) = expr.kind() {
                if operands[1].is_zero() {
                    operands[1] = divisor.clone();
                }
            }
            expr.reconstruct(&operands)
        };
        rebuilt.push(new);
    }
    let targets: Vec<Expr> = graph
        .targets()
        .iter()
        .map(|t| rebuilt[t.index()].clone())
        .collect();
    let eliminated = build_scalar_graph_from_targets(&targets)?;
    tracing::debug!(
        before = graph.len(),
        after = eliminated.len(),
        "eliminated zero tables"
    );
    Ok(eliminated)
}

fn need_points(integral_type: IntegralType, active: &[&ModifiedTerminal]) -> bool {
    let reads = |kind: GeometryKind| {
        active
            .iter()
            .any(|mt| matches!(mt.terminal.kind(), ExprKind::Geometry(g) if g.kind == kind))
    };
    match integral_type {
        IntegralType::Cell => reads(GeometryKind::CellCoordinate),
        IntegralType::ExteriorFacet | IntegralType::InteriorFacet => {
            reads(GeometryKind::FacetCoordinate)
        }
        IntegralType::Custom | IntegralType::Expression => true,
        IntegralType::Vertex => false,
    }
}
