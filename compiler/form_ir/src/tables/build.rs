//! Table construction for the modified terminals of one integral.
//!
//! # Algorithm
//!
//! For each modified terminal that reads a basis table:
//!
//! 1. Resolve its table source: the element, the component of the element
//!    value, and the derivative counts. Coordinate-field geometry (spatial
//!    coordinate, Jacobian) reads the coordinate element; `J[i, j]` is
//!    component `i` of the coordinate field differentiated along reference
//!    direction `j`.
//! 2. Name it from the element ordinal, component, derivative counts,
//!    averaging, entity type and point count. Equal names mean equal
//!    sources, so each name is assembled once.
//! 3. Assemble `[permutation][entity][point][dof]` values from the raw
//!    basis tables, clamp small numbers and strip zero dof columns.
//! 4. Classify the stripped table and compress its constant axes.
//! 5. Deduplicate by value. References take the type of their unique
//!    table.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use form_expr::{
    map_terminals, Averaging, Domain, ElementId, Expr, ExprKind, GeometryKind, IntegralType,
};

use super::{
    analyse_table_type, build_unique_named_tables, clamp_table_small_numbers, compress_table,
    strip_table_zeros, Table, TableReference, TableType,
};
use crate::error::{IrError, IrResult};
use crate::modified_terminal::{derivative_counts, ModifiedTerminal};
use crate::params::IrParams;

/// Quadrature points and weights for one point count.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuadratureRule {
    /// One reference coordinate tuple per point.
    pub points: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
}

impl QuadratureRule {
    pub fn new(points: Vec<Vec<f64>>, weights: Vec<f64>) -> Self {
        assert_eq!(points.len(), weights.len(), "one weight per quadrature point");
        Self { points, weights }
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }
}

/// Raw basis values of one element on one entity, laid out
/// `[dof][component][point]`.
#[derive(Clone, Debug, PartialEq)]
pub struct BasisTable {
    num_dofs: usize,
    num_components: usize,
    num_points: usize,
    values: Vec<f64>,
}

impl BasisTable {
    pub fn new(num_dofs: usize, num_components: usize, num_points: usize, values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            num_dofs * num_components * num_points,
            "basis table values do not match [{num_dofs}][{num_components}][{num_points}]"
        );
        Self {
            num_dofs,
            num_components,
            num_points,
            values,
        }
    }

    /// Table with `f(dof, component, point)` at each position.
    pub fn from_fn<F>(num_dofs: usize, num_components: usize, num_points: usize, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> f64,
    {
        let mut values = Vec::with_capacity(num_dofs * num_components * num_points);
        for d in 0..num_dofs {
            for c in 0..num_components {
                for q in 0..num_points {
                    values.push(f(d, c, q));
                }
            }
        }
        Self {
            num_dofs,
            num_components,
            num_points,
            values,
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    #[inline]
    pub fn get(&self, dof: usize, component: usize, point: usize) -> f64 {
        self.values[(dof * self.num_components + component) * self.num_points + point]
    }
}

/// Frame of the derivative counts in a [`PsiKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DerivativeFrame {
    Reference,
    Physical,
}

/// Lookup key for raw basis values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PsiKey {
    pub num_points: usize,
    pub element: ElementId,
    pub averaged: Option<Averaging>,
    pub entity: usize,
    pub frame: DerivativeFrame,
    /// Number of derivatives along each direction.
    pub derivatives: SmallVec<[u8; 3]>,
}

impl fmt::Display for PsiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "element {} at {} points, entity {}, {:?} derivatives {:?}",
            self.element.raw(),
            self.num_points,
            self.entity,
            self.frame,
            self.derivatives.as_slice()
        )?;
        if let Some(avg) = self.averaged {
            write!(f, ", {avg:?} average")?;
        }
        Ok(())
    }
}

/// Raw basis values supplied by the caller, one [`BasisTable`] per
/// reference-facet permutation.
#[derive(Clone, Debug, Default)]
pub struct PsiTables {
    tables: FxHashMap<PsiKey, Vec<BasisTable>>,
}

impl PsiTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next permutation of `key`.
    pub fn insert(&mut self, key: PsiKey, table: BasisTable) {
        self.tables.entry(key).or_default().push(table);
    }

    pub fn get(&self, key: &PsiKey) -> Option<&[BasisTable]> {
        self.tables.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Kind of entity the table rows are evaluated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityType {
    Cell,
    Facet,
    Vertex,
}

impl EntityType {
    pub fn of(integral_type: IntegralType) -> Self {
        match integral_type {
            IntegralType::Cell | IntegralType::Custom | IntegralType::Expression => {
                EntityType::Cell
            }
            IntegralType::ExteriorFacet | IntegralType::InteriorFacet => EntityType::Facet,
            IntegralType::Vertex => EntityType::Vertex,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            EntityType::Cell => "",
            EntityType::Facet => "_F",
            EntityType::Vertex => "_V",
        }
    }
}

/// Ordinal of each element, in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct ElementNumbering {
    ordinals: FxHashMap<ElementId, usize>,
}

impl ElementNumbering {
    /// Number the elements of the terminals of `exprs`, walking each
    /// expression top-down in operand order. Coordinate geometry numbers the
    /// coordinate element.
    pub fn from_exprs<'a, I>(exprs: I) -> Self
    where
        I: IntoIterator<Item = &'a Expr>,
    {
        let mut numbering = Self::default();
        for expr in exprs {
            map_terminals(expr, |t| {
                match t.kind() {
                    ExprKind::Argument(a) => numbering.number(a.element.id),
                    ExprKind::Coefficient(c) => numbering.number(c.element.id),
                    ExprKind::Geometry(g)
                        if matches!(
                            g.kind,
                            GeometryKind::SpatialCoordinate | GeometryKind::Jacobian
                        ) =>
                    {
                        numbering.number(g.domain.coordinate_element);
                    }
                    _ => {}
                }
                None
            });
        }
        numbering
    }

    pub fn number(&mut self, element: ElementId) {
        let next = self.ordinals.len();
        self.ordinals.entry(element).or_insert(next);
    }

    pub fn ordinal(&self, element: ElementId) -> Option<usize> {
        self.ordinals.get(&element).copied()
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}

/// Optimized tables of one integral at one point count.
#[derive(Clone, Debug, Default)]
pub struct OptimizedTables {
    /// Stripped, deduplicated tables by canonical name.
    pub unique_tables: BTreeMap<String, Table>,
    pub table_types: BTreeMap<String, TableType>,
    /// Table of every modified terminal that reads one.
    pub references: FxHashMap<ModifiedTerminal, TableReference>,
}

/// Where a modified terminal's values come from.
struct TableSource {
    element: ElementId,
    /// Component of a vector-valued element.
    component: Option<usize>,
    frame: DerivativeFrame,
    derivatives: SmallVec<[u8; 3]>,
}

/// Table name: `FE{element}[_C{component}][_D|_G{derivative counts}][_AC|_AF]{entity}_Q{points}`.
pub fn table_name(
    element_ordinal: usize,
    component: Option<usize>,
    frame: DerivativeFrame,
    derivatives: &[u8],
    averaged: Option<Averaging>,
    entity_type: EntityType,
    num_points: usize,
) -> String {
    let mut name = format!("FE{element_ordinal}");
    if let Some(c) = component {
        name.push_str(&format!("_C{c}"));
    }
    if derivatives.iter().any(|&n| n > 0) {
        name.push_str(match frame {
            DerivativeFrame::Reference => "_D",
            DerivativeFrame::Physical => "_G",
        });
        for n in derivatives {
            name.push_str(&n.to_string());
        }
    }
    match averaged {
        Some(Averaging::Cell) => name.push_str("_AC"),
        Some(Averaging::Facet) => name.push_str("_AF"),
        None => {}
    }
    name.push_str(entity_type.suffix());
    name.push_str(&format!("_Q{num_points}"));
    name
}

fn table_source(mt: &ModifiedTerminal, domain: &Domain) -> IrResult<Option<TableSource>> {
    let frame_counts = |mt: &ModifiedTerminal| {
        if mt.global_derivatives.is_empty() {
            (
                DerivativeFrame::Reference,
                derivative_counts(&mt.local_derivatives, domain.tdim()),
            )
        } else {
            (
                DerivativeFrame::Physical,
                derivative_counts(&mt.global_derivatives, domain.gdim),
            )
        }
    };
    let source = match mt.terminal.kind() {
        ExprKind::Argument(_) | ExprKind::Coefficient(_) => {
            let Some(element) = mt.element() else {
                return Ok(None);
            };
            let (frame, derivatives) = frame_counts(mt);
            TableSource {
                element: element.id,
                component: (element.value_size() > 1).then_some(mt.flat_component),
                frame,
                derivatives,
            }
        }
        ExprKind::Geometry(g) if g.kind == GeometryKind::SpatialCoordinate => {
            let (frame, derivatives) = frame_counts(mt);
            TableSource {
                element: g.domain.coordinate_element,
                component: Some(mt.component[0]),
                frame,
                derivatives,
            }
        }
        ExprKind::Geometry(g) if g.kind == GeometryKind::Jacobian => {
            if !mt.global_derivatives.is_empty() {
                return Err(IrError::MixedDerivativeFrames {
                    expr: mt.expr.to_string(),
                });
            }
            let mut local = mt.local_derivatives.clone();
            local.push(mt.component[1]);
            local.sort_unstable();
            TableSource {
                element: g.domain.coordinate_element,
                component: Some(mt.component[0]),
                frame: DerivativeFrame::Reference,
                derivatives: derivative_counts(&local, domain.tdim()),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(source))
}

/// Assemble `[permutation][entity][point][dof]` values for one source.
fn assemble_table(
    num_points: usize,
    integral_type: IntegralType,
    domain: &Domain,
    source: &TableSource,
    averaged: Option<Averaging>,
    psi: &PsiTables,
) -> IrResult<Table> {
    let num_entities = match averaged {
        Some(Averaging::Cell) => 1,
        _ => integral_type.num_entities(domain),
    };
    let missing = |key: String| IrError::MissingBasisTable { key };

    let mut per_entity: Vec<&[BasisTable]> = Vec::with_capacity(num_entities);
    for entity in 0..num_entities {
        let key = PsiKey {
            num_points,
            element: source.element,
            averaged,
            entity,
            frame: source.frame,
            derivatives: source.derivatives.clone(),
        };
        let variants = psi
            .get(&key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| missing(key.to_string()))?;
        if let Some(first) = per_entity.first() {
            if variants.len() != first.len() {
                return Err(missing(format!(
                    "{key} ({} permutations, expected {})",
                    variants.len(),
                    first.len()
                )));
            }
        }
        per_entity.push(variants);
    }

    let Some(reference) = per_entity.first().and_then(|v| v.first()) else {
        return Err(missing(format!("element {} on no entities", source.element.raw())));
    };
    let (nq, nd) = (reference.num_points(), reference.num_dofs());
    let component = source.component.unwrap_or(0);
    for variants in &per_entity {
        for basis in *variants {
            if basis.num_points() != nq || basis.num_dofs() != nd {
                return Err(missing(format!(
                    "element {} with inconsistent table shapes",
                    source.element.raw()
                )));
            }
            if component >= basis.num_components() {
                return Err(missing(format!(
                    "element {} component {component}",
                    source.element.raw()
                )));
            }
        }
    }

    let num_perms = per_entity[0].len();
    Ok(Table::from_fn([num_perms, num_entities, nq, nd], |p, e, q, d| {
        per_entity[e][p].get(d, component, q)
    }))
}

/// Build the optimized tables of the modified terminals of one integral at
/// one point count.
pub fn build_optimized_tables(
    num_points: usize,
    integral_type: IntegralType,
    domain: &Domain,
    terminals: &[ModifiedTerminal],
    elements: &ElementNumbering,
    psi: &PsiTables,
    params: &IrParams,
) -> IrResult<OptimizedTables> {
    let (rtol, atol) = (params.table_rtol, params.table_atol);
    let entity_type = EntityType::of(integral_type);

    // Stripped, classified and compressed table with its dof range, by name.
    let mut raw: BTreeMap<String, (Table, TableType, usize, usize)> = BTreeMap::new();
    let mut named: Vec<(&ModifiedTerminal, String)> = Vec::new();
    for mt in terminals {
        let Some(source) = table_source(mt, domain)? else {
            continue;
        };
        let ordinal = elements.ordinal(source.element).ok_or_else(|| {
            IrError::MissingBasisTable {
                key: format!("element {} (not numbered)", source.element.raw()),
            }
        })?;
        let name = table_name(
            ordinal,
            source.component,
            source.frame,
            &source.derivatives,
            mt.averaged,
            entity_type,
            num_points,
        );
        if !raw.contains_key(&name) {
            let values =
                assemble_table(num_points, integral_type, domain, &source, mt.averaged, psi)?;
            let clamped = clamp_table_small_numbers(&values, rtol, atol);
            let (begin, end, stripped) = strip_table_zeros(&clamped, atol);
            let ttype = analyse_table_type(&stripped, rtol, atol);
            let compressed = compress_table(&stripped, ttype, rtol, atol);
            tracing::trace!(
                name = %name,
                ttype = %ttype,
                shape = ?compressed.shape(),
                "built table"
            );
            raw.insert(name.clone(), (compressed, ttype, begin, end));
        }
        named.push((mt, name));
    }

    let stripped: BTreeMap<String, Table> = raw
        .iter()
        .map(|(name, (table, ..))| (name.clone(), table.clone()))
        .collect();
    let (unique_tables, canonical) = build_unique_named_tables(&stripped, rtol, atol);

    let mut table_types = BTreeMap::new();
    for name in unique_tables.keys() {
        if let Some(&(_, ttype, ..)) = raw.get(name) {
            table_types.insert(name.clone(), ttype);
        }
    }

    // Every reference to a unique table carries that table's type.
    let mut references = FxHashMap::default();
    for (mt, name) in named {
        let (Some(canonical_name), Some((table, _, begin, end))) =
            (canonical.get(&name), raw.get(&name))
        else {
            continue;
        };
        let Some(&ttype) = table_types.get(canonical_name) else {
            continue;
        };
        references.insert(
            mt.clone(),
            TableReference {
                name: canonical_name.clone(),
                source: name.clone(),
                dofmap: (*begin..*end).collect(),
                ttype,
                begin: *begin,
                end: *end,
                is_uniform: ttype.is_uniform(),
                is_piecewise: ttype.is_piecewise(),
                is_permuted: table.num_permutations() > 1,
            },
        );
    }

    tracing::debug!(
        num_points,
        named = raw.len(),
        unique = unique_tables.len(),
        "optimized tables"
    );
    Ok(OptimizedTables {
        unique_tables,
        table_types,
        references,
    })
}
