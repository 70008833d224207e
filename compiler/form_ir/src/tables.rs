//! Basis-function tables.
//!
//! A table holds the values of one basis-function component (possibly
//! differentiated) at the quadrature points, laid out
//! `[permutation][entity][point][dof]`. Generated code indexes tables by
//! the current facet permutation, mesh entity, quadrature point and dof.
//!
//! This module holds the table value type and the numeric utilities that
//! optimize tables: small-number clamping, classification by which axes the
//! values depend on, compression of constant axes, stripping of zero dof
//! columns, and deduplication up to tolerance. [`build_optimized_tables`]
//! turns the modified terminals of one integral into named, optimized
//! tables.
//!
//! All comparisons use the `allclose` rule: `|a - b| <= atol + rtol * |b|`.

use std::collections::BTreeMap;
use std::fmt;

mod build;

pub use build::{
    build_optimized_tables, table_name, BasisTable, DerivativeFrame, ElementNumbering,
    EntityType, OptimizedTables, PsiKey, PsiTables, QuadratureRule,
};

/// Table values laid out `[permutation][entity][point][dof]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    shape: [usize; 4],
    values: Vec<f64>,
}

impl Table {
    /// # Panics
    ///
    /// Panics if `values` does not have `shape.iter().product()` entries.
    pub fn new(shape: [usize; 4], values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            shape.iter().product::<usize>(),
            "table values do not match shape {shape:?}"
        );
        Self { shape, values }
    }

    /// Table with `f(permutation, entity, point, dof)` at each position.
    pub fn from_fn<F>(shape: [usize; 4], f: F) -> Self
    where
        F: Fn(usize, usize, usize, usize) -> f64,
    {
        let [np, ne, nq, nd] = shape;
        let mut values = Vec::with_capacity(np * ne * nq * nd);
        for p in 0..np {
            for e in 0..ne {
                for q in 0..nq {
                    for d in 0..nd {
                        values.push(f(p, e, q, d));
                    }
                }
            }
        }
        Self { shape, values }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn num_permutations(&self) -> usize {
        self.shape[0]
    }

    pub fn num_entities(&self) -> usize {
        self.shape[1]
    }

    pub fn num_points(&self) -> usize {
        self.shape[2]
    }

    pub fn num_dofs(&self) -> usize {
        self.shape[3]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn get(&self, perm: usize, entity: usize, point: usize, dof: usize) -> f64 {
        let [_, ne, nq, nd] = self.shape;
        self.values[((perm * ne + entity) * nq + point) * nd + dof]
    }

    /// Keep only the leading `perms`, `entities` and `points` of each axis.
    pub fn truncate(&self, perms: usize, entities: usize, points: usize) -> Table {
        let [np, ne, nq, nd] = self.shape;
        let shape = [perms.min(np), entities.min(ne), points.min(nq), nd];
        Table::from_fn(shape, |p, e, q, d| self.get(p, e, q, d))
    }

    /// Dof columns `begin..end`.
    pub fn slice_dofs(&self, begin: usize, end: usize) -> Table {
        let [np, ne, nq, _] = self.shape;
        Table::from_fn([np, ne, nq, end - begin], |p, e, q, d| {
            self.get(p, e, q, begin + d)
        })
    }

    /// Inverse of [`Table::slice_dofs`]: place the columns at `begin` within
    /// `num_dofs` zero columns.
    pub fn pad_dofs(&self, begin: usize, num_dofs: usize) -> Table {
        let [np, ne, nq, nd] = self.shape;
        Table::from_fn([np, ne, nq, num_dofs], |p, e, q, d| {
            if d >= begin && d < begin + nd {
                self.get(p, e, q, d - begin)
            } else {
                0.0
            }
        })
    }

    /// The `[point][dof]` block of one permutation and entity.
    fn block(&self, perm: usize, entity: usize) -> &[f64] {
        let [_, ne, nq, nd] = self.shape;
        let start = (perm * ne + entity) * nq * nd;
        &self.values[start..start + nq * nd]
    }
}

/// Classification of a table by the axes its values depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TableType {
    /// All values zero; the terminal vanishes.
    Zeros,
    /// A single column of ones; the terminal is the constant one.
    Ones,
    /// The same values for every point and entity.
    Fixed,
    /// Constant over the points of each entity.
    Piecewise,
    /// The same values on every entity.
    Uniform,
    /// Identity between points and dofs on every entity.
    Quadrature,
    /// Depends on both points and entities.
    Varying,
}

impl TableType {
    pub fn name(self) -> &'static str {
        match self {
            TableType::Zeros => "zeros",
            TableType::Ones => "ones",
            TableType::Fixed => "fixed",
            TableType::Piecewise => "piecewise",
            TableType::Uniform => "uniform",
            TableType::Quadrature => "quadrature",
            TableType::Varying => "varying",
        }
    }

    /// Independent of the quadrature point.
    pub fn is_piecewise(self) -> bool {
        matches!(
            self,
            TableType::Zeros | TableType::Ones | TableType::Fixed | TableType::Piecewise
        )
    }

    /// Independent of the mesh entity.
    pub fn is_uniform(self) -> bool {
        matches!(
            self,
            TableType::Zeros | TableType::Ones | TableType::Fixed | TableType::Uniform
        )
    }

    /// Terminals with these tables must be recomputed per point.
    pub fn is_varying(self) -> bool {
        matches!(
            self,
            TableType::Varying | TableType::Quadrature | TableType::Uniform
        )
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a modified terminal reads its table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableReference {
    /// Name of the unique table.
    pub name: String,
    /// Name of the terminal's own table before deduplication. Each source
    /// name has a single dof range.
    pub source: String,
    /// Element dofs covered by the table columns.
    pub dofmap: Vec<usize>,
    pub ttype: TableType,
    /// First nonzero dof column of the unstripped table.
    pub begin: usize,
    /// One past the last nonzero dof column; `begin == end` for zeros.
    pub end: usize,
    pub is_uniform: bool,
    pub is_piecewise: bool,
    pub is_permuted: bool,
}

#[inline]
fn is_close(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}

fn all_close(a: &[f64], b: &[f64], rtol: f64, atol: f64) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(&x, &y)| is_close(x, y, rtol, atol))
}

/// Same shape and values within tolerance.
pub fn equal_tables(a: &Table, b: &Table, rtol: f64, atol: f64) -> bool {
    a.shape == b.shape && all_close(&a.values, &b.values, rtol, atol)
}

/// Snap values within tolerance of `0`, `1` or `-1` to exactly that value.
pub fn clamp_table_small_numbers(table: &Table, rtol: f64, atol: f64) -> Table {
    let values = table
        .values
        .iter()
        .map(|&v| {
            [0.0, 1.0, -1.0]
                .into_iter()
                .find(|&target| is_close(v, target, rtol, atol))
                .unwrap_or(v)
        })
        .collect();
    Table {
        shape: table.shape,
        values,
    }
}

/// Strip leading and trailing dof columns that are zero within `atol`.
///
/// Returns `(begin, end, stripped)`. An all-zero table strips to
/// `begin == end == num_dofs`.
pub fn strip_table_zeros(table: &Table, atol: f64) -> (usize, usize, Table) {
    let nd = table.num_dofs();
    let [np, ne, nq, _] = table.shape;
    let column_is_zero = |d: usize| {
        (0..np).all(|p| {
            (0..ne).all(|e| (0..nq).all(|q| table.get(p, e, q, d).abs() <= atol))
        })
    };
    let Some(begin) = (0..nd).find(|&d| !column_is_zero(d)) else {
        return (nd, nd, table.slice_dofs(nd, nd));
    };
    let end = (begin..nd)
        .rev()
        .find(|&d| !column_is_zero(d))
        .map_or(nd, |d| d + 1);
    (begin, end, table.slice_dofs(begin, end))
}

pub fn is_zeros_table(table: &Table, rtol: f64, atol: f64) -> bool {
    table.values.iter().all(|&v| is_close(v, 0.0, rtol, atol))
}

pub fn is_ones_table(table: &Table, rtol: f64, atol: f64) -> bool {
    table.num_dofs() == 1 && table.values.iter().all(|&v| is_close(v, 1.0, rtol, atol))
}

/// Each `[point][dof]` block is the identity.
pub fn is_quadrature_table(table: &Table, rtol: f64, atol: f64) -> bool {
    let [np, ne, nq, nd] = table.shape;
    nq == nd
        && (0..np).all(|p| {
            (0..ne).all(|e| {
                (0..nq).all(|q| {
                    (0..nd).all(|d| {
                        let identity = if q == d { 1.0 } else { 0.0 };
                        is_close(table.get(p, e, q, d), identity, rtol, atol)
                    })
                })
            })
        })
}

/// Values on every entity are the same at all points.
pub fn is_piecewise_table(table: &Table, rtol: f64, atol: f64) -> bool {
    let [_, ne, nq, _] = table.shape;
    (0..ne).all(|e| {
        (1..nq).all(|q| {
            (0..table.num_dofs())
                .all(|d| is_close(table.get(0, e, 0, d), table.get(0, e, q, d), rtol, atol))
        })
    })
}

/// Every entity has the values of entity 0.
pub fn is_uniform_table(table: &Table, rtol: f64, atol: f64) -> bool {
    let first = table.block(0, 0);
    (1..table.num_entities()).all(|e| all_close(first, table.block(0, e), rtol, atol))
}

/// Some permutation differs from permutation 0.
pub fn is_permuted_table(table: &Table, rtol: f64, atol: f64) -> bool {
    (1..table.num_permutations()).any(|p| {
        (0..table.num_entities())
            .any(|e| !all_close(table.block(0, e), table.block(p, e), rtol, atol))
    })
}

/// Classify a (clamped) table.
pub fn analyse_table_type(table: &Table, rtol: f64, atol: f64) -> TableType {
    if table.values.is_empty() || is_zeros_table(table, rtol, atol) {
        return TableType::Zeros;
    }
    if is_ones_table(table, rtol, atol) {
        return TableType::Ones;
    }
    if is_quadrature_table(table, rtol, atol) {
        return TableType::Quadrature;
    }
    match (
        is_piecewise_table(table, rtol, atol),
        is_uniform_table(table, rtol, atol),
    ) {
        (true, true) => TableType::Fixed,
        (true, false) => TableType::Piecewise,
        (false, true) => TableType::Uniform,
        (false, false) => TableType::Varying,
    }
}

/// Drop the axes `ttype` says the values do not depend on, and the
/// permutation axis if no permutation differs.
pub fn compress_table(table: &Table, ttype: TableType, rtol: f64, atol: f64) -> Table {
    let perms = if is_permuted_table(table, rtol, atol) {
        table.num_permutations()
    } else {
        1
    };
    let entities = if ttype.is_uniform() { 1 } else { table.num_entities() };
    let points = if ttype.is_piecewise() { 1 } else { table.num_points() };
    table.truncate(perms, entities, points)
}

/// Deduplicate tables in order.
///
/// Returns the unique tables and, for each input, the position of its
/// unique table. A table joins the first earlier unique table it equals.
pub fn build_unique_tables(tables: &[Table], rtol: f64, atol: f64) -> (Vec<Table>, Vec<usize>) {
    let mut unique: Vec<Table> = Vec::new();
    let mut mapping = Vec::with_capacity(tables.len());
    for table in tables {
        let position = unique
            .iter()
            .position(|u| equal_tables(u, table, rtol, atol))
            .unwrap_or_else(|| {
                unique.push(table.clone());
                unique.len() - 1
            });
        mapping.push(position);
    }
    (unique, mapping)
}

/// Deduplicate named tables. The canonical name of each unique table is
/// the first name mapping to it in sorted order.
///
/// Returns the unique tables by canonical name and, for every input name,
/// its canonical name.
pub fn build_unique_named_tables(
    tables: &BTreeMap<String, Table>,
    rtol: f64,
    atol: f64,
) -> (BTreeMap<String, Table>, BTreeMap<String, String>) {
    let names: Vec<&String> = tables.keys().collect();
    let values: Vec<Table> = tables.values().cloned().collect();
    let (unique, mapping) = build_unique_tables(&values, rtol, atol);

    let mut canonical: Vec<Option<&String>> = vec![None; unique.len()];
    for (name, &u) in names.iter().zip(&mapping) {
        canonical[u].get_or_insert(name);
    }

    let mut unique_tables = BTreeMap::new();
    let mut name_map = BTreeMap::new();
    for (name, &u) in names.iter().zip(&mapping) {
        if let Some(c) = canonical[u] {
            name_map.insert((*name).clone(), c.clone());
            unique_tables
                .entry(c.clone())
                .or_insert_with(|| unique[u].clone());
        }
    }
    (unique_tables, name_map)
}

#[cfg(test)]
mod tests;
