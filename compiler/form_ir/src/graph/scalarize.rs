//! Scalarization: flatten tensor- and index-valued expressions into scalar
//! graph nodes.
//!
//! # Algorithm
//!
//! Every expression maps to the list of its scalar components, laid out
//! shape-major with the sorted free indices as the fast axes (the layout
//! defined by `form_expr::index`). Component lists are memoized per
//! expression so shared subtrees are scalarized once.
//!
//! - Element-wise operators (sum, division, power, math functions, abs)
//!   combine operand components position by position; a single-component
//!   operand broadcasts.
//! - A product walks its output components and finds each operand component
//!   through per-operand strides: a free index the operand lacks has stride
//!   zero.
//! - `index_sum` over index `i` splits the summand layout into a prefix
//!   (shape and indices ordered before `i`), the `i` axis and a suffix, and
//!   sums along the middle axis.
//! - `indexed` maps each output component to the operand component selected
//!   by the fixed indices and the current free-index values.
//! - Modified terminals stop the recursion, one leaf per component.
//!
//! # References
//!
//! - Ølgaard, Wells: "Optimisations for quadrature representations of
//!   finite element tensors through automated code generation", 2010

use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use form_expr::constructors::{abs, division, indexed, math, power, product, sum, zero};
use form_expr::{
    component_indices, fix_indices, fixed_indices, flatten_component, free_index_dim, free_size,
    shape_size, Expr, ExprKind, FreeIndex, Index, IndexId,
};
use form_stack::ensure_sufficient_stack;

use super::ScalarGraph;
use crate::error::{IrError, IrResult};
use crate::modified_terminal::{analyse_modified_terminal, is_modified_terminal};

/// Build the scalar graph of one expression. Each scalar component of
/// `expr` becomes a target, in layout order.
pub fn build_scalar_graph(expr: &Expr) -> IrResult<ScalarGraph> {
    build_scalar_graph_from_targets(std::slice::from_ref(expr))
}

/// Build one scalar graph for several expressions, sharing common
/// subexpressions between them. Targets follow the order of `targets`,
/// each expanded to its components.
pub fn build_scalar_graph_from_targets(targets: &[Expr]) -> IrResult<ScalarGraph> {
    let mut scalarizer = Scalarizer::default();
    let mut graph = ScalarGraph::new();
    for target in targets {
        for component in scalarizer.components(target)?.iter() {
            let id = graph.insert(component)?;
            graph.push_target(id);
        }
    }
    tracing::debug!(
        targets = graph.targets().len(),
        nodes = graph.len(),
        "built scalar graph"
    );
    Ok(graph)
}

#[derive(Default)]
struct Scalarizer {
    memo: FxHashMap<Expr, Rc<[Expr]>>,
}

impl Scalarizer {
    fn components(&mut self, expr: &Expr) -> IrResult<Rc<[Expr]>> {
        if let Some(done) = self.memo.get(expr) {
            return Ok(Rc::clone(done));
        }
        let comps: Rc<[Expr]> = ensure_sufficient_stack(|| self.scalarize(expr))?.into();
        debug_assert_eq!(
            comps.len(),
            shape_size(expr.shape()) * free_size(expr.free_indices())
        );
        self.memo.insert(expr.clone(), Rc::clone(&comps));
        Ok(comps)
    }

    fn scalarize(&mut self, expr: &Expr) -> IrResult<Vec<Expr>> {
        if is_modified_terminal(expr) {
            return terminal_components(expr);
        }
        match expr.kind() {
            ExprKind::Sum(a, b) => self.element_wise(&[a, b], |ops| sum(&ops[0], &ops[1])),
            ExprKind::Division(a, b) => {
                self.element_wise(&[a, b], |ops| division(&ops[0], &ops[1]))
            }
            ExprKind::Power(a, b) => self.element_wise(&[a, b], |ops| power(&ops[0], &ops[1])),
            ExprKind::Math(f, a) => self.element_wise(&[a], |ops| math(*f, &ops[0])),
            ExprKind::Abs(a) => self.element_wise(&[a], |ops| abs(&ops[0])),
            ExprKind::Product(a, b) => self.product(expr, a, b),
            ExprKind::IndexSum { summand, index } => self.index_sum(summand, *index),
            ExprKind::Indexed { operand, indices } => self.indexed(expr, operand, indices),
            kind => Err(IrError::UnexpectedNodeType {
                kind: kind.name(),
                expr: expr.to_string(),
            }),
        }
    }

    fn element_wise<F>(&mut self, operands: &[&Expr], build: F) -> IrResult<Vec<Expr>>
    where
        F: Fn(&[Expr]) -> Expr,
    {
        let comps = operands
            .iter()
            .map(|op| self.components(op))
            .collect::<IrResult<SmallVec<[Rc<[Expr]>; 2]>>>()?;
        let n = comps.iter().map(|c| c.len()).max().unwrap_or(1);
        for c in &comps {
            assert!(
                c.len() == 1 || c.len() == n,
                "element-wise operands with {} and {n} components",
                c.len()
            );
        }
        Ok((0..n)
            .map(|k| {
                let ops: SmallVec<[Expr; 2]> = comps
                    .iter()
                    .map(|c| c[if c.len() == 1 { 0 } else { k }].clone())
                    .collect();
                build(&ops)
            })
            .collect())
    }

    fn product(&mut self, expr: &Expr, a: &Expr, b: &Expr) -> IrResult<Vec<Expr>> {
        let (ca, cb) = (self.components(a)?, self.components(b)?);
        let out_free = expr.free_indices();
        let out_dims: SmallVec<[usize; 4]> = out_free.iter().map(|fi| fi.dim).collect();
        let (strides_a, strides_b) = (index_strides(a, out_free), index_strides(b, out_free));
        // Components per shape position; zero for the scalar-shaped operand.
        let block = |e: &Expr| if e.rank() > 0 { free_size(e.free_indices()) } else { 0 };
        let (block_a, block_b) = (block(a), block(b));

        let free_comps = component_indices(&out_dims);
        let m = shape_size(expr.shape());
        let mut out = Vec::with_capacity(m * free_comps.len());
        for sk in 0..m {
            for ic in &free_comps {
                let ja = sk * block_a + dot(ic, &strides_a);
                let jb = sk * block_b + dot(ic, &strides_b);
                out.push(product(&ca[ja], &cb[jb]));
            }
        }
        Ok(out)
    }

    fn index_sum(&mut self, summand: &Expr, index: IndexId) -> IrResult<Vec<Expr>> {
        let ss = self.components(summand)?;
        let free = summand.free_indices();
        let d = free_index_dim(free, index).unwrap_or_else(|| {
            panic!("index_sum over i_{} which is not free in {summand}", index.raw())
        });
        let predim = shape_size(summand.shape())
            * free.iter().filter(|fi| fi.id < index).map(|fi| fi.dim).product::<usize>();
        let postdim: usize = free.iter().filter(|fi| fi.id > index).map(|fi| fi.dim).product();

        let mut out = Vec::with_capacity(predim * postdim);
        for p in 0..predim {
            for k in 0..postdim {
                let base = p * postdim * d + k;
                let mut acc = ss[base].clone();
                for j in 1..d {
                    acc = sum(&acc, &ss[base + j * postdim]);
                }
                out.push(acc);
            }
        }
        Ok(out)
    }

    fn indexed(&mut self, expr: &Expr, operand: &Expr, indices: &[Index]) -> IrResult<Vec<Expr>> {
        let oc = self.components(operand)?;
        let out_free = expr.free_indices();
        let op_free = operand.free_indices();
        let op_free_dims: SmallVec<[usize; 4]> = op_free.iter().map(|fi| fi.dim).collect();
        let out_dims: SmallVec<[usize; 4]> = out_free.iter().map(|fi| fi.dim).collect();

        // Where each shape axis and each operand free index takes its value.
        let axis_sources: SmallVec<[Source; 4]> = indices
            .iter()
            .map(|&index| match index {
                Index::Fixed(v) => Source::Fixed(v),
                Index::Free(id) => Source::Free(position(out_free, id)),
            })
            .collect();
        let free_sources: SmallVec<[usize; 4]> =
            op_free.iter().map(|fi| position(out_free, fi.id)).collect();

        let block = free_size(op_free);
        let mut out = Vec::with_capacity(shape_size(&out_dims));
        for ic in component_indices(&out_dims) {
            let sc: SmallVec<[usize; 4]> = axis_sources
                .iter()
                .map(|s| match *s {
                    Source::Fixed(v) => v,
                    Source::Free(p) => ic[p],
                })
                .collect();
            let fc: SmallVec<[usize; 4]> = free_sources.iter().map(|&p| ic[p]).collect();
            let k = flatten_component(&sc, operand.shape()) * block
                + flatten_component(&fc, &op_free_dims);
            out.push(oc[k].clone());
        }
        Ok(out)
    }
}

#[derive(Clone, Copy)]
enum Source {
    Fixed(usize),
    /// Position in the output free-index list.
    Free(usize),
}

fn position(free: &[FreeIndex], id: IndexId) -> usize {
    free.iter()
        .position(|fi| fi.id == id)
        .unwrap_or_else(|| panic!("index i_{} missing from output free indices", id.raw()))
}

/// Stride of each output free index within the components of `operand`.
fn index_strides(operand: &Expr, out_free: &[FreeIndex]) -> SmallVec<[usize; 4]> {
    let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(0, out_free.len());
    let mut stride = 1;
    for (k, fi) in out_free.iter().enumerate().rev() {
        if let Some(dim) = free_index_dim(operand.free_indices(), fi.id) {
            strides[k] = stride;
            stride *= dim;
        }
    }
    strides
}

fn dot(a: &[usize], b: &[usize]) -> usize {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// One scalar leaf per component of a modified terminal.
fn terminal_components(expr: &Expr) -> IrResult<Vec<Expr>> {
    let n = shape_size(expr.shape()) * free_size(expr.free_indices());
    if expr.is_zero() {
        return Ok(vec![zero(&[]); n]);
    }
    let ids: SmallVec<[IndexId; 4]> = expr.free_indices().iter().map(|fi| fi.id).collect();
    let dims: SmallVec<[usize; 4]> = expr.free_indices().iter().map(|fi| fi.dim).collect();
    let fixed: Vec<Expr> = component_indices(&dims)
        .iter()
        .map(|values| fix_indices(expr, &ids, values))
        .collect();

    let mut out = Vec::with_capacity(n);
    for sc in component_indices(expr.shape()) {
        for e in &fixed {
            let leaf = indexed(e, &fixed_indices(&sc));
            if analyse_modified_terminal(&leaf)?.is_none() {
                return Err(IrError::UnexpectedNodeType {
                    kind: expr.kind().name(),
                    expr: expr.to_string(),
                });
            }
            out.push(leaf);
        }
    }
    Ok(out)
}
