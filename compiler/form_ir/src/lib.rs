//! Form IR - intermediate representation of weak-form integrals
//!
//! This crate turns the integrand of one integral into a factored,
//! table-referencing plan for loop-based code generation:
//! - Modified terminals: canonical descriptors of terminals under
//!   derivatives, restrictions, averages and indexing
//! - Scalar graphs: tensor expressions flattened into deduplicated scalar
//!   nodes
//! - Argument factorization: targets split into argument-free factors per
//!   argument key
//! - Basis tables: built from raw element values, stripped, classified and
//!   deduplicated
//! - Partitioning: liveness, piecewise/varying status and register
//!   allocation
//! - Monomials: explicit sums of products for polynomial integrands
//!
//! [`build_integral_ir`] runs the passes for every quadrature point count
//! of an integral; [`extract_monomial_form`] is an independent path over
//! the expression tree.
//!
//! # Debug Environment Variables
//!
//! - `RUST_LOG=form_ir=debug`: pass boundaries with node and table counts.
//! - `RUST_LOG=form_ir=trace`: per-node decisions (tables, blocks).
//!
//! Call [`init_tracing`] to install a subscriber.

#![allow(
    // Builders thread integral data, element numbering and parameters
    clippy::too_many_arguments,
)]

use std::sync::Once;

mod build;
mod dependencies;
mod error;
mod factorization;
pub mod graph;
mod modified_terminal;
mod monomial;
pub mod normalize;
mod params;
pub mod tables;

#[cfg(test)]
mod test_helpers;

pub use build::{
    build_integral_ir, expect_weight, BlockData, BlockMap, ExprIr, IntegralData, IntegralIr,
    MaData, PiecewiseIr,
};
pub use dependencies::{allocate_registers, analyse_dependencies, compute_cache_scores};
pub use error::{IrError, IrResult};
pub use factorization::{compute_argument_factorization, ArgKey, FactorMap, Factorization};
pub use graph::{
    build_scalar_graph, build_scalar_graph_from_targets, NodeId, NodeStatus, ScalarGraph,
};
pub use modified_terminal::{
    analyse_modified_terminal, derivative_counts, is_modified_terminal, Directions,
    ModifiedTerminal,
};
pub use monomial::{
    extract_monomial_form, extract_monomial_integrand, Monomial, MonomialFactor, MonomialForm,
    MonomialSum,
};
pub use normalize::normalize;
pub use params::IrParams;
pub use tables::{TableReference, TableType};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
