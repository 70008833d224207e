//! Stack growth for deep recursive expression traversals.
//!
//! Integrands produced by form assembly can nest tens of thousands of binary
//! sums (one per quadrature term or per summed index value). Every recursive
//! walk over an expression tree in the workspace (scalarization, monomial
//! extraction, normalization, index substitution) wraps its recursive step
//! in [`ensure_sufficient_stack`] so those chains never overflow the
//! thread's stack.
//!
//! On native targets the stack is grown on demand with `stacker`. On wasm
//! the call is a passthrough.

/// Remaining stack below which a new segment is allocated (128KB).
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment (2MB).
const SEGMENT_SIZE: usize = 2 * 1024 * 1024;

/// Run `f`, growing the stack first if less than the red zone remains.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

/// Wasm manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
