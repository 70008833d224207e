//! Monomial extraction.
//!
//! Rewrites a polynomial integrand into an explicit sum of monomials, each
//! a real coefficient times a product of basis-function factors. This is a
//! tree walk over the integrand with no graph sharing: the result is a
//! flat sum, so shared subexpressions are expanded anyway.
//!
//! Index handling mirrors the expression semantics: `indexed` substitutes
//! concrete indices for the pending index slots of a tensor-valued
//! monomial (or, if there are none, sets the components of every factor),
//! and `component_tensor` opens new slots. Free indices left in the
//! monomials are implicitly summed.

use std::fmt;
use std::ops::{Add, Mul};

use form_expr::{Expr, ExprKind, Form, Index, Measure, MultiIndex, Restriction, ScalarValue};
use form_stack::ensure_sufficient_stack;

use crate::error::{IrError, IrResult};
use crate::normalize::purge_list_tensors;

/// A basis function (argument or coefficient) with components, derivative
/// directions and restriction.
#[derive(Clone, Debug, PartialEq)]
pub struct MonomialFactor {
    pub function: Expr,
    pub components: MultiIndex,
    pub derivatives: MultiIndex,
    pub restriction: Option<Restriction>,
}

impl MonomialFactor {
    pub fn new(function: Expr) -> Self {
        Self {
            function,
            components: MultiIndex::new(),
            derivatives: MultiIndex::new(),
            restriction: None,
        }
    }

    fn replace_indices(&mut self, old: Option<&[Index]>, new: &[Index]) -> IrResult<()> {
        let Some(old) = old else {
            self.components = new.iter().copied().collect();
            return Ok(());
        };
        if old.len() != new.len() {
            return Err(IrError::MonomialExtraction {
                construct: "indexed",
                detail: format!("{} index slots, {} indices", old.len(), new.len()),
            });
        }
        for index in self.components.iter_mut().chain(self.derivatives.iter_mut()) {
            if let Some(pos) = old.iter().position(|o| o == index) {
                *index = new[pos];
            }
        }
        Ok(())
    }
}

impl fmt::Display for MonomialFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function)?;
        if !self.components.is_empty() {
            write!(f, "[{}]", join(&self.components))?;
        }
        if !self.derivatives.is_empty() {
            write!(f, ".dx({})", join(&self.derivatives))?;
        }
        if let Some(side) = self.restriction {
            write!(f, "('{side}')")?;
        }
        Ok(())
    }
}

fn join(indices: &[Index]) -> String {
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `coefficient * factors[0] * factors[1] * ...`
#[derive(Clone, Debug, PartialEq)]
pub struct Monomial {
    pub coefficient: f64,
    pub factors: Vec<MonomialFactor>,
    /// Index slots opened by a `component_tensor` and not yet indexed.
    pub index_slots: Option<MultiIndex>,
}

impl Monomial {
    /// Monomial without factors.
    pub fn constant(coefficient: f64) -> Self {
        Self {
            coefficient,
            factors: Vec::new(),
            index_slots: None,
        }
    }

    pub fn from_factor(factor: MonomialFactor) -> Self {
        Self {
            coefficient: 1.0,
            factors: vec![factor],
            index_slots: None,
        }
    }

    fn apply_indices(&mut self, indices: &[Index]) -> IrResult<()> {
        let slots = self.index_slots.take();
        for factor in &mut self.factors {
            factor.replace_indices(slots.as_deref(), indices)?;
        }
        Ok(())
    }

    fn apply_tensor(&mut self, indices: &[Index]) -> IrResult<()> {
        if self.index_slots.is_some() {
            return Err(IrError::MonomialExtraction {
                construct: "component_tensor",
                detail: "expecting scalar-valued expression".to_string(),
            });
        }
        self.index_slots = Some(indices.iter().copied().collect());
        Ok(())
    }

    fn apply_derivative(&mut self, indices: &[Index]) -> IrResult<()> {
        let [factor] = self.factors.as_mut_slice() else {
            return Err(IrError::MonomialExtraction {
                construct: "spatial_derivative",
                detail: format!("expecting a single factor, found {}", self.factors.len()),
            });
        };
        factor.derivatives.extend(indices.iter().copied());
        Ok(())
    }

    fn apply_restriction(&mut self, side: Restriction) -> IrResult<()> {
        for factor in &mut self.factors {
            if factor.restriction.is_some() {
                return Err(IrError::DuplicateRestriction {
                    expr: factor.to_string(),
                });
            }
            factor.restriction = Some(side);
        }
        Ok(())
    }
}

impl Mul for &Monomial {
    type Output = Monomial;

    fn mul(self, other: &Monomial) -> Monomial {
        Monomial {
            coefficient: self.coefficient * other.coefficient,
            factors: self.factors.iter().chain(&other.factors).cloned().collect(),
            index_slots: None,
        }
    }
}

impl fmt::Display for Monomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coefficient)?;
        for factor in &self.factors {
            write!(f, " * {factor}")?;
        }
        Ok(())
    }
}

/// Sum of monomials. The empty sum is zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonomialSum {
    pub monomials: Vec<Monomial>,
}

impl MonomialSum {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn one() -> Self {
        Self::from(Monomial::constant(1.0))
    }

    pub fn is_zero(&self) -> bool {
        self.monomials.is_empty()
    }

    /// Same monomials up to order.
    pub fn is_equivalent(&self, other: &MonomialSum) -> bool {
        if self.monomials.len() != other.monomials.len() {
            return false;
        }
        let mut used = vec![false; other.monomials.len()];
        self.monomials.iter().all(|m| {
            let found = other
                .monomials
                .iter()
                .enumerate()
                .position(|(k, o)| !used[k] && o == m);
            found.map(|k| used[k] = true).is_some()
        })
    }

    fn try_for_each<F>(&mut self, mut f: F) -> IrResult<()>
    where
        F: FnMut(&mut Monomial) -> IrResult<()>,
    {
        self.monomials.iter_mut().try_for_each(|m| f(m))
    }
}

impl From<Monomial> for MonomialSum {
    fn from(monomial: Monomial) -> Self {
        Self {
            monomials: vec![monomial],
        }
    }
}

impl Add for MonomialSum {
    type Output = MonomialSum;

    fn add(mut self, other: MonomialSum) -> MonomialSum {
        self.monomials.extend(other.monomials);
        self
    }
}

impl Mul for &MonomialSum {
    type Output = MonomialSum;

    fn mul(self, other: &MonomialSum) -> MonomialSum {
        let monomials = self
            .monomials
            .iter()
            .flat_map(|a| other.monomials.iter().map(move |b| a * b))
            .collect();
        MonomialSum { monomials }
    }
}

impl fmt::Display for MonomialSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.monomials.is_empty() {
            return f.write_str("0");
        }
        for (i, m) in self.monomials.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

/// Integrands of a form as monomial sums, in integral order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonomialForm {
    pub integrals: Vec<(MonomialSum, Measure)>,
}

impl MonomialForm {
    pub fn is_empty(&self) -> bool {
        self.integrals.is_empty()
    }
}

impl fmt::Display for MonomialForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.integrals.is_empty() {
            return f.write_str("<Empty form>");
        }
        for (i, (integrand, measure)) in self.integrals.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{measure}: {integrand}")?;
        }
        Ok(())
    }
}

/// Extract the monomial form of every integral of `form`.
pub fn extract_monomial_form(form: &Form) -> IrResult<MonomialForm> {
    let integrals = form
        .integrals
        .iter()
        .map(|integral| Ok((extract_monomial_integrand(&integral.integrand)?, integral.measure)))
        .collect::<IrResult<Vec<_>>>()?;
    tracing::debug!(integrals = integrals.len(), "extracted monomial form");
    Ok(MonomialForm { integrals })
}

/// Extract the monomials of one integrand.
pub fn extract_monomial_integrand(integrand: &Expr) -> IrResult<MonomialSum> {
    let sum = extract(&purge_list_tensors(integrand))?;
    tracing::trace!(monomials = sum.monomials.len(), "extracted integrand");
    Ok(sum)
}

fn extract(expr: &Expr) -> IrResult<MonomialSum> {
    ensure_sufficient_stack(|| match expr.kind() {
        ExprKind::Argument(_) | ExprKind::Coefficient(_) => Ok(MonomialSum::from(
            Monomial::from_factor(MonomialFactor::new(expr.clone())),
        )),
        ExprKind::Scalar(v) => Ok(MonomialSum::from(Monomial::constant(v.value()))),
        ExprKind::Zero { .. } => Ok(MonomialSum::zero()),
        ExprKind::Sum(a, b) => Ok(extract(a)? + extract(b)?),
        ExprKind::Product(a, b) => Ok(&extract(a)? * &extract(b)?),
        ExprKind::Power(base, exponent) => {
            // Literal zero is stored as `Zero`, not as an integer scalar.
            let n = match exponent.kind() {
                ExprKind::Zero { .. } if exponent.is_scalar() => 0,
                ExprKind::Scalar(ScalarValue::Int(n)) => {
                    usize::try_from(*n).map_err(|_| IrError::MonomialExtraction {
                        construct: "power",
                        detail: format!("negative exponent {n}"),
                    })?
                }
                _ => {
                    return Err(IrError::MonomialExtraction {
                        construct: "power",
                        detail: format!("non-integer exponent {exponent}"),
                    })
                }
            };
            let base = extract(base)?;
            Ok((0..n).fold(MonomialSum::one(), |acc, _| &acc * &base))
        }
        ExprKind::IndexSum { summand, .. } => extract(summand),
        ExprKind::Indexed { operand, indices } => {
            let mut sum = extract(operand)?;
            sum.try_for_each(|m| m.apply_indices(indices))?;
            Ok(sum)
        }
        ExprKind::ComponentTensor { operand, indices } => {
            let mut sum = extract(operand)?;
            sum.try_for_each(|m| m.apply_tensor(indices))?;
            Ok(sum)
        }
        ExprKind::SpatialDerivative { operand, indices } => {
            let mut sum = extract(operand)?;
            sum.try_for_each(|m| m.apply_derivative(indices))?;
            Ok(sum)
        }
        ExprKind::Restricted(side, operand) => {
            let mut sum = extract(operand)?;
            sum.try_for_each(|m| m.apply_restriction(*side))?;
            Ok(sum)
        }
        ExprKind::Variable { expr: inner, .. } => extract(inner),
        kind => Err(IrError::MonomialExtraction {
            construct: kind.name(),
            detail: format!("unsupported in {expr}"),
        }),
    })
}
