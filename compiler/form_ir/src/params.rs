//! Compiler parameters for IR construction.

use crate::error::{IrError, IrResult};

/// Tunables for table optimization and register allocation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrParams {
    /// Relative tolerance when comparing table values.
    pub table_rtol: f64,
    /// Absolute tolerance when comparing table values and stripping zeros.
    pub table_atol: f64,
    /// Upper bound on cached intermediate values per expression.
    pub max_registers: usize,
    /// Nodes scoring at or below this are never cached.
    pub score_threshold: u64,
    /// Score multiplier for math-function nodes.
    pub expensive_multiplier: u64,
}

impl Default for IrParams {
    fn default() -> Self {
        Self {
            table_rtol: 1e-6,
            table_atol: 1e-9,
            max_registers: 64,
            score_threshold: 3,
            expensive_multiplier: 20,
        }
    }
}

impl IrParams {
    /// Apply `key = value` overrides, as read from a parameter file or the
    /// command line.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> IrResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in overrides {
            match key {
                "table_rtol" => self.table_rtol = parse_tolerance(key, value)?,
                "table_atol" => self.table_atol = parse_tolerance(key, value)?,
                "max_registers" => self.max_registers = parse_count(key, value)?,
                "score_threshold" => self.score_threshold = parse_count(key, value)?,
                "expensive_multiplier" => self.expensive_multiplier = parse_count(key, value)?,
                _ => return Err(invalid(key, value, "unknown parameter")),
            }
        }
        Ok(self)
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> IrError {
    IrError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_tolerance(key: &str, value: &str) -> IrResult<f64> {
    let tol: f64 = value
        .trim()
        .parse()
        .map_err(|e| invalid(key, value, format!("{e}")))?;
    if !tol.is_finite() || tol < 0.0 {
        return Err(invalid(key, value, "tolerance must be finite and non-negative"));
    }
    Ok(tol)
}

fn parse_count<T: std::str::FromStr>(key: &str, value: &str) -> IrResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| invalid(key, value, format!("{e}")))
}

#[cfg(test)]
mod tests;
