//! Integrals and forms.

use std::fmt;

use crate::expr::Expr;
use crate::terminal::Domain;

/// Kind of mesh entity an integral runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntegralType {
    Cell,
    ExteriorFacet,
    InteriorFacet,
    Vertex,
    Custom,
    /// Pointwise evaluation of an expression, no integration.
    Expression,
}

impl IntegralType {
    pub fn name(self) -> &'static str {
        match self {
            IntegralType::Cell => "cell",
            IntegralType::ExteriorFacet => "exterior_facet",
            IntegralType::InteriorFacet => "interior_facet",
            IntegralType::Vertex => "vertex",
            IntegralType::Custom => "custom",
            IntegralType::Expression => "expression",
        }
    }

    /// Number of mesh entities of this type on one cell, which is the number
    /// of entity rows in its basis tables.
    pub fn num_entities(self, domain: &Domain) -> usize {
        match self {
            IntegralType::Cell | IntegralType::Custom | IntegralType::Expression => 1,
            IntegralType::ExteriorFacet | IntegralType::InteriorFacet => domain.cell.num_facets(),
            IntegralType::Vertex => domain.cell.num_vertices(),
        }
    }
}

impl fmt::Display for IntegralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an integrand is integrated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Measure {
    pub integral_type: IntegralType,
    pub subdomain_id: Option<u32>,
}

impl Measure {
    pub fn new(integral_type: IntegralType) -> Self {
        Self {
            integral_type,
            subdomain_id: None,
        }
    }

    /// `dx`.
    pub fn cell() -> Self {
        Self::new(IntegralType::Cell)
    }

    /// `ds`.
    pub fn exterior_facet() -> Self {
        Self::new(IntegralType::ExteriorFacet)
    }

    /// `dS`.
    pub fn interior_facet() -> Self {
        Self::new(IntegralType::InteriorFacet)
    }

    pub fn with_subdomain(mut self, id: u32) -> Self {
        self.subdomain_id = Some(id);
        self
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self.integral_type {
            IntegralType::Cell => "dx",
            IntegralType::ExteriorFacet => "ds",
            IntegralType::InteriorFacet => "dS",
            IntegralType::Vertex => "dP",
            IntegralType::Custom => "dc",
            IntegralType::Expression => "dE",
        };
        match self.subdomain_id {
            Some(id) => write!(f, "{symbol}({id})"),
            None => f.write_str(symbol),
        }
    }
}

/// One integrand over one measure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Integral {
    pub integrand: Expr,
    pub measure: Measure,
}

impl Integral {
    pub fn new(integrand: Expr, measure: Measure) -> Self {
        Self { integrand, measure }
    }
}

impl fmt::Display for Integral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {} }} * {}", self.integrand, self.measure)
    }
}

/// A sum of integrals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Form {
    pub integrals: Vec<Integral>,
}

impl Form {
    pub fn new(integrals: Vec<Integral>) -> Self {
        Self { integrals }
    }

    /// Form with a single integral.
    pub fn single(integrand: Expr, measure: Measure) -> Self {
        Self::new(vec![Integral::new(integrand, measure)])
    }

    pub fn is_empty(&self) -> bool {
        self.integrals.is_empty()
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, integral) in self.integrals.iter().enumerate() {
            if i > 0 {
                f.write_str("\n  +  ")?;
            }
            write!(f, "{integral}")?;
        }
        Ok(())
    }
}
