//! Terminal data: elements, cells, domains, form arguments, geometry and
//! literal values.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::index::Shape;

/// Identity of a finite element. Basis tables are keyed by this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ElementId(u32);

impl ElementId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A finite element as seen by the expression layer: its identity, its
/// polynomial degree and the value shape of its basis functions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FiniteElement {
    pub id: ElementId,
    pub degree: u32,
    pub value_shape: Shape,
}

impl FiniteElement {
    pub fn new(id: ElementId, degree: u32, value_shape: &[usize]) -> Self {
        Self {
            id,
            degree,
            value_shape: value_shape.iter().copied().collect(),
        }
    }

    /// Scalar-valued element.
    pub fn scalar(id: ElementId, degree: u32) -> Self {
        Self::new(id, degree, &[])
    }

    /// Degree-zero elements are constant on each cell.
    pub fn is_cellwise_constant(&self) -> bool {
        self.degree == 0
    }

    /// Number of scalar components of a basis function value.
    pub fn value_size(&self) -> usize {
        self.value_shape.iter().product()
    }
}

/// Reference cell shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellType {
    Interval,
    Triangle,
    Quadrilateral,
    Tetrahedron,
    Hexahedron,
}

impl CellType {
    pub fn topological_dimension(self) -> usize {
        match self {
            CellType::Interval => 1,
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron | CellType::Hexahedron => 3,
        }
    }

    pub fn num_facets(self) -> usize {
        match self {
            CellType::Interval => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Hexahedron => 6,
        }
    }

    pub fn num_vertices(self) -> usize {
        match self {
            CellType::Interval => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Hexahedron => 8,
        }
    }

    pub fn is_simplex(self) -> bool {
        matches!(
            self,
            CellType::Interval | CellType::Triangle | CellType::Tetrahedron
        )
    }
}

/// The mesh domain a terminal lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Domain {
    pub cell: CellType,
    /// Geometric (embedding) dimension.
    pub gdim: usize,
    /// Element of the coordinate field.
    pub coordinate_element: ElementId,
    /// Affine coordinate mapping: Jacobians and normals are cellwise constant.
    pub affine: bool,
}

impl Domain {
    /// Domain embedded in its own topological dimension, affine on simplices.
    pub fn new(cell: CellType, coordinate_element: ElementId) -> Self {
        Self {
            cell,
            gdim: cell.topological_dimension(),
            coordinate_element,
            affine: cell.is_simplex(),
        }
    }

    pub fn tdim(&self) -> usize {
        self.cell.topological_dimension()
    }
}

/// Unknown (test or trial) function. `number` selects the output tensor axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Argument {
    pub number: u32,
    pub part: Option<u32>,
    pub element: FiniteElement,
    pub domain: Domain,
}

/// Known function data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Coefficient {
    pub count: u32,
    pub element: FiniteElement,
    pub domain: Domain,
}

/// Kinds of geometric quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    SpatialCoordinate,
    CellCoordinate,
    FacetCoordinate,
    Jacobian,
    FacetNormal,
    CellVolume,
    QuadratureWeight,
}

/// A geometric quantity on a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometricQuantity {
    pub kind: GeometryKind,
    pub domain: Domain,
}

impl GeometricQuantity {
    pub fn shape(&self) -> Shape {
        let gdim = self.domain.gdim;
        let tdim = self.domain.tdim();
        match self.kind {
            GeometryKind::SpatialCoordinate | GeometryKind::FacetNormal => Shape::from_slice(&[gdim]),
            GeometryKind::CellCoordinate => Shape::from_slice(&[tdim]),
            GeometryKind::FacetCoordinate => Shape::from_slice(&[tdim.saturating_sub(1)]),
            GeometryKind::Jacobian => Shape::from_slice(&[gdim, tdim]),
            GeometryKind::CellVolume | GeometryKind::QuadratureWeight => Shape::new(),
        }
    }

    pub fn is_cellwise_constant(&self) -> bool {
        match self.kind {
            GeometryKind::CellVolume => true,
            GeometryKind::Jacobian | GeometryKind::FacetNormal => self.domain.affine,
            GeometryKind::SpatialCoordinate
            | GeometryKind::CellCoordinate
            | GeometryKind::FacetCoordinate
            | GeometryKind::QuadratureWeight => false,
        }
    }

    /// Quantities that are defined directly by the quadrature point rather
    /// than through a basis expansion.
    pub fn is_point_dependent(&self) -> bool {
        matches!(
            self.kind,
            GeometryKind::CellCoordinate
                | GeometryKind::FacetCoordinate
                | GeometryKind::QuadratureWeight
        )
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            GeometryKind::SpatialCoordinate => "x",
            GeometryKind::CellCoordinate => "X",
            GeometryKind::FacetCoordinate => "Xf",
            GeometryKind::Jacobian => "J",
            GeometryKind::FacetNormal => "n",
            GeometryKind::CellVolume => "volume",
            GeometryKind::QuadratureWeight => "weight",
        }
    }
}

/// Literal scalar value.
///
/// Equality and hashing compare floats bitwise after collapsing `-0.0` into
/// `0.0`, so literals can key deduplication maps.
#[derive(Clone, Copy, Debug)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
}

impl ScalarValue {
    pub fn value(self) -> f64 {
        match self {
            ScalarValue::Int(v) => v as f64,
            ScalarValue::Float(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        self.value() == 0.0
    }

    pub fn is_one(self) -> bool {
        self.value() == 1.0
    }

    fn key(self) -> (u8, u64) {
        match self {
            ScalarValue::Int(v) => (0, v as u64),
            ScalarValue::Float(v) => {
                let v = if v == 0.0 { 0.0 } else { v };
                (1, v.to_bits())
            }
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v:?}"),
        }
    }
}
