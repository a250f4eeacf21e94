//! Call contract of a numeric constraint solver.
//!
//! The bridge only talks to a solver through [`SolverBackend`]: it builds
//! primitives and constraints into numbered groups, solves one group and
//! reads parameters back. Handles are opaque and only valid until `clear`.

use nalgebra::UnitQuaternion;
use thiserror::Error;

/// Solver group. Only the group passed to `solve` is moved; everything else
/// acts as fixed reference geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl GroupId {
    pub const FIXED: GroupId = GroupId(1);
    pub const ACTIVE: GroupId = GroupId(2);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("invalid {what} handle {handle}")]
    InvalidHandle { what: &'static str, handle: u32 },
    #[error("handle {handle} is not a {expected}")]
    WrongEntityType { handle: u32, expected: &'static str },
}

/// One solver constraint. Point and curve arguments are entity handles;
/// `wp` projects the constraint into a workplane, `None` means 3D.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintPrimitive {
    PointsCoincident {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
    },
    PtPtDistance {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
        value: f64,
    },
    /// Signed inside a workplane: positive on the left of the line direction.
    PtLineDistance {
        point: EntityHandle,
        line: EntityHandle,
        wp: Option<EntityHandle>,
        value: f64,
    },
    /// Signed along the plane normal.
    PtPlaneDistance {
        point: EntityHandle,
        plane: EntityHandle,
        value: f64,
    },
    PtInPlane {
        point: EntityHandle,
        plane: EntityHandle,
    },
    PtOnLine {
        point: EntityHandle,
        line: EntityHandle,
        wp: Option<EntityHandle>,
    },
    PtOnCircle {
        point: EntityHandle,
        curve: EntityHandle,
    },
    EqualLengthLines {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
    },
    EqualRadius {
        a: EntityHandle,
        b: EntityHandle,
    },
    /// `length(a) = value · length(b)`.
    LengthRatio {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
        value: f64,
    },
    Parallel {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
    },
    Perpendicular {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
    },
    /// Two points share their workplane `v` coordinate.
    Horizontal {
        wp: EntityHandle,
        a: EntityHandle,
        b: EntityHandle,
    },
    /// Two points share their workplane `u` coordinate.
    Vertical {
        wp: EntityHandle,
        a: EntityHandle,
        b: EntityHandle,
    },
    Angle {
        a: EntityHandle,
        b: EntityHandle,
        wp: Option<EntityHandle>,
        degrees: f64,
        supplementary: bool,
    },
    Diameter {
        curve: EntityHandle,
        value: f64,
    },
    AtMidpoint {
        point: EntityHandle,
        line: EntityHandle,
        wp: Option<EntityHandle>,
    },
    /// The line is tangent to the arc at its start, or its end with `at_end`.
    ArcLineTangent {
        wp: EntityHandle,
        arc: EntityHandle,
        line: EntityHandle,
        at_end: bool,
    },
    /// Two arcs tangent at the selected endpoints.
    CurveCurveTangent {
        wp: EntityHandle,
        a: EntityHandle,
        b: EntityHandle,
        a_at_end: bool,
        b_at_end: bool,
    },
    /// The line's distance to the curve centre equals the radius.
    LineCircleTangent {
        wp: EntityHandle,
        line: EntityHandle,
        curve: EntityHandle,
    },
    /// Centre distance equals `ra + rb`, or `|ra - rb|` when `internal`.
    CircleCircleTangent {
        a: EntityHandle,
        b: EntityHandle,
        internal: bool,
    },
    /// Pins a point where it currently is.
    WhereDragged {
        point: EntityHandle,
        wp: Option<EntityHandle>,
    },
}

/// Numeric solver consumed by the bridge.
pub trait SolverBackend {
    fn add_point_3d(&mut self, group: GroupId, coords: [f64; 3]) -> Result<EntityHandle, SolverError>;

    fn add_point_2d(
        &mut self,
        group: GroupId,
        wp: EntityHandle,
        coords: [f64; 2],
    ) -> Result<EntityHandle, SolverError>;

    fn add_normal_3d(
        &mut self,
        group: GroupId,
        orientation: UnitQuaternion<f64>,
    ) -> Result<EntityHandle, SolverError>;

    fn add_normal_2d(&mut self, group: GroupId, wp: EntityHandle) -> Result<EntityHandle, SolverError>;

    fn add_distance(
        &mut self,
        group: GroupId,
        wp: Option<EntityHandle>,
        value: f64,
    ) -> Result<EntityHandle, SolverError>;

    fn add_workplane(
        &mut self,
        group: GroupId,
        origin: EntityHandle,
        normal: EntityHandle,
    ) -> Result<EntityHandle, SolverError>;

    fn add_line_segment(
        &mut self,
        group: GroupId,
        wp: Option<EntityHandle>,
        a: EntityHandle,
        b: EntityHandle,
    ) -> Result<EntityHandle, SolverError>;

    fn add_circle(
        &mut self,
        group: GroupId,
        wp: Option<EntityHandle>,
        normal: EntityHandle,
        center: EntityHandle,
        radius: EntityHandle,
    ) -> Result<EntityHandle, SolverError>;

    /// Counter-clockwise arc from `start` to `end` around `center`.
    fn add_arc_of_circle(
        &mut self,
        group: GroupId,
        wp: EntityHandle,
        normal: EntityHandle,
        center: EntityHandle,
        start: EntityHandle,
        end: EntityHandle,
    ) -> Result<EntityHandle, SolverError>;

    fn add_constraint(
        &mut self,
        group: GroupId,
        constraint: ConstraintPrimitive,
    ) -> Result<ConstraintHandle, SolverError>;

    /// Solve `group` and return the raw status code (0 = okay).
    fn solve(&mut self, group: GroupId) -> i32;

    /// Parameters owned by an entity: point coordinates, quaternion
    /// components (w, x, y, z) or a distance value. Composite entities own none.
    fn params(&self, entity: EntityHandle) -> Result<Vec<ParamHandle>, SolverError>;

    fn get_param_value(&self, param: ParamHandle) -> Result<f64, SolverError>;

    /// Degrees of freedom left after the last solve.
    fn dof(&self) -> i32;

    /// Constraints the last solve could not satisfy.
    fn failed_constraints(&self) -> Vec<ConstraintHandle>;

    /// Drop every entity, constraint and parameter.
    fn clear(&mut self);
}
