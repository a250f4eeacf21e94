//! In-process solver backend.
//!
//! Damped Gauss-Newton over the free parameters of the solved group: the
//! Jacobian is taken by central differences, each step is the minimum-norm
//! least-squares solution from an SVD, and a backtracking line search only
//! accepts steps that reduce the residual norm.

use std::collections::HashSet;

use nalgebra::{DMatrix, DVector, Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use sketch_model::SolveStatus;
use tracing::{debug, instrument};

use crate::backend::{
    ConstraintHandle, ConstraintPrimitive, EntityHandle, GroupId, ParamHandle, SolverBackend,
    SolverError,
};

/// Tuning of the native backend. Missing fields take their defaults when
/// deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Largest absolute residual accepted as solved.
    pub tolerance: f64,
    /// Systems with more free parameters report `TOO_MANY_UNKNOWNS`.
    pub max_unknowns: usize,
    /// Singular values below this fraction of the largest count as zero.
    pub rank_threshold: f64,
    /// Relative step of the finite-difference Jacobian.
    pub finite_difference_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-10,
            max_unknowns: 1000,
            rank_threshold: 1e-9,
            finite_difference_step: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Element {
    Point3 { params: [usize; 3] },
    Point2 { wp: usize, params: [usize; 2] },
    /// Quaternion stored as (w, x, y, z).
    Normal3 { params: [usize; 4] },
    Normal2 { wp: usize },
    Distance { param: usize },
    Workplane { origin: usize, normal: usize },
    Line { a: usize, b: usize },
    Circle { center: usize, radius: usize },
    Arc { center: usize, start: usize, end: usize },
}

#[derive(Debug, Clone, Copy)]
struct Param {
    group: GroupId,
    value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NativeSolver {
    config: SolverConfig,
    params: Vec<Param>,
    elements: Vec<(GroupId, Element)>,
    constraints: Vec<(GroupId, ConstraintPrimitive)>,
    dof: i32,
    failed: Vec<ConstraintHandle>,
}

fn cross2(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

fn safe(n: f64) -> f64 {
    n.max(1e-12)
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

fn norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Residual evaluation against one parameter vector.
struct Eval<'a> {
    elements: &'a [(GroupId, Element)],
    x: &'a [f64],
}

impl Eval<'_> {
    fn element(&self, index: usize) -> Element {
        self.elements[index].1
    }

    fn orientation(&self, normal: usize) -> UnitQuaternion<f64> {
        match self.element(normal) {
            Element::Normal3 { params: [w, i, j, k] } => {
                let q = Quaternion::new(self.x[w], self.x[i], self.x[j], self.x[k]);
                UnitQuaternion::try_new(q, 1e-12).unwrap_or_else(UnitQuaternion::identity)
            }
            Element::Normal2 { wp } => self.frame(wp).rotation,
            _ => UnitQuaternion::identity(),
        }
    }

    fn frame(&self, wp: usize) -> Isometry3<f64> {
        match self.element(wp) {
            Element::Workplane { origin, normal } => Isometry3::from_parts(
                Translation3::from(self.world(origin)),
                self.orientation(normal),
            ),
            _ => Isometry3::identity(),
        }
    }

    fn world(&self, point: usize) -> Vector3<f64> {
        match self.element(point) {
            Element::Point3 { params: [x, y, z] } => Vector3::new(self.x[x], self.x[y], self.x[z]),
            Element::Point2 { wp, params: [u, v] } => {
                (self.frame(wp) * Point3::new(self.x[u], self.x[v], 0.0)).coords
            }
            _ => Vector3::zeros(),
        }
    }

    /// Point coordinates in the constraint frame: `(u, v, 0)` inside a
    /// workplane, world coordinates otherwise.
    fn pos(&self, point: usize, wp: Option<usize>) -> Vector3<f64> {
        let Some(wp) = wp else {
            return self.world(point);
        };
        match self.element(point) {
            Element::Point2 { wp: own, params: [u, v] } if own == wp => {
                Vector3::new(self.x[u], self.x[v], 0.0)
            }
            _ => {
                let local = self
                    .frame(wp)
                    .inverse_transform_point(&Point3::from(self.world(point)));
                Vector3::new(local.x, local.y, 0.0)
            }
        }
    }

    fn line(&self, line: usize, wp: Option<usize>) -> (Vector3<f64>, Vector3<f64>) {
        match self.element(line) {
            Element::Line { a, b } => (self.pos(a, wp), self.pos(b, wp)),
            _ => (Vector3::zeros(), Vector3::zeros()),
        }
    }

    fn center(&self, curve: usize) -> usize {
        match self.element(curve) {
            Element::Circle { center, .. } | Element::Arc { center, .. } => center,
            _ => curve,
        }
    }

    fn radius(&self, curve: usize) -> f64 {
        match self.element(curve) {
            Element::Circle { radius, .. } => match self.element(radius) {
                Element::Distance { param } => self.x[param],
                _ => 0.0,
            },
            Element::Arc { center, start, .. } => (self.world(start) - self.world(center)).norm(),
            _ => 0.0,
        }
    }

    fn arc_point(&self, arc: usize, at_end: bool) -> usize {
        match self.element(arc) {
            Element::Arc { start, end, .. } => {
                if at_end {
                    end
                } else {
                    start
                }
            }
            _ => arc,
        }
    }

    fn push_residuals(&self, primitive: &ConstraintPrimitive, out: &mut Vec<f64>) {
        use ConstraintPrimitive as P;
        let h = |e: &EntityHandle| e.0 as usize;
        let wp_of = |wp: &Option<EntityHandle>| wp.as_ref().map(h);
        match primitive {
            P::PointsCoincident { a, b, wp } => {
                let d = self.pos(h(a), wp_of(wp)) - self.pos(h(b), wp_of(wp));
                out.extend([d.x, d.y]);
                if wp.is_none() {
                    out.push(d.z);
                }
            }
            P::PtPtDistance { a, b, wp, value } => {
                let d = self.pos(h(a), wp_of(wp)) - self.pos(h(b), wp_of(wp));
                out.push(d.norm() - value);
            }
            P::PtLineDistance {
                point,
                line,
                wp,
                value,
            } => {
                let p = self.pos(h(point), wp_of(wp));
                let (a, b) = self.line(h(line), wp_of(wp));
                let d = b - a;
                if wp.is_some() {
                    out.push(cross2(&d, &(p - a)) / safe(d.norm()) - value);
                } else {
                    out.push(d.cross(&(p - a)).norm() / safe(d.norm()) - value.abs());
                }
            }
            P::PtPlaneDistance { point, plane, value } => {
                let frame = self.frame(h(plane));
                let n = frame.rotation * Vector3::z();
                out.push((self.world(h(point)) - frame.translation.vector).dot(&n) - value);
            }
            P::PtInPlane { point, plane } => {
                let frame = self.frame(h(plane));
                let n = frame.rotation * Vector3::z();
                out.push((self.world(h(point)) - frame.translation.vector).dot(&n));
            }
            P::PtOnLine { point, line, wp } => {
                let p = self.pos(h(point), wp_of(wp));
                let (a, b) = self.line(h(line), wp_of(wp));
                let d = b - a;
                if wp.is_some() {
                    out.push(cross2(&d, &(p - a)) / safe(d.norm()));
                } else {
                    let c = d.cross(&(p - a)) / safe(d.norm());
                    out.extend([c.x, c.y, c.z]);
                }
            }
            P::PtOnCircle { point, curve } => {
                let c = self.world(self.center(h(curve)));
                out.push((self.world(h(point)) - c).norm() - self.radius(h(curve)));
            }
            P::EqualLengthLines { a, b, wp } => {
                let (a1, a2) = self.line(h(a), wp_of(wp));
                let (b1, b2) = self.line(h(b), wp_of(wp));
                out.push((a2 - a1).norm() - (b2 - b1).norm());
            }
            P::EqualRadius { a, b } => out.push(self.radius(h(a)) - self.radius(h(b))),
            P::LengthRatio { a, b, wp, value } => {
                let (a1, a2) = self.line(h(a), wp_of(wp));
                let (b1, b2) = self.line(h(b), wp_of(wp));
                out.push((a2 - a1).norm() - value * (b2 - b1).norm());
            }
            P::Parallel { a, b, wp } => {
                let (a1, a2) = self.line(h(a), wp_of(wp));
                let (b1, b2) = self.line(h(b), wp_of(wp));
                let (da, db) = (a2 - a1, b2 - b1);
                let scale = safe(da.norm() * db.norm());
                if wp.is_some() {
                    out.push(cross2(&da, &db) / scale);
                } else {
                    let c = da.cross(&db) / scale;
                    out.extend([c.x, c.y, c.z]);
                }
            }
            P::Perpendicular { a, b, wp } => {
                let (a1, a2) = self.line(h(a), wp_of(wp));
                let (b1, b2) = self.line(h(b), wp_of(wp));
                let (da, db) = (a2 - a1, b2 - b1);
                out.push(da.dot(&db) / safe(da.norm() * db.norm()));
            }
            P::Horizontal { wp, a, b } => {
                out.push(self.pos(h(a), Some(h(wp))).y - self.pos(h(b), Some(h(wp))).y);
            }
            P::Vertical { wp, a, b } => {
                out.push(self.pos(h(a), Some(h(wp))).x - self.pos(h(b), Some(h(wp))).x);
            }
            P::Angle {
                a,
                b,
                wp,
                degrees,
                supplementary,
            } => {
                let (a1, a2) = self.line(h(a), wp_of(wp));
                let (b1, b2) = self.line(h(b), wp_of(wp));
                let (da, db) = (a2 - a1, b2 - b1);
                let mut target = degrees.to_radians().cos();
                if *supplementary {
                    target = -target;
                }
                out.push(da.dot(&db) / safe(da.norm() * db.norm()) - target);
            }
            P::Diameter { curve, value } => out.push(2.0 * self.radius(h(curve)) - value),
            P::AtMidpoint { point, line, wp } => {
                let (a, b) = self.line(h(line), wp_of(wp));
                let d = self.pos(h(point), wp_of(wp)) - (a + b) * 0.5;
                out.extend([d.x, d.y]);
                if wp.is_none() {
                    out.push(d.z);
                }
            }
            P::ArcLineTangent {
                wp,
                arc,
                line,
                at_end,
            } => {
                let wp = Some(h(wp));
                let p = self.pos(self.arc_point(h(arc), *at_end), wp);
                let radial = p - self.pos(self.center(h(arc)), wp);
                let (a, b) = self.line(h(line), wp);
                let d = b - a;
                out.push(radial.dot(&d) / safe(radial.norm() * d.norm()));
            }
            P::CurveCurveTangent {
                wp,
                a,
                b,
                a_at_end,
                b_at_end,
            } => {
                let wp = Some(h(wp));
                let ra = self.pos(self.arc_point(h(a), *a_at_end), wp) - self.pos(self.center(h(a)), wp);
                let rb = self.pos(self.arc_point(h(b), *b_at_end), wp) - self.pos(self.center(h(b)), wp);
                out.push(cross2(&ra, &rb) / safe(ra.norm() * rb.norm()));
            }
            P::LineCircleTangent { wp, line, curve } => {
                let wp = Some(h(wp));
                let c = self.pos(self.center(h(curve)), wp);
                let (a, b) = self.line(h(line), wp);
                let d = b - a;
                out.push(cross2(&d, &(c - a)).abs() / safe(d.norm()) - self.radius(h(curve)));
            }
            P::CircleCircleTangent { a, b, internal } => {
                let distance = (self.world(self.center(h(a))) - self.world(self.center(h(b)))).norm();
                let (ra, rb) = (self.radius(h(a)), self.radius(h(b)));
                let target = if *internal { (ra - rb).abs() } else { ra + rb };
                out.push(distance - target);
            }
            P::WhereDragged { .. } => {}
        }
    }
}

impl NativeSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn push_param(&mut self, group: GroupId, value: f64) -> usize {
        self.params.push(Param { group, value });
        self.params.len() - 1
    }

    fn push_element(&mut self, group: GroupId, element: Element) -> EntityHandle {
        self.elements.push((group, element));
        EntityHandle(self.elements.len() as u32 - 1)
    }

    fn element(&self, handle: EntityHandle) -> Result<Element, SolverError> {
        self.elements
            .get(handle.0 as usize)
            .map(|(_, e)| *e)
            .ok_or(SolverError::InvalidHandle {
                what: "entity",
                handle: handle.0,
            })
    }

    fn expect(
        &self,
        handle: EntityHandle,
        expected: &'static str,
        accept: impl Fn(&Element) -> bool,
    ) -> Result<(), SolverError> {
        if accept(&self.element(handle)?) {
            Ok(())
        } else {
            Err(SolverError::WrongEntityType {
                handle: handle.0,
                expected,
            })
        }
    }

    fn expect_point(&self, handle: EntityHandle) -> Result<(), SolverError> {
        self.expect(handle, "point", |e| {
            matches!(e, Element::Point3 { .. } | Element::Point2 { .. })
        })
    }

    fn expect_workplane(&self, handle: EntityHandle) -> Result<(), SolverError> {
        self.expect(handle, "workplane", |e| matches!(e, Element::Workplane { .. }))
    }

    fn expect_line(&self, handle: EntityHandle) -> Result<(), SolverError> {
        self.expect(handle, "line segment", |e| matches!(e, Element::Line { .. }))
    }

    fn expect_curve(&self, handle: EntityHandle) -> Result<(), SolverError> {
        self.expect(handle, "circle or arc", |e| {
            matches!(e, Element::Circle { .. } | Element::Arc { .. })
        })
    }

    fn expect_arc(&self, handle: EntityHandle) -> Result<(), SolverError> {
        self.expect(handle, "arc", |e| matches!(e, Element::Arc { .. }))
    }

    fn expect_optional_workplane(&self, wp: Option<EntityHandle>) -> Result<(), SolverError> {
        wp.map_or(Ok(()), |wp| self.expect_workplane(wp))
    }

    fn check_primitive(&self, primitive: &ConstraintPrimitive) -> Result<(), SolverError> {
        use ConstraintPrimitive as P;
        match primitive {
            P::PointsCoincident { a, b, wp } | P::PtPtDistance { a, b, wp, .. } => {
                self.expect_point(*a)?;
                self.expect_point(*b)?;
                self.expect_optional_workplane(*wp)
            }
            P::PtLineDistance { point, line, wp, .. }
            | P::PtOnLine { point, line, wp }
            | P::AtMidpoint { point, line, wp } => {
                self.expect_point(*point)?;
                self.expect_line(*line)?;
                self.expect_optional_workplane(*wp)
            }
            P::PtPlaneDistance { point, plane, .. } | P::PtInPlane { point, plane } => {
                self.expect_point(*point)?;
                self.expect_workplane(*plane)
            }
            P::PtOnCircle { point, curve } => {
                self.expect_point(*point)?;
                self.expect_curve(*curve)
            }
            P::EqualLengthLines { a, b, wp }
            | P::LengthRatio { a, b, wp, .. }
            | P::Parallel { a, b, wp }
            | P::Perpendicular { a, b, wp }
            | P::Angle { a, b, wp, .. } => {
                self.expect_line(*a)?;
                self.expect_line(*b)?;
                self.expect_optional_workplane(*wp)
            }
            P::EqualRadius { a, b } | P::CircleCircleTangent { a, b, .. } => {
                self.expect_curve(*a)?;
                self.expect_curve(*b)
            }
            P::Horizontal { wp, a, b } | P::Vertical { wp, a, b } => {
                self.expect_workplane(*wp)?;
                self.expect_point(*a)?;
                self.expect_point(*b)
            }
            P::Diameter { curve, .. } => self.expect_curve(*curve),
            P::ArcLineTangent { wp, arc, line, .. } => {
                self.expect_workplane(*wp)?;
                self.expect_arc(*arc)?;
                self.expect_line(*line)
            }
            P::CurveCurveTangent { wp, a, b, .. } => {
                self.expect_workplane(*wp)?;
                self.expect_arc(*a)?;
                self.expect_arc(*b)
            }
            P::LineCircleTangent { wp, line, curve } => {
                self.expect_workplane(*wp)?;
                self.expect_line(*line)?;
                self.expect_curve(*curve)
            }
            P::WhereDragged { point, wp } => {
                self.expect_point(*point)?;
                self.expect_optional_workplane(*wp)
            }
        }
    }

    fn point_params(&self, point: EntityHandle) -> Vec<usize> {
        match self.elements.get(point.0 as usize).map(|(_, e)| *e) {
            Some(Element::Point3 { params }) => params.to_vec(),
            Some(Element::Point2 { params, .. }) => params.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Residual vector of `group` at `x`, with the constraint owning each row
    /// (`None` for the implicit equal-radius row of an arc).
    fn evaluate(&self, x: &[f64], group: GroupId) -> (Vec<f64>, Vec<Option<usize>>) {
        let eval = Eval {
            elements: &self.elements,
            x,
        };
        let mut residuals = Vec::new();
        let mut owners = Vec::new();
        for (index, (g, primitive)) in self.constraints.iter().enumerate() {
            if *g != group {
                continue;
            }
            let before = residuals.len();
            eval.push_residuals(primitive, &mut residuals);
            owners.resize(residuals.len(), Some(index));
            debug_assert!(owners.len() >= before);
        }
        for (g, element) in &self.elements {
            if let (true, Element::Arc { center, start, end }) = (*g == group, element) {
                let c = eval.world(*center);
                residuals.push((eval.world(*end) - c).norm() - (eval.world(*start) - c).norm());
                owners.push(None);
            }
        }
        (residuals, owners)
    }

    fn jacobian(&self, x: &[f64], group: GroupId, free: &[usize], rows: usize) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(rows, free.len());
        let mut probe = x.to_vec();
        for (col, &p) in free.iter().enumerate() {
            let step = self.config.finite_difference_step * x[p].abs().max(1.0);
            probe[p] = x[p] + step;
            let (plus, _) = self.evaluate(&probe, group);
            probe[p] = x[p] - step;
            let (minus, _) = self.evaluate(&probe, group);
            probe[p] = x[p];
            for row in 0..rows {
                jac[(row, col)] = (plus[row] - minus[row]) / (2.0 * step);
            }
        }
        jac
    }

    fn rank(&self, jac: DMatrix<f64>) -> usize {
        let singular = jac.singular_values();
        let largest = singular.max();
        if largest <= 0.0 {
            return 0;
        }
        singular
            .iter()
            .filter(|s| **s > largest * self.config.rank_threshold)
            .count()
    }
}

impl SolverBackend for NativeSolver {
    fn add_point_3d(&mut self, group: GroupId, coords: [f64; 3]) -> Result<EntityHandle, SolverError> {
        let params = coords.map(|c| self.push_param(group, c));
        Ok(self.push_element(group, Element::Point3 { params }))
    }

    fn add_point_2d(
        &mut self,
        group: GroupId,
        wp: EntityHandle,
        coords: [f64; 2],
    ) -> Result<EntityHandle, SolverError> {
        self.expect_workplane(wp)?;
        let params = coords.map(|c| self.push_param(group, c));
        Ok(self.push_element(
            group,
            Element::Point2 {
                wp: wp.0 as usize,
                params,
            },
        ))
    }

    fn add_normal_3d(
        &mut self,
        group: GroupId,
        orientation: UnitQuaternion<f64>,
    ) -> Result<EntityHandle, SolverError> {
        let q = orientation.into_inner();
        let params = [q.w, q.i, q.j, q.k].map(|c| self.push_param(group, c));
        Ok(self.push_element(group, Element::Normal3 { params }))
    }

    fn add_normal_2d(&mut self, group: GroupId, wp: EntityHandle) -> Result<EntityHandle, SolverError> {
        self.expect_workplane(wp)?;
        Ok(self.push_element(group, Element::Normal2 { wp: wp.0 as usize }))
    }

    fn add_distance(
        &mut self,
        group: GroupId,
        wp: Option<EntityHandle>,
        value: f64,
    ) -> Result<EntityHandle, SolverError> {
        self.expect_optional_workplane(wp)?;
        let param = self.push_param(group, value);
        Ok(self.push_element(group, Element::Distance { param }))
    }

    fn add_workplane(
        &mut self,
        group: GroupId,
        origin: EntityHandle,
        normal: EntityHandle,
    ) -> Result<EntityHandle, SolverError> {
        self.expect(origin, "3D point", |e| matches!(e, Element::Point3 { .. }))?;
        self.expect(normal, "3D normal", |e| matches!(e, Element::Normal3 { .. }))?;
        Ok(self.push_element(
            group,
            Element::Workplane {
                origin: origin.0 as usize,
                normal: normal.0 as usize,
            },
        ))
    }

    fn add_line_segment(
        &mut self,
        group: GroupId,
        wp: Option<EntityHandle>,
        a: EntityHandle,
        b: EntityHandle,
    ) -> Result<EntityHandle, SolverError> {
        self.expect_optional_workplane(wp)?;
        self.expect_point(a)?;
        self.expect_point(b)?;
        Ok(self.push_element(
            group,
            Element::Line {
                a: a.0 as usize,
                b: b.0 as usize,
            },
        ))
    }

    fn add_circle(
        &mut self,
        group: GroupId,
        wp: Option<EntityHandle>,
        normal: EntityHandle,
        center: EntityHandle,
        radius: EntityHandle,
    ) -> Result<EntityHandle, SolverError> {
        self.expect_optional_workplane(wp)?;
        self.expect(normal, "normal", |e| {
            matches!(e, Element::Normal3 { .. } | Element::Normal2 { .. })
        })?;
        self.expect_point(center)?;
        self.expect(radius, "distance", |e| matches!(e, Element::Distance { .. }))?;
        Ok(self.push_element(
            group,
            Element::Circle {
                center: center.0 as usize,
                radius: radius.0 as usize,
            },
        ))
    }

    fn add_arc_of_circle(
        &mut self,
        group: GroupId,
        wp: EntityHandle,
        normal: EntityHandle,
        center: EntityHandle,
        start: EntityHandle,
        end: EntityHandle,
    ) -> Result<EntityHandle, SolverError> {
        self.expect_workplane(wp)?;
        self.expect(normal, "normal", |e| {
            matches!(e, Element::Normal3 { .. } | Element::Normal2 { .. })
        })?;
        for point in [center, start, end] {
            self.expect_point(point)?;
        }
        Ok(self.push_element(
            group,
            Element::Arc {
                center: center.0 as usize,
                start: start.0 as usize,
                end: end.0 as usize,
            },
        ))
    }

    fn add_constraint(
        &mut self,
        group: GroupId,
        constraint: ConstraintPrimitive,
    ) -> Result<ConstraintHandle, SolverError> {
        self.check_primitive(&constraint)?;
        self.constraints.push((group, constraint));
        Ok(ConstraintHandle(self.constraints.len() as u32 - 1))
    }

    #[instrument(skip(self), fields(group = group.0))]
    fn solve(&mut self, group: GroupId) -> i32 {
        self.failed.clear();

        let pinned: HashSet<usize> = self
            .constraints
            .iter()
            .filter(|(g, _)| *g == group)
            .filter_map(|(_, c)| match c {
                ConstraintPrimitive::WhereDragged { point, .. } => Some(self.point_params(*point)),
                _ => None,
            })
            .flatten()
            .collect();
        let free: Vec<usize> = (0..self.params.len())
            .filter(|p| self.params[*p].group == group && !pinned.contains(p))
            .collect();

        if free.len() > self.config.max_unknowns {
            self.dof = free.len() as i32;
            return SolveStatus::TooManyUnknowns.code();
        }

        let mut x: Vec<f64> = self.params.iter().map(|p| p.value).collect();
        let (mut residuals, owners) = self.evaluate(&x, group);
        let rows = residuals.len();
        if rows == 0 {
            self.dof = free.len() as i32;
            return SolveStatus::Okay.code();
        }

        let mut iterations = 0;
        while iterations < self.config.max_iterations
            && max_abs(&residuals) >= self.config.tolerance
            && !free.is_empty()
        {
            iterations += 1;
            let svd = self.jacobian(&x, group, &free, rows).svd(true, true);
            let eps = svd.singular_values.max() * self.config.rank_threshold;
            let rhs = -DVector::from_column_slice(&residuals);
            let Ok(step) = svd.solve(&rhs, eps) else {
                break;
            };

            let current = norm(&residuals);
            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..20 {
                let mut trial = x.clone();
                for (k, &p) in free.iter().enumerate() {
                    trial[p] += alpha * step[k];
                }
                let (trial_residuals, _) = self.evaluate(&trial, group);
                if norm(&trial_residuals) < current {
                    accepted = Some((trial, trial_residuals));
                    break;
                }
                alpha *= 0.5;
            }
            match accepted {
                Some((trial, trial_residuals)) => {
                    x = trial;
                    residuals = trial_residuals;
                }
                None => break,
            }
        }

        let converged = max_abs(&residuals) < self.config.tolerance;
        let rank = if free.is_empty() {
            0
        } else {
            self.rank(self.jacobian(&x, group, &free, rows))
        };
        self.dof = (free.len() - rank.min(free.len())) as i32;
        debug!(iterations, rows, unknowns = free.len(), rank, converged, "native solve finished");

        if converged {
            for &p in &free {
                self.params[p].value = x[p];
            }
            return SolveStatus::Okay.code();
        }

        let mut failed: Vec<ConstraintHandle> = residuals
            .iter()
            .zip(&owners)
            .filter(|(r, _)| r.abs() >= self.config.tolerance)
            .filter_map(|(_, owner)| owner.map(|c| ConstraintHandle(c as u32)))
            .collect();
        failed.dedup();
        self.failed = failed;

        if rank < rows {
            SolveStatus::Inconsistent.code()
        } else {
            SolveStatus::DidntConverge.code()
        }
    }

    fn params(&self, entity: EntityHandle) -> Result<Vec<ParamHandle>, SolverError> {
        let params = match self.element(entity)? {
            Element::Point3 { params } => params.to_vec(),
            Element::Point2 { params, .. } => params.to_vec(),
            Element::Normal3 { params } => params.to_vec(),
            Element::Distance { param } => vec![param],
            _ => Vec::new(),
        };
        Ok(params.into_iter().map(|p| ParamHandle(p as u32)).collect())
    }

    fn get_param_value(&self, param: ParamHandle) -> Result<f64, SolverError> {
        self.params
            .get(param.0 as usize)
            .map(|p| p.value)
            .ok_or(SolverError::InvalidHandle {
                what: "param",
                handle: param.0,
            })
    }

    fn dof(&self) -> i32 {
        self.dof
    }

    fn failed_constraints(&self) -> Vec<ConstraintHandle> {
        self.failed.clone()
    }

    fn clear(&mut self) {
        self.params.clear();
        self.elements.clear();
        self.constraints.clear();
        self.dof = 0;
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn xy_plane(solver: &mut NativeSolver) -> EntityHandle {
        let origin = solver.add_point_3d(GroupId::FIXED, [0.0, 0.0, 0.0]).unwrap();
        let normal = solver
            .add_normal_3d(GroupId::FIXED, UnitQuaternion::identity())
            .unwrap();
        solver.add_workplane(GroupId::FIXED, origin, normal).unwrap()
    }

    fn coords(solver: &NativeSolver, point: EntityHandle) -> Vec<f64> {
        solver
            .params(point)
            .unwrap()
            .into_iter()
            .map(|p| solver.get_param_value(p).unwrap())
            .collect()
    }

    #[test]
    fn horizontal_line_levels_endpoints() {
        let mut solver = NativeSolver::new();
        let wp = xy_plane(&mut solver);
        let a = solver.add_point_2d(GroupId::FIXED, wp, [0.0, 0.0]).unwrap();
        let b = solver.add_point_2d(GroupId::ACTIVE, wp, [10.0, 5.0]).unwrap();
        solver
            .add_constraint(GroupId::ACTIVE, ConstraintPrimitive::Horizontal { wp, a, b })
            .unwrap();

        assert_eq!(solver.solve(GroupId::ACTIVE), 0);
        let b = coords(&solver, b);
        assert_relative_eq!(b[1], 0.0, epsilon = 1e-9);
        // minimum-norm step leaves x alone
        assert_relative_eq!(b[0], 10.0, epsilon = 1e-9);
        assert_eq!(solver.dof(), 1);
    }

    #[test]
    fn distance_reaches_target() {
        let mut solver = NativeSolver::new();
        let wp = xy_plane(&mut solver);
        let a = solver.add_point_2d(GroupId::FIXED, wp, [0.0, 0.0]).unwrap();
        let b = solver.add_point_2d(GroupId::ACTIVE, wp, [3.0, 4.0]).unwrap();
        solver
            .add_constraint(
                GroupId::ACTIVE,
                ConstraintPrimitive::PtPtDistance {
                    a,
                    b,
                    wp: Some(wp),
                    value: 10.0,
                },
            )
            .unwrap();
        assert_eq!(solver.solve(GroupId::ACTIVE), 0);
        let b = coords(&solver, b);
        assert_relative_eq!((b[0] * b[0] + b[1] * b[1]).sqrt(), 10.0, epsilon = 1e-8);
    }

    #[test]
    fn contradictory_distances_are_inconsistent() {
        let mut solver = NativeSolver::new();
        let wp = xy_plane(&mut solver);
        let a = solver.add_point_2d(GroupId::FIXED, wp, [0.0, 0.0]).unwrap();
        let b = solver.add_point_2d(GroupId::ACTIVE, wp, [3.0, 4.0]).unwrap();
        for value in [5.0, 7.0] {
            solver
                .add_constraint(
                    GroupId::ACTIVE,
                    ConstraintPrimitive::PtPtDistance {
                        a,
                        b,
                        wp: Some(wp),
                        value,
                    },
                )
                .unwrap();
        }
        assert_eq!(solver.solve(GroupId::ACTIVE), SolveStatus::Inconsistent.code());
        assert!(!solver.failed_constraints().is_empty());
        // nothing written back
        assert_eq!(coords(&solver, b), vec![3.0, 4.0]);
    }

    #[test]
    fn where_dragged_pins_the_point() {
        let mut solver = NativeSolver::new();
        let wp = xy_plane(&mut solver);
        let a = solver.add_point_2d(GroupId::ACTIVE, wp, [0.0, 0.0]).unwrap();
        let b = solver.add_point_2d(GroupId::ACTIVE, wp, [4.0, 3.0]).unwrap();
        solver
            .add_constraint(GroupId::ACTIVE, ConstraintPrimitive::WhereDragged { point: b, wp: Some(wp) })
            .unwrap();
        solver
            .add_constraint(GroupId::ACTIVE, ConstraintPrimitive::Horizontal { wp, a, b })
            .unwrap();
        assert_eq!(solver.solve(GroupId::ACTIVE), 0);
        assert_eq!(coords(&solver, b), vec![4.0, 3.0]);
        assert_relative_eq!(coords(&solver, a)[1], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn too_many_unknowns() {
        let mut solver = NativeSolver::with_config(SolverConfig {
            max_unknowns: 1,
            ..SolverConfig::default()
        });
        solver.add_point_3d(GroupId::ACTIVE, [0.0; 3]).unwrap();
        assert_eq!(solver.solve(GroupId::ACTIVE), SolveStatus::TooManyUnknowns.code());
    }

    #[test]
    fn invalid_handles_are_reported() {
        let mut solver = NativeSolver::new();
        let point = solver.add_point_3d(GroupId::FIXED, [0.0; 3]).unwrap();
        assert!(matches!(
            solver.add_point_2d(GroupId::ACTIVE, point, [0.0, 0.0]),
            Err(SolverError::WrongEntityType { .. })
        ));
        assert!(matches!(
            solver.get_param_value(ParamHandle(99)),
            Err(SolverError::InvalidHandle { .. })
        ));
    }

    proptest! {
        #[test]
        fn distance_converges_from_any_start(
            x in -50.0f64..50.0,
            y in -50.0f64..50.0,
            target in 0.5f64..80.0,
        ) {
            prop_assume!(x.hypot(y) > 0.1);
            let mut solver = NativeSolver::new();
            let wp = xy_plane(&mut solver);
            let a = solver.add_point_2d(GroupId::FIXED, wp, [0.0, 0.0]).unwrap();
            let b = solver.add_point_2d(GroupId::ACTIVE, wp, [x, y]).unwrap();
            solver
                .add_constraint(
                    GroupId::ACTIVE,
                    ConstraintPrimitive::PtPtDistance { a, b, wp: Some(wp), value: target },
                )
                .unwrap();
            prop_assert_eq!(solver.solve(GroupId::ACTIVE), 0);
            let b = coords(&solver, b);
            prop_assert!((b[0].hypot(b[1]) - target).abs() < 1e-6);
        }
    }
}
