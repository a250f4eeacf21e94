use nalgebra::{Point3, UnitQuaternion, Vector2, Vector3};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::constraint::{Constraint, ConstraintData};
use crate::constraint_store::ConstraintStore;
use crate::dependency::DependencyResolver;
use crate::entity::*;
use crate::error::{SketchError, SketchResult};
use crate::geometry::{sketch_placement, workplane_placement, CurveLike, PointLike};
use crate::index::{ConstraintIndex, ElementRef, EntityIndex};
use crate::store::{EntityStore, Relocation};
use crate::tolerance::Tolerance;

// ── Selection ───────────────────────────────────────────────────────────────

/// Per-document selection and hover state, kept in sync with removals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    entities: Vec<EntityIndex>,
    constraints: Vec<ConstraintIndex>,
    hovered: Option<ElementRef>,
}

impl SelectionState {
    pub fn select(&mut self, element: impl Into<ElementRef>) {
        match element.into() {
            ElementRef::Entity(index) if !self.entities.contains(&index) => self.entities.push(index),
            ElementRef::Constraint(index) if !self.constraints.contains(&index) => {
                self.constraints.push(index)
            }
            _ => {}
        }
    }

    pub fn deselect(&mut self, element: impl Into<ElementRef>) {
        match element.into() {
            ElementRef::Entity(index) => self.entities.retain(|i| *i != index),
            ElementRef::Constraint(index) => self.constraints.retain(|i| *i != index),
        }
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.constraints.clear();
    }

    pub fn is_selected(&self, element: impl Into<ElementRef>) -> bool {
        match element.into() {
            ElementRef::Entity(index) => self.entities.contains(&index),
            ElementRef::Constraint(index) => self.constraints.contains(&index),
        }
    }

    pub fn entities(&self) -> &[EntityIndex] {
        &self.entities
    }

    pub fn constraints(&self) -> &[ConstraintIndex] {
        &self.constraints
    }

    pub fn hovered(&self) -> Option<ElementRef> {
        self.hovered
    }

    pub fn set_hovered(&mut self, element: Option<ElementRef>) {
        self.hovered = element;
    }

    fn relocate_entity(&mut self, relocation: &Relocation<EntityIndex>) {
        self.entities = self
            .entities
            .iter()
            .filter_map(|i| relocation.apply(*i))
            .collect();
        if let Some(ElementRef::Entity(index)) = self.hovered {
            self.hovered = relocation.apply(index).map(ElementRef::Entity);
        }
    }

    fn relocate_constraint(&mut self, relocation: &Relocation<ConstraintIndex>) {
        self.constraints = self
            .constraints
            .iter()
            .filter_map(|i| relocation.apply(*i))
            .collect();
        if let Some(ElementRef::Constraint(index)) = self.hovered {
            self.hovered = relocation.apply(index).map(ElementRef::Constraint);
        }
    }
}

// ── Document ────────────────────────────────────────────────────────────────

/// Global helper geometry: the origin point, three axis normals and the
/// XY / XZ / YZ workplanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginElements {
    pub point: EntityIndex,
    pub normals: [EntityIndex; 3],
    pub workplanes: [EntityIndex; 3],
}

/// One editable sketch document: both stores plus per-document UI state.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub entities: EntityStore,
    pub constraints: ConstraintStore,
    pub selection: SelectionState,
    pub active_sketch: Option<EntityIndex>,
    pub tolerance: Tolerance,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            entities: EntityStore::new(),
            constraints: ConstraintStore::new(),
            selection: SelectionState::default(),
            active_sketch: None,
            tolerance: Tolerance::default(),
        }
    }

    pub fn resolver(&self) -> DependencyResolver<'_> {
        DependencyResolver::new(&self.entities, &self.constraints)
    }

    pub fn is_dirty(&self, element: impl Into<ElementRef>) -> bool {
        self.resolver().is_dirty(element.into())
    }

    /// Set the element's own dirty flag. Dependents observe it through
    /// [`Document::is_dirty`].
    pub fn mark_dirty(&mut self, element: impl Into<ElementRef>) {
        match element.into() {
            ElementRef::Entity(index) => {
                if let Some(entity) = self.entities.get_mut(index) {
                    entity.base_mut().dirty = true;
                }
            }
            ElementRef::Constraint(index) => {
                if let Some(constraint) = self.constraints.get_mut(index) {
                    constraint.dirty = true;
                }
            }
        }
    }

    pub fn set_active_sketch(&mut self, sketch: Option<EntityIndex>) -> SketchResult<()> {
        if let Some(sketch) = sketch {
            self.entities.require_kind(sketch, &[EntityKind::Sketch])?;
        }
        self.active_sketch = sketch;
        Ok(())
    }

    // ── Removal ────────────────────────────────────────────────────────────

    /// Remove one entity. Refused while anything depends on it.
    #[instrument(skip(self), fields(%index))]
    pub fn remove_entity(&mut self, index: EntityIndex) -> SketchResult<()> {
        self.remove_entity_relocating(index).map(|_| ())
    }

    pub fn remove_constraint(&mut self, index: ConstraintIndex) -> SketchResult<()> {
        self.remove_constraint_relocating(index).map(|_| ())
    }

    /// Remove `index` and everything that transitively depends on it.
    #[instrument(skip(self), fields(%index))]
    pub fn remove_entity_cascade(&mut self, index: EntityIndex) -> SketchResult<()> {
        if !self.entities.contains(index) {
            return Err(SketchError::MissingEntity { index });
        }
        let mut pending = self.resolver().transitive_dependents(index);
        pending.push(index.into());
        info!(count = pending.len(), "cascading removal");
        self.remove_all(pending)
    }

    /// Remove a sketch with its constraints and owned entities.
    pub fn remove_sketch(&mut self, sketch: EntityIndex) -> SketchResult<()> {
        self.entities.require_kind(sketch, &[EntityKind::Sketch])?;
        self.remove_entity_cascade(sketch)
    }

    fn remove_entity_relocating(&mut self, index: EntityIndex) -> SketchResult<Relocation<EntityIndex>> {
        if !self.entities.contains(index) {
            return Err(SketchError::MissingEntity { index });
        }
        let dependents = self.resolver().dependents(index);
        if !dependents.is_empty() {
            return Err(SketchError::ReferentialIntegrityViolation {
                element: index.into(),
                dependents,
            });
        }

        let relocation = self.entities.swap_remove(index)?;
        for constraint in self.constraints.iter_mut() {
            constraint.remap_references(|i| relocation.apply(i).unwrap_or(EntityIndex::NONE));
        }
        self.active_sketch = self.active_sketch.and_then(|s| relocation.apply(s));
        self.selection.relocate_entity(&relocation);
        Ok(relocation)
    }

    fn remove_constraint_relocating(
        &mut self,
        index: ConstraintIndex,
    ) -> SketchResult<Relocation<ConstraintIndex>> {
        let relocation = self.constraints.swap_remove(index)?;
        self.selection.relocate_constraint(&relocation);
        Ok(relocation)
    }

    /// Remove a batch of elements: constraints first, then entities in an
    /// order where nothing left behind depends on a removed one.
    fn remove_all(&mut self, mut pending: Vec<ElementRef>) -> SketchResult<()> {
        pending.sort_by_key(|e| matches!(e, ElementRef::Entity(_)));
        pending.dedup();
        while !pending.is_empty() {
            let resolver = self.resolver();
            let position = pending
                .iter()
                .position(|e| match e {
                    ElementRef::Constraint(_) => true,
                    ElementRef::Entity(index) => resolver.dependents(*index).is_empty(),
                })
                .ok_or_else(|| SketchError::configuration("cyclic dependencies between entities"))?;
            match pending.remove(position) {
                ElementRef::Entity(index) => {
                    let relocation = self.remove_entity_relocating(index)?;
                    for element in pending.iter_mut() {
                        if let ElementRef::Entity(i) = element {
                            *i = relocation.apply(*i).unwrap_or(EntityIndex::NONE);
                        }
                    }
                }
                ElementRef::Constraint(index) => {
                    let relocation = self.remove_constraint_relocating(index)?;
                    for element in pending.iter_mut() {
                        if let ElementRef::Constraint(i) = element {
                            *i = relocation.apply(*i).unwrap_or(ConstraintIndex::NONE);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ── Helper geometry ────────────────────────────────────────────────────

    /// Fixed origin point of `sketch`, created on first use.
    pub fn sketch_origin(&mut self, sketch: EntityIndex) -> SketchResult<EntityIndex> {
        if let Some(existing) = self.entities.get_as::<Sketch>(sketch)?.origin_point {
            if self.entities.contains(existing) {
                return Ok(existing);
            }
        }
        let point = self.entities.add_point_2d(Vector2::zeros(), sketch)?;
        let helper = self.entities.get_as_mut::<Point2D>(point)?;
        helper.base.fixed = true;
        helper.base.origin = true;
        self.entities.get_as_mut::<Sketch>(sketch)?.origin_point = Some(point);
        debug!(%sketch, %point, "sketch origin created");
        Ok(point)
    }

    /// Existing global origin elements, if a previous call created them.
    pub fn origin_elements(&self) -> Option<OriginElements> {
        let origin = |e: &&Entity| e.base().origin;
        let point = self.entities.bucket(EntityKind::Point3D).iter().find(origin)?.index();
        let normals: Vec<_> = self
            .entities
            .bucket(EntityKind::Normal3D)
            .iter()
            .filter(origin)
            .map(Entity::index)
            .collect();
        let workplanes: Vec<_> = self
            .entities
            .bucket(EntityKind::Workplane)
            .iter()
            .filter(origin)
            .map(Entity::index)
            .collect();
        Some(OriginElements {
            point,
            normals: normals.try_into().ok()?,
            workplanes: workplanes.try_into().ok()?,
        })
    }

    /// Create the global origin point, axis normals and base workplanes
    /// unless they already exist.
    pub fn ensure_origin_elements(&mut self) -> SketchResult<OriginElements> {
        if let Some(existing) = self.origin_elements() {
            return Ok(existing);
        }
        let point = self.entities.add_point_3d(Vector3::zeros())?;
        let orientations = [
            UnitQuaternion::identity(),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::FRAC_PI_2),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2),
        ];
        let names = ["XY", "XZ", "YZ"];
        let mut normals = [EntityIndex::NONE; 3];
        let mut workplanes = [EntityIndex::NONE; 3];
        for (i, orientation) in orientations.into_iter().enumerate() {
            normals[i] = self.entities.add_normal_3d(orientation)?;
            workplanes[i] = self.entities.add_workplane(point, normals[i])?;
        }
        for (i, index) in std::iter::once(point)
            .chain(normals)
            .chain(workplanes)
            .enumerate()
        {
            if let Some(entity) = self.entities.get_mut(index) {
                let base = entity.base_mut();
                base.fixed = true;
                base.origin = true;
                if i >= 4 {
                    base.name = names[i - 4].to_string();
                }
            }
        }
        info!("origin elements created");
        Ok(OriginElements {
            point,
            normals,
            workplanes,
        })
    }

    // ── Constraints ────────────────────────────────────────────────────────

    /// Validate and store a constraint.
    pub fn add_constraint(
        &mut self,
        data: ConstraintData,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.constraints
            .add(Constraint::new(data, sketch), &self.entities)
    }

    pub fn add_coincident(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Coincident { entity1, entity2 }, sketch)
    }

    pub fn add_equal(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Equal { entity1, entity2 }, sketch)
    }

    /// Distance constraint; `value` defaults to the current distance.
    pub fn add_distance(
        &mut self,
        entity1: EntityIndex,
        entity2: Option<EntityIndex>,
        value: Option<f64>,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        let value = match value {
            Some(v) => v,
            None => self.measure_distance(entity1, entity2)?,
        };
        let flip = self.on_negative_side(entity1, entity2, sketch)?;
        self.add_constraint(
            ConstraintData::Distance {
                entity1,
                entity2,
                value,
                flip,
            },
            sketch,
        )
    }

    /// Angle constraint in radians; `value` defaults to the current angle.
    pub fn add_angle(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        value: Option<f64>,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        let value = match value {
            Some(v) => v,
            None => self.measure_angle(entity1, entity2)?,
        };
        self.add_constraint(
            ConstraintData::Angle {
                entity1,
                entity2,
                value,
                supplementary: false,
            },
            sketch,
        )
    }

    pub fn add_diameter(
        &mut self,
        entity1: EntityIndex,
        value: Option<f64>,
        use_radius: bool,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        let value = match value {
            Some(v) => v,
            None => {
                let radius = self.measure_radius(entity1)?;
                if use_radius {
                    radius
                } else {
                    2.0 * radius
                }
            }
        };
        self.add_constraint(
            ConstraintData::Diameter {
                entity1,
                value,
                use_radius,
            },
            sketch,
        )
    }

    pub fn add_parallel(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Parallel { entity1, entity2 }, sketch)
    }

    pub fn add_horizontal(
        &mut self,
        entity1: EntityIndex,
        entity2: Option<EntityIndex>,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Horizontal { entity1, entity2 }, sketch)
    }

    pub fn add_vertical(
        &mut self,
        entity1: EntityIndex,
        entity2: Option<EntityIndex>,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Vertical { entity1, entity2 }, sketch)
    }

    pub fn add_tangent(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Tangent { entity1, entity2 }, sketch)
    }

    pub fn add_midpoint(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Midpoint { entity1, entity2 }, sketch)
    }

    pub fn add_perpendicular(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        self.add_constraint(ConstraintData::Perpendicular { entity1, entity2 }, sketch)
    }

    /// Length ratio `|entity1| / |entity2|`; defaults to the current ratio.
    pub fn add_ratio(
        &mut self,
        entity1: EntityIndex,
        entity2: EntityIndex,
        value: Option<f64>,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<ConstraintIndex> {
        let value = match value {
            Some(v) => v,
            None => {
                let (a1, b1) = self.line_points(entity1)?;
                let (a2, b2) = self.line_points(entity2)?;
                let denominator = (b2 - a2).norm();
                if self.tolerance.is_zero_length(denominator) {
                    return Err(SketchError::degenerate("ratio against a zero-length line"));
                }
                (b1 - a1).norm() / denominator
            }
        };
        self.add_constraint(
            ConstraintData::Ratio {
                entity1,
                entity2,
                value,
            },
            sketch,
        )
    }

    // ── Measurement ────────────────────────────────────────────────────────

    fn world_point(&self, index: EntityIndex) -> SketchResult<Vector3<f64>> {
        match self.entities.get(index) {
            Some(Entity::Point3D(p)) => p.world_location(&self.entities),
            Some(Entity::Point2D(p)) => p.world_location(&self.entities),
            Some(_) => Err(SketchError::configuration(format!("{index} is not a point"))),
            None => Err(SketchError::MissingEntity { index }),
        }
    }

    fn line_points(&self, index: EntityIndex) -> SketchResult<(Vector3<f64>, Vector3<f64>)> {
        match self.entities.get(index) {
            Some(entity) if entity.kind().is_line() => {
                let points = entity.connection_points();
                Ok((self.world_point(points[0])?, self.world_point(points[1])?))
            }
            Some(_) => Err(SketchError::configuration(format!("{index} is not a line"))),
            None => Err(SketchError::MissingEntity { index }),
        }
    }

    fn measure_distance(&self, entity1: EntityIndex, entity2: Option<EntityIndex>) -> SketchResult<f64> {
        let kind1 = self.entities.kind_of(entity1)?;
        let Some(entity2) = entity2 else {
            let (a, b) = self.line_points(entity1)?;
            return Ok((b - a).norm());
        };
        let kind2 = self.entities.kind_of(entity2)?;
        match (kind1, kind2) {
            (k1, k2) if k1.is_point() && k2.is_point() => {
                Ok((self.world_point(entity2)? - self.world_point(entity1)?).norm())
            }
            (k1, k2) if k1.is_point() && k2.is_line() => self.point_line_distance(entity1, entity2),
            (k1, k2) if k1.is_line() && k2.is_point() => self.point_line_distance(entity2, entity1),
            (EntityKind::Point3D, EntityKind::Workplane) => {
                let placement = workplane_placement(&self.entities, entity2)?;
                let normal = placement.rotation * Vector3::z();
                let p = self.world_point(entity1)?;
                Ok((p - placement.translation.vector).dot(&normal).abs())
            }
            _ => Err(SketchError::configuration(format!(
                "cannot measure a distance between {:?} and {:?}",
                kind1, kind2
            ))),
        }
    }

    /// Whether a point lies right of a sketch line or below a workplane,
    /// where signed distances are negative.
    fn on_negative_side(
        &self,
        entity1: EntityIndex,
        entity2: Option<EntityIndex>,
        sketch: Option<EntityIndex>,
    ) -> SketchResult<bool> {
        let Some(entity2) = entity2 else {
            return Ok(false);
        };
        let (kind1, kind2) = (self.entities.kind_of(entity1)?, self.entities.kind_of(entity2)?);
        match (kind1, kind2, sketch) {
            (EntityKind::Point3D, EntityKind::Workplane, _) => {
                let placement = workplane_placement(&self.entities, entity2)?;
                let normal = placement.rotation * Vector3::z();
                let p = self.world_point(entity1)?;
                Ok((p - placement.translation.vector).dot(&normal) < 0.0)
            }
            (k1, k2, Some(sketch)) if k1.is_point() != k2.is_point() && (k1.is_line() || k2.is_line()) => {
                let (point, line) = if k1.is_point() { (entity1, entity2) } else { (entity2, entity1) };
                let placement = sketch_placement(&self.entities, sketch)?;
                let local = |v: Vector3<f64>| placement.inverse_transform_point(&Point3::from(v)).coords;
                let p = local(self.world_point(point)?);
                let (a, b) = self.line_points(line)?;
                let (a, b) = (local(a), local(b));
                let d = b - a;
                let r = p - a;
                Ok(d.x * r.y - d.y * r.x < 0.0)
            }
            _ => Ok(false),
        }
    }

    fn point_line_distance(&self, point: EntityIndex, line: EntityIndex) -> SketchResult<f64> {
        let p = self.world_point(point)?;
        let (a, b) = self.line_points(line)?;
        let d = b - a;
        let length = d.norm();
        if self.tolerance.is_zero_length(length) {
            return Err(SketchError::degenerate("distance to a zero-length line"));
        }
        Ok((p - a).cross(&d).norm() / length)
    }

    fn measure_angle(&self, entity1: EntityIndex, entity2: EntityIndex) -> SketchResult<f64> {
        let (a1, b1) = self.line_points(entity1)?;
        let (a2, b2) = self.line_points(entity2)?;
        let (d1, d2) = (b1 - a1, b2 - a2);
        let norms = d1.norm() * d2.norm();
        if self.tolerance.is_zero_length(norms) {
            return Err(SketchError::degenerate("angle of a zero-length line"));
        }
        Ok((d1.dot(&d2) / norms).clamp(-1.0, 1.0).acos())
    }

    fn measure_radius(&self, index: EntityIndex) -> SketchResult<f64> {
        match self.entities.get(index) {
            Some(Entity::Arc(arc)) => arc.radius(&self.entities),
            Some(Entity::Circle(circle)) => circle.radius(&self.entities),
            Some(_) => Err(SketchError::configuration(format!("{index} is not a curve"))),
            None => Err(SketchError::MissingEntity { index }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn doc_with_sketch() -> (Document, EntityIndex) {
        let mut doc = Document::new();
        let origin = doc.ensure_origin_elements().unwrap();
        let sketch = doc.entities.add_sketch("Sketch", origin.workplanes[0]).unwrap();
        doc.set_active_sketch(Some(sketch)).unwrap();
        (doc, sketch)
    }

    #[test]
    fn origin_elements_are_created_once() {
        let mut doc = Document::new();
        let first = doc.ensure_origin_elements().unwrap();
        let second = doc.ensure_origin_elements().unwrap();
        assert_eq!(first, second);
        assert_eq!(doc.entities.len(), 7);
        let point = doc.entities.get(first.point).unwrap();
        assert!(point.base().fixed && point.base().origin);
    }

    #[test]
    fn sketch_origin_is_lazy_and_fixed() {
        let (mut doc, sketch) = doc_with_sketch();
        let before = doc.entities.bucket_len(EntityKind::Point2D);
        let origin = doc.sketch_origin(sketch).unwrap();
        assert_eq!(doc.sketch_origin(sketch).unwrap(), origin);
        assert_eq!(doc.entities.bucket_len(EntityKind::Point2D), before + 1);
        assert!(doc.entities.get(origin).unwrap().base().fixed);
    }

    #[test]
    fn measured_values_fill_missing_arguments() {
        let (mut doc, sketch) = doc_with_sketch();
        let a = doc.entities.add_point_2d(Vector2::new(0.0, 0.0), sketch).unwrap();
        let b = doc.entities.add_point_2d(Vector2::new(3.0, 4.0), sketch).unwrap();
        let c = doc.entities.add_point_2d(Vector2::new(0.0, 2.0), sketch).unwrap();
        let l1 = doc.entities.add_line_2d(a, b, sketch).unwrap();
        let l2 = doc.entities.add_line_2d(a, c, sketch).unwrap();

        let distance = doc.add_distance(a, Some(b), None, Some(sketch)).unwrap();
        let ratio = doc.add_ratio(l1, l2, None, Some(sketch)).unwrap();
        let angle = doc.add_angle(l1, l2, None, Some(sketch)).unwrap();

        let value = |i| doc.constraints.get(i).unwrap().data.value().unwrap();
        assert_relative_eq!(value(distance), 5.0);
        assert_relative_eq!(value(ratio), 2.5);
        assert_relative_eq!(value(angle), 0.8f64.acos(), epsilon = 1e-12);
    }

    #[test]
    fn remove_refuses_and_cascade_succeeds() {
        let (mut doc, sketch) = doc_with_sketch();
        let a = doc.entities.add_point_2d(Vector2::new(0.0, 0.0), sketch).unwrap();
        let b = doc.entities.add_point_2d(Vector2::new(1.0, 0.0), sketch).unwrap();
        let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
        doc.add_horizontal(line, None, Some(sketch)).unwrap();

        assert!(matches!(
            doc.remove_entity(a),
            Err(SketchError::ReferentialIntegrityViolation { .. })
        ));
        doc.remove_entity_cascade(a).unwrap();
        assert!(doc.constraints.is_empty());
        assert_eq!(doc.entities.bucket_len(EntityKind::Line2D), 0);
        assert_eq!(doc.entities.bucket_len(EntityKind::Point2D), 1);
    }

    #[test]
    fn selection_follows_relocation() {
        let (mut doc, sketch) = doc_with_sketch();
        let a = doc.entities.add_point_2d(Vector2::new(0.0, 0.0), sketch).unwrap();
        let b = doc.entities.add_point_2d(Vector2::new(1.0, 0.0), sketch).unwrap();
        doc.selection.select(a);
        doc.selection.select(b);
        doc.remove_entity(a).unwrap();
        // b moved into a's slot
        assert_eq!(doc.selection.entities(), &[a]);
        let moved = doc.entities.get_as::<Point2D>(a).unwrap();
        assert_eq!(moved.co, Vector2::new(1.0, 0.0));
    }

    #[test]
    fn remove_sketch_clears_active_sketch() {
        let (mut doc, sketch) = doc_with_sketch();
        let a = doc.entities.add_point_2d(Vector2::new(0.0, 0.0), sketch).unwrap();
        let b = doc.entities.add_point_2d(Vector2::new(1.0, 0.0), sketch).unwrap();
        let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
        doc.add_horizontal(line, None, Some(sketch)).unwrap();
        doc.sketch_origin(sketch).unwrap();

        doc.remove_sketch(sketch).unwrap();
        assert!(doc.active_sketch.is_none());
        assert_eq!(doc.entities.bucket_len(EntityKind::Sketch), 0);
        assert_eq!(doc.entities.bucket_len(EntityKind::Point2D), 0);
        assert!(doc.constraints.is_empty());
        assert!(doc.origin_elements().is_some());
    }
}
