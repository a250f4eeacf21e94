use std::collections::HashMap;

use nalgebra::Point3;
use sketch_model::{
    sketch_placement, ConstraintIndex, Entity, EntityIndex, EntityKind, EntityStore, SketchError,
    SketchResult,
};
use tracing::debug;

use crate::backend::{ConstraintHandle, ConstraintPrimitive, EntityHandle, GroupId, SolverBackend};
use crate::solver::Tweak;

/// Maps document entities onto backend primitives.
/// Holds the backend borrow and every handle created for one solve.
pub struct SolverMapping<'b, B: SolverBackend> {
    pub backend: &'b mut B,
    pub active_sketch: Option<EntityIndex>,
    handles: HashMap<EntityIndex, EntityHandle>,
    radius_handles: HashMap<EntityIndex, EntityHandle>,
    groups: HashMap<EntityIndex, GroupId>,
    pub(crate) constraint_handles: HashMap<ConstraintHandle, ConstraintIndex>,
}

impl<'b, B: SolverBackend> SolverMapping<'b, B> {
    pub fn new(backend: &'b mut B, active_sketch: Option<EntityIndex>) -> Self {
        Self {
            backend,
            active_sketch,
            handles: HashMap::new(),
            radius_handles: HashMap::new(),
            groups: HashMap::new(),
            constraint_handles: HashMap::new(),
        }
    }

    /// Backend handle of a mapped entity. Sketches resolve to their workplane.
    pub fn handle(&self, index: EntityIndex) -> SketchResult<EntityHandle> {
        self.handles
            .get(&index)
            .copied()
            .ok_or(SketchError::MissingEntity { index })
    }

    /// Distance primitive holding a circle's radius.
    pub fn radius_handle(&self, circle: EntityIndex) -> Option<EntityHandle> {
        self.radius_handles.get(&circle).copied()
    }

    pub fn group(&self, index: EntityIndex) -> GroupId {
        self.groups.get(&index).copied().unwrap_or(GroupId::FIXED)
    }

    /// Constraint a backend handle was created for; `None` for helpers.
    pub fn constraint_for(&self, handle: ConstraintHandle) -> Option<ConstraintIndex> {
        self.constraint_handles.get(&handle).copied()
    }

    fn group_for(&self, entity: &Entity) -> GroupId {
        if !entity.base().fixed && entity.is_active(self.active_sketch) {
            GroupId::ACTIVE
        } else {
            GroupId::FIXED
        }
    }

    fn workplane_of(&self, sketch: EntityIndex) -> SketchResult<EntityHandle> {
        self.handle(sketch)
    }

    /// Add every entity of the store. Buckets are visited in kind order, so
    /// each entity's references already have handles when it is reached.
    /// A tweaked point is placed at the tweak position instead of its own.
    pub fn add_entities(&mut self, store: &EntityStore, tweak: Option<&Tweak>) -> SketchResult<()> {
        let tweak = tweak.filter(|t| {
            store
                .get(t.entity)
                .is_some_and(|e| self.group_for(e) == GroupId::ACTIVE)
        });

        for kind in EntityKind::ALL {
            for entity in store.bucket(kind) {
                let group = self.group_for(entity);
                let moved = tweak.filter(|t| t.entity == entity.index());
                let handle = match entity {
                    Entity::Point3D(p) => {
                        let at = moved.map_or(p.location, |t| t.position);
                        self.backend.add_point_3d(group, [at.x, at.y, at.z])?
                    }
                    Entity::Line3D(l) => {
                        let (a, b) = (self.handle(l.p1)?, self.handle(l.p2)?);
                        self.backend.add_line_segment(group, None, a, b)?
                    }
                    Entity::Normal3D(n) => self.backend.add_normal_3d(group, n.orientation)?,
                    Entity::Workplane(w) => {
                        let (origin, normal) = (self.handle(w.p1)?, self.handle(w.nm)?);
                        self.backend.add_workplane(group, origin, normal)?
                    }
                    Entity::Sketch(s) => self.handle(s.wp)?,
                    Entity::Point2D(p) => {
                        let wp = self.workplane_of(p.sketch)?;
                        let co = match moved {
                            Some(t) => {
                                let local = sketch_placement(store, p.sketch)?
                                    .inverse_transform_point(&Point3::from(t.position));
                                [local.x, local.y]
                            }
                            None => [p.co.x, p.co.y],
                        };
                        self.backend.add_point_2d(group, wp, co)?
                    }
                    Entity::Line2D(l) => {
                        let wp = self.workplane_of(l.sketch)?;
                        let (a, b) = (self.handle(l.p1)?, self.handle(l.p2)?);
                        self.backend.add_line_segment(group, Some(wp), a, b)?
                    }
                    Entity::Normal2D(n) => {
                        let wp = self.workplane_of(n.sketch)?;
                        self.backend.add_normal_2d(group, wp)?
                    }
                    Entity::Arc(a) => {
                        let wp = self.workplane_of(a.sketch)?;
                        let normal = self.handle(a.nm)?;
                        let center = self.handle(a.ct)?;
                        let (start, end) = (self.handle(a.start())?, self.handle(a.end())?);
                        self.backend
                            .add_arc_of_circle(group, wp, normal, center, start, end)?
                    }
                    Entity::Circle(c) => {
                        let wp = self.workplane_of(c.sketch)?;
                        let radius = self.backend.add_distance(group, Some(wp), c.radius)?;
                        self.radius_handles.insert(c.base.index, radius);
                        let (normal, center) = (self.handle(c.nm)?, self.handle(c.ct)?);
                        self.backend
                            .add_circle(group, Some(wp), normal, center, radius)?
                    }
                };
                self.handles.insert(entity.index(), handle);
                self.groups.insert(entity.index(), group);
            }
        }

        if let Some(tweak) = tweak {
            self.add_tweak(store, tweak)?;
        }
        debug!(entities = self.handles.len(), "entities mapped");
        Ok(())
    }

    /// Pin the tweaked geometry. Points are pinned directly; segments and
    /// curves get a pinned helper point constrained onto them.
    fn add_tweak(&mut self, store: &EntityStore, tweak: &Tweak) -> SketchResult<()> {
        let entity = store
            .get(tweak.entity)
            .ok_or(SketchError::MissingEntity { index: tweak.entity })?;
        let target = self.handle(tweak.entity)?;
        let group = GroupId::ACTIVE;

        let (point, wp) = match entity {
            Entity::Point3D(_) => (target, None),
            Entity::Point2D(p) => (target, Some(self.workplane_of(p.sketch)?)),
            other => {
                let (Some(sketch), true) = (other.sketch(), other.is_path()) else {
                    debug!(entity = %tweak.entity, "tweak ignored for non-path entity");
                    return Ok(());
                };
                let wp = self.workplane_of(sketch)?;
                let local = sketch_placement(store, sketch)?
                    .inverse_transform_point(&Point3::from(tweak.position));
                let helper = self.backend.add_point_2d(group, wp, [local.x, local.y])?;
                let on = if other.kind() == EntityKind::Line2D {
                    ConstraintPrimitive::PtOnLine {
                        point: helper,
                        line: target,
                        wp: Some(wp),
                    }
                } else {
                    ConstraintPrimitive::PtOnCircle {
                        point: helper,
                        curve: target,
                    }
                };
                self.backend.add_constraint(group, on)?;
                (helper, Some(wp))
            }
        };
        self.backend
            .add_constraint(group, ConstraintPrimitive::WhereDragged { point, wp })?;
        Ok(())
    }
}
