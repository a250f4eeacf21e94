use sketch_model::{
    point_co, Constraint, ConstraintData, ConstraintStore, CurveLike, Entity,
    EntityIndex, EntityKind, EntityStore, SketchError, SketchResult,
};
use tracing::{debug, warn};

use crate::backend::{ConstraintPrimitive, EntityHandle, GroupId, SolverBackend};
use crate::entity_mapping::SolverMapping;

fn kind(store: &EntityStore, index: EntityIndex) -> SketchResult<EntityKind> {
    store.kind_of(index)
}

impl<B: SolverBackend> SolverMapping<'_, B> {
    /// Add every stored constraint. Constraints of the active sketch go into
    /// the solved group, the rest stay fixed. A fixed constraint that cannot
    /// be expressed is skipped so it never blocks the active solve.
    pub fn add_constraints(
        &mut self,
        entities: &EntityStore,
        constraints: &ConstraintStore,
    ) -> SketchResult<()> {
        for (index, constraint) in constraints.all() {
            let active = constraint.is_active(self.active_sketch);
            let group = if active { GroupId::ACTIVE } else { GroupId::FIXED };
            let primitives = match self.primitives(entities, constraint) {
                Ok(primitives) => primitives,
                Err(err) if !active => {
                    warn!(%index, %err, "skipping inactive constraint");
                    continue;
                }
                Err(err) => return Err(err),
            };
            for primitive in primitives {
                let handle = self.backend.add_constraint(group, primitive)?;
                self.constraint_handles.insert(handle, index);
            }
        }
        debug!(constraints = self.constraint_handles.len(), "constraints mapped");
        Ok(())
    }

    /// Backend primitives of a single constraint.
    pub fn primitives(
        &self,
        entities: &EntityStore,
        constraint: &Constraint,
    ) -> SketchResult<Vec<ConstraintPrimitive>> {
        let wp = constraint.sketch.map(|s| self.handle(s)).transpose()?;
        let h = |index: EntityIndex| self.handle(index);

        let primitive = match &constraint.data {
            ConstraintData::Coincident { entity1, entity2 } => {
                let (point, other) = (h(*entity1)?, h(*entity2)?);
                match kind(entities, *entity2)? {
                    k if k.is_point() => ConstraintPrimitive::PointsCoincident {
                        a: point,
                        b: other,
                        wp,
                    },
                    k if k.is_line() => ConstraintPrimitive::PtOnLine {
                        point,
                        line: other,
                        wp,
                    },
                    k if k.is_curve() => ConstraintPrimitive::PtOnCircle {
                        point,
                        curve: other,
                    },
                    EntityKind::Workplane => ConstraintPrimitive::PtInPlane {
                        point,
                        plane: other,
                    },
                    k => return Err(unsupported("coincident", k)),
                }
            }

            ConstraintData::Equal { entity1, entity2 } => {
                let (a, b) = (h(*entity1)?, h(*entity2)?);
                match (kind(entities, *entity1)?, kind(entities, *entity2)?) {
                    (k1, k2) if k1.is_line() && k2.is_line() => {
                        ConstraintPrimitive::EqualLengthLines { a, b, wp }
                    }
                    (k1, k2) if k1.is_curve() && k2.is_curve() => {
                        ConstraintPrimitive::EqualRadius { a, b }
                    }
                    (_, k) => return Err(unsupported("equal", k)),
                }
            }

            ConstraintData::Distance {
                entity1,
                entity2,
                value,
                flip,
            } => {
                let signed = if *flip { -value } else { *value };
                let Some(entity2) = entity2 else {
                    let line = entities.get(*entity1).ok_or(SketchError::MissingEntity { index: *entity1 })?;
                    let points = line.connection_points();
                    if !line.kind().is_line() || points.len() != 2 {
                        return Err(unsupported("distance", line.kind()));
                    }
                    return Ok(vec![ConstraintPrimitive::PtPtDistance {
                        a: h(points[0])?,
                        b: h(points[1])?,
                        wp,
                        value: *value,
                    }]);
                };
                let (k1, k2) = (kind(entities, *entity1)?, kind(entities, *entity2)?);
                let (e1, e2) = (h(*entity1)?, h(*entity2)?);
                match (k1, k2) {
                    (k1, k2) if k1.is_point() && k2.is_point() => ConstraintPrimitive::PtPtDistance {
                        a: e1,
                        b: e2,
                        wp,
                        value: *value,
                    },
                    (k1, k2) if k1.is_point() && k2.is_line() => ConstraintPrimitive::PtLineDistance {
                        point: e1,
                        line: e2,
                        wp,
                        value: signed,
                    },
                    (k1, k2) if k1.is_line() && k2.is_point() => ConstraintPrimitive::PtLineDistance {
                        point: e2,
                        line: e1,
                        wp,
                        value: signed,
                    },
                    (EntityKind::Point3D, EntityKind::Workplane) => {
                        ConstraintPrimitive::PtPlaneDistance {
                            point: e1,
                            plane: e2,
                            value: signed,
                        }
                    }
                    (_, k) => return Err(unsupported("distance", k)),
                }
            }

            ConstraintData::Angle {
                entity1,
                entity2,
                value,
                supplementary,
            } => ConstraintPrimitive::Angle {
                a: h(*entity1)?,
                b: h(*entity2)?,
                wp,
                degrees: value.to_degrees(),
                supplementary: *supplementary,
            },

            ConstraintData::Diameter {
                entity1,
                value,
                use_radius,
            } => ConstraintPrimitive::Diameter {
                curve: h(*entity1)?,
                value: if *use_radius { value * 2.0 } else { *value },
            },

            ConstraintData::Parallel { entity1, entity2 } => ConstraintPrimitive::Parallel {
                a: h(*entity1)?,
                b: h(*entity2)?,
                wp,
            },

            ConstraintData::Perpendicular { entity1, entity2 } => {
                ConstraintPrimitive::Perpendicular {
                    a: h(*entity1)?,
                    b: h(*entity2)?,
                    wp,
                }
            }

            ConstraintData::Horizontal { entity1, entity2 }
            | ConstraintData::Vertical { entity1, entity2 } => {
                let wp = wp.ok_or_else(|| SketchError::configuration("orientation needs a sketch"))?;
                let (a, b) = self.point_pair(entities, *entity1, *entity2)?;
                if matches!(constraint.data, ConstraintData::Horizontal { .. }) {
                    ConstraintPrimitive::Horizontal { wp, a, b }
                } else {
                    ConstraintPrimitive::Vertical { wp, a, b }
                }
            }

            ConstraintData::Tangent { entity1, entity2 } => {
                let wp = wp.ok_or_else(|| SketchError::configuration("tangent needs a sketch"))?;
                self.tangent(entities, wp, *entity1, *entity2)?
            }

            ConstraintData::Midpoint { entity1, entity2 } => {
                let (point, line) = match kind(entities, *entity1)? {
                    k if k.is_point() => (*entity1, *entity2),
                    _ => (*entity2, *entity1),
                };
                ConstraintPrimitive::AtMidpoint {
                    point: h(point)?,
                    line: h(line)?,
                    wp,
                }
            }

            ConstraintData::Ratio {
                entity1,
                entity2,
                value,
            } => ConstraintPrimitive::LengthRatio {
                a: h(*entity1)?,
                b: h(*entity2)?,
                wp,
                value: *value,
            },
        };
        Ok(vec![primitive])
    }

    /// Endpoints of a single line, or two explicit points.
    fn point_pair(
        &self,
        entities: &EntityStore,
        entity1: EntityIndex,
        entity2: Option<EntityIndex>,
    ) -> SketchResult<(EntityHandle, EntityHandle)> {
        if let Some(entity2) = entity2 {
            return Ok((self.handle(entity1)?, self.handle(entity2)?));
        }
        let line = entities
            .get(entity1)
            .ok_or(SketchError::MissingEntity { index: entity1 })?;
        match line.connection_points().as_slice() {
            [p1, p2] if line.kind().is_line() => Ok((self.handle(*p1)?, self.handle(*p2)?)),
            _ => Err(unsupported("horizontal/vertical", line.kind())),
        }
    }

    fn tangent(
        &self,
        entities: &EntityStore,
        wp: EntityHandle,
        entity1: EntityIndex,
        entity2: EntityIndex,
    ) -> SketchResult<ConstraintPrimitive> {
        let get = |index: EntityIndex| entities.get(index).ok_or(SketchError::MissingEntity { index });
        let (first, second) = (get(entity1)?, get(entity2)?);
        // Lines go first.
        let (first, second) = if second.kind().is_line() {
            (second, first)
        } else {
            (first, second)
        };

        Ok(match (first, second) {
            (Entity::Line2D(line), Entity::Arc(arc)) => {
                match shared_endpoint(&[line.p1, line.p2], arc) {
                    Some(at_end) => ConstraintPrimitive::ArcLineTangent {
                        wp,
                        arc: self.handle(arc.base.index)?,
                        line: self.handle(line.base.index)?,
                        at_end,
                    },
                    None => ConstraintPrimitive::LineCircleTangent {
                        wp,
                        line: self.handle(line.base.index)?,
                        curve: self.handle(arc.base.index)?,
                    },
                }
            }
            (Entity::Line2D(line), Entity::Circle(circle)) => ConstraintPrimitive::LineCircleTangent {
                wp,
                line: self.handle(line.base.index)?,
                curve: self.handle(circle.base.index)?,
            },
            (Entity::Arc(a), Entity::Arc(b)) => {
                let shared = [a.p1, a.p2]
                    .into_iter()
                    .find_map(|p| Some((p == a.end(), shared_endpoint(&[p], b)?)));
                match shared {
                    Some((a_at_end, b_at_end)) => ConstraintPrimitive::CurveCurveTangent {
                        wp,
                        a: self.handle(a.base.index)?,
                        b: self.handle(b.base.index)?,
                        a_at_end,
                        b_at_end,
                    },
                    None => self.circle_circle(entities, first, second)?,
                }
            }
            (a, b) if a.kind().is_curve() && b.kind().is_curve() => {
                self.circle_circle(entities, a, b)?
            }
            (_, other) => return Err(unsupported("tangent", other.kind())),
        })
    }

    /// Tangency between two curves without a shared point. Internal when one
    /// centre currently lies inside the other curve.
    fn circle_circle(
        &self,
        entities: &EntityStore,
        a: &Entity,
        b: &Entity,
    ) -> SketchResult<ConstraintPrimitive> {
        let (ca, ra) = curve_geometry(entities, a)?;
        let (cb, rb) = curve_geometry(entities, b)?;
        let distance = (ca - cb).norm();
        Ok(ConstraintPrimitive::CircleCircleTangent {
            a: self.handle(a.index())?,
            b: self.handle(b.index())?,
            internal: distance < ra.max(rb),
        })
    }
}

/// Whether one of `points` is the arc's end (`Some(true)`) or start
/// (`Some(false)`).
fn shared_endpoint(points: &[EntityIndex], arc: &sketch_model::Arc) -> Option<bool> {
    if points.contains(&arc.end()) {
        Some(true)
    } else if points.contains(&arc.start()) {
        Some(false)
    } else {
        None
    }
}

fn curve_geometry(
    entities: &EntityStore,
    curve: &Entity,
) -> SketchResult<(nalgebra::Vector2<f64>, f64)> {
    match curve {
        Entity::Arc(arc) => Ok((point_co(entities, arc.ct)?, arc.radius(entities)?)),
        Entity::Circle(circle) => Ok((point_co(entities, circle.ct)?, circle.radius)),
        other => Err(unsupported("tangent", other.kind())),
    }
}

fn unsupported(constraint: &str, kind: EntityKind) -> SketchError {
    SketchError::configuration(format!("{constraint} constraint does not support {kind:?}"))
}
