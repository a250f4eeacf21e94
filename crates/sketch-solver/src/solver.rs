use nalgebra::{Quaternion, UnitQuaternion, Vector2, Vector3};
use sketch_model::{
    ConstraintIndex, Document, Entity, EntityIndex, Sketch, SketchError, SketchResult, SolveStatus,
};
use tracing::{info, instrument, warn};

use crate::backend::{EntityHandle, GroupId, SolverBackend, SolverError};
use crate::entity_mapping::SolverMapping;
use crate::native::{NativeSolver, SolverConfig};
use crate::status::classify_status;

impl From<SolverError> for SketchError {
    fn from(err: SolverError) -> Self {
        SketchError::configuration(err.to_string())
    }
}

/// Interactive drag: the entity is held at `position` (world space) while
/// the rest of the active geometry follows.
#[derive(Debug, Clone, PartialEq)]
pub struct Tweak {
    pub entity: EntityIndex,
    pub position: Vector3<f64>,
}

/// Outcome of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Solved sketch, `None` for the 3D space.
    pub sketch: Option<EntityIndex>,
    pub status: SolveStatus,
    pub dof: u32,
    pub failed_constraints: Vec<ConstraintIndex>,
}

impl SolveReport {
    pub fn is_okay(&self) -> bool {
        self.status.is_okay()
    }

    pub fn into_result(self) -> SketchResult<Self> {
        if self.status.is_okay() {
            Ok(self)
        } else {
            Err(SketchError::SolveFailure {
                status: self.status,
            })
        }
    }
}

/// Runs document solves through a backend.
#[derive(Debug, Default)]
pub struct SolverBridge<B: SolverBackend = NativeSolver> {
    backend: B,
    tweak: Option<Tweak>,
}

impl SolverBridge<NativeSolver> {
    pub fn new() -> Self {
        Self::with_backend(NativeSolver::new())
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self::with_backend(NativeSolver::with_config(config))
    }
}

impl<B: SolverBackend> SolverBridge<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            tweak: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Hold `entity` at `position` on subsequent solves.
    pub fn set_tweak(&mut self, entity: EntityIndex, position: Vector3<f64>) {
        self.tweak = Some(Tweak { entity, position });
    }

    pub fn clear_tweak(&mut self) {
        self.tweak = None;
    }

    /// Solve the document's active sketch, or the 3D space when none is active.
    pub fn solve(&mut self, doc: &mut Document) -> SketchResult<SolveReport> {
        let sketch = doc.active_sketch;
        solve_sketch(&mut self.backend, doc, sketch, self.tweak.as_ref())
    }

    /// Solve the 3D space first, then every sketch.
    pub fn solve_all(&mut self, doc: &mut Document) -> SketchResult<Vec<SolveReport>> {
        let mut reports = vec![solve_sketch(&mut self.backend, doc, None, None)?];
        let sketches: Vec<EntityIndex> = doc.entities.iter_as::<Sketch>().map(|s| s.base.index).collect();
        for sketch in sketches {
            reports.push(solve_sketch(&mut self.backend, doc, Some(sketch), None)?);
        }
        Ok(reports)
    }
}

/// Value read back from the backend for one entity.
enum Solved {
    Point3(Vector3<f64>),
    Point2(Vector2<f64>),
    Normal(UnitQuaternion<f64>),
    Radius(f64),
}

/// Solve one sketch (or the 3D space for `None`): rebuild the backend from
/// the document, solve the active group and write results back. Geometry is
/// only changed when the solve succeeds; failure flags and the sketch's
/// solver state are updated either way.
#[instrument(skip_all, fields(sketch = ?sketch))]
pub fn solve_sketch<B: SolverBackend>(
    backend: &mut B,
    doc: &mut Document,
    sketch: Option<EntityIndex>,
    tweak: Option<&Tweak>,
) -> SketchResult<SolveReport> {
    if let Some(sketch) = sketch {
        doc.entities.get_as::<Sketch>(sketch)?;
    }
    backend.clear();

    let mut mapping = SolverMapping::new(backend, sketch);
    mapping.add_entities(&doc.entities, tweak)?;
    mapping.add_constraints(&doc.entities, &doc.constraints)?;

    let status = classify_status(mapping.backend.solve(GroupId::ACTIVE));
    let dof = mapping.backend.dof().max(0) as u32;
    let failed_constraints: Vec<ConstraintIndex> = if status.is_okay() {
        Vec::new()
    } else {
        let mut failed: Vec<_> = mapping
            .backend
            .failed_constraints()
            .into_iter()
            .filter_map(|h| mapping.constraint_for(h))
            .collect();
        failed.sort();
        failed.dedup();
        failed
    };

    if status.is_okay() {
        let mut solved = Vec::new();
        for entity in doc.entities.iter() {
            if mapping.group(entity.index()) != GroupId::ACTIVE {
                continue;
            }
            let value = match entity {
                Entity::Point3D(_) | Entity::Point2D(_) | Entity::Normal3D(_) => {
                    match read(&mapping, mapping.handle(entity.index())?)?.as_slice() {
                        [x, y, z] => Solved::Point3(Vector3::new(*x, *y, *z)),
                        [u, v] => Solved::Point2(Vector2::new(*u, *v)),
                        [w, i, j, k] => Solved::Normal(UnitQuaternion::from_quaternion(
                            Quaternion::new(*w, *i, *j, *k),
                        )),
                        _ => continue,
                    }
                }
                Entity::Circle(_) => match mapping.radius_handle(entity.index()) {
                    Some(radius) => match read(&mapping, radius)?.as_slice() {
                        [r] => Solved::Radius(*r),
                        _ => continue,
                    },
                    None => continue,
                },
                _ => continue,
            };
            solved.push((entity.index(), value));
        }

        for (index, value) in solved {
            let Some(entity) = doc.entities.get_mut(index) else {
                continue;
            };
            match (entity, value) {
                (Entity::Point3D(p), Solved::Point3(v)) => p.location = v,
                (Entity::Point2D(p), Solved::Point2(v)) => p.co = v,
                (Entity::Normal3D(n), Solved::Normal(q)) => n.orientation = q,
                (Entity::Circle(c), Solved::Radius(r)) => c.radius = r,
                _ => {}
            }
        }
        for entity in doc.entities.iter_mut() {
            if entity.is_active(sketch) {
                entity.base_mut().dirty = false;
            }
        }
        for constraint in doc.constraints.iter_mut() {
            if constraint.is_active(sketch) {
                constraint.dirty = false;
            }
        }
    }

    let active: Vec<ConstraintIndex> = doc
        .constraints
        .all()
        .filter(|(_, c)| c.is_active(sketch))
        .map(|(index, _)| index)
        .collect();
    for index in active {
        if let Some(constraint) = doc.constraints.get_mut(index) {
            constraint.failed = failed_constraints.contains(&index);
        }
    }

    if let Some(sketch) = sketch {
        let state = doc.entities.get_as_mut::<Sketch>(sketch)?;
        state.solver_state = status;
        state.dof = dof;
    }

    if status.is_okay() {
        info!(dof, "solve succeeded");
    } else {
        warn!(?status, failed = failed_constraints.len(), "solve failed");
    }
    Ok(SolveReport {
        sketch,
        status,
        dof,
        failed_constraints,
    })
}

fn read<B: SolverBackend>(mapping: &SolverMapping<'_, B>, handle: EntityHandle) -> SketchResult<Vec<f64>> {
    mapping
        .backend
        .params(handle)?
        .into_iter()
        .map(|p| mapping.backend.get_param_value(p).map_err(SketchError::from))
        .collect()
}
