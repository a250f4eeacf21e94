//! Capability traits and measured geometry of stored entities.
//!
//! Lookups go through the store because entities only hold indices; every
//! helper therefore returns a [`SketchResult`] and fails on dangling or
//! mis-typed references.

use std::f64::consts::TAU;

use nalgebra::{Isometry3, Point3, Translation3, Vector2, Vector3};

use crate::entity::*;
use crate::error::{SketchError, SketchResult};
use crate::index::EntityIndex;
use crate::store::EntityStore;

/// Entities that live inside a sketch.
pub trait SketchMember {
    fn sketch_index(&self) -> EntityIndex;

    /// Placement of the owning sketch in world space.
    fn placement(&self, store: &EntityStore) -> SketchResult<Isometry3<f64>> {
        sketch_placement(store, self.sketch_index())
    }
}

/// Entities with a single location.
pub trait PointLike {
    fn world_location(&self, store: &EntityStore) -> SketchResult<Vector3<f64>>;
}

/// Entities with a measurable extent.
pub trait SegmentLike {
    /// Start and end points, `None` for closed curves.
    fn endpoints(&self) -> Option<(EntityIndex, EntityIndex)>;
    fn length(&self, store: &EntityStore) -> SketchResult<f64>;
}

/// Arcs and circles.
pub trait CurveLike: SketchMember {
    fn center_index(&self) -> EntityIndex;
    fn radius(&self, store: &EntityStore) -> SketchResult<f64>;

    fn center(&self, store: &EntityStore) -> SketchResult<Vector2<f64>> {
        point_co(store, self.center_index())
    }
}

macro_rules! sketch_member {
    ($($ty:ident),*) => {$(
        impl SketchMember for $ty {
            fn sketch_index(&self) -> EntityIndex {
                self.sketch
            }
        }
    )*};
}

sketch_member!(Point2D, Line2D, Normal2D, Arc, Circle);

/// Coordinates of a 2D point.
pub fn point_co(store: &EntityStore, index: EntityIndex) -> SketchResult<Vector2<f64>> {
    Ok(store.get_as::<Point2D>(index)?.co)
}

/// Origin and orientation of a workplane as an isometry.
pub fn workplane_placement(store: &EntityStore, wp: EntityIndex) -> SketchResult<Isometry3<f64>> {
    let wp = store.get_as::<Workplane>(wp)?;
    let origin = store.get_as::<Point3D>(wp.p1)?.location;
    let orientation = store.get_as::<Normal3D>(wp.nm)?.orientation;
    Ok(Isometry3::from_parts(Translation3::from(origin), orientation))
}

pub fn sketch_placement(store: &EntityStore, sketch: EntityIndex) -> SketchResult<Isometry3<f64>> {
    let sketch = store.get_as::<Sketch>(sketch)?;
    workplane_placement(store, sketch.wp)
}

impl PointLike for Point3D {
    fn world_location(&self, _store: &EntityStore) -> SketchResult<Vector3<f64>> {
        Ok(self.location)
    }
}

impl PointLike for Point2D {
    fn world_location(&self, store: &EntityStore) -> SketchResult<Vector3<f64>> {
        let placement = self.placement(store)?;
        Ok((placement * Point3::new(self.co.x, self.co.y, 0.0)).coords)
    }
}

impl SegmentLike for Line3D {
    fn endpoints(&self) -> Option<(EntityIndex, EntityIndex)> {
        Some((self.p1, self.p2))
    }

    fn length(&self, store: &EntityStore) -> SketchResult<f64> {
        let a = store.get_as::<Point3D>(self.p1)?.location;
        let b = store.get_as::<Point3D>(self.p2)?.location;
        Ok((b - a).norm())
    }
}

impl SegmentLike for Line2D {
    fn endpoints(&self) -> Option<(EntityIndex, EntityIndex)> {
        Some((self.p1, self.p2))
    }

    fn length(&self, store: &EntityStore) -> SketchResult<f64> {
        Ok((point_co(store, self.p2)? - point_co(store, self.p1)?).norm())
    }
}

impl SegmentLike for Arc {
    fn endpoints(&self) -> Option<(EntityIndex, EntityIndex)> {
        Some((self.start(), self.end()))
    }

    fn length(&self, store: &EntityStore) -> SketchResult<f64> {
        Ok(self.radius(store)? * self.sweep(store)?)
    }
}

impl SegmentLike for Circle {
    fn endpoints(&self) -> Option<(EntityIndex, EntityIndex)> {
        None
    }

    fn length(&self, _store: &EntityStore) -> SketchResult<f64> {
        Ok(TAU * self.radius)
    }
}

impl CurveLike for Arc {
    fn center_index(&self) -> EntityIndex {
        self.ct
    }

    /// Distance from the centre to the start point.
    fn radius(&self, store: &EntityStore) -> SketchResult<f64> {
        let r = (point_co(store, self.start())? - self.center(store)?).norm();
        if r == 0.0 {
            return Err(SketchError::degenerate("arc start coincides with its centre"));
        }
        Ok(r)
    }
}

impl CurveLike for Circle {
    fn center_index(&self) -> EntityIndex {
        self.ct
    }

    fn radius(&self, _store: &EntityStore) -> SketchResult<f64> {
        Ok(self.radius)
    }
}

impl Arc {
    /// Polar angle of the start point around the centre.
    pub fn start_angle(&self, store: &EntityStore) -> SketchResult<f64> {
        let v = point_co(store, self.start())? - self.center(store)?;
        Ok(v.y.atan2(v.x))
    }

    pub fn end_angle(&self, store: &EntityStore) -> SketchResult<f64> {
        let v = point_co(store, self.end())? - self.center(store)?;
        Ok(v.y.atan2(v.x))
    }

    /// Counter-clockwise angle from start to end in `(0, 2π]`.
    pub fn sweep(&self, store: &EntityStore) -> SketchResult<f64> {
        Ok(ccw_sweep(self.start_angle(store)?, self.end_angle(store)?))
    }
}

/// Counter-clockwise angle between two polar angles, a zero sweep counting as a full turn.
pub fn ccw_sweep(start: f64, end: f64) -> f64 {
    let sweep = (end - start).rem_euclid(TAU);
    if sweep < 1e-12 {
        TAU
    } else {
        sweep
    }
}

// ── Picking ─────────────────────────────────────────────────────────────────

fn ray_plane(
    placement: &Isometry3<f64>,
    origin: &Vector3<f64>,
    direction: &Vector3<f64>,
) -> Option<Vector2<f64>> {
    let local_origin = placement.inverse_transform_point(&Point3::from(*origin));
    let local_dir = placement.inverse_transform_vector(direction);
    if local_dir.z.abs() < 1e-12 {
        return None;
    }
    let t = -local_origin.z / local_dir.z;
    let hit = local_origin + local_dir * t;
    Some(Vector2::new(hit.x, hit.y))
}

fn to_world(placement: &Isometry3<f64>, co: Vector2<f64>) -> Vector3<f64> {
    (placement * Point3::new(co.x, co.y, 0.0)).coords
}

/// Point on the segment `a..b` closest to the ray.
fn closest_on_segment(
    a: Vector3<f64>,
    b: Vector3<f64>,
    origin: &Vector3<f64>,
    direction: &Vector3<f64>,
) -> Vector3<f64> {
    let d1 = b - a;
    let d2 = direction;
    let r = a - origin;
    let aa = d1.dot(&d1);
    let bb = d1.dot(d2);
    let cc = d2.dot(d2);
    let dd = d1.dot(&r);
    let ee = d2.dot(&r);
    let denom = aa * cc - bb * bb;
    let s = if aa == 0.0 {
        0.0
    } else if denom.abs() < 1e-12 {
        // Ray parallel to the segment: project the ray origin.
        -dd / aa
    } else {
        (bb * ee - cc * dd) / denom
    };
    a + d1 * s.clamp(0.0, 1.0)
}

/// Point on the curve closest to a hit on its sketch plane.
fn closest_on_curve(center: Vector2<f64>, radius: f64, hit: Vector2<f64>) -> Vector2<f64> {
    let v = hit - center;
    let n = v.norm();
    if n == 0.0 {
        center + Vector2::new(radius, 0.0)
    } else {
        center + v * (radius / n)
    }
}

/// World-space point of `index` closest to the ray `origin + t·direction`,
/// used by viewport hit-testing.
pub fn closest_picking_point(
    store: &EntityStore,
    index: EntityIndex,
    origin: &Vector3<f64>,
    direction: &Vector3<f64>,
) -> SketchResult<Vector3<f64>> {
    let entity = store.get(index).ok_or(SketchError::MissingEntity { index })?;
    match entity {
        Entity::Point3D(p) => p.world_location(store),
        Entity::Point2D(p) => p.world_location(store),
        Entity::Line3D(l) => {
            let a = store.get_as::<Point3D>(l.p1)?.location;
            let b = store.get_as::<Point3D>(l.p2)?.location;
            Ok(closest_on_segment(a, b, origin, direction))
        }
        Entity::Line2D(l) => {
            let a = store.get_as::<Point2D>(l.p1)?.world_location(store)?;
            let b = store.get_as::<Point2D>(l.p2)?.world_location(store)?;
            Ok(closest_on_segment(a, b, origin, direction))
        }
        Entity::Normal3D(_) => Ok(Vector3::zeros()),
        Entity::Workplane(_) | Entity::Sketch(_) | Entity::Normal2D(_) => {
            let placement = match entity {
                Entity::Workplane(_) => workplane_placement(store, index)?,
                Entity::Sketch(_) => sketch_placement(store, index)?,
                _ => sketch_placement(store, entity.sketch().unwrap_or(EntityIndex::NONE))?,
            };
            let hit = ray_plane(&placement, origin, direction).unwrap_or_else(Vector2::zeros);
            Ok(to_world(&placement, hit))
        }
        Entity::Circle(c) => {
            let placement = c.placement(store)?;
            let center = c.center(store)?;
            let hit = ray_plane(&placement, origin, direction).unwrap_or(center);
            Ok(to_world(&placement, closest_on_curve(center, c.radius, hit)))
        }
        Entity::Arc(a) => {
            let placement = a.placement(store)?;
            let center = a.center(store)?;
            let radius = a.radius(store)?;
            let hit = ray_plane(&placement, origin, direction).unwrap_or(center);
            let on_circle = closest_on_curve(center, radius, hit);
            let v = on_circle - center;
            let start = a.start_angle(store)?;
            let within = ccw_sweep(start, v.y.atan2(v.x)) <= a.sweep(store)?;
            let picked = if within {
                on_circle
            } else {
                let s = point_co(store, a.start())?;
                let e = point_co(store, a.end())?;
                if (s - on_circle).norm() <= (e - on_circle).norm() {
                    s
                } else {
                    e
                }
            };
            Ok(to_world(&placement, picked))
        }
    }
}
