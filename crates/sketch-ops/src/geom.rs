//! Solved 2D curve shapes, detached from the store.

use std::f64::consts::TAU;

use nalgebra::Vector2;
use sketch_model::{
    point_co, CurveLike, Entity, EntityIndex, EntityStore, SketchError, SketchResult,
};

/// Shape of a path entity in its sketch's coordinates.
///
/// Arcs run counter-clockwise from `start_angle` through `sweep`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve2 {
    Line {
        a: Vector2<f64>,
        b: Vector2<f64>,
    },
    Arc {
        center: Vector2<f64>,
        radius: f64,
        start_angle: f64,
        sweep: f64,
    },
    Circle {
        center: Vector2<f64>,
        radius: f64,
    },
}

pub fn polar(center: Vector2<f64>, radius: f64, angle: f64) -> Vector2<f64> {
    center + Vector2::new(angle.cos(), angle.sin()) * radius
}

/// Right-hand normal of a direction.
pub fn right_normal(d: Vector2<f64>) -> Vector2<f64> {
    Vector2::new(d.y, -d.x)
}

pub fn cross2(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

impl Curve2 {
    pub fn from_entity(store: &EntityStore, index: EntityIndex) -> SketchResult<Self> {
        match store.get(index) {
            Some(Entity::Line2D(line)) => Ok(Curve2::Line {
                a: point_co(store, line.p1)?,
                b: point_co(store, line.p2)?,
            }),
            Some(Entity::Arc(arc)) => Ok(Curve2::Arc {
                center: arc.center(store)?,
                radius: arc.radius(store)?,
                start_angle: arc.start_angle(store)?,
                sweep: arc.sweep(store)?,
            }),
            Some(Entity::Circle(circle)) => Ok(Curve2::Circle {
                center: circle.center(store)?,
                radius: circle.radius,
            }),
            Some(other) => Err(SketchError::configuration(format!(
                "{index} is a {:?}, not a path entity",
                other.kind()
            ))),
            None => Err(SketchError::MissingEntity { index }),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Curve2::Circle { .. })
    }

    pub fn center(&self) -> Option<Vector2<f64>> {
        match self {
            Curve2::Line { .. } => None,
            Curve2::Arc { center, .. } | Curve2::Circle { center, .. } => Some(*center),
        }
    }

    pub fn radius(&self) -> Option<f64> {
        match self {
            Curve2::Line { .. } => None,
            Curve2::Arc { radius, .. } | Curve2::Circle { radius, .. } => Some(*radius),
        }
    }

    /// Start and end in canonical direction; `None` for circles.
    pub fn endpoints(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        match *self {
            Curve2::Line { a, b } => Some((a, b)),
            Curve2::Arc {
                center,
                radius,
                start_angle,
                sweep,
            } => Some((
                polar(center, radius, start_angle),
                polar(center, radius, start_angle + sweep),
            )),
            Curve2::Circle { .. } => None,
        }
    }

    /// Extent of the parametrization: length for lines, sweep for arcs and a
    /// full turn for circles.
    pub fn span(&self) -> f64 {
        match *self {
            Curve2::Line { a, b } => (b - a).norm(),
            Curve2::Arc { sweep, .. } => sweep,
            Curve2::Circle { .. } => TAU,
        }
    }

    pub fn length(&self) -> f64 {
        match *self {
            Curve2::Line { a, b } => (b - a).norm(),
            Curve2::Arc { radius, sweep, .. } => radius * sweep,
            Curve2::Circle { radius, .. } => radius * TAU,
        }
    }

    /// Progress of `p` along the curve: arclength from `a` for lines (may be
    /// negative or beyond the end), angle from the start in `[0, 2π)` for
    /// arcs, polar angle in `[0, 2π)` for circles.
    pub fn param_of(&self, p: &Vector2<f64>) -> f64 {
        match *self {
            Curve2::Line { a, b } => {
                let d = b - a;
                let length = d.norm();
                if length == 0.0 {
                    0.0
                } else {
                    (p - a).dot(&d) / length
                }
            }
            Curve2::Arc {
                center,
                start_angle,
                ..
            } => {
                let v = p - center;
                (v.y.atan2(v.x) - start_angle).rem_euclid(TAU)
            }
            Curve2::Circle { center, .. } => {
                let v = p - center;
                v.y.atan2(v.x).rem_euclid(TAU)
            }
        }
    }

    pub fn point_at(&self, t: f64) -> Vector2<f64> {
        match *self {
            Curve2::Line { a, b } => {
                let length = (b - a).norm();
                if length == 0.0 {
                    a
                } else {
                    a + (b - a) * (t / length)
                }
            }
            Curve2::Arc {
                center,
                radius,
                start_angle,
                ..
            } => polar(center, radius, start_angle + t),
            Curve2::Circle { center, radius } => polar(center, radius, t),
        }
    }

    /// Unit tangent in canonical direction at parameter `t`.
    pub fn tangent_at(&self, t: f64) -> Vector2<f64> {
        match *self {
            Curve2::Line { a, b } => (b - a).try_normalize(0.0).unwrap_or_else(Vector2::x),
            Curve2::Arc { start_angle, .. } => {
                let angle = start_angle + t;
                Vector2::new(-angle.sin(), angle.cos())
            }
            Curve2::Circle { .. } => Vector2::new(-t.sin(), t.cos()),
        }
    }

    /// Whether a parameter lies on the bounded curve.
    pub fn contains_param(&self, t: f64, eps: f64) -> bool {
        match *self {
            Curve2::Line { a, b } => t >= -eps && t <= (b - a).norm() + eps,
            Curve2::Arc { radius, sweep, .. } => {
                let angular = eps / radius.max(f64::EPSILON);
                t <= sweep + angular || t >= TAU - angular
            }
            Curve2::Circle { .. } => true,
        }
    }
}
