//! Line and circle intersections in the sketch plane.

use nalgebra::Vector2;
use sketch_model::Tolerance;

use crate::geom::Curve2;

// ─── Unbounded primitives ────────────────────────────────────────────────────

/// Intersect the infinite lines through `a1 b1` and `a2 b2`, each written as
/// `A·x + B·y = C`. Parallel lines have no intersection.
pub fn line_line(
    a1: Vector2<f64>,
    b1: Vector2<f64>,
    a2: Vector2<f64>,
    b2: Vector2<f64>,
) -> Option<Vector2<f64>> {
    let (aa1, bb1) = (b1.y - a1.y, a1.x - b1.x);
    let cc1 = aa1 * a1.x + bb1 * a1.y;
    let (aa2, bb2) = (b2.y - a2.y, a2.x - b2.x);
    let cc2 = aa2 * a2.x + bb2 * a2.y;

    let det = aa1 * bb2 - aa2 * bb1;
    let scale = (aa1.hypot(bb1) * aa2.hypot(bb2)).max(f64::MIN_POSITIVE);
    if (det / scale).abs() < 1e-12 {
        return None;
    }
    Some(Vector2::new(
        (bb2 * cc1 - bb1 * cc2) / det,
        (aa1 * cc2 - aa2 * cc1) / det,
    ))
}

/// Intersect the infinite line through `a b` with a circle. A discriminant
/// within `tangency` of zero yields the single tangent point.
pub fn line_circle(
    a: Vector2<f64>,
    b: Vector2<f64>,
    center: Vector2<f64>,
    radius: f64,
    tangency: f64,
) -> Vec<Vector2<f64>> {
    let d = b - a;
    let length = d.norm();
    if length == 0.0 {
        return Vec::new();
    }
    let dir = d / length;
    let foot = a + dir * (center - a).dot(&dir);
    let distance = (foot - center).norm();
    let discriminant = radius * radius - distance * distance;

    if discriminant.abs() <= tangency * radius.max(1.0) * radius.max(1.0) {
        vec![foot]
    } else if discriminant < 0.0 {
        Vec::new()
    } else {
        let half = discriminant.sqrt();
        vec![foot - dir * half, foot + dir * half]
    }
}

/// Intersect two circles through their radical line.
pub fn circle_circle(
    c1: Vector2<f64>,
    r1: f64,
    c2: Vector2<f64>,
    r2: f64,
    tangency: f64,
) -> Vec<Vector2<f64>> {
    let delta = c2 - c1;
    let distance = delta.norm();
    if distance == 0.0 {
        return Vec::new();
    }
    // Distance from c1 to the radical line along the centre line.
    let along = (distance * distance + r1 * r1 - r2 * r2) / (2.0 * distance);
    let h2 = r1 * r1 - along * along;
    let dir = delta / distance;
    let base = c1 + dir * along;

    if h2.abs() <= tangency * r1.max(1.0) * r1.max(1.0) {
        vec![base]
    } else if h2 < 0.0 {
        Vec::new()
    } else {
        let offset = Vector2::new(-dir.y, dir.x) * h2.sqrt();
        vec![base + offset, base - offset]
    }
}

/// Intersections of the unbounded carriers of two curves: lines are
/// infinite, arcs are full circles.
pub fn carrier_intersections(first: &Curve2, second: &Curve2, tol: &Tolerance) -> Vec<Vector2<f64>> {
    match (*first, *second) {
        (Curve2::Line { a: a1, b: b1 }, Curve2::Line { a: a2, b: b2 }) => {
            line_line(a1, b1, a2, b2).into_iter().collect()
        }
        (Curve2::Line { a, b }, curve) | (curve, Curve2::Line { a, b }) => {
            match (curve.center(), curve.radius()) {
                (Some(c), Some(r)) => line_circle(a, b, c, r, tol.tangency),
                _ => Vec::new(),
            }
        }
        (c1, c2) => match (c1.center(), c1.radius(), c2.center(), c2.radius()) {
            (Some(c1), Some(r1), Some(c2), Some(r2)) => circle_circle(c1, r1, c2, r2, tol.tangency),
            _ => Vec::new(),
        },
    }
}

// ─── Bounded intersections ───────────────────────────────────────────────────

fn near_endpoint(curve: &Curve2, p: &Vector2<f64>, tol: &Tolerance) -> bool {
    curve
        .endpoints()
        .is_some_and(|(s, e)| tol.points_coincident(&s, p) || tol.points_coincident(&e, p))
}

/// Intersections lying on both bounded curves, dropping points that coincide
/// with an endpoint of either curve.
pub fn intersect(first: &Curve2, second: &Curve2, tol: &Tolerance) -> Vec<Vector2<f64>> {
    carrier_intersections(first, second, tol)
        .into_iter()
        .filter(|p| {
            first.contains_param(first.param_of(p), tol.coincidence)
                && second.contains_param(second.param_of(p), tol.coincidence)
        })
        .filter(|p| !near_endpoint(first, p, tol) && !near_endpoint(second, p, tol))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn v(x: f64, y: f64) -> Vector2<f64> {
        Vector2::new(x, y)
    }

    #[test]
    fn crossing_lines_meet_once() {
        let p = line_line(v(0.0, 0.0), v(2.0, 2.0), v(0.0, 2.0), v(2.0, 0.0)).unwrap();
        assert_relative_eq!(p, v(1.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn parallel_lines_have_no_intersection() {
        assert!(line_line(v(0.0, 0.0), v(1.0, 0.0), v(0.0, 1.0), v(5.0, 1.0)).is_none());
    }

    #[test]
    fn secant_and_tangent_lines() {
        let hits = line_circle(v(-5.0, 0.0), v(5.0, 0.0), v(0.0, 0.0), 2.0, 1e-9);
        assert_eq!(hits.len(), 2);
        assert_relative_eq!(hits[0], v(-2.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(hits[1], v(2.0, 0.0), epsilon = 1e-12);

        let tangent = line_circle(v(-5.0, 2.0), v(5.0, 2.0), v(0.0, 0.0), 2.0, 1e-9);
        assert_eq!(tangent, vec![v(0.0, 2.0)]);

        assert!(line_circle(v(-5.0, 3.0), v(5.0, 3.0), v(0.0, 0.0), 2.0, 1e-9).is_empty());
    }

    #[test]
    fn circles_meet_on_radical_line() {
        let hits = circle_circle(v(0.0, 0.0), 2.0, v(2.0, 0.0), 2.0, 1e-9);
        assert_eq!(hits.len(), 2);
        for p in hits {
            assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
            assert_relative_eq!(p.norm(), 2.0, epsilon = 1e-12);
        }
        assert_eq!(circle_circle(v(0.0, 0.0), 1.0, v(2.0, 0.0), 1.0, 1e-9).len(), 1);
        assert!(circle_circle(v(0.0, 0.0), 1.0, v(5.0, 0.0), 1.0, 1e-9).is_empty());
    }

    #[test]
    fn bounded_results_respect_spans_and_endpoints() {
        let tol = Tolerance::default();
        let horizontal = Curve2::Line {
            a: v(0.0, 0.0),
            b: v(4.0, 0.0),
        };
        let short = Curve2::Line {
            a: v(6.0, -1.0),
            b: v(6.0, 1.0),
        };
        assert!(intersect(&horizontal, &short, &tol).is_empty());

        // Touching at an endpoint is not a cut.
        let touching = Curve2::Line {
            a: v(4.0, 0.0),
            b: v(4.0, 3.0),
        };
        assert!(intersect(&horizontal, &touching, &tol).is_empty());

        let upper_arc = Curve2::Arc {
            center: v(2.0, 0.0),
            radius: 1.0,
            start_angle: 0.0,
            sweep: PI,
        };
        let vertical = Curve2::Line {
            a: v(2.0, -3.0),
            b: v(2.0, 3.0),
        };
        let hits = intersect(&upper_arc, &vertical, &tol);
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0], v(2.0, 1.0), epsilon = 1e-12);
    }
}
