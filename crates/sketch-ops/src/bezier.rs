//! Cubic bezier conversion of sketch paths.

use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{Isometry3, Vector2};
use serde::Serialize;
use sketch_model::{sketch_placement, EntityIndex, EntityStore, SketchResult};
use tracing::{debug, instrument};

use crate::geom::{polar, Curve2};
use crate::topology::{walk_sketch, Path};

/// One spline anchor with its two handles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BezierPoint {
    pub co: Vector2<f64>,
    pub handle_left: Vector2<f64>,
    pub handle_right: Vector2<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BezierSpline {
    pub points: Vec<BezierPoint>,
    pub cyclic: bool,
}

/// Splines of one sketch in its local frame, with the frame's placement.
#[derive(Debug, Clone, PartialEq)]
pub struct SketchSplines {
    pub placement: Isometry3<f64>,
    pub splines: Vec<BezierSpline>,
}

/// Handle length of a circular bezier segment spanning `angle`.
pub fn handle_offset(radius: f64, angle: f64) -> f64 {
    radius * 4.0 / 3.0 * (angle / 4.0).tan()
}

/// Number of cubic segments used for an arc of `sweep` radians.
pub fn arc_segment_count(sweep: f64) -> usize {
    ((sweep / FRAC_PI_2) - 1e-9).ceil().max(1.0) as usize
}

/// Number of cubic segments a curve converts to.
pub fn bezier_segment_count(curve: &Curve2) -> usize {
    match curve {
        Curve2::Line { .. } => 1,
        Curve2::Circle { .. } => 4,
        Curve2::Arc { sweep, .. } => arc_segment_count(*sweep),
    }
}

/// Number of anchors; closed curves share their first anchor with the last
/// segment.
pub fn bezier_point_count(curve: &Curve2) -> usize {
    let segments = bezier_segment_count(curve);
    if curve.is_closed() {
        segments
    } else {
        segments + 1
    }
}

fn circular_points(
    center: Vector2<f64>,
    radius: f64,
    start_angle: f64,
    sweep: f64,
    segments: usize,
    anchors: usize,
) -> Vec<BezierPoint> {
    let step = sweep / segments as f64;
    let q = handle_offset(radius, step);
    (0..anchors)
        .map(|i| {
            let angle = start_angle + step * i as f64;
            let co = polar(center, radius, angle);
            let tangent = Vector2::new(-angle.sin(), angle.cos());
            BezierPoint {
                co,
                handle_left: co - tangent * q,
                handle_right: co + tangent * q,
            }
        })
        .collect()
}

fn reversed(mut points: Vec<BezierPoint>) -> Vec<BezierPoint> {
    points.reverse();
    for p in &mut points {
        std::mem::swap(&mut p.handle_left, &mut p.handle_right);
    }
    points
}

/// Anchors of one curve in traversal order. Circles yield a closed ring of
/// four anchors starting at angle zero.
pub fn curve_to_bezier(curve: &Curve2, inverted: bool) -> Vec<BezierPoint> {
    let points = match *curve {
        Curve2::Line { a, b } => {
            let third = (b - a) / 3.0;
            vec![
                BezierPoint {
                    co: a,
                    handle_left: a - third,
                    handle_right: a + third,
                },
                BezierPoint {
                    co: b,
                    handle_left: b - third,
                    handle_right: b + third,
                },
            ]
        }
        Curve2::Arc {
            center,
            radius,
            start_angle,
            sweep,
        } => {
            let segments = arc_segment_count(sweep);
            circular_points(center, radius, start_angle, sweep, segments, segments + 1)
        }
        Curve2::Circle { center, radius } => circular_points(center, radius, 0.0, TAU, 4, 4),
    };
    if inverted {
        reversed(points)
    } else {
        points
    }
}

/// Join the beziers of a path into one spline. Shared anchors keep the
/// incoming left handle and take the outgoing right handle.
pub fn path_to_spline(store: &EntityStore, path: &Path) -> SketchResult<BezierSpline> {
    let mut points: Vec<BezierPoint> = Vec::new();
    for (segment, inverted) in path.iter() {
        let curve = Curve2::from_entity(store, segment)?;
        let anchors = curve_to_bezier(&curve, inverted);
        if curve.is_closed() || points.is_empty() {
            points.extend(anchors);
            continue;
        }
        let mut anchors = anchors.into_iter();
        if let (Some(last), Some(first)) = (points.last_mut(), anchors.next()) {
            last.handle_right = first.handle_right;
        }
        points.extend(anchors);
    }

    let closes_on_itself = path.cyclic && path.segments.len() > 1 && points.len() > 1;
    if closes_on_itself {
        if let Some(last) = points.pop() {
            if let Some(first) = points.first_mut() {
                first.handle_left = last.handle_left;
            }
        }
    }
    Ok(BezierSpline {
        points,
        cyclic: path.cyclic,
    })
}

/// Convert every path of a sketch.
#[instrument(skip(store))]
pub fn sketch_to_splines(store: &EntityStore, sketch: EntityIndex) -> SketchResult<SketchSplines> {
    let placement = sketch_placement(store, sketch)?;
    let splines = walk_sketch(store, sketch)?
        .iter()
        .map(|path| path_to_spline(store, path))
        .collect::<SketchResult<Vec<_>>>()?;
    debug!(splines = splines.len(), "sketch converted");
    Ok(SketchSplines { placement, splines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    #[test]
    fn quarter_arc_handle_length() {
        let arc = Curve2::Arc {
            center: Vector2::zeros(),
            radius: 1.0,
            start_angle: 0.0,
            sweep: FRAC_PI_2,
        };
        assert_eq!((bezier_segment_count(&arc), bezier_point_count(&arc)), (1, 2));
        let points = curve_to_bezier(&arc, false);
        assert_relative_eq!(points[0].handle_right, Vector2::new(1.0, 0.552_284_749_8), epsilon = 1e-9);
        assert_relative_eq!(points[1].handle_left, Vector2::new(0.552_284_749_8, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn arc_segment_counts_round_up() {
        assert_eq!(arc_segment_count(FRAC_PI_2), 1);
        assert_eq!(arc_segment_count(FRAC_PI_2 + 0.01), 2);
        assert_eq!(arc_segment_count(PI * 1.5), 3);
        assert_eq!(arc_segment_count(0.1), 1);
    }

    #[test]
    fn circle_has_four_cyclic_anchors() {
        let circle = Curve2::Circle {
            center: Vector2::new(1.0, 1.0),
            radius: 2.0,
        };
        assert_eq!(bezier_segment_count(&circle), 4);
        assert_eq!(bezier_point_count(&circle), 4);
        let points = curve_to_bezier(&circle, false);
        assert_eq!(points.len(), 4);
        assert_relative_eq!(points[1].co, Vector2::new(1.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn reversed_traversal_swaps_handles() {
        let arc = Curve2::Arc {
            center: Vector2::zeros(),
            radius: 1.0,
            start_angle: 0.0,
            sweep: PI,
        };
        let forward = curve_to_bezier(&arc, false);
        let backward = curve_to_bezier(&arc, true);
        assert_eq!(backward.len(), forward.len());
        assert_eq!(backward[0].co, forward[2].co);
        assert_eq!(backward[0].handle_right, forward[2].handle_left);
    }

    proptest! {
        #[test]
        fn arc_anchors_lie_on_the_circle(
            radius in 0.1f64..100.0,
            start in -PI..PI,
            sweep in 0.05f64..(2.0 * PI),
        ) {
            let arc = Curve2::Arc { center: Vector2::new(3.0, -2.0), radius, start_angle: start, sweep };
            let points = curve_to_bezier(&arc, false);
            prop_assert_eq!(points.len(), arc_segment_count(sweep) + 1);
            for p in &points {
                prop_assert!(((p.co - Vector2::new(3.0, -2.0)).norm() - radius).abs() < 1e-9 * radius.max(1.0));
            }
        }
    }
}
