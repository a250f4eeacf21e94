//! Geometry derivation on top of the sketch model: path reconstruction,
//! bezier conversion, intersections, trimming and offsetting.

pub mod bezier;
pub mod geom;
pub mod intersect;
pub mod offset;
pub mod topology;
pub mod trim;

pub use bezier::{
    bezier_point_count, bezier_segment_count, curve_to_bezier, path_to_spline, sketch_to_splines,
    BezierPoint, BezierSpline, SketchSplines,
};
pub use geom::Curve2;
pub use intersect::{carrier_intersections, intersect};
pub use offset::{offset_entity, offset_path};
pub use topology::{is_cyclic_path, main_path, path_of, walk_sketch, Path, TopologyWalker};
pub use trim::{trim, TrimOutcome};
