//! Parallel copies of sketch paths.

use nalgebra::Vector2;
use sketch_model::{Document, Entity, EntityIndex, SketchError, SketchResult, Tolerance};
use tracing::{debug, info, instrument, warn};

use crate::geom::{polar, right_normal, Curve2};
use crate::intersect::carrier_intersections;
use crate::topology::{path_of, walk_sketch, Path};

/// One segment of the path with its offset shape.
struct OffsetSegment {
    source: EntityIndex,
    inverted: bool,
    original: Curve2,
    offset: Curve2,
}

impl OffsetSegment {
    /// Traversal start and end of the original segment.
    fn original_ends(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        let (a, b) = self.original.endpoints()?;
        Some(if self.inverted { (b, a) } else { (a, b) })
    }

    /// Point on the offset carrier matching `p` on the original segment.
    fn project(&self, p: Vector2<f64>, distance: f64) -> Vector2<f64> {
        match self.offset {
            Curve2::Line { .. } => p + self.right(p) * distance,
            Curve2::Arc { center, radius, .. } | Curve2::Circle { center, radius } => {
                let v = p - center;
                polar(center, radius, v.y.atan2(v.x))
            }
        }
    }

    /// Right-hand normal of the traversal at `p`.
    fn right(&self, p: Vector2<f64>) -> Vector2<f64> {
        let t = self.original.param_of(&p);
        let tangent = self.original.tangent_at(t);
        let tangent = if self.inverted { -tangent } else { tangent };
        right_normal(tangent)
    }
}

/// Offset shape of one curve: lines shift along the traversal's right
/// normal, curves grow when traversed counter-clockwise and shrink otherwise.
fn offset_curve(curve: &Curve2, inverted: bool, distance: f64) -> Option<Curve2> {
    match *curve {
        Curve2::Line { a, b } => {
            let dir = (b - a).try_normalize(0.0)?;
            let dir = if inverted { -dir } else { dir };
            let shift = right_normal(dir) * distance;
            Some(Curve2::Line {
                a: a + shift,
                b: b + shift,
            })
        }
        Curve2::Arc {
            center,
            radius,
            start_angle,
            sweep,
        } => {
            let radius = if inverted { radius - distance } else { radius + distance };
            (radius > 0.0).then_some(Curve2::Arc {
                center,
                radius,
                start_angle,
                sweep,
            })
        }
        Curve2::Circle { center, radius } => {
            let radius = if inverted { radius - distance } else { radius + distance };
            (radius > 0.0).then_some(Curve2::Circle { center, radius })
        }
    }
}

/// Create a copy of `path` offset by `distance`, positive to the right of
/// the traversal. Returns the new segments in path order, or nothing when a
/// curve would collapse.
#[instrument(skip(doc, path), fields(segments = path.len()))]
pub fn offset_path(
    doc: &mut Document,
    sketch: EntityIndex,
    path: &Path,
    distance: f64,
) -> SketchResult<Vec<EntityIndex>> {
    let mut segments = Vec::with_capacity(path.len());
    for (source, inverted) in path.iter() {
        let original = Curve2::from_entity(&doc.entities, source)?;
        let Some(offset) = offset_curve(&original, inverted, distance) else {
            warn!(%source, distance, "offset collapses the curve");
            return Ok(Vec::new());
        };
        segments.push(OffsetSegment {
            source,
            inverted,
            original,
            offset,
        });
    }

    if let [single] = segments.as_slice() {
        if let Curve2::Circle { radius, .. } = single.offset {
            let Some(Entity::Circle(circle)) = doc.entities.get(single.source) else {
                return Err(SketchError::MissingEntity {
                    index: single.source,
                });
            };
            let (nm, ct) = (circle.nm, circle.ct);
            let copy = doc.entities.add_circle(nm, ct, radius, sketch)?;
            info!(%copy, radius, "circle offset");
            return Ok(vec![copy]);
        }
    }

    let vertices = corner_positions(&segments, path.cyclic, distance, &doc.tolerance);
    let points = vertices
        .iter()
        .map(|co| doc.entities.add_point_2d(*co, sketch))
        .collect::<SketchResult<Vec<_>>>()?;

    let mut created = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let from = points[i];
        let to = points[(i + 1) % points.len()];
        let (p1, p2) = if segment.inverted { (to, from) } else { (from, to) };
        let entity = match doc.entities.get(segment.source) {
            Some(Entity::Line2D(_)) => doc.entities.add_line_2d(p1, p2, sketch)?,
            Some(Entity::Arc(arc)) => {
                let (nm, ct) = (arc.nm, arc.ct);
                doc.entities.add_arc(nm, ct, p1, p2, sketch, false)?
            }
            Some(other) => {
                return Err(SketchError::configuration(format!(
                    "cannot offset a {:?} inside a chain",
                    other.kind()
                )))
            }
            None => return Err(SketchError::MissingEntity { index: segment.source }),
        };
        created.push(entity);
    }
    info!(created = created.len(), "path offset");
    Ok(created)
}

/// Offset the path containing `entity`.
pub fn offset_entity(
    doc: &mut Document,
    entity: EntityIndex,
    distance: f64,
) -> SketchResult<Vec<EntityIndex>> {
    let sketch = doc
        .entities
        .get(entity)
        .and_then(Entity::sketch)
        .ok_or_else(|| SketchError::configuration(format!("{entity} is not in a sketch")))?;
    let paths = walk_sketch(&doc.entities, sketch)?;
    let path = path_of(&paths, entity)
        .cloned()
        .ok_or_else(|| SketchError::configuration(format!("{entity} is not part of a path")))?;
    offset_path(doc, sketch, &path, distance)
}

/// Vertices of the offset chain in traversal order: one per segment start,
/// plus the final end for open paths.
fn corner_positions(
    segments: &[OffsetSegment],
    cyclic: bool,
    distance: f64,
    tol: &Tolerance,
) -> Vec<Vector2<f64>> {
    let n = segments.len();
    let mut vertices = Vec::with_capacity(n + 1);
    for i in 0..n {
        let Some((start, _)) = segments[i].original_ends() else {
            continue;
        };
        let previous = if i > 0 {
            Some(&segments[i - 1])
        } else if cyclic {
            segments.last()
        } else {
            None
        };
        let vertex = match previous {
            Some(prev) => corner(prev, &segments[i], start, distance, tol),
            None => segments[i].project(start, distance),
        };
        vertices.push(vertex);
    }
    if !cyclic {
        if let Some((_, end)) = segments.last().and_then(OffsetSegment::original_ends) {
            vertices.push(segments[n - 1].project(end, distance));
        }
    }
    debug!(vertices = vertices.len(), "offset corners");
    vertices
}

/// Meeting point of two consecutive offset segments: the carrier
/// intersection nearest the original joint, or the joint pushed along the
/// normal when the carriers continue each other.
fn corner(
    incoming: &OffsetSegment,
    outgoing: &OffsetSegment,
    joint: Vector2<f64>,
    distance: f64,
    tol: &Tolerance,
) -> Vector2<f64> {
    carrier_intersections(&incoming.offset, &outgoing.offset, tol)
        .into_iter()
        .min_by(|a, b| (a - joint).norm().total_cmp(&(b - joint).norm()))
        .unwrap_or_else(|| outgoing.project(joint, distance))
}
