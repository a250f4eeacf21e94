//! Trimming a path entity back to the cuts around a picked position.

use std::f64::consts::TAU;

use nalgebra::Vector2;
use sketch_model::{
    point_co, ConstraintData, ConstraintIndex, Document, Entity, EntityIndex, SketchError,
    SketchResult,
};
use tracing::{debug, info, instrument, warn};

use crate::geom::Curve2;
use crate::intersect::intersect;

/// Result of a trim: the surviving pieces in order along the segment. The
/// first piece reuses the trimmed entity unless it was a circle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimOutcome {
    pub pieces: Vec<EntityIndex>,
}

/// A position where the segment may be cut.
#[derive(Debug, Clone, Copy)]
struct Cut {
    param: f64,
    co: Vector2<f64>,
    /// Existing point at this position.
    point: Option<EntityIndex>,
    /// Entity the cut was found on, for points created at intersections.
    source: Option<EntityIndex>,
}

/// Where a point held on the segment ends up after the trim.
enum Placement {
    Removed,
    Boundary,
    Piece(usize),
}

/// Trim `segment` at the nearest cut on each side of `pick` (sketch
/// coordinates) and remove the part in between. Returns `None` when nothing
/// would remain or no cut surrounds the pick.
///
/// Midpoint constraints on `segment` are removed, including on the reused
/// first piece: every piece loses at least one original endpoint, so the
/// old midpoint no longer holds on any of them.
#[instrument(skip(doc, pick), fields(%segment))]
pub fn trim(
    doc: &mut Document,
    segment: EntityIndex,
    pick: Vector2<f64>,
) -> SketchResult<Option<TrimOutcome>> {
    let entity = doc
        .entities
        .get(segment)
        .ok_or(SketchError::MissingEntity { index: segment })?;
    if !entity.is_path() {
        return Err(SketchError::configuration(format!(
            "{segment} is a {:?}, not a path entity",
            entity.kind()
        )));
    }
    let sketch = entity
        .sketch()
        .ok_or_else(|| SketchError::configuration(format!("{segment} is not in a sketch")))?;
    let ends = match entity {
        Entity::Line2D(line) => Some((line.p1, line.p2)),
        Entity::Arc(arc) => Some((arc.start(), arc.end())),
        _ => None,
    };
    let curve = Curve2::from_entity(&doc.entities, segment)?;
    let t = curve.param_of(&pick);

    let cuts = collect_cuts(doc, segment, sketch, &curve, ends)?;
    let Some(plan) = plan_pieces(&curve, &cuts, t, doc.tolerance.coincidence) else {
        debug!("nothing to trim");
        return Ok(None);
    };

    // Points are only created for cuts that bound a kept piece.
    let mut bounds = Vec::with_capacity(plan.len());
    let mut created = Vec::new();
    for (from, to) in &plan {
        let a = materialize(doc, sketch, from, &mut created)?;
        let b = materialize(doc, sketch, to, &mut created)?;
        bounds.push((a, b));
    }

    let pieces = build_pieces(doc, segment, sketch, &bounds)?;
    let removed_span = removed_span(&curve, &plan);

    // Constraints on the segment: drop the ones left dangling, move point
    // constraints to the piece they now sit on, copy the rest onto new pieces.
    let boundary: Vec<EntityIndex> = bounds.iter().flat_map(|(a, b)| [*a, *b]).collect();
    let mut obsolete: Vec<ConstraintIndex> = Vec::new();
    let mut additions: Vec<ConstraintData> = Vec::new();
    for index in doc.constraints.dependents_of(segment) {
        let Some(constraint) = doc.constraints.get(index) else {
            continue;
        };
        match &constraint.data {
            ConstraintData::Midpoint { .. } => obsolete.push(index),
            ConstraintData::Coincident { entity1, entity2 } if *entity2 == segment => {
                let placement = if boundary.contains(entity1) {
                    Placement::Boundary
                } else {
                    let p = curve.param_of(&point_co(&doc.entities, *entity1)?);
                    place(&curve, &plan, removed_span, p)
                };
                match placement {
                    Placement::Removed | Placement::Boundary => obsolete.push(index),
                    Placement::Piece(k) if pieces[k] != segment => {
                        additions.push(ConstraintData::Coincident {
                            entity1: *entity1,
                            entity2: pieces[k],
                        });
                        obsolete.push(index);
                    }
                    Placement::Piece(_) => {}
                }
            }
            data if data.kind().is_duplicable() => {
                for piece in pieces.iter().filter(|p| **p != segment) {
                    let mut copy = data.clone();
                    copy.remap_entities(|e| if e == segment { *piece } else { e });
                    additions.push(copy);
                }
            }
            _ => {}
        }
    }

    for data in additions {
        let kind = data.kind();
        if let Err(err) = doc.add_constraint(data, Some(sketch)) {
            warn!(?kind, %err, "constraint not carried over to trimmed piece");
        }
    }
    obsolete.sort_unstable_by(|a, b| b.cmp(a));
    obsolete.dedup();
    for index in &obsolete {
        doc.remove_constraint(*index)?;
    }

    if curve.is_closed() {
        doc.remove_entity_cascade(segment)?;
    }

    // Endpoints no piece uses any more, highest index first so pending
    // indices stay valid across swap-removes.
    let mut stale: Vec<EntityIndex> = ends
        .map(|(a, b)| [a, b])
        .into_iter()
        .flatten()
        .filter(|p| !boundary.contains(p))
        .collect();
    stale.sort_unstable_by(|a, b| b.cmp(a));
    stale.dedup();
    for point in stale {
        match doc.remove_entity(point) {
            Ok(()) => {}
            Err(SketchError::ReferentialIntegrityViolation { .. }) => {
                debug!(%point, "endpoint still referenced, kept");
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        pieces = pieces.len(),
        new_points = created.len(),
        removed_constraints = obsolete.len(),
        "segment trimmed"
    );
    Ok(Some(TrimOutcome { pieces }))
}

fn collect_cuts(
    doc: &Document,
    segment: EntityIndex,
    sketch: EntityIndex,
    curve: &Curve2,
    ends: Option<(EntityIndex, EntityIndex)>,
) -> SketchResult<Vec<Cut>> {
    let tol = doc.tolerance;
    let mut cuts = Vec::new();

    if let (Some((start, end)), Some((a, b))) = (ends, curve.endpoints()) {
        cuts.push(Cut {
            param: 0.0,
            co: a,
            point: Some(start),
            source: None,
        });
        cuts.push(Cut {
            param: curve.span(),
            co: b,
            point: Some(end),
            source: None,
        });
    }

    for (_, constraint) in doc.constraints.all() {
        let point = match constraint.data {
            ConstraintData::Coincident { entity1, entity2 }
            | ConstraintData::Midpoint { entity1, entity2 }
                if entity2 == segment =>
            {
                entity1
            }
            _ => continue,
        };
        let Ok(co) = point_co(&doc.entities, point) else {
            continue;
        };
        let param = curve.param_of(&co);
        if curve.contains_param(param, tol.coincidence)
            && !cuts.iter().any(|c| tol.points_coincident(&c.co, &co))
        {
            cuts.push(Cut {
                param,
                co,
                point: Some(point),
                source: None,
            });
        }
    }

    for other in doc.entities.in_sketch(sketch) {
        let index = other.index();
        if index == segment || !other.is_path() || other.base().construction {
            continue;
        }
        let other_curve = Curve2::from_entity(&doc.entities, index)?;
        for co in intersect(curve, &other_curve, &tol) {
            if cuts.iter().any(|c| tol.points_coincident(&c.co, &co)) {
                continue;
            }
            cuts.push(Cut {
                param: curve.param_of(&co),
                co,
                point: None,
                source: Some(index),
            });
        }
    }
    debug!(cuts = cuts.len(), "trim candidates");
    Ok(cuts)
}

/// Pick the cuts bounding the kept pieces, as `(from, to)` pairs in
/// curve direction.
fn plan_pieces(curve: &Curve2, cuts: &[Cut], t: f64, eps: f64) -> Option<Vec<(Cut, Cut)>> {
    if curve.is_closed() {
        let back = |c: &&Cut| (t - c.param).rem_euclid(TAU);
        let fwd = |c: &&Cut| (c.param - t).rem_euclid(TAU);
        let lower = cuts.iter().min_by(|a, b| back(a).total_cmp(&back(b)))?;
        let upper = cuts.iter().min_by(|a, b| fwd(a).total_cmp(&fwd(b)))?;
        if (lower.param - upper.param).abs() < eps {
            return None;
        }
        return Some(vec![(*upper, *lower)]);
    }

    let span = curve.span();
    let lower = cuts
        .iter()
        .filter(|c| c.param < t)
        .max_by(|a, b| a.param.total_cmp(&b.param))?;
    let upper = cuts
        .iter()
        .filter(|c| c.param > t)
        .min_by(|a, b| a.param.total_cmp(&b.param))?;
    let start = cuts.first()?;
    let end = cuts.get(1)?;

    let mut plan = Vec::new();
    if lower.param > eps {
        plan.push((*start, *lower));
    }
    if upper.param < span - eps {
        plan.push((*upper, *end));
    }
    (!plan.is_empty()).then_some(plan)
}

/// Parameter range removed by the trim, measured from its lower end.
fn removed_span(curve: &Curve2, plan: &[(Cut, Cut)]) -> (f64, f64) {
    match plan {
        [(upper, lower)] if curve.is_closed() => (lower.param, upper.param),
        [(_, lower), (upper, _)] => (lower.param, upper.param),
        [(from, to)] if from.param <= 1e-12 => (to.param, curve.span()),
        [(from, _)] => (0.0, from.param),
        _ => (0.0, 0.0),
    }
}

fn place(curve: &Curve2, plan: &[(Cut, Cut)], (lo, hi): (f64, f64), p: f64) -> Placement {
    if curve.is_closed() {
        let gap = (hi - lo).rem_euclid(TAU);
        return if (p - lo).rem_euclid(TAU) < gap {
            Placement::Removed
        } else {
            Placement::Piece(0)
        };
    }
    if p > lo && p < hi {
        return Placement::Removed;
    }
    plan.iter()
        .position(|(from, to)| p >= from.param && p <= to.param)
        .map_or(Placement::Boundary, Placement::Piece)
}

fn materialize(
    doc: &mut Document,
    sketch: EntityIndex,
    cut: &Cut,
    created: &mut Vec<EntityIndex>,
) -> SketchResult<EntityIndex> {
    if let Some(point) = cut.point {
        return Ok(point);
    }
    let point = doc.entities.add_point_2d(cut.co, sketch)?;
    if let Some(source) = cut.source {
        doc.add_coincident(point, source, Some(sketch))?;
    }
    created.push(point);
    Ok(point)
}

fn build_pieces(
    doc: &mut Document,
    segment: EntityIndex,
    sketch: EntityIndex,
    bounds: &[(EntityIndex, EntityIndex)],
) -> SketchResult<Vec<EntityIndex>> {
    let original = doc
        .entities
        .get(segment)
        .cloned()
        .ok_or(SketchError::MissingEntity { index: segment })?;
    let mut pieces = Vec::with_capacity(bounds.len());

    for (i, (a, b)) in bounds.iter().copied().enumerate() {
        let piece = match &original {
            Entity::Line2D(_) if i == 0 => {
                if let Some(Entity::Line2D(line)) = doc.entities.get_mut(segment) {
                    line.p1 = a;
                    line.p2 = b;
                    line.base.dirty = true;
                }
                segment
            }
            Entity::Line2D(_) => doc.entities.add_line_2d(a, b, sketch)?,
            Entity::Arc(_) if i == 0 => {
                if let Some(Entity::Arc(arc)) = doc.entities.get_mut(segment) {
                    arc.p1 = a;
                    arc.p2 = b;
                    arc.invert_direction = false;
                    arc.base.dirty = true;
                }
                segment
            }
            Entity::Arc(arc) => doc.entities.add_arc(arc.nm, arc.ct, a, b, sketch, false)?,
            Entity::Circle(circle) => {
                doc.entities
                    .add_arc(circle.nm, circle.ct, a, b, sketch, false)?
            }
            other => {
                return Err(SketchError::configuration(format!(
                    "cannot trim a {:?}",
                    other.kind()
                )))
            }
        };
        pieces.push(piece);
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sketch_model::{Arc, ConstraintKind, Line2D};

    fn sketch_doc() -> (Document, EntityIndex) {
        let mut doc = Document::new();
        let origin = doc.ensure_origin_elements().unwrap();
        let sketch = doc.entities.add_sketch("Sketch", origin.workplanes[0]).unwrap();
        (doc, sketch)
    }

    fn line(doc: &mut Document, sketch: EntityIndex, a: (f64, f64), b: (f64, f64)) -> EntityIndex {
        let p1 = doc.entities.add_point_2d(Vector2::new(a.0, a.1), sketch).unwrap();
        let p2 = doc.entities.add_point_2d(Vector2::new(b.0, b.1), sketch).unwrap();
        doc.entities.add_line_2d(p1, p2, sketch).unwrap()
    }

    fn ends(doc: &Document, index: EntityIndex) -> (Vector2<f64>, Vector2<f64>) {
        let l = doc.entities.get_as::<Line2D>(index).unwrap();
        (
            point_co(&doc.entities, l.p1).unwrap(),
            point_co(&doc.entities, l.p2).unwrap(),
        )
    }

    #[test]
    fn middle_pick_splits_line_in_two() {
        let (mut doc, sketch) = sketch_doc();
        let target = line(&mut doc, sketch, (0.0, 0.0), (10.0, 0.0));
        line(&mut doc, sketch, (3.0, -1.0), (3.0, 1.0));
        line(&mut doc, sketch, (7.0, -1.0), (7.0, 1.0));

        let outcome = trim(&mut doc, target, Vector2::new(5.0, 0.0)).unwrap().unwrap();
        assert_eq!(outcome.pieces.len(), 2);
        assert_eq!(outcome.pieces[0], target);

        let (a, b) = ends(&doc, outcome.pieces[0]);
        assert_relative_eq!(a, Vector2::new(0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(b, Vector2::new(3.0, 0.0), epsilon = 1e-9);
        let (a, b) = ends(&doc, outcome.pieces[1]);
        assert_relative_eq!(a, Vector2::new(7.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(b, Vector2::new(10.0, 0.0), epsilon = 1e-9);
        assert_eq!(doc.constraints.bucket_len(ConstraintKind::Coincident), 2);
    }

    #[test]
    fn horizontal_constraint_is_copied_to_new_piece() {
        let (mut doc, sketch) = sketch_doc();
        let target = line(&mut doc, sketch, (0.0, 0.0), (10.0, 0.0));
        doc.add_horizontal(target, None, Some(sketch)).unwrap();
        line(&mut doc, sketch, (3.0, -1.0), (3.0, 1.0));
        line(&mut doc, sketch, (7.0, -1.0), (7.0, 1.0));

        let outcome = trim(&mut doc, target, Vector2::new(5.0, 0.0)).unwrap().unwrap();
        assert_eq!(doc.constraints.bucket_len(ConstraintKind::Horizontal), 2);
        assert!(doc
            .constraints
            .all()
            .any(|(_, c)| c.kind() == ConstraintKind::Horizontal && c.entities() == vec![outcome.pieces[1]]));
    }

    #[test]
    fn uncut_segment_is_left_alone() {
        let (mut doc, sketch) = sketch_doc();
        let target = line(&mut doc, sketch, (0.0, 0.0), (10.0, 0.0));
        let before = doc.entities.len();
        assert_eq!(trim(&mut doc, target, Vector2::new(5.0, 0.0)).unwrap(), None);
        assert_eq!(doc.entities.len(), before);
    }

    #[test]
    fn arc_end_is_trimmed() {
        let (mut doc, sketch) = sketch_doc();
        let ct = doc.entities.add_point_2d(Vector2::zeros(), sketch).unwrap();
        let p1 = doc.entities.add_point_2d(Vector2::new(2.0, 0.0), sketch).unwrap();
        let p2 = doc.entities.add_point_2d(Vector2::new(-2.0, 0.0), sketch).unwrap();
        let nm = doc.entities.add_normal_2d(sketch).unwrap();
        let arc = doc.entities.add_arc(nm, ct, p1, p2, sketch, false).unwrap();
        line(&mut doc, sketch, (0.0, -3.0), (0.0, 3.0));

        let outcome = trim(&mut doc, arc, Vector2::new(-1.5, 1.5)).unwrap().unwrap();
        assert_eq!(outcome.pieces, vec![arc]);
        let kept = doc.entities.get_as::<Arc>(arc).unwrap();
        assert_relative_eq!(point_co(&doc.entities, kept.p2).unwrap(), Vector2::new(0.0, 2.0), epsilon = 1e-9);
        assert_relative_eq!(kept.sweep(&doc.entities).unwrap(), std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn midpoint_on_trimmed_line_is_dropped() {
        let (mut doc, sketch) = sketch_doc();
        let target = line(&mut doc, sketch, (0.0, 0.0), (10.0, 0.0));
        line(&mut doc, sketch, (7.0, -1.0), (7.0, 1.0));
        let mid = doc.entities.add_point_2d(Vector2::new(5.0, 0.0), sketch).unwrap();
        doc.add_midpoint(mid, target, Some(sketch)).unwrap();

        let outcome = trim(&mut doc, target, Vector2::new(9.0, 0.0)).unwrap().unwrap();
        assert_eq!(outcome.pieces, vec![target]);
        let (a, b) = ends(&doc, target);
        assert_relative_eq!(a, Vector2::new(0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(b, Vector2::new(7.0, 0.0), epsilon = 1e-9);
        assert_eq!(doc.constraints.bucket_len(ConstraintKind::Midpoint), 0);
        assert!(doc.entities.contains(mid));
    }
}
