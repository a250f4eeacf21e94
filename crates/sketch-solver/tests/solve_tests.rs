use approx::assert_relative_eq;
use nalgebra::{Vector2, Vector3};
use sketch_model::*;
use sketch_solver::*;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn sketch_doc() -> (Document, EntityIndex) {
    let mut doc = Document::new();
    let origin = doc.ensure_origin_elements().unwrap();
    let sketch = doc.entities.add_sketch("Sketch", origin.workplanes[0]).unwrap();
    doc.set_active_sketch(Some(sketch)).unwrap();
    (doc, sketch)
}

fn point(doc: &mut Document, sketch: EntityIndex, x: f64, y: f64) -> EntityIndex {
    doc.entities.add_point_2d(Vector2::new(x, y), sketch).unwrap()
}

fn fix(doc: &mut Document, index: EntityIndex) {
    doc.entities.get_mut(index).unwrap().base_mut().fixed = true;
}

fn co(doc: &Document, index: EntityIndex) -> Vector2<f64> {
    doc.entities.get_as::<Point2D>(index).unwrap().co
}

fn assert_point_near(doc: &Document, index: EntityIndex, expected: (f64, f64)) {
    let p = co(doc, index);
    assert!(
        (p.x - expected.0).abs() < 1e-6 && (p.y - expected.1).abs() < 1e-6,
        "point {} = ({:.4}, {:.4}), expected ({:.4}, {:.4})",
        index,
        p.x,
        p.y,
        expected.0,
        expected.1,
    );
}

// ── Solve + write back ──────────────────────────────────────────────────────

#[test]
fn rectangle_100x50_fully_constrained() {
    let (mut doc, sketch) = sketch_doc();
    let p1 = point(&mut doc, sketch, 0.0, 0.0);
    let p2 = point(&mut doc, sketch, 90.0, 3.0);
    let p3 = point(&mut doc, sketch, 95.0, 45.0);
    let p4 = point(&mut doc, sketch, 2.0, 48.0);
    fix(&mut doc, p1);

    let bottom = doc.entities.add_line_2d(p1, p2, sketch).unwrap();
    let right = doc.entities.add_line_2d(p2, p3, sketch).unwrap();
    let top = doc.entities.add_line_2d(p3, p4, sketch).unwrap();
    let left = doc.entities.add_line_2d(p4, p1, sketch).unwrap();

    doc.add_horizontal(bottom, None, Some(sketch)).unwrap();
    doc.add_horizontal(top, None, Some(sketch)).unwrap();
    doc.add_vertical(right, None, Some(sketch)).unwrap();
    doc.add_vertical(left, None, Some(sketch)).unwrap();
    doc.add_distance(p1, Some(p2), Some(100.0), Some(sketch)).unwrap();
    doc.add_distance(p2, Some(p3), Some(50.0), Some(sketch)).unwrap();

    let report = SolverBridge::new().solve(&mut doc).unwrap();
    assert_eq!(report.status, SolveStatus::Okay);
    assert_eq!(report.dof, 0);

    assert_point_near(&doc, p1, (0.0, 0.0));
    assert_point_near(&doc, p2, (100.0, 0.0));
    assert_point_near(&doc, p3, (100.0, 50.0));
    assert_point_near(&doc, p4, (0.0, 50.0));

    let state = doc.entities.get_as::<Sketch>(sketch).unwrap();
    assert_eq!(state.solver_state, SolveStatus::Okay);
    assert_eq!(state.dof, 0);
    assert!(doc.entities.in_sketch(sketch).all(|e| !e.base().dirty));
}

#[test]
fn horizontal_line_keeps_free_dof() {
    let (mut doc, sketch) = sketch_doc();
    let a = point(&mut doc, sketch, 0.0, 0.0);
    let b = point(&mut doc, sketch, 10.0, 4.0);
    fix(&mut doc, a);
    let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
    doc.add_horizontal(line, None, Some(sketch)).unwrap();

    let report = SolverBridge::new().solve(&mut doc).unwrap();
    assert!(report.is_okay());
    assert_eq!(report.dof, 1);
    assert_relative_eq!(co(&doc, b).y, 0.0, epsilon = 1e-9);
}

#[test]
fn diameter_sets_circle_radius() {
    let (mut doc, sketch) = sketch_doc();
    let center = point(&mut doc, sketch, 1.0, 1.0);
    let normal = doc.entities.add_normal_2d(sketch).unwrap();
    let circle = doc.entities.add_circle(normal, center, 2.0, sketch).unwrap();
    doc.add_diameter(circle, Some(10.0), false, Some(sketch)).unwrap();

    SolverBridge::new().solve(&mut doc).unwrap().into_result().unwrap();
    let radius = doc.entities.get_as::<Circle>(circle).unwrap().radius;
    assert_relative_eq!(radius, 5.0, epsilon = 1e-8);
}

#[test]
fn line_becomes_tangent_to_circle() {
    let (mut doc, sketch) = sketch_doc();
    let a = point(&mut doc, sketch, 0.0, 0.0);
    let b = point(&mut doc, sketch, 10.0, 0.0);
    fix(&mut doc, a);
    fix(&mut doc, b);
    let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
    let center = point(&mut doc, sketch, 5.0, 3.0);
    let normal = doc.entities.add_normal_2d(sketch).unwrap();
    let circle = doc.entities.add_circle(normal, center, 2.0, sketch).unwrap();
    doc.add_tangent(line, circle, Some(sketch)).unwrap();

    assert!(SolverBridge::new().solve(&mut doc).unwrap().is_okay());
    let radius = doc.entities.get_as::<Circle>(circle).unwrap().radius;
    assert_relative_eq!(co(&doc, center).y.abs(), radius, epsilon = 1e-8);
}

#[test]
fn points_in_space_solve_without_sketch() {
    let mut doc = Document::new();
    let a = doc.entities.add_point_3d(Vector3::zeros()).unwrap();
    let b = doc.entities.add_point_3d(Vector3::new(1.0, 2.0, 2.0)).unwrap();
    fix(&mut doc, a);
    doc.add_distance(a, Some(b), Some(6.0), None).unwrap();

    let report = SolverBridge::new().solve(&mut doc).unwrap();
    assert!(report.is_okay());
    assert_eq!(report.sketch, None);
    let location = doc.entities.get_as::<Point3D>(b).unwrap().location;
    assert_relative_eq!(location.norm(), 6.0, epsilon = 1e-8);
}

// ── Failure handling ────────────────────────────────────────────────────────

#[test]
fn contradictory_distances_leave_geometry_untouched() {
    let (mut doc, sketch) = sketch_doc();
    let a = point(&mut doc, sketch, 0.0, 0.0);
    let b = point(&mut doc, sketch, 3.0, 4.0);
    fix(&mut doc, a);
    let first = doc.add_distance(a, Some(b), Some(5.0), Some(sketch)).unwrap();
    let second = doc.add_distance(a, Some(b), Some(7.0), Some(sketch)).unwrap();

    let report = SolverBridge::new().solve(&mut doc).unwrap();
    assert_eq!(report.status, SolveStatus::Inconsistent);
    assert!(report.failed_constraints.contains(&first));
    assert!(report.failed_constraints.contains(&second));
    assert_eq!(co(&doc, b), Vector2::new(3.0, 4.0));
    assert!(doc.constraints.get(second).unwrap().failed);
    assert_eq!(
        doc.entities.get_as::<Sketch>(sketch).unwrap().solver_state,
        SolveStatus::Inconsistent
    );
    assert!(matches!(
        report.into_result(),
        Err(SketchError::SolveFailure {
            status: SolveStatus::Inconsistent
        })
    ));
}

#[test]
fn failed_flags_clear_after_successful_solve() {
    let (mut doc, sketch) = sketch_doc();
    let a = point(&mut doc, sketch, 0.0, 0.0);
    let b = point(&mut doc, sketch, 3.0, 4.0);
    fix(&mut doc, a);
    let distance = doc.add_distance(a, Some(b), Some(8.0), Some(sketch)).unwrap();
    doc.constraints.get_mut(distance).unwrap().failed = true;

    assert!(SolverBridge::new().solve(&mut doc).unwrap().is_okay());
    assert!(!doc.constraints.get(distance).unwrap().failed);
}

#[test]
fn inactive_sketch_is_not_moved() {
    let (mut doc, sketch) = sketch_doc();
    let origin = doc.origin_elements().unwrap();
    let other = doc.entities.add_sketch("Other", origin.workplanes[1]).unwrap();
    let a = point(&mut doc, other, 0.0, 0.0);
    let b = point(&mut doc, other, 10.0, 4.0);
    let line = doc.entities.add_line_2d(a, b, other).unwrap();
    doc.add_horizontal(line, None, Some(other)).unwrap();

    let report = SolverBridge::new().solve(&mut doc).unwrap();
    assert_eq!(report.sketch, Some(sketch));
    assert_eq!(co(&doc, b), Vector2::new(10.0, 4.0));
}

#[test]
fn degenerate_arc_in_inactive_sketch_does_not_block_solve() {
    let (mut doc, sketch) = sketch_doc();
    let a = point(&mut doc, sketch, 0.0, 0.0);
    let b = point(&mut doc, sketch, 10.0, 3.0);
    let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
    doc.add_horizontal(line, None, Some(sketch)).unwrap();

    let origin = doc.origin_elements().unwrap();
    let other = doc.entities.add_sketch("Other", origin.workplanes[1]).unwrap();
    let nm = doc.entities.add_normal_2d(other).unwrap();
    let c = point(&mut doc, other, 0.0, 0.0);
    let circle = doc.entities.add_circle(nm, c, 1.0, other).unwrap();
    let start = point(&mut doc, other, 2.0, 0.0);
    let end = point(&mut doc, other, 0.0, 2.0);
    let arc = doc.entities.add_arc(nm, c, start, end, other, false).unwrap();
    doc.add_tangent(circle, arc, Some(other)).unwrap();
    // Collapse the arc start onto its centre after the fact.
    if let Some(Entity::Point2D(p)) = doc.entities.get_mut(start) {
        p.co = Vector2::zeros();
    }

    let report = SolverBridge::new().solve(&mut doc).unwrap();
    assert!(report.is_okay());
    assert_relative_eq!(co(&doc, b).y, co(&doc, a).y, epsilon = 1e-9);
}

// ── Tweak ───────────────────────────────────────────────────────────────────

#[test]
fn tweaked_point_is_held_in_place() {
    let (mut doc, sketch) = sketch_doc();
    let a = point(&mut doc, sketch, 0.0, 0.0);
    let b = point(&mut doc, sketch, 10.0, 0.0);
    let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
    doc.add_horizontal(line, None, Some(sketch)).unwrap();

    let mut bridge = SolverBridge::new();
    bridge.set_tweak(b, Vector3::new(5.0, 3.0, 0.0));
    assert!(bridge.solve(&mut doc).unwrap().is_okay());
    assert_point_near(&doc, b, (5.0, 3.0));
    assert_relative_eq!(co(&doc, a).y, 3.0, epsilon = 1e-9);

    bridge.clear_tweak();
    assert!(bridge.solve(&mut doc).unwrap().is_okay());
    assert_point_near(&doc, b, (5.0, 3.0));
}

// ── Multi-sketch ────────────────────────────────────────────────────────────

#[test]
fn solve_all_reports_space_then_each_sketch() {
    let (mut doc, sketch) = sketch_doc();
    let origin = doc.origin_elements().unwrap();
    let other = doc.entities.add_sketch("Other", origin.workplanes[2]).unwrap();
    let a = point(&mut doc, other, 0.0, 0.0);
    let b = point(&mut doc, other, 10.0, 4.0);
    fix(&mut doc, a);
    let line = doc.entities.add_line_2d(a, b, other).unwrap();
    doc.add_vertical(line, None, Some(other)).unwrap();

    let reports = SolverBridge::new().solve_all(&mut doc).unwrap();
    let order: Vec<_> = reports.iter().map(|r| r.sketch).collect();
    assert_eq!(order, vec![None, Some(sketch), Some(other)]);
    assert!(reports.iter().all(|r| r.is_okay()));
    assert_relative_eq!(co(&doc, b).x, 0.0, epsilon = 1e-9);
}
