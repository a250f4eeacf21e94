//! Property-based tests for index packing and store integrity.

use nalgebra::Vector2;
use proptest::prelude::*;

use sketch_model::{
    ConstraintIndex, ConstraintKind, Document, ElementRef, EntityIndex, EntityKind,
};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
    (0..EntityKind::COUNT).prop_map(|i| EntityKind::ALL[i])
}

fn arb_constraint_kind() -> impl Strategy<Value = ConstraintKind> {
    (0..ConstraintKind::COUNT).prop_map(|i| ConstraintKind::ALL[i])
}

fn arb_slot() -> impl Strategy<Value = usize> {
    0usize..(1 << 20)
}

/// A polyline sketch with `points` vertices, a line per edge and a horizontal
/// constraint on every other line.
fn build_polyline(points: usize) -> (Document, EntityIndex) {
    let mut doc = Document::new();
    let origin = doc.ensure_origin_elements().unwrap();
    let sketch = doc.entities.add_sketch("Sketch", origin.workplanes[0]).unwrap();
    let indices: Vec<_> = (0..points)
        .map(|i| {
            doc.entities
                .add_point_2d(Vector2::new(i as f64, (i % 2) as f64), sketch)
                .unwrap()
        })
        .collect();
    for (i, pair) in indices.windows(2).enumerate() {
        let line = doc.entities.add_line_2d(pair[0], pair[1], sketch).unwrap();
        if i % 2 == 0 {
            doc.add_horizontal(line, None, Some(sketch)).unwrap();
        }
        doc.add_distance(pair[0], Some(pair[1]), None, Some(sketch)).unwrap();
    }
    (doc, sketch)
}

fn assert_no_dangling(doc: &Document) -> Result<(), TestCaseError> {
    for entity in doc.entities.iter() {
        for reference in entity.references() {
            prop_assert!(
                doc.entities.contains(reference),
                "{} references missing {}",
                entity.index(),
                reference
            );
        }
    }
    for (index, constraint) in doc.constraints.all() {
        for reference in constraint.dependencies() {
            prop_assert!(
                doc.entities.contains(reference),
                "{} references missing {}",
                index,
                reference
            );
        }
    }
    for index in doc.selection.entities() {
        prop_assert!(doc.entities.contains(*index));
    }
    for index in doc.selection.constraints() {
        prop_assert!(doc.constraints.get(*index).is_some());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Index packing
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn entity_index_breakdown_inverts_assemble(kind in arb_entity_kind(), slot in arb_slot()) {
        let index = EntityIndex::assemble(kind, slot);
        prop_assert_eq!(index.breakdown(), Some((kind, slot)));
        prop_assert!(!index.is_none());
    }

    #[test]
    fn constraint_index_breakdown_inverts_assemble(kind in arb_constraint_kind(), slot in arb_slot()) {
        let index = ConstraintIndex::assemble(kind, slot);
        prop_assert_eq!(index.breakdown(), Some((kind, slot)));
    }
}

// ---------------------------------------------------------------------------
// Removal keeps every reference live
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cascade_removal_leaves_no_dangling_references(
        points in 3usize..8,
        pick in 0usize..8,
    ) {
        let (mut doc, _) = build_polyline(points);
        let bucket = doc.entities.bucket(EntityKind::Point2D).to_vec();
        for entity in &bucket {
            doc.selection.select(entity.index());
        }
        for (index, _) in doc.constraints.all().collect::<Vec<_>>() {
            doc.selection.select(index);
        }
        let target = bucket[pick % bucket.len()].index();

        doc.remove_entity_cascade(target).unwrap();
        assert_no_dangling(&doc)?;
        prop_assert_eq!(doc.entities.bucket_len(EntityKind::Point2D), points - 1);
    }

    #[test]
    fn refused_removal_changes_nothing(points in 3usize..8, pick in 0usize..8) {
        let (mut doc, _) = build_polyline(points);
        let before_entities = doc.entities.len();
        let before_constraints = doc.constraints.len();
        let target = EntityIndex::assemble(EntityKind::Point2D, pick % points);

        let result = doc.remove_entity(target);
        prop_assert!(result.is_err());
        prop_assert_eq!(doc.entities.len(), before_entities);
        prop_assert_eq!(doc.constraints.len(), before_constraints);
    }

    #[test]
    fn constraint_removal_keeps_selection_consistent(points in 3usize..8, pick in 0usize..16) {
        let (mut doc, _) = build_polyline(points);
        let all: Vec<_> = doc.constraints.all().map(|(i, _)| i).collect();
        for index in &all {
            doc.selection.select(*index);
        }
        let target = all[pick % all.len()];
        doc.remove_constraint(target).unwrap();
        prop_assert_eq!(doc.selection.constraints().len(), all.len() - 1);
        assert_no_dangling(&doc)?;
    }
}

// ---------------------------------------------------------------------------
// Dirty propagation
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn marking_a_point_dirty_dirties_its_lines(points in 3usize..8, pick in 0usize..8) {
        let (mut doc, _) = build_polyline(points);
        for entity in doc.entities.iter_mut() {
            entity.base_mut().dirty = false;
        }
        for constraint in doc.constraints.iter_mut() {
            constraint.dirty = false;
        }
        let point = EntityIndex::assemble(EntityKind::Point2D, pick % points);
        doc.mark_dirty(point);

        for line in doc.entities.bucket(EntityKind::Line2D) {
            let touches = line.dependencies().contains(&point);
            prop_assert_eq!(doc.is_dirty(line.index()), touches);
        }
        for (index, constraint) in doc.constraints.all() {
            let touches = constraint.entities().iter().any(|e| {
                *e == point || doc.entities.get(*e).is_some_and(|x| x.dependencies().contains(&point))
            });
            prop_assert_eq!(doc.is_dirty(ElementRef::Constraint(index)), touches);
        }
    }
}
