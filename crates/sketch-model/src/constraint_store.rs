use tracing::debug;

use crate::constraint::{Constraint, ConstraintKind};
use crate::entity::EntityKind;
use crate::error::{SketchError, SketchResult};
use crate::index::{next_slot, ConstraintIndex, EntityIndex};
use crate::store::{EntityStore, Relocation};

/// Type-bucketed constraint storage addressed by packed [`ConstraintIndex`] values.
#[derive(Debug, Clone, Default)]
pub struct ConstraintStore {
    buckets: [Vec<Constraint>; ConstraintKind::COUNT],
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: ConstraintIndex) -> Option<&Constraint> {
        let (kind, slot) = index.breakdown()?;
        self.buckets[kind.tag() as usize].get(slot)
    }

    pub fn get_mut(&mut self, index: ConstraintIndex) -> Option<&mut Constraint> {
        let (kind, slot) = index.breakdown()?;
        self.buckets[kind.tag() as usize].get_mut(slot)
    }

    pub fn get_by_kind_and_local_index(&self, kind: ConstraintKind, slot: usize) -> Option<&Constraint> {
        self.buckets[kind.tag() as usize].get(slot)
    }

    /// Global index of a constraint borrowed from this store.
    pub fn index_of(&self, constraint: &Constraint) -> Option<ConstraintIndex> {
        let kind = constraint.kind();
        self.buckets[kind.tag() as usize]
            .iter()
            .position(|c| std::ptr::eq(c, constraint))
            .map(|slot| ConstraintIndex::assemble(kind, slot))
    }

    /// Every constraint in bucket order, then insertion order.
    pub fn all(&self) -> impl Iterator<Item = (ConstraintIndex, &Constraint)> {
        ConstraintKind::ALL.into_iter().flat_map(move |kind| {
            self.buckets[kind.tag() as usize]
                .iter()
                .enumerate()
                .map(move |(slot, c)| (ConstraintIndex::assemble(kind, slot), c))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Constraint> {
        self.buckets.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, kind: ConstraintKind) -> usize {
        self.buckets[kind.tag() as usize].len()
    }

    /// Constraints that reference `entity` directly, as entity or sketch.
    pub fn dependents_of(&self, entity: EntityIndex) -> Vec<ConstraintIndex> {
        self.all()
            .filter(|(_, c)| c.dependencies().contains(&entity))
            .map(|(index, _)| index)
            .collect()
    }

    /// Constraints owned by `sketch`.
    pub fn in_sketch(&self, sketch: EntityIndex) -> Vec<ConstraintIndex> {
        self.all()
            .filter(|(_, c)| c.sketch == Some(sketch))
            .map(|(index, _)| index)
            .collect()
    }

    /// Validate `constraint` against `entities` and append it.
    pub fn add(&mut self, constraint: Constraint, entities: &EntityStore) -> SketchResult<ConstraintIndex> {
        validate(&constraint, entities)?;
        self.push(constraint)
    }

    pub(crate) fn push(&mut self, constraint: Constraint) -> SketchResult<ConstraintIndex> {
        let kind = constraint.kind();
        let bucket = &mut self.buckets[kind.tag() as usize];
        let index = ConstraintIndex::assemble(kind, next_slot(bucket.len())?);
        bucket.push(constraint);
        debug!(%index, "constraint added");
        Ok(index)
    }

    /// Swap-remove; nothing references constraints except the selection,
    /// which the document rewrites from the returned relocation.
    pub(crate) fn swap_remove(&mut self, index: ConstraintIndex) -> SketchResult<Relocation<ConstraintIndex>> {
        let (kind, slot) = index
            .breakdown()
            .filter(|_| self.get(index).is_some())
            .ok_or_else(|| SketchError::configuration(format!("no constraint at index {index}")))?;
        let bucket = &mut self.buckets[kind.tag() as usize];
        let last = bucket.len() - 1;
        bucket.swap_remove(slot);
        let moved_from = (slot != last).then(|| ConstraintIndex::assemble(kind, last));
        debug!(%index, ?moved_from, "constraint removed");
        Ok(Relocation {
            removed: index,
            moved_from,
        })
    }
}

fn validate(constraint: &Constraint, entities: &EntityStore) -> SketchResult<()> {
    let kind = constraint.kind();
    let signature = kind.signature();
    let refs = constraint.entities();

    if refs.len() > signature.len() {
        return Err(SketchError::configuration(format!(
            "{:?} takes at most {} entities",
            kind,
            signature.len()
        )));
    }
    let required = signature.iter().filter(|slot| !slot.is_optional()).count();
    if refs.len() < required {
        return Err(SketchError::configuration(format!(
            "{:?} needs {} entities, got {}",
            kind,
            required,
            refs.len()
        )));
    }

    let mut kinds = Vec::with_capacity(refs.len());
    for (position, (index, slot)) in refs.iter().zip(signature).enumerate() {
        let entity_kind = entities.kind_of(*index)?;
        if !slot.allows(entity_kind) {
            return Err(SketchError::configuration(format!(
                "{:?} cannot reference a {:?} at position {}",
                kind,
                entity_kind,
                position + 1
            )));
        }
        kinds.push(entity_kind);
    }

    if let [first, second] = kinds[..] {
        check_pair(kind, first, second)?;
    }

    match constraint.sketch {
        Some(sketch) => entities.require_kind(sketch, &[EntityKind::Sketch])?,
        None if kind.requires_sketch() => {
            return Err(SketchError::configuration(format!(
                "{:?} constraints need an owning sketch",
                kind
            )))
        }
        None => {}
    }
    Ok(())
}

fn check_pair(kind: ConstraintKind, first: EntityKind, second: EntityKind) -> SketchResult<()> {
    if second == EntityKind::Workplane {
        if first != EntityKind::Point3D {
            return Err(SketchError::configuration(
                "only a 3D point can reference a workplane",
            ));
        }
        return Ok(());
    }

    let is_linear = |k: EntityKind| k.is_point() || k.is_line();
    if is_linear(first) && is_linear(second) && first.is_2d() != second.is_2d() {
        return Err(SketchError::configuration(format!(
            "{:?} mixes 2D and 3D entities ({:?}, {:?})",
            kind, first, second
        )));
    }
    if first.is_point() && second.is_curve() && first != EntityKind::Point2D {
        return Err(SketchError::configuration(
            "only 2D points can lie on a curve",
        ));
    }

    match kind {
        ConstraintKind::Equal if first.is_line() != second.is_line() => Err(
            SketchError::configuration("equal length between a line and a curve is not supported"),
        ),
        ConstraintKind::Tangent if !first.is_curve() && !second.is_curve() => Err(
            SketchError::configuration("tangent needs at least one arc or circle"),
        ),
        _ => Ok(()),
    }
}
