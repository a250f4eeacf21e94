use nalgebra::{UnitQuaternion, Vector2, Vector3};
use tracing::debug;

use crate::entity::*;
use crate::error::{SketchError, SketchResult};
use crate::index::{next_slot, EntityIndex};

/// Result of a swap-remove: which index disappeared and which element (if
/// any) was moved into the freed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation<I> {
    pub removed: I,
    /// Old index of the element now living at `removed`.
    pub moved_from: Option<I>,
}

impl<I: Copy + PartialEq> Relocation<I> {
    /// Map an index observed before the removal to its current value.
    /// `None` means the index referred to the removed element.
    pub fn apply(&self, index: I) -> Option<I> {
        if index == self.removed {
            None
        } else if Some(index) == self.moved_from {
            Some(self.removed)
        } else {
            Some(index)
        }
    }
}

/// Type-bucketed entity storage addressed by packed [`EntityIndex`] values.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    buckets: [Vec<Entity>; EntityKind::COUNT],
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: EntityIndex) -> Option<&Entity> {
        let (kind, slot) = index.breakdown()?;
        self.buckets[kind.tag() as usize].get(slot)
    }

    pub fn get_mut(&mut self, index: EntityIndex) -> Option<&mut Entity> {
        let (kind, slot) = index.breakdown()?;
        self.buckets[kind.tag() as usize].get_mut(slot)
    }

    pub fn contains(&self, index: EntityIndex) -> bool {
        self.get(index).is_some()
    }

    /// Typed lookup. Fails with `MissingEntity` or `Configuration` when the
    /// index is dangling or of another kind.
    pub fn get_as<T: EntityVariant>(&self, index: EntityIndex) -> SketchResult<&T> {
        let entity = self
            .get(index)
            .ok_or(SketchError::MissingEntity { index })?;
        T::from_entity(entity).ok_or_else(|| {
            SketchError::configuration(format!(
                "entity {} is a {:?}, expected {:?}",
                index,
                entity.kind(),
                T::KIND
            ))
        })
    }

    pub fn get_as_mut<T: EntityVariant>(&mut self, index: EntityIndex) -> SketchResult<&mut T> {
        let entity = self
            .get_mut(index)
            .ok_or(SketchError::MissingEntity { index })?;
        let kind = entity.kind();
        T::from_entity_mut(entity).ok_or_else(|| {
            SketchError::configuration(format!(
                "entity {} is a {:?}, expected {:?}",
                index,
                kind,
                T::KIND
            ))
        })
    }

    pub fn kind_of(&self, index: EntityIndex) -> SketchResult<EntityKind> {
        self.get(index)
            .map(Entity::kind)
            .ok_or(SketchError::MissingEntity { index })
    }

    /// Check that `index` resolves to one of `allowed`.
    pub fn require_kind(&self, index: EntityIndex, allowed: &[EntityKind]) -> SketchResult<()> {
        let kind = self.kind_of(index)?;
        if allowed.contains(&kind) {
            Ok(())
        } else {
            Err(SketchError::configuration(format!(
                "entity {} is a {:?}, expected one of {:?}",
                index, kind, allowed
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket(&self, kind: EntityKind) -> &[Entity] {
        &self.buckets[kind.tag() as usize]
    }

    pub fn bucket_len(&self, kind: EntityKind) -> usize {
        self.buckets[kind.tag() as usize].len()
    }

    /// All entities, bucket by bucket, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.buckets.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.buckets.iter_mut().flatten()
    }

    pub fn indices(&self) -> Vec<EntityIndex> {
        self.iter().map(Entity::index).collect()
    }

    /// Iterate typed entities of one kind.
    pub fn iter_as<'a, T: EntityVariant + 'a>(&'a self) -> impl Iterator<Item = &'a T> {
        self.bucket(T::KIND).iter().filter_map(T::from_entity)
    }

    /// Entities owned by `sketch`.
    pub fn in_sketch(&self, sketch: EntityIndex) -> impl Iterator<Item = &Entity> {
        self.iter().filter(move |e| e.sketch() == Some(sketch))
    }

    /// Entities that list `index` among their dependencies.
    pub fn dependents_of(&self, index: EntityIndex) -> Vec<EntityIndex> {
        self.iter()
            .filter(|e| e.dependencies().contains(&index))
            .map(Entity::index)
            .collect()
    }

    fn insert<T: EntityVariant>(
        &mut self,
        build: impl FnOnce(EntityBase) -> T,
    ) -> SketchResult<EntityIndex> {
        let bucket = &mut self.buckets[T::KIND.tag() as usize];
        let index = EntityIndex::assemble(T::KIND, next_slot(bucket.len())?);
        bucket.push(build(EntityBase::new(index)).into_entity());
        debug!(%index, "entity added");
        Ok(index)
    }

    /// Append an entity carrying its own base (used when loading documents).
    pub(crate) fn push_entity(&mut self, mut entity: Entity) -> SketchResult<EntityIndex> {
        let kind = entity.kind();
        let index = EntityIndex::assemble(kind, next_slot(self.bucket_len(kind))?);
        entity.base_mut().index = index;
        self.buckets[kind.tag() as usize].push(entity);
        Ok(index)
    }

    fn require_in_sketch(&self, index: EntityIndex, sketch: EntityIndex) -> SketchResult<()> {
        let owner = self
            .get(index)
            .ok_or(SketchError::MissingEntity { index })?
            .sketch();
        if owner == Some(sketch) {
            Ok(())
        } else {
            Err(SketchError::configuration(format!(
                "entity {} does not belong to sketch {}",
                index, sketch
            )))
        }
    }

    // ── Factories ──────────────────────────────────────────────────────────

    pub fn add_point_3d(&mut self, location: Vector3<f64>) -> SketchResult<EntityIndex> {
        self.insert(|base| Point3D { base, location })
    }

    pub fn add_line_3d(&mut self, p1: EntityIndex, p2: EntityIndex) -> SketchResult<EntityIndex> {
        self.require_kind(p1, &[EntityKind::Point3D])?;
        self.require_kind(p2, &[EntityKind::Point3D])?;
        self.insert(|base| Line3D { base, p1, p2 })
    }

    pub fn add_normal_3d(&mut self, orientation: UnitQuaternion<f64>) -> SketchResult<EntityIndex> {
        self.insert(|base| Normal3D { base, orientation })
    }

    pub fn add_workplane(&mut self, p1: EntityIndex, nm: EntityIndex) -> SketchResult<EntityIndex> {
        self.require_kind(p1, &[EntityKind::Point3D])?;
        self.require_kind(nm, &[EntityKind::Normal3D])?;
        self.insert(|base| Workplane { base, p1, nm })
    }

    pub fn add_sketch(&mut self, name: &str, wp: EntityIndex) -> SketchResult<EntityIndex> {
        self.require_kind(wp, &[EntityKind::Workplane])?;
        let name = name.to_string();
        self.insert(|mut base| {
            base.name = name;
            Sketch {
                base,
                wp,
                origin_point: None,
                solver_state: Default::default(),
                dof: 0,
            }
        })
    }

    pub fn add_point_2d(&mut self, co: Vector2<f64>, sketch: EntityIndex) -> SketchResult<EntityIndex> {
        self.require_kind(sketch, &[EntityKind::Sketch])?;
        self.insert(|base| Point2D { base, co, sketch })
    }

    pub fn add_line_2d(
        &mut self,
        p1: EntityIndex,
        p2: EntityIndex,
        sketch: EntityIndex,
    ) -> SketchResult<EntityIndex> {
        self.require_kind(sketch, &[EntityKind::Sketch])?;
        for p in [p1, p2] {
            self.require_kind(p, &[EntityKind::Point2D])?;
            self.require_in_sketch(p, sketch)?;
        }
        self.insert(|base| Line2D {
            base,
            p1,
            p2,
            sketch,
        })
    }

    pub fn add_normal_2d(&mut self, sketch: EntityIndex) -> SketchResult<EntityIndex> {
        self.require_kind(sketch, &[EntityKind::Sketch])?;
        self.insert(|base| Normal2D { base, sketch })
    }

    pub fn add_arc(
        &mut self,
        nm: EntityIndex,
        ct: EntityIndex,
        p1: EntityIndex,
        p2: EntityIndex,
        sketch: EntityIndex,
        invert_direction: bool,
    ) -> SketchResult<EntityIndex> {
        self.require_kind(sketch, &[EntityKind::Sketch])?;
        self.require_kind(nm, &[EntityKind::Normal2D])?;
        for p in [ct, p1, p2] {
            self.require_kind(p, &[EntityKind::Point2D])?;
            self.require_in_sketch(p, sketch)?;
        }
        if ct == p1 || ct == p2 {
            return Err(SketchError::degenerate("arc endpoint shares the centre point"));
        }
        self.insert(|base| Arc {
            base,
            nm,
            ct,
            p1,
            p2,
            sketch,
            invert_direction,
        })
    }

    pub fn add_circle(
        &mut self,
        nm: EntityIndex,
        ct: EntityIndex,
        radius: f64,
        sketch: EntityIndex,
    ) -> SketchResult<EntityIndex> {
        self.require_kind(sketch, &[EntityKind::Sketch])?;
        self.require_kind(nm, &[EntityKind::Normal2D])?;
        self.require_kind(ct, &[EntityKind::Point2D])?;
        self.require_in_sketch(ct, sketch)?;
        if !(radius > 0.0) {
            return Err(SketchError::degenerate(format!(
                "circle radius must be positive, got {radius}"
            )));
        }
        self.insert(|base| Circle {
            base,
            nm,
            ct,
            radius,
            sketch,
        })
    }

    // ── Removal ────────────────────────────────────────────────────────────

    /// Swap-remove the entity at `index` and rewrite every entity reference
    /// to the moved element. Refuses while other entities depend on it.
    /// Constraint references are rewritten by the owning document.
    pub(crate) fn swap_remove(&mut self, index: EntityIndex) -> SketchResult<Relocation<EntityIndex>> {
        let (kind, slot) = index
            .breakdown()
            .filter(|_| self.contains(index))
            .ok_or(SketchError::MissingEntity { index })?;

        let dependents = self.dependents_of(index);
        if !dependents.is_empty() {
            return Err(SketchError::ReferentialIntegrityViolation {
                element: index.into(),
                dependents: dependents.into_iter().map(Into::into).collect(),
            });
        }

        let bucket = &mut self.buckets[kind.tag() as usize];
        let last = bucket.len() - 1;
        bucket.swap_remove(slot);
        let moved_from = if slot != last {
            bucket[slot].base_mut().index = index;
            Some(EntityIndex::assemble(kind, last))
        } else {
            None
        };

        let relocation = Relocation {
            removed: index,
            moved_from,
        };
        for entity in self.iter_mut() {
            entity.remap_references(|i| relocation.apply(i).unwrap_or(EntityIndex::NONE));
        }
        debug!(%index, ?moved_from, "entity removed");
        Ok(relocation)
    }
}
