use std::collections::HashSet;

use crate::constraint_store::ConstraintStore;
use crate::index::{ElementRef, EntityIndex};
use crate::store::EntityStore;

/// Read-only view answering dependency and dirtiness questions over both stores.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    entities: &'a EntityStore,
    constraints: &'a ConstraintStore,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(entities: &'a EntityStore, constraints: &'a ConstraintStore) -> Self {
        Self {
            entities,
            constraints,
        }
    }

    /// Direct references of an element. Dangling elements have none.
    pub fn dependencies(&self, element: ElementRef) -> Vec<EntityIndex> {
        match element {
            ElementRef::Entity(index) => self
                .entities
                .get(index)
                .map(|e| e.dependencies())
                .unwrap_or_default(),
            ElementRef::Constraint(index) => self
                .constraints
                .get(index)
                .map(|c| c.dependencies())
                .unwrap_or_default(),
        }
    }

    /// Entities and constraints that directly depend on `index`.
    pub fn dependents(&self, index: EntityIndex) -> Vec<ElementRef> {
        let mut out: Vec<ElementRef> = self
            .entities
            .dependents_of(index)
            .into_iter()
            .map(ElementRef::from)
            .collect();
        out.extend(
            self.constraints
                .dependents_of(index)
                .into_iter()
                .map(ElementRef::from),
        );
        out
    }

    fn own_flag(&self, element: ElementRef) -> bool {
        match element {
            ElementRef::Entity(index) => self.entities.get(index).is_some_and(|e| e.base().dirty),
            ElementRef::Constraint(index) => self.constraints.get(index).is_some_and(|c| c.dirty),
        }
    }

    /// Own flag set, or any transitive dependency dirty. Evaluated on demand.
    pub fn is_dirty(&self, element: ElementRef) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![element];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if self.own_flag(current) {
                return true;
            }
            stack.extend(
                self.dependencies(current)
                    .into_iter()
                    .map(ElementRef::Entity),
            );
        }
        false
    }

    /// `roots` plus everything they transitively depend on.
    pub fn dependency_closure(&self, roots: &[EntityIndex]) -> Vec<EntityIndex> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<EntityIndex> = roots.to_vec();
        while let Some(current) = stack.pop() {
            if current.is_none() || !seen.insert(current) {
                continue;
            }
            order.push(current);
            if let Some(entity) = self.entities.get(current) {
                stack.extend(entity.references());
            }
        }
        order
    }

    /// Everything that transitively depends on `index`, nearest first.
    pub fn transitive_dependents(&self, index: EntityIndex) -> Vec<ElementRef> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from([index]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(current) {
                if !seen.insert(dependent) {
                    continue;
                }
                order.push(dependent);
                if let ElementRef::Entity(entity) = dependent {
                    queue.push_back(entity);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Constraint, ConstraintData};
    use nalgebra::{UnitQuaternion, Vector2, Vector3};

    fn clean(entities: &mut EntityStore) {
        for entity in entities.iter_mut() {
            entity.base_mut().dirty = false;
        }
    }

    #[test]
    fn dirtiness_propagates_through_chain() {
        let mut entities = EntityStore::new();
        let origin = entities.add_point_3d(Vector3::zeros()).unwrap();
        let nm = entities.add_normal_3d(UnitQuaternion::identity()).unwrap();
        let wp = entities.add_workplane(origin, nm).unwrap();
        let sketch = entities.add_sketch("s", wp).unwrap();
        let a = entities.add_point_2d(Vector2::zeros(), sketch).unwrap();
        let b = entities.add_point_2d(Vector2::new(1.0, 0.0), sketch).unwrap();
        let line = entities.add_line_2d(a, b, sketch).unwrap();
        let mut constraints = ConstraintStore::new();
        let horizontal = constraints
            .add(
                Constraint::new(
                    ConstraintData::Horizontal {
                        entity1: line,
                        entity2: None,
                    },
                    Some(sketch),
                ),
                &entities,
            )
            .unwrap();
        clean(&mut entities);
        constraints.iter_mut().for_each(|c| c.dirty = false);

        let resolver = DependencyResolver::new(&entities, &constraints);
        assert!(!resolver.is_dirty(line.into()));

        entities.get_mut(origin).unwrap().base_mut().dirty = true;
        let resolver = DependencyResolver::new(&entities, &constraints);
        // origin -> workplane -> sketch -> point -> line -> constraint
        assert!(resolver.is_dirty(wp.into()));
        assert!(resolver.is_dirty(line.into()));
        assert!(resolver.is_dirty(horizontal.into()));
        assert!(!resolver.is_dirty(nm.into()));
    }

    #[test]
    fn dependents_cover_both_stores() {
        let mut entities = EntityStore::new();
        let a = entities.add_point_3d(Vector3::zeros()).unwrap();
        let b = entities.add_point_3d(Vector3::x()).unwrap();
        let line = entities.add_line_3d(a, b).unwrap();
        let mut constraints = ConstraintStore::new();
        let distance = constraints
            .add(
                Constraint::new(
                    ConstraintData::Distance {
                        entity1: a,
                        entity2: Some(b),
                        value: 1.0,
                        flip: false,
                    },
                    None,
                ),
                &entities,
            )
            .unwrap();
        let resolver = DependencyResolver::new(&entities, &constraints);
        assert_eq!(
            resolver.dependents(a),
            vec![ElementRef::Entity(line), ElementRef::Constraint(distance)]
        );
        assert_eq!(resolver.dependency_closure(&[line]).len(), 3);
    }
}
