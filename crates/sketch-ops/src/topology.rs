//! Reconstruction of connected curve chains from a sketch's flat entity set.

use std::collections::{HashMap, HashSet, VecDeque};

use sketch_model::{Entity, EntityIndex, EntityStore, SketchResult};
use tracing::{debug, instrument};

/// An ordered chain of path entities. `inverted[i]` is set when segment `i`
/// is traversed end to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<EntityIndex>,
    pub inverted: Vec<bool>,
    pub cyclic: bool,
}

impl Path {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn contains(&self, entity: EntityIndex) -> bool {
        self.segments.contains(&entity)
    }

    /// Segments with their traversal flags.
    pub fn iter(&self) -> impl Iterator<Item = (EntityIndex, bool)> + '_ {
        self.segments.iter().copied().zip(self.inverted.iter().copied())
    }
}

/// Canonical start and end point of a segment.
fn ends(entity: &Entity) -> Option<(EntityIndex, EntityIndex)> {
    match entity {
        Entity::Line2D(line) => Some((line.p1, line.p2)),
        Entity::Arc(arc) => Some((arc.start(), arc.end())),
        _ => None,
    }
}

/// Whether an ordered segment list closes on itself: a lone circle always
/// does, two segments must share both connection points, longer chains must
/// connect last to first.
pub fn is_cyclic_path(store: &EntityStore, segments: &[EntityIndex]) -> bool {
    let points = |index: &EntityIndex| -> HashSet<EntityIndex> {
        store
            .get(*index)
            .map(|e| e.connection_points().into_iter().collect())
            .unwrap_or_default()
    };
    match segments {
        [] => false,
        [single] => store.get(*single).is_some_and(Entity::is_closed),
        [first, second] => {
            let (a, b) = (points(first), points(second));
            a.len() == 2 && a == b
        }
        [first, .., last] => !points(first).is_disjoint(&points(last)),
    }
}

/// Walks the path entities of one sketch.
pub struct TopologyWalker<'a> {
    store: &'a EntityStore,
    entities: Vec<EntityIndex>,
    adjacency: HashMap<EntityIndex, Vec<EntityIndex>>,
}

impl<'a> TopologyWalker<'a> {
    /// Collect the sketch's non-construction path entities and index them by
    /// connection point.
    pub fn new(store: &'a EntityStore, sketch: EntityIndex) -> Self {
        let entities: Vec<EntityIndex> = store
            .in_sketch(sketch)
            .filter(|e| e.is_path() && !e.base().construction)
            .map(Entity::index)
            .collect();
        let mut adjacency: HashMap<EntityIndex, Vec<EntityIndex>> = HashMap::new();
        for index in &entities {
            if let Some(entity) = store.get(*index) {
                for point in entity.connection_points() {
                    adjacency.entry(point).or_default().push(*index);
                }
            }
        }
        Self {
            store,
            entities,
            adjacency,
        }
    }

    /// Every path of the sketch. Each entity appears in exactly one path.
    #[instrument(skip(self), fields(entities = self.entities.len()))]
    pub fn walk(&self) -> Vec<Path> {
        let mut visited = HashSet::new();
        // Pending path seeds, with the point a fork path starts from.
        let mut worklist: VecDeque<(EntityIndex, Option<EntityIndex>)> = VecDeque::new();
        let mut paths = Vec::new();

        for seed in &self.entities {
            if visited.contains(seed) {
                continue;
            }
            worklist.push_back((*seed, None));
            while let Some((entity, from)) = worklist.pop_front() {
                if !visited.insert(entity) {
                    continue;
                }
                if let Some(path) = self.build_path(entity, from, &mut visited, &mut worklist) {
                    paths.push(path);
                }
            }
        }
        debug!(paths = paths.len(), "sketch walked");
        paths
    }

    fn build_path(
        &self,
        seed: EntityIndex,
        from: Option<EntityIndex>,
        visited: &mut HashSet<EntityIndex>,
        worklist: &mut VecDeque<(EntityIndex, Option<EntityIndex>)>,
    ) -> Option<Path> {
        let entity = self.store.get(seed)?;
        let Some((start, end)) = ends(entity) else {
            return Some(Path {
                segments: vec![seed],
                inverted: vec![false],
                cyclic: entity.is_closed(),
            });
        };

        let seed_inverted = from == Some(end);
        let mut segments = VecDeque::from([seed]);
        let mut inverted = VecDeque::from([seed_inverted]);
        let (tail, head) = if seed_inverted { (end, start) } else { (start, end) };

        // Forward from the far end of the seed.
        let mut point = head;
        while let Some(next) = self.step(point, visited, worklist) {
            let Some((s, e)) = self.store.get(next).and_then(ends) else {
                break;
            };
            let flipped = s != point;
            segments.push_back(next);
            inverted.push_back(flipped);
            point = if flipped { s } else { e };
        }

        // Fork paths only grow away from the shared point.
        if from.is_none() {
            let mut point = tail;
            while let Some(next) = self.step(point, visited, worklist) {
                let Some((s, e)) = self.store.get(next).and_then(ends) else {
                    break;
                };
                let flipped = e != point;
                segments.push_front(next);
                inverted.push_front(flipped);
                point = if flipped { e } else { s };
            }
        }

        let segments: Vec<EntityIndex> = segments.into();
        let cyclic = is_cyclic_path(self.store, &segments);
        Some(Path {
            segments,
            inverted: inverted.into(),
            cyclic,
        })
    }

    /// Claim the first unvisited entity at `point`; the others become fork
    /// seeds starting at the same point.
    fn step(
        &self,
        point: EntityIndex,
        visited: &mut HashSet<EntityIndex>,
        worklist: &mut VecDeque<(EntityIndex, Option<EntityIndex>)>,
    ) -> Option<EntityIndex> {
        let mut open = self
            .adjacency
            .get(&point)?
            .iter()
            .copied()
            .filter(|e| !visited.contains(e));
        let next = open.next()?;
        for fork in open {
            worklist.push_back((fork, Some(point)));
        }
        visited.insert(next);
        Some(next)
    }
}

/// All paths of a sketch.
pub fn walk_sketch(store: &EntityStore, sketch: EntityIndex) -> SketchResult<Vec<Path>> {
    store.get_as::<sketch_model::Sketch>(sketch)?;
    Ok(TopologyWalker::new(store, sketch).walk())
}

/// The longest path, closed paths first.
pub fn main_path(paths: &[Path]) -> Option<&Path> {
    paths.iter().max_by_key(|p| (p.cyclic, p.len()))
}

/// The path containing `entity`.
pub fn path_of(paths: &[Path], entity: EntityIndex) -> Option<&Path> {
    paths.iter().find(|p| p.contains(entity))
}
