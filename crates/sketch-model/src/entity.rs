use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::index::{optional_index, EntityIndex};
use crate::solve_status::SolveStatus;

// ── Entity kinds ────────────────────────────────────────────────────────────

/// Closed set of entity kinds. The declaration order is the bucket order and
/// the value of each variant is the tag packed into [`EntityIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Point3D,
    Line3D,
    Normal3D,
    Workplane,
    Sketch,
    Point2D,
    Line2D,
    Normal2D,
    Arc,
    Circle,
}

impl EntityKind {
    pub const COUNT: usize = 10;

    pub const ALL: [EntityKind; EntityKind::COUNT] = [
        EntityKind::Point3D,
        EntityKind::Line3D,
        EntityKind::Normal3D,
        EntityKind::Workplane,
        EntityKind::Sketch,
        EntityKind::Point2D,
        EntityKind::Line2D,
        EntityKind::Normal2D,
        EntityKind::Arc,
        EntityKind::Circle,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Key of this kind's bucket in persisted documents.
    pub fn bucket_name(self) -> &'static str {
        match self {
            EntityKind::Point3D => "points3D",
            EntityKind::Line3D => "lines3D",
            EntityKind::Normal3D => "normals3D",
            EntityKind::Workplane => "workplanes",
            EntityKind::Sketch => "sketches",
            EntityKind::Point2D => "points2D",
            EntityKind::Line2D => "lines2D",
            EntityKind::Normal2D => "normals2D",
            EntityKind::Arc => "arcs",
            EntityKind::Circle => "circles",
        }
    }

    pub fn from_bucket_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.bucket_name() == name)
    }

    pub fn is_point(self) -> bool {
        matches!(self, EntityKind::Point3D | EntityKind::Point2D)
    }

    pub fn is_line(self) -> bool {
        matches!(self, EntityKind::Line3D | EntityKind::Line2D)
    }

    pub fn is_curve(self) -> bool {
        matches!(self, EntityKind::Arc | EntityKind::Circle)
    }

    /// Kinds the topology walker chains together.
    pub fn is_path(self) -> bool {
        matches!(self, EntityKind::Line2D | EntityKind::Arc | EntityKind::Circle)
    }

    pub fn is_2d(self) -> bool {
        matches!(
            self,
            EntityKind::Point2D
                | EntityKind::Line2D
                | EntityKind::Normal2D
                | EntityKind::Arc
                | EntityKind::Circle
        )
    }
}

// ── Entity data ─────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// Attributes shared by every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBase {
    pub index: EntityIndex,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub construction: bool,
    #[serde(default)]
    pub dirty: bool,
    /// Helper geometry created by the document itself.
    #[serde(default)]
    pub origin: bool,
}

impl EntityBase {
    pub(crate) fn new(index: EntityIndex) -> Self {
        Self {
            index,
            name: String::new(),
            fixed: false,
            visible: true,
            construction: false,
            dirty: true,
            origin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    #[serde(flatten)]
    pub base: EntityBase,
    pub location: Vector3<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line3D {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "p1_index")]
    pub p1: EntityIndex,
    #[serde(rename = "p2_index")]
    pub p2: EntityIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normal3D {
    #[serde(flatten)]
    pub base: EntityBase,
    pub orientation: UnitQuaternion<f64>,
}

/// A plane given by an origin point and an orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workplane {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "p1_index")]
    pub p1: EntityIndex,
    #[serde(rename = "nm_index")]
    pub nm: EntityIndex,
}

/// A named group of 2D entities bound to one workplane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "wp_index")]
    pub wp: EntityIndex,
    /// Lazily created fixed origin point of this sketch.
    #[serde(rename = "origin_point_index", with = "optional_index", default)]
    pub origin_point: Option<EntityIndex>,
    #[serde(default)]
    pub solver_state: SolveStatus,
    #[serde(default)]
    pub dof: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    #[serde(flatten)]
    pub base: EntityBase,
    pub co: Vector2<f64>,
    #[serde(rename = "sketch_index")]
    pub sketch: EntityIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line2D {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "p1_index")]
    pub p1: EntityIndex,
    #[serde(rename = "p2_index")]
    pub p2: EntityIndex,
    #[serde(rename = "sketch_index")]
    pub sketch: EntityIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normal2D {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "sketch_index")]
    pub sketch: EntityIndex,
}

/// Circular arc running counter-clockwise from its start to its end.
/// The start is `p1` unless `invert_direction` swaps the endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "nm_index")]
    pub nm: EntityIndex,
    #[serde(rename = "ct_index")]
    pub ct: EntityIndex,
    #[serde(rename = "p1_index")]
    pub p1: EntityIndex,
    #[serde(rename = "p2_index")]
    pub p2: EntityIndex,
    #[serde(rename = "sketch_index")]
    pub sketch: EntityIndex,
    #[serde(default)]
    pub invert_direction: bool,
}

impl Arc {
    pub fn start(&self) -> EntityIndex {
        if self.invert_direction {
            self.p2
        } else {
            self.p1
        }
    }

    pub fn end(&self) -> EntityIndex {
        if self.invert_direction {
            self.p1
        } else {
            self.p2
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    #[serde(flatten)]
    pub base: EntityBase,
    #[serde(rename = "nm_index")]
    pub nm: EntityIndex,
    #[serde(rename = "ct_index")]
    pub ct: EntityIndex,
    pub radius: f64,
    #[serde(rename = "sketch_index")]
    pub sketch: EntityIndex,
}

// ── Tagged union ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Point3D(Point3D),
    Line3D(Line3D),
    Normal3D(Normal3D),
    Workplane(Workplane),
    Sketch(Sketch),
    Point2D(Point2D),
    Line2D(Line2D),
    Normal2D(Normal2D),
    Arc(Arc),
    Circle(Circle),
}

macro_rules! dispatch {
    ($value:expr, $e:ident => $body:expr) => {
        match $value {
            Entity::Point3D($e) => $body,
            Entity::Line3D($e) => $body,
            Entity::Normal3D($e) => $body,
            Entity::Workplane($e) => $body,
            Entity::Sketch($e) => $body,
            Entity::Point2D($e) => $body,
            Entity::Line2D($e) => $body,
            Entity::Normal2D($e) => $body,
            Entity::Arc($e) => $body,
            Entity::Circle($e) => $body,
        }
    };
}

fn remap_one(slot: &mut EntityIndex, f: &mut impl FnMut(EntityIndex) -> EntityIndex) {
    *slot = f(*slot);
}

fn remap_optional(slot: &mut Option<EntityIndex>, f: &mut impl FnMut(EntityIndex) -> EntityIndex) {
    if let Some(index) = *slot {
        *slot = f(index).valid();
    }
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Point3D(_) => EntityKind::Point3D,
            Entity::Line3D(_) => EntityKind::Line3D,
            Entity::Normal3D(_) => EntityKind::Normal3D,
            Entity::Workplane(_) => EntityKind::Workplane,
            Entity::Sketch(_) => EntityKind::Sketch,
            Entity::Point2D(_) => EntityKind::Point2D,
            Entity::Line2D(_) => EntityKind::Line2D,
            Entity::Normal2D(_) => EntityKind::Normal2D,
            Entity::Arc(_) => EntityKind::Arc,
            Entity::Circle(_) => EntityKind::Circle,
        }
    }

    pub fn base(&self) -> &EntityBase {
        dispatch!(self, e => &e.base)
    }

    pub fn base_mut(&mut self) -> &mut EntityBase {
        dispatch!(self, e => &mut e.base)
    }

    pub fn index(&self) -> EntityIndex {
        self.base().index
    }

    /// Direct dependencies: the entities this one cannot exist without.
    pub fn dependencies(&self) -> Vec<EntityIndex> {
        match self {
            Entity::Point3D(_) | Entity::Normal3D(_) => Vec::new(),
            Entity::Line3D(e) => vec![e.p1, e.p2],
            Entity::Workplane(e) => vec![e.p1, e.nm],
            Entity::Sketch(e) => vec![e.wp],
            Entity::Point2D(e) => vec![e.sketch],
            Entity::Line2D(e) => vec![e.p1, e.p2, e.sketch],
            Entity::Normal2D(e) => vec![e.sketch],
            Entity::Arc(e) => vec![e.nm, e.ct, e.p1, e.p2, e.sketch],
            Entity::Circle(e) => vec![e.nm, e.ct, e.sketch],
        }
    }

    /// Every index-valued field, including optional helper references.
    pub fn references(&self) -> Vec<EntityIndex> {
        let mut refs = self.dependencies();
        if let Entity::Sketch(sketch) = self {
            refs.extend(sketch.origin_point);
        }
        refs
    }

    /// Rewrite every reference through `f`. Optional references mapped to
    /// the sentinel are cleared.
    pub fn remap_references(&mut self, mut f: impl FnMut(EntityIndex) -> EntityIndex) {
        let f = &mut f;
        match self {
            Entity::Point3D(_) | Entity::Normal3D(_) => {}
            Entity::Line3D(e) => {
                remap_one(&mut e.p1, f);
                remap_one(&mut e.p2, f);
            }
            Entity::Workplane(e) => {
                remap_one(&mut e.p1, f);
                remap_one(&mut e.nm, f);
            }
            Entity::Sketch(e) => {
                remap_one(&mut e.wp, f);
                remap_optional(&mut e.origin_point, f);
            }
            Entity::Point2D(e) => remap_one(&mut e.sketch, f),
            Entity::Line2D(e) => {
                remap_one(&mut e.p1, f);
                remap_one(&mut e.p2, f);
                remap_one(&mut e.sketch, f);
            }
            Entity::Normal2D(e) => remap_one(&mut e.sketch, f),
            Entity::Arc(e) => {
                remap_one(&mut e.nm, f);
                remap_one(&mut e.ct, f);
                remap_one(&mut e.p1, f);
                remap_one(&mut e.p2, f);
                remap_one(&mut e.sketch, f);
            }
            Entity::Circle(e) => {
                remap_one(&mut e.nm, f);
                remap_one(&mut e.ct, f);
                remap_one(&mut e.sketch, f);
            }
        }
    }

    /// Owning sketch of a 2D entity.
    pub fn sketch(&self) -> Option<EntityIndex> {
        match self {
            Entity::Point2D(e) => Some(e.sketch),
            Entity::Line2D(e) => Some(e.sketch),
            Entity::Normal2D(e) => Some(e.sketch),
            Entity::Arc(e) => Some(e.sketch),
            Entity::Circle(e) => Some(e.sketch),
            _ => None,
        }
    }

    /// Whether the solver may move this entity while `active_sketch` is
    /// being edited. 3D entities are only active when no sketch is.
    pub fn is_active(&self, active_sketch: Option<EntityIndex>) -> bool {
        match self.sketch() {
            Some(sketch) => Some(sketch) == active_sketch,
            None => active_sketch.is_none(),
        }
    }

    /// Endpoints shared with neighbouring segments.
    pub fn connection_points(&self) -> Vec<EntityIndex> {
        match self {
            Entity::Line3D(e) => vec![e.p1, e.p2],
            Entity::Line2D(e) => vec![e.p1, e.p2],
            Entity::Arc(e) => vec![e.p1, e.p2],
            _ => Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Entity::Circle(_))
    }

    pub fn is_path(&self) -> bool {
        self.kind().is_path()
    }
}

// ── Typed access ────────────────────────────────────────────────────────────

/// Implemented by every per-kind struct so stores can hand out typed views.
pub trait EntityVariant: Sized {
    const KIND: EntityKind;

    fn from_entity(entity: &Entity) -> Option<&Self>;
    fn from_entity_mut(entity: &mut Entity) -> Option<&mut Self>;
    fn into_entity(self) -> Entity;
    fn entity_base(&self) -> &EntityBase;
    fn entity_base_mut(&mut self) -> &mut EntityBase;
}

macro_rules! entity_variant {
    ($($ty:ident),* $(,)?) => {$(
        impl EntityVariant for $ty {
            const KIND: EntityKind = EntityKind::$ty;

            fn from_entity(entity: &Entity) -> Option<&Self> {
                match entity {
                    Entity::$ty(e) => Some(e),
                    _ => None,
                }
            }

            fn from_entity_mut(entity: &mut Entity) -> Option<&mut Self> {
                match entity {
                    Entity::$ty(e) => Some(e),
                    _ => None,
                }
            }

            fn into_entity(self) -> Entity {
                Entity::$ty(self)
            }

            fn entity_base(&self) -> &EntityBase {
                &self.base
            }

            fn entity_base_mut(&mut self) -> &mut EntityBase {
                &mut self.base
            }
        }
    )*};
}

entity_variant!(
    Point3D, Line3D, Normal3D, Workplane, Sketch, Point2D, Line2D, Normal2D, Arc, Circle,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(kind: EntityKind, slot: usize) -> EntityIndex {
        EntityIndex::assemble(kind, slot)
    }

    fn line(p1: usize, p2: usize) -> Entity {
        Entity::Line2D(Line2D {
            base: EntityBase::new(idx(EntityKind::Line2D, 0)),
            p1: idx(EntityKind::Point2D, p1),
            p2: idx(EntityKind::Point2D, p2),
            sketch: idx(EntityKind::Sketch, 0),
        })
    }

    #[test]
    fn bucket_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_bucket_name(kind.bucket_name()), Some(kind));
            assert_eq!(EntityKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn arc_dependencies_in_declared_order() {
        let arc = Entity::Arc(Arc {
            base: EntityBase::new(idx(EntityKind::Arc, 0)),
            nm: idx(EntityKind::Normal2D, 0),
            ct: idx(EntityKind::Point2D, 0),
            p1: idx(EntityKind::Point2D, 1),
            p2: idx(EntityKind::Point2D, 2),
            sketch: idx(EntityKind::Sketch, 0),
            invert_direction: false,
        });
        assert_eq!(
            arc.dependencies(),
            vec![
                idx(EntityKind::Normal2D, 0),
                idx(EntityKind::Point2D, 0),
                idx(EntityKind::Point2D, 1),
                idx(EntityKind::Point2D, 2),
                idx(EntityKind::Sketch, 0),
            ]
        );
    }

    #[test]
    fn remap_rewrites_matching_references_only() {
        let mut entity = line(0, 1);
        let old = idx(EntityKind::Point2D, 1);
        let new = idx(EntityKind::Point2D, 5);
        entity.remap_references(|i| if i == old { new } else { i });
        assert_eq!(entity.connection_points(), vec![idx(EntityKind::Point2D, 0), new]);
    }

    #[test]
    fn active_state_follows_sketch() {
        let entity = line(0, 1);
        assert!(entity.is_active(Some(idx(EntityKind::Sketch, 0))));
        assert!(!entity.is_active(Some(idx(EntityKind::Sketch, 1))));
        assert!(!entity.is_active(None));

        let point = Entity::Point3D(Point3D {
            base: EntityBase::new(idx(EntityKind::Point3D, 0)),
            location: Vector3::zeros(),
        });
        assert!(point.is_active(None));
        assert!(!point.is_active(Some(idx(EntityKind::Sketch, 0))));
    }

    #[test]
    fn sketch_origin_point_is_cleared_when_mapped_to_none() {
        let mut sketch = Entity::Sketch(Sketch {
            base: EntityBase::new(idx(EntityKind::Sketch, 0)),
            wp: idx(EntityKind::Workplane, 0),
            origin_point: Some(idx(EntityKind::Point2D, 0)),
            solver_state: SolveStatus::Okay,
            dof: 0,
        });
        sketch.remap_references(|i| {
            if i.kind() == Some(EntityKind::Point2D) {
                EntityIndex::NONE
            } else {
                i
            }
        });
        match sketch {
            Entity::Sketch(s) => assert!(s.origin_point.is_none()),
            _ => unreachable!(),
        }
    }
}
