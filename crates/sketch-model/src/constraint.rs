use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::index::{optional_index, EntityIndex};

/// Closed set of constraint kinds, in bucket order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintKind {
    Coincident,
    Equal,
    Distance,
    Angle,
    Diameter,
    Parallel,
    Horizontal,
    Vertical,
    Tangent,
    Midpoint,
    Perpendicular,
    Ratio,
}

impl ConstraintKind {
    pub const COUNT: usize = 12;

    pub const ALL: [ConstraintKind; ConstraintKind::COUNT] = [
        ConstraintKind::Coincident,
        ConstraintKind::Equal,
        ConstraintKind::Distance,
        ConstraintKind::Angle,
        ConstraintKind::Diameter,
        ConstraintKind::Parallel,
        ConstraintKind::Horizontal,
        ConstraintKind::Vertical,
        ConstraintKind::Tangent,
        ConstraintKind::Midpoint,
        ConstraintKind::Perpendicular,
        ConstraintKind::Ratio,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn bucket_name(self) -> &'static str {
        match self {
            ConstraintKind::Coincident => "coincident",
            ConstraintKind::Equal => "equal",
            ConstraintKind::Distance => "distance",
            ConstraintKind::Angle => "angle",
            ConstraintKind::Diameter => "diameter",
            ConstraintKind::Parallel => "parallel",
            ConstraintKind::Horizontal => "horizontal",
            ConstraintKind::Vertical => "vertical",
            ConstraintKind::Tangent => "tangent",
            ConstraintKind::Midpoint => "midpoint",
            ConstraintKind::Perpendicular => "perpendicular",
            ConstraintKind::Ratio => "ratio",
        }
    }

    pub fn from_bucket_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.bucket_name() == name)
    }

    /// Allowed entity kinds per reference position.
    pub fn signature(self) -> &'static [Slot] {
        use EntityKind::*;
        const POINTS: &[EntityKind] = &[Point2D, Point3D];
        const LINES: &[EntityKind] = &[Line2D, Line3D];
        const CURVES: &[EntityKind] = &[Arc, Circle];
        match self {
            ConstraintKind::Coincident => &[
                Slot::Required(POINTS),
                Slot::Required(&[Point2D, Point3D, Line2D, Line3D, Arc, Circle, Workplane]),
            ],
            ConstraintKind::Equal => &[
                Slot::Required(&[Line2D, Line3D, Arc, Circle]),
                Slot::Required(&[Line2D, Line3D, Arc, Circle]),
            ],
            ConstraintKind::Distance => &[
                Slot::Required(&[Point2D, Point3D, Line2D, Line3D]),
                Slot::Optional(&[Point2D, Point3D, Line2D, Line3D, Workplane]),
            ],
            ConstraintKind::Angle => &[Slot::Required(&[Line2D]), Slot::Required(&[Line2D])],
            ConstraintKind::Diameter => &[Slot::Required(CURVES)],
            ConstraintKind::Parallel | ConstraintKind::Perpendicular | ConstraintKind::Ratio => {
                &[Slot::Required(LINES), Slot::Required(LINES)]
            }
            ConstraintKind::Horizontal | ConstraintKind::Vertical => &[
                Slot::Required(&[Line2D, Point2D]),
                Slot::Optional(&[Point2D]),
            ],
            ConstraintKind::Tangent => &[
                Slot::Required(&[Arc, Circle, Line2D]),
                Slot::Required(&[Arc, Circle, Line2D]),
            ],
            ConstraintKind::Midpoint => &[Slot::Required(POINTS), Slot::Required(LINES)],
        }
    }

    /// Kinds that only make sense inside a workplane.
    pub fn requires_sketch(self) -> bool {
        matches!(
            self,
            ConstraintKind::Angle
                | ConstraintKind::Horizontal
                | ConstraintKind::Vertical
                | ConstraintKind::Tangent
        )
    }

    /// Kinds that are not copied onto new pieces when a segment is split.
    pub fn is_duplicable(self) -> bool {
        !matches!(
            self,
            ConstraintKind::Ratio
                | ConstraintKind::Coincident
                | ConstraintKind::Midpoint
                | ConstraintKind::Tangent
        )
    }
}

/// One position of a constraint signature.
#[derive(Debug, Clone, Copy)]
pub enum Slot {
    Required(&'static [EntityKind]),
    Optional(&'static [EntityKind]),
}

impl Slot {
    pub fn allows(&self, kind: EntityKind) -> bool {
        match self {
            Slot::Required(kinds) | Slot::Optional(kinds) => kinds.contains(&kind),
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Slot::Optional(_))
    }
}

// ── Constraint data ─────────────────────────────────────────────────────────

/// Kind-specific payload of a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConstraintData {
    Coincident {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
    },
    Equal {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
    },
    Distance {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index", with = "optional_index", default)]
        entity2: Option<EntityIndex>,
        value: f64,
        /// Selects the negative side for signed point-line distances.
        #[serde(default)]
        flip: bool,
    },
    Angle {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
        /// Radians.
        value: f64,
        #[serde(default)]
        supplementary: bool,
    },
    Diameter {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        value: f64,
        /// `value` holds a radius rather than a diameter.
        #[serde(default)]
        use_radius: bool,
    },
    Parallel {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
    },
    Horizontal {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index", with = "optional_index", default)]
        entity2: Option<EntityIndex>,
    },
    Vertical {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index", with = "optional_index", default)]
        entity2: Option<EntityIndex>,
    },
    Tangent {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
    },
    Midpoint {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
    },
    Perpendicular {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
    },
    Ratio {
        #[serde(rename = "entity1_index")]
        entity1: EntityIndex,
        #[serde(rename = "entity2_index")]
        entity2: EntityIndex,
        value: f64,
    },
}

impl ConstraintData {
    pub fn kind(&self) -> ConstraintKind {
        match self {
            ConstraintData::Coincident { .. } => ConstraintKind::Coincident,
            ConstraintData::Equal { .. } => ConstraintKind::Equal,
            ConstraintData::Distance { .. } => ConstraintKind::Distance,
            ConstraintData::Angle { .. } => ConstraintKind::Angle,
            ConstraintData::Diameter { .. } => ConstraintKind::Diameter,
            ConstraintData::Parallel { .. } => ConstraintKind::Parallel,
            ConstraintData::Horizontal { .. } => ConstraintKind::Horizontal,
            ConstraintData::Vertical { .. } => ConstraintKind::Vertical,
            ConstraintData::Tangent { .. } => ConstraintKind::Tangent,
            ConstraintData::Midpoint { .. } => ConstraintKind::Midpoint,
            ConstraintData::Perpendicular { .. } => ConstraintKind::Perpendicular,
            ConstraintData::Ratio { .. } => ConstraintKind::Ratio,
        }
    }

    /// Referenced entities in signature order.
    pub fn entities(&self) -> Vec<EntityIndex> {
        match self {
            ConstraintData::Diameter { entity1, .. } => vec![*entity1],
            ConstraintData::Distance {
                entity1, entity2, ..
            }
            | ConstraintData::Horizontal { entity1, entity2 }
            | ConstraintData::Vertical { entity1, entity2 } => {
                let mut refs = vec![*entity1];
                refs.extend(*entity2);
                refs
            }
            ConstraintData::Coincident { entity1, entity2 }
            | ConstraintData::Equal { entity1, entity2 }
            | ConstraintData::Angle {
                entity1, entity2, ..
            }
            | ConstraintData::Parallel { entity1, entity2 }
            | ConstraintData::Tangent { entity1, entity2 }
            | ConstraintData::Midpoint { entity1, entity2 }
            | ConstraintData::Perpendicular { entity1, entity2 }
            | ConstraintData::Ratio {
                entity1, entity2, ..
            } => vec![*entity1, *entity2],
        }
    }

    /// Rewrite entity references through `f`.
    pub fn remap_entities(&mut self, mut f: impl FnMut(EntityIndex) -> EntityIndex) {
        match self {
            ConstraintData::Diameter { entity1, .. } => *entity1 = f(*entity1),
            ConstraintData::Distance {
                entity1, entity2, ..
            }
            | ConstraintData::Horizontal { entity1, entity2 }
            | ConstraintData::Vertical { entity1, entity2 } => {
                *entity1 = f(*entity1);
                if let Some(e2) = *entity2 {
                    *entity2 = f(e2).valid();
                }
            }
            ConstraintData::Coincident { entity1, entity2 }
            | ConstraintData::Equal { entity1, entity2 }
            | ConstraintData::Angle {
                entity1, entity2, ..
            }
            | ConstraintData::Parallel { entity1, entity2 }
            | ConstraintData::Tangent { entity1, entity2 }
            | ConstraintData::Midpoint { entity1, entity2 }
            | ConstraintData::Perpendicular { entity1, entity2 }
            | ConstraintData::Ratio {
                entity1, entity2, ..
            } => {
                *entity1 = f(*entity1);
                *entity2 = f(*entity2);
            }
        }
    }

    /// Numeric value carried by dimensional constraints.
    pub fn value(&self) -> Option<f64> {
        match self {
            ConstraintData::Distance { value, .. }
            | ConstraintData::Angle { value, .. }
            | ConstraintData::Diameter { value, .. }
            | ConstraintData::Ratio { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn set_value(&mut self, new_value: f64) -> bool {
        match self {
            ConstraintData::Distance { value, .. }
            | ConstraintData::Angle { value, .. }
            | ConstraintData::Diameter { value, .. }
            | ConstraintData::Ratio { value, .. } => {
                *value = new_value;
                true
            }
            _ => false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A constraint between entities, optionally owned by a sketch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(flatten)]
    pub data: ConstraintData,
    #[serde(rename = "sketch_index", with = "optional_index", default)]
    pub sketch: Option<EntityIndex>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl Constraint {
    pub fn new(data: ConstraintData, sketch: Option<EntityIndex>) -> Self {
        Self {
            data,
            sketch,
            failed: false,
            dirty: true,
            visible: true,
        }
    }

    pub fn kind(&self) -> ConstraintKind {
        self.data.kind()
    }

    pub fn entities(&self) -> Vec<EntityIndex> {
        self.data.entities()
    }

    /// Direct dependencies: referenced entities plus the owning sketch.
    pub fn dependencies(&self) -> Vec<EntityIndex> {
        let mut deps = self.entities();
        deps.extend(self.sketch);
        deps
    }

    pub fn remap_references(&mut self, mut f: impl FnMut(EntityIndex) -> EntityIndex) {
        self.data.remap_entities(&mut f);
        if let Some(sketch) = self.sketch {
            self.sketch = f(sketch).valid();
        }
    }

    /// Constraints are solved while their sketch is the active one; 3D
    /// constraints while no sketch is active.
    pub fn is_active(&self, active_sketch: Option<EntityIndex>) -> bool {
        self.sketch == active_sketch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(kind: EntityKind, slot: usize) -> EntityIndex {
        EntityIndex::assemble(kind, slot)
    }

    #[test]
    fn bucket_names_round_trip() {
        for kind in ConstraintKind::ALL {
            assert_eq!(ConstraintKind::from_bucket_name(kind.bucket_name()), Some(kind));
        }
    }

    #[test]
    fn distance_with_one_entity_lists_one_reference() {
        let data = ConstraintData::Distance {
            entity1: idx(EntityKind::Line2D, 0),
            entity2: None,
            value: 3.0,
            flip: false,
        };
        assert_eq!(data.entities(), vec![idx(EntityKind::Line2D, 0)]);
        assert_eq!(data.value(), Some(3.0));
    }

    #[test]
    fn dependencies_include_sketch() {
        let c = Constraint::new(
            ConstraintData::Parallel {
                entity1: idx(EntityKind::Line2D, 0),
                entity2: idx(EntityKind::Line2D, 1),
            },
            Some(idx(EntityKind::Sketch, 0)),
        );
        assert_eq!(c.dependencies().len(), 3);
        assert!(c.is_active(Some(idx(EntityKind::Sketch, 0))));
        assert!(!c.is_active(None));
    }

    #[test]
    fn non_duplicable_kinds() {
        let kept: Vec<_> = ConstraintKind::ALL
            .into_iter()
            .filter(|k| !k.is_duplicable())
            .collect();
        assert_eq!(
            kept,
            vec![
                ConstraintKind::Coincident,
                ConstraintKind::Tangent,
                ConstraintKind::Midpoint,
                ConstraintKind::Ratio,
            ]
        );
    }

    #[test]
    fn serialized_references_use_index_suffix() {
        let c = Constraint::new(
            ConstraintData::Horizontal {
                entity1: idx(EntityKind::Line2D, 2),
                entity2: None,
            },
            None,
        );
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["entity1_index"], idx(EntityKind::Line2D, 2).0);
        assert_eq!(json["entity2_index"], -1);
        assert_eq!(json["sketch_index"], -1);
        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
