use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constraint::ConstraintKind;
use crate::entity::EntityKind;
use crate::error::{SketchError, SketchResult};

/// Number of bits reserved for the slot inside a packed index.
pub const INDEX_SHIFT: u32 = 20;
/// Mask selecting the slot bits of a packed index.
pub const SLOT_MASK: i32 = (1 << INDEX_SHIFT) - 1;
/// Raw value of the "no reference" sentinel.
pub const NONE_RAW: i32 = -1;
/// Number of slots one bucket can address.
pub const MAX_SLOTS: usize = 1 << INDEX_SHIFT;

/// Slot for the next element of a bucket holding `len` elements.
pub fn next_slot(len: usize) -> SketchResult<usize> {
    if len < MAX_SLOTS {
        Ok(len)
    } else {
        Err(SketchError::configuration(format!(
            "bucket is full ({MAX_SLOTS} slots)"
        )))
    }
}

/// Pack a kind tag and a bucket slot into one integer.
pub fn pack(tag: u32, slot: usize) -> i32 {
    ((tag as i32) << INDEX_SHIFT) | (slot as i32 & SLOT_MASK)
}

/// Split a packed integer into its kind tag and slot.
/// Returns `None` for negative values.
pub fn unpack(raw: i32) -> Option<(u32, usize)> {
    if raw < 0 {
        return None;
    }
    Some(((raw >> INDEX_SHIFT) as u32, (raw & SLOT_MASK) as usize))
}

/// Global index of an entity: `(EntityKind tag, slot)` packed into one `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityIndex(pub i32);

impl EntityIndex {
    pub const NONE: EntityIndex = EntityIndex(NONE_RAW);

    pub fn assemble(kind: EntityKind, slot: usize) -> Self {
        EntityIndex(pack(kind.tag(), slot))
    }

    pub fn breakdown(self) -> Option<(EntityKind, usize)> {
        let (tag, slot) = unpack(self.0)?;
        Some((EntityKind::from_tag(tag)?, slot))
    }

    pub fn kind(self) -> Option<EntityKind> {
        self.breakdown().map(|(kind, _)| kind)
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    /// Convert the sentinel into `None`.
    pub fn valid(self) -> Option<EntityIndex> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for EntityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.breakdown() {
            Some((kind, slot)) => write!(f, "{:?}#{}", kind, slot),
            None => write!(f, "<none>"),
        }
    }
}

/// Global index of a constraint, packed the same way as [`EntityIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintIndex(pub i32);

impl ConstraintIndex {
    pub const NONE: ConstraintIndex = ConstraintIndex(NONE_RAW);

    pub fn assemble(kind: ConstraintKind, slot: usize) -> Self {
        ConstraintIndex(pack(kind.tag(), slot))
    }

    pub fn breakdown(self) -> Option<(ConstraintKind, usize)> {
        let (tag, slot) = unpack(self.0)?;
        Some((ConstraintKind::from_tag(tag)?, slot))
    }

    pub fn kind(self) -> Option<ConstraintKind> {
        self.breakdown().map(|(kind, _)| kind)
    }
}

impl fmt::Display for ConstraintIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.breakdown() {
            Some((kind, slot)) => write!(f, "{:?}#{}", kind, slot),
            None => write!(f, "<none>"),
        }
    }
}

/// Either side of the element graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "index")]
pub enum ElementRef {
    Entity(EntityIndex),
    Constraint(ConstraintIndex),
}

impl From<EntityIndex> for ElementRef {
    fn from(index: EntityIndex) -> Self {
        ElementRef::Entity(index)
    }
}

impl From<ConstraintIndex> for ElementRef {
    fn from(index: ConstraintIndex) -> Self {
        ElementRef::Constraint(index)
    }
}

/// Serde helper for optional references, stored as `-1` when absent.
pub(crate) mod optional_index {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EntityIndex;

    pub fn serialize<S>(value: &Option<EntityIndex>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i32(value.map(|i| i.0).unwrap_or(super::NONE_RAW))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<EntityIndex>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i32::deserialize(deserializer)?;
        Ok(EntityIndex(raw).valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_has_no_breakdown() {
        assert!(EntityIndex::NONE.breakdown().is_none());
        assert!(EntityIndex::NONE.valid().is_none());
    }

    #[test]
    fn assemble_uses_high_bits_for_kind() {
        let index = EntityIndex::assemble(EntityKind::Line2D, 3);
        assert_eq!(index.0, ((EntityKind::Line2D.tag() as i32) << 20) | 3);
        assert_eq!(index.breakdown(), Some((EntityKind::Line2D, 3)));
    }

    #[test]
    fn unknown_tag_does_not_resolve() {
        assert!(EntityIndex(pack(63, 0)).breakdown().is_none());
        assert!(ConstraintIndex(pack(63, 0)).breakdown().is_none());
    }

    #[test]
    fn display_names_kind_and_slot() {
        let index = ConstraintIndex::assemble(ConstraintKind::Distance, 7);
        assert_eq!(index.to_string(), "Distance#7");
        assert_eq!(EntityIndex::NONE.to_string(), "<none>");
    }

    #[test]
    fn full_bucket_has_no_next_slot() {
        assert_eq!(next_slot(0), Ok(0));
        assert_eq!(next_slot(SLOT_MASK as usize), Ok(SLOT_MASK as usize));
        assert!(matches!(
            next_slot(MAX_SLOTS),
            Err(SketchError::Configuration { .. })
        ));
        // The last addressable slot does not alias slot zero.
        let last = EntityIndex::assemble(EntityKind::Point2D, SLOT_MASK as usize);
        assert_eq!(last.breakdown(), Some((EntityKind::Point2D, SLOT_MASK as usize)));
    }
}
