//! Document persistence and clipboard transfer.
//!
//! Both use the same bucketed layout:
//! `{ "entities": { "points2D": [...], ... }, "constraints": { "distance": [...], ... } }`.
//! Elements are kept as JSON objects so foreign data can be re-indexed with
//! [`fix_pointers`] before it is typed.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::constraint::{Constraint, ConstraintKind};
use crate::constraint_store::ConstraintStore;
use crate::document::Document;
use crate::entity::*;
use crate::error::{SketchError, SketchResult};
use crate::index::{optional_index, EntityIndex, NONE_RAW};
use crate::store::EntityStore;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

type Buckets = BTreeMap<String, Vec<Value>>;

/// Entities and constraints grouped by kind bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub entities: Buckets,
    #[serde(default)]
    pub constraints: Buckets,
}

/// Saved document: a snapshot wrapped with version and identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFile {
    pub version: u32,
    pub id: Uuid,
    #[serde(rename = "active_sketch_index", with = "optional_index", default)]
    pub active_sketch: Option<EntityIndex>,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

fn entity_to_value(entity: &Entity) -> SketchResult<Value> {
    let value = match entity {
        Entity::Point3D(e) => serde_json::to_value(e),
        Entity::Line3D(e) => serde_json::to_value(e),
        Entity::Normal3D(e) => serde_json::to_value(e),
        Entity::Workplane(e) => serde_json::to_value(e),
        Entity::Sketch(e) => serde_json::to_value(e),
        Entity::Point2D(e) => serde_json::to_value(e),
        Entity::Line2D(e) => serde_json::to_value(e),
        Entity::Normal2D(e) => serde_json::to_value(e),
        Entity::Arc(e) => serde_json::to_value(e),
        Entity::Circle(e) => serde_json::to_value(e),
    }?;
    Ok(value)
}

fn entity_from_value(kind: EntityKind, value: Value) -> SketchResult<Entity> {
    let entity = match kind {
        EntityKind::Point3D => Entity::Point3D(serde_json::from_value(value)?),
        EntityKind::Line3D => Entity::Line3D(serde_json::from_value(value)?),
        EntityKind::Normal3D => Entity::Normal3D(serde_json::from_value(value)?),
        EntityKind::Workplane => Entity::Workplane(serde_json::from_value(value)?),
        EntityKind::Sketch => Entity::Sketch(serde_json::from_value(value)?),
        EntityKind::Point2D => Entity::Point2D(serde_json::from_value(value)?),
        EntityKind::Line2D => Entity::Line2D(serde_json::from_value(value)?),
        EntityKind::Normal2D => Entity::Normal2D(serde_json::from_value(value)?),
        EntityKind::Arc => Entity::Arc(serde_json::from_value(value)?),
        EntityKind::Circle => Entity::Circle(serde_json::from_value(value)?),
    };
    Ok(entity)
}

fn constraint_from_value(kind: ConstraintKind, mut value: Value) -> SketchResult<Constraint> {
    // Bucket membership implies the tag.
    if let Value::Object(map) = &mut value {
        map.entry("type")
            .or_insert_with(|| Value::String(format!("{:?}", kind)));
    }
    let constraint: Constraint = serde_json::from_value(value)?;
    if constraint.kind() != kind {
        return Err(SketchError::Parse(format!(
            "{:?} constraint stored in the {} bucket",
            constraint.kind(),
            kind.bucket_name()
        )));
    }
    Ok(constraint)
}

fn bucket_entries<'a, K: Copy>(
    buckets: &'a Buckets,
    kinds: &'a [K],
    name: impl Fn(K) -> &'static str + 'a,
) -> impl Iterator<Item = (K, &'a Vec<Value>)> + 'a {
    kinds
        .iter()
        .filter_map(move |kind| buckets.get(name(*kind)).map(|values| (*kind, values)))
}

fn unknown_buckets(snapshot: &Snapshot) -> Option<String> {
    snapshot
        .entities
        .keys()
        .find(|k| EntityKind::from_bucket_name(k).is_none())
        .or_else(|| {
            snapshot
                .constraints
                .keys()
                .find(|k| ConstraintKind::from_bucket_name(k).is_none())
        })
        .cloned()
}

impl Snapshot {
    fn capture<'a>(
        entities: impl IntoIterator<Item = &'a Entity>,
        constraints: impl IntoIterator<Item = &'a Constraint>,
    ) -> SketchResult<Self> {
        let mut snapshot = Snapshot::default();
        for entity in entities {
            snapshot
                .entities
                .entry(entity.kind().bucket_name().to_string())
                .or_default()
                .push(entity_to_value(entity)?);
        }
        for constraint in constraints {
            snapshot
                .constraints
                .entry(constraint.kind().bucket_name().to_string())
                .or_default()
                .push(serde_json::to_value(constraint)?);
        }
        Ok(snapshot)
    }

    pub fn of_document(doc: &Document) -> SketchResult<Self> {
        Self::capture(doc.entities.iter(), doc.constraints.all().map(|(_, c)| c))
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(Vec::is_empty) && self.constraints.values().all(Vec::is_empty)
    }
}

fn is_reference_field(key: &str) -> bool {
    key == "index" || key.ends_with("_index")
}

/// Rewrite every `index` / `*_index` field of `snapshot` so the incoming
/// entities land after the current contents of `entities`.
///
/// Each incoming entity's old `index` maps to `assemble(kind, bucket_len +
/// position)`. References with no mapping are passed to `unmapped` together
/// with the field name; `-1` is left alone. Returns the old → new mapping.
pub fn fix_pointers_with(
    snapshot: &mut Snapshot,
    entities: &EntityStore,
    mut unmapped: impl FnMut(&str, i32) -> SketchResult<i32>,
) -> SketchResult<HashMap<i32, i32>> {
    let mut mapping = HashMap::new();
    for (kind, values) in bucket_entries(&snapshot.entities, EntityKind::ALL.as_slice(), EntityKind::bucket_name) {
        let offset = entities.bucket_len(kind);
        for (position, value) in values.iter().enumerate() {
            let old = value
                .get("index")
                .and_then(Value::as_i64)
                .ok_or_else(|| SketchError::Parse(format!("{} entry without index", kind.bucket_name())))?;
            let new = EntityIndex::assemble(kind, offset + position).0;
            if mapping.insert(old as i32, new).is_some() {
                return Err(SketchError::Parse(format!("duplicate index {old}")));
            }
        }
    }

    let mut rewrite = |map: &mut Map<String, Value>| -> SketchResult<()> {
        for (key, field) in map.iter_mut() {
            if !is_reference_field(key) {
                continue;
            }
            let Some(raw) = field.as_i64().map(|r| r as i32) else {
                continue;
            };
            if raw == NONE_RAW {
                continue;
            }
            let new = match mapping.get(&raw) {
                Some(new) => *new,
                None => unmapped(key, raw)?,
            };
            *field = Value::from(new);
        }
        Ok(())
    };

    for value in snapshot
        .entities
        .values_mut()
        .chain(snapshot.constraints.values_mut())
        .flatten()
    {
        if let Value::Object(map) = value {
            rewrite(map)?;
        }
    }
    debug!(mapped = mapping.len(), "pointers fixed");
    Ok(mapping)
}

/// [`fix_pointers_with`] leaving unmapped references untouched.
pub fn fix_pointers(snapshot: &mut Snapshot, entities: &EntityStore) -> SketchResult<HashMap<i32, i32>> {
    fix_pointers_with(snapshot, entities, |_, raw| Ok(raw))
}

/// Append a re-indexed snapshot to copies of the stores and swap them in
/// once every reference resolves. Returns the inserted entity indices.
fn merge(doc: &mut Document, snapshot: Snapshot) -> SketchResult<Vec<EntityIndex>> {
    if let Some(bucket) = unknown_buckets(&snapshot) {
        return Err(SketchError::Parse(format!("unknown bucket {bucket}")));
    }
    let mut entities = doc.entities.clone();
    let mut constraints: ConstraintStore = doc.constraints.clone();
    let mut inserted = Vec::new();

    for (kind, values) in bucket_entries(&snapshot.entities, EntityKind::ALL.as_slice(), EntityKind::bucket_name) {
        for value in values {
            let entity = entity_from_value(kind, value.clone())?;
            inserted.push(entities.push_entity(entity)?);
        }
    }
    for index in &inserted {
        if let Some(entity) = entities.get(*index) {
            if let Some(missing) = entity.references().into_iter().find(|r| !entities.contains(*r)) {
                return Err(SketchError::Parse(format!(
                    "{} references missing entity {}",
                    index, missing
                )));
            }
        }
    }
    for (kind, values) in bucket_entries(&snapshot.constraints, ConstraintKind::ALL.as_slice(), ConstraintKind::bucket_name) {
        for value in values {
            constraints.add(constraint_from_value(kind, value.clone())?, &entities)?;
        }
    }

    doc.entities = entities;
    doc.constraints = constraints;
    Ok(inserted)
}

/// Serialize a document to JSON.
#[instrument(skip(doc), fields(id = %doc.id))]
pub fn save(doc: &Document) -> SketchResult<String> {
    let file = DocumentFile {
        version: FORMAT_VERSION,
        id: doc.id,
        active_sketch: doc.active_sketch,
        snapshot: Snapshot::of_document(doc)?,
    };
    let json = serde_json::to_string_pretty(&file)?;
    info!(bytes = json.len(), "document saved");
    Ok(json)
}

/// Parse a document saved by [`save`].
#[instrument(skip(json))]
pub fn load(json: &str) -> SketchResult<Document> {
    let file: DocumentFile = serde_json::from_str(json)?;
    if file.version > FORMAT_VERSION {
        return Err(SketchError::Parse(format!(
            "format version {} is newer than supported {}",
            file.version, FORMAT_VERSION
        )));
    }
    let mut doc = Document::with_id(file.id);
    let mut snapshot = file.snapshot;
    let mapping = fix_pointers(&mut snapshot, &doc.entities)?;
    merge(&mut doc, snapshot)?;
    if let Some(active) = file.active_sketch {
        let active = mapping.get(&active.0).copied().map(EntityIndex).unwrap_or(active);
        doc.set_active_sketch(Some(active))?;
    }
    info!(entities = doc.entities.len(), constraints = doc.constraints.len(), "document loaded");
    Ok(doc)
}

/// Copy `selection` together with the entities it depends on, stopping at
/// sketches and workplanes, plus every constraint whose entities all lie in
/// the copied set.
pub fn copy_entities(doc: &Document, selection: &[EntityIndex]) -> SketchResult<Snapshot> {
    let mut set = HashSet::new();
    let mut stack = selection.to_vec();
    while let Some(index) = stack.pop() {
        let entity = doc
            .entities
            .get(index)
            .ok_or(SketchError::MissingEntity { index })?;
        if matches!(entity.kind(), EntityKind::Sketch | EntityKind::Workplane) {
            continue;
        }
        if set.insert(index) {
            stack.extend(entity.dependencies());
        }
    }

    let entities = doc.entities.iter().filter(|e| set.contains(&e.index()));
    let constraints = doc
        .constraints
        .all()
        .map(|(_, c)| c)
        .filter(|c| c.entities().iter().all(|e| set.contains(e)));
    let snapshot = Snapshot::capture(entities, constraints)?;
    debug!(entities = set.len(), "entities copied");
    Ok(snapshot)
}

/// Merge a copied snapshot into `doc`.
///
/// Unmapped `sketch_index` fields are bound to `target_sketch` when one is
/// given. Any other unmapped reference must resolve in `doc`.
#[instrument(skip(doc, snapshot))]
pub fn paste(
    doc: &mut Document,
    mut snapshot: Snapshot,
    target_sketch: Option<EntityIndex>,
) -> SketchResult<Vec<EntityIndex>> {
    if let Some(sketch) = target_sketch {
        doc.entities.require_kind(sketch, &[EntityKind::Sketch])?;
    }
    let entities = &doc.entities;
    fix_pointers_with(&mut snapshot, entities, |field, raw| match target_sketch {
        Some(sketch) if field == "sketch_index" => Ok(sketch.0),
        _ if entities.contains(EntityIndex(raw)) => Ok(raw),
        _ => Err(SketchError::configuration(format!(
            "pasted {field} {} does not resolve",
            EntityIndex(raw)
        ))),
    })?;
    let inserted = merge(doc, snapshot)?;
    info!(count = inserted.len(), "entities pasted");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    fn doc_with_line() -> (Document, EntityIndex, EntityIndex) {
        let mut doc = Document::new();
        let origin = doc.ensure_origin_elements().unwrap();
        let sketch = doc.entities.add_sketch("Sketch", origin.workplanes[0]).unwrap();
        let a = doc.entities.add_point_2d(Vector2::new(0.0, 0.0), sketch).unwrap();
        let b = doc.entities.add_point_2d(Vector2::new(2.0, 0.0), sketch).unwrap();
        let line = doc.entities.add_line_2d(a, b, sketch).unwrap();
        doc.add_horizontal(line, None, Some(sketch)).unwrap();
        doc.set_active_sketch(Some(sketch)).unwrap();
        (doc, sketch, line)
    }

    #[test]
    fn save_then_load_preserves_contents() {
        let (doc, sketch, line) = doc_with_line();
        let json = save(&doc).unwrap();
        let loaded = load(&json).unwrap();
        assert_eq!(loaded.id, doc.id);
        assert_eq!(loaded.active_sketch, Some(sketch));
        assert_eq!(loaded.entities.len(), doc.entities.len());
        assert_eq!(loaded.constraints.len(), 1);
        assert_eq!(loaded.entities.get(line), doc.entities.get(line));
    }

    #[test]
    fn saved_buckets_use_index_suffix_fields() {
        let (doc, _, _) = doc_with_line();
        let value: Value = serde_json::from_str(&save(&doc).unwrap()).unwrap();
        let line = &value["entities"]["lines2D"][0];
        assert!(line["p1_index"].is_i64());
        assert!(line["sketch_index"].is_i64());
        assert_eq!(value["constraints"]["horizontal"][0]["entity2_index"], -1);
    }

    #[test]
    fn fix_pointers_offsets_by_bucket_length() {
        let (doc, sketch, _) = doc_with_line();
        let mut snapshot = copy_entities(&doc, &doc.entities.indices()).unwrap();
        let mapping = fix_pointers(&mut snapshot, &doc.entities).unwrap();
        let first_point = EntityIndex::assemble(EntityKind::Point2D, 0).0;
        assert_eq!(
            mapping[&first_point],
            EntityIndex::assemble(EntityKind::Point2D, 2).0
        );
        // sketches are not copied, so the sketch reference stays as is
        assert_eq!(
            snapshot.entities["points2D"][0]["sketch_index"],
            Value::from(sketch.0)
        );
    }

    #[test]
    fn paste_duplicates_into_same_sketch() {
        let (mut doc, sketch, line) = doc_with_line();
        let snapshot = copy_entities(&doc, &[line]).unwrap();
        let inserted = paste(&mut doc, snapshot, Some(sketch)).unwrap();
        assert_eq!(inserted.len(), 3);
        assert_eq!(doc.entities.bucket_len(EntityKind::Line2D), 2);
        assert_eq!(doc.constraints.len(), 2);
        let pasted = doc
            .entities
            .get_as::<Line2D>(EntityIndex::assemble(EntityKind::Line2D, 1))
            .unwrap();
        assert_eq!(pasted.p1, EntityIndex::assemble(EntityKind::Point2D, 2));
    }

    #[test]
    fn paste_rejects_dangling_reference() {
        let (doc, _, line) = doc_with_line();
        let snapshot = copy_entities(&doc, &[line]).unwrap();
        let mut other = Document::new();
        assert!(paste(&mut other, snapshot, None).is_err());
        assert!(other.entities.is_empty());
        // the source document is untouched
        assert_eq!(doc.entities.bucket_len(EntityKind::Line2D), 1);
    }
}
