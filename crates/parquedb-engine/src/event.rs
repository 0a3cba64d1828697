//! Events and the reconstruction fold
//!
//! Every mutation is an event; entity and relationship state is the fold of
//! the events targeting it, applied in sequence order. The fold is pure:
//! replaying the same events yields identical state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{Entity, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOp {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Time-sortable id (UUID v7).
    pub id: String,
    /// Wall-clock ms.
    pub ts: i64,
    pub op: EventOp,
    /// `<ns>:<id>` for entities,
    /// `<fromNs>:<fromId>:<predicate>:<toNs>:<toId>` for relationships.
    pub target: String,
    /// Per-namespace sequence number; gap-free from 1.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub actor: String,
}

impl Event {
    pub fn new(op: EventOp, target: String, seq: u64, actor: &str) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            op,
            target,
            seq,
            before: None,
            after: None,
            actor: actor.to_string(),
        }
    }

    pub fn entity_target(ns: &str, id: &str) -> String {
        format!("{ns}:{id}")
    }

    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }
}

/// Contiguous run of events for one namespace, the WAL unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub ns: String,
    #[serde(rename = "firstSeq")]
    pub first_seq: u64,
    #[serde(rename = "lastSeq")]
    pub last_seq: u64,
    pub events: Vec<Event>,
}

/// Marker inside a DELETE event's `after` distinguishing hard deletes.
pub const HARD_DELETE_KEY: &str = "$hard";

/// Apply one entity event. CREATE seeds state, UPDATE merges `after` over
/// it, DELETE soft-deletes (or erases, for hard deletes). An UPDATE whose
/// `before` carries `deletedAt` while its `after` does not is a restore and
/// drops both deletion markers.
pub fn apply_entity_event(state: Option<Entity>, event: &Event) -> Option<Entity> {
    match event.op {
        EventOp::Create => event
            .after
            .as_ref()
            .and_then(|after| serde_json::from_value(after.clone()).ok()),
        EventOp::Update => {
            let mut entity = state?;
            let after = event.after.as_ref().and_then(Value::as_object);

            let restoring = event
                .before
                .as_ref()
                .and_then(|b| b.get("deletedAt"))
                .is_some_and(|v| !v.is_null())
                && after
                    .and_then(|a| a.get("deletedAt"))
                    .is_none_or(Value::is_null);
            if restoring {
                entity.deleted_at = None;
                entity.deleted_by = None;
            }

            if let Some(after) = after {
                merge_entity_fields(&mut entity, after);
            }
            Some(entity)
        }
        EventOp::Delete => {
            let mut entity = state?;
            let after = event.after.as_ref().and_then(Value::as_object);
            if after.and_then(|a| a.get(HARD_DELETE_KEY)).is_some() {
                return None;
            }

            let deleted_at = after
                .and_then(|a| a.get("deletedAt"))
                .and_then(Value::as_i64)
                .unwrap_or(event.ts);
            let deleted_by = after
                .and_then(|a| a.get("deletedBy"))
                .and_then(Value::as_str)
                .unwrap_or(&event.actor)
                .to_string();
            entity.version = after
                .and_then(|a| a.get("version"))
                .and_then(Value::as_u64)
                .unwrap_or(entity.version + 1);
            // Deletion is the last touch; audit columns follow its markers
            entity.updated_at = deleted_at;
            entity.updated_by = deleted_by.clone();
            entity.deleted_at = Some(deleted_at);
            entity.deleted_by = Some(deleted_by);
            Some(entity)
        }
    }
}

/// Merge an UPDATE event's `after` fields into an entity. `createdAt` and
/// `createdBy` are immutable; a null payload value removes the key.
fn merge_entity_fields(entity: &mut Entity, after: &Map<String, Value>) {
    for (key, value) in after {
        match key.as_str() {
            "$id" | "createdAt" | "createdBy" | "deletedAt" | "deletedBy" => {}
            "$type" => {
                if let Some(t) = value.as_str() {
                    entity.entity_type = t.to_string();
                }
            }
            "name" => {
                if let Some(n) = value.as_str() {
                    entity.name = n.to_string();
                }
            }
            "version" => {
                if let Some(v) = value.as_u64() {
                    entity.version = v;
                }
            }
            "updatedAt" => {
                if let Some(v) = value.as_i64() {
                    entity.updated_at = v;
                }
            }
            "updatedBy" => {
                if let Some(v) = value.as_str() {
                    entity.updated_by = v.to_string();
                }
            }
            _ => {
                if value.is_null() {
                    entity.data.remove(key);
                } else {
                    entity.data.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Relationship counterpart of the entity fold.
pub fn apply_rel_event(state: Option<Relationship>, event: &Event) -> Option<Relationship> {
    match event.op {
        EventOp::Create => event
            .after
            .as_ref()
            .and_then(|after| serde_json::from_value(after.clone()).ok()),
        EventOp::Update => {
            let after = event.after.as_ref()?;
            // Relationship updates carry the full edge state
            let mut rel: Relationship = serde_json::from_value(after.clone()).ok()?;
            if let Some(prev) = state {
                rel.created_at = prev.created_at;
                rel.created_by = prev.created_by;
            }
            Some(rel)
        }
        EventOp::Delete => {
            let mut rel = state?;
            let after = event.after.as_ref().and_then(Value::as_object);
            if after.and_then(|a| a.get(HARD_DELETE_KEY)).is_some() {
                return None;
            }
            let deleted_at = after
                .and_then(|a| a.get("deletedAt"))
                .and_then(Value::as_i64)
                .unwrap_or(event.ts);
            let deleted_by = after
                .and_then(|a| a.get("deletedBy"))
                .and_then(Value::as_str)
                .unwrap_or(&event.actor)
                .to_string();
            rel.version = after
                .and_then(|a| a.get("version"))
                .and_then(Value::as_u64)
                .unwrap_or(rel.version + 1);
            rel.updated_at = deleted_at;
            rel.updated_by = deleted_by.clone();
            rel.deleted_at = Some(deleted_at);
            rel.deleted_by = Some(deleted_by);
            Some(rel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_event(seq: u64) -> Event {
        let mut event = Event::new(
            EventOp::Create,
            Event::entity_target("posts", "id1"),
            seq,
            "u1",
        );
        event.after = Some(json!({
            "$id": "posts/id1", "$type": "Post", "name": "First",
            "createdAt": 1000, "createdBy": "u1",
            "updatedAt": 1000, "updatedBy": "u1",
            "version": 1, "views": 1
        }));
        event
    }

    #[test]
    fn create_seeds_state() {
        let entity = apply_entity_event(None, &create_event(1)).unwrap();
        assert_eq!(entity.id, "posts/id1");
        assert_eq!(entity.version, 1);
        assert_eq!(entity.data["views"], json!(1));
    }

    #[test]
    fn update_merges_and_preserves_created_fields() {
        let entity = apply_entity_event(None, &create_event(1)).unwrap();

        let mut update = Event::new(EventOp::Update, entity.id.replace('/', ":"), 2, "u2");
        update.after = Some(json!({
            "views": 2, "title": "hello",
            "version": 2, "updatedAt": 2000, "updatedBy": "u2",
            "createdAt": 9999
        }));
        let entity = apply_entity_event(Some(entity), &update).unwrap();

        assert_eq!(entity.version, 2);
        assert_eq!(entity.data["views"], json!(2));
        assert_eq!(entity.data["title"], json!("hello"));
        assert_eq!(entity.created_at, 1000, "createdAt is immutable");
        assert_eq!(entity.updated_by, "u2");
    }

    #[test]
    fn null_field_in_update_removes_key() {
        let entity = apply_entity_event(None, &create_event(1)).unwrap();
        let mut update = Event::new(EventOp::Update, "posts:id1".into(), 2, "u1");
        update.after = Some(json!({"views": null, "version": 2}));
        let entity = apply_entity_event(Some(entity), &update).unwrap();
        assert!(!entity.data.contains_key("views"));
    }

    #[test]
    fn delete_then_restore_drops_markers() {
        let entity = apply_entity_event(None, &create_event(1)).unwrap();

        let mut delete = Event::new(EventOp::Delete, "posts:id1".into(), 2, "u2");
        delete.after = Some(json!({"deletedAt": 2000, "deletedBy": "u2", "version": 2}));
        let entity = apply_entity_event(Some(entity), &delete).unwrap();
        assert_eq!(entity.deleted_at, Some(2000));
        assert_eq!(entity.deleted_by.as_deref(), Some("u2"));
        assert_eq!(entity.version, 2);

        // Restore: before carries deletedAt, after does not
        let mut restore = Event::new(EventOp::Update, "posts:id1".into(), 3, "u1");
        restore.before = Some(json!({"deletedAt": 2000, "deletedBy": "u2"}));
        restore.after = Some(json!({"version": 3, "updatedAt": 3000, "updatedBy": "u1"}));
        let entity = apply_entity_event(Some(entity), &restore).unwrap();

        assert_eq!(entity.deleted_at, None);
        assert_eq!(entity.deleted_by, None, "restore drops both markers");
        assert_eq!(entity.version, 3);
    }

    #[test]
    fn hard_delete_erases_state() {
        let entity = apply_entity_event(None, &create_event(1)).unwrap();
        let mut delete = Event::new(EventOp::Delete, "posts:id1".into(), 2, "u1");
        delete.after = Some(json!({HARD_DELETE_KEY: true}));
        assert!(apply_entity_event(Some(entity), &delete).is_none());
    }

    #[test]
    fn update_without_state_is_ignored() {
        let mut update = Event::new(EventOp::Update, "posts:id9".into(), 1, "u1");
        update.after = Some(json!({"views": 1}));
        assert!(apply_entity_event(None, &update).is_none());
    }

    #[test]
    fn fold_is_deterministic() {
        let events: Vec<Event> = {
            let mut create = create_event(1);
            create.ts = 1000;
            let mut update = Event::new(EventOp::Update, "posts:id1".into(), 2, "u1");
            update.ts = 2000;
            update.after = Some(json!({"views": 7, "version": 2}));
            vec![create, update]
        };

        let fold = |events: &[Event]| {
            events
                .iter()
                .fold(None, |state, e| apply_entity_event(state, e))
        };
        assert_eq!(fold(&events), fold(&events));
    }

    #[test]
    fn batch_serialization_round_trips() {
        let batch = EventBatch {
            ns: "posts".to_string(),
            first_seq: 1,
            last_seq: 1,
            events: vec![create_event(1)],
        };
        let bytes = serde_json::to_vec(&batch).unwrap();
        let back: EventBatch = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, batch);
    }
}
