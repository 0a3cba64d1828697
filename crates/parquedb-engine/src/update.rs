//! Update operators
//!
//! Mongo-style update documents applied in a fixed order:
//! `$set`, `$unset`, `$inc`, `$push`, `$pull`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDoc {
    #[serde(rename = "$set", default)]
    pub set: Map<String, Value>,
    /// Values are ignored; only the keys matter.
    #[serde(rename = "$unset", default)]
    pub unset: Map<String, Value>,
    #[serde(rename = "$inc", default)]
    pub inc: Map<String, Value>,
    #[serde(rename = "$push", default)]
    pub push: Map<String, Value>,
    #[serde(rename = "$pull", default)]
    pub pull: Map<String, Value>,
}

impl UpdateDoc {
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set.insert(key.into(), value);
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.insert(key.into(), Value::Null);
        self
    }

    pub fn inc(mut self, key: impl Into<String>, delta: i64) -> Self {
        self.inc.insert(key.into(), Value::from(delta));
        self
    }

    pub fn push(mut self, key: impl Into<String>, value: Value) -> Self {
        self.push.insert(key.into(), value);
        self
    }

    pub fn pull(mut self, key: impl Into<String>, value: Value) -> Self {
        self.pull.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.inc.is_empty()
            && self.push.is_empty()
            && self.pull.is_empty()
    }

    /// Parse from a JSON update document. Top-level keys without a `$`
    /// operator are treated as `$set` fields.
    pub fn from_json(value: &Value) -> Result<UpdateDoc> {
        let Some(object) = value.as_object() else {
            return Err(EngineError::InvalidInput(
                "update document must be an object".to_string(),
            ));
        };

        let has_operators = object.keys().any(|k| k.starts_with('$'));
        if !has_operators {
            return Ok(UpdateDoc {
                set: object.clone(),
                ..UpdateDoc::default()
            });
        }

        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::InvalidInput(format!("malformed update document: {e}")))
    }
}

/// Apply the operators to an entity, returning the changed fields (new
/// values; removed keys map to null) for the event payload.
pub fn apply_update(entity: &mut Entity, ops: &UpdateDoc) -> Map<String, Value> {
    let mut changed = Map::new();

    for (key, value) in &ops.set {
        match key.as_str() {
            "$type" => {
                if let Some(t) = value.as_str() {
                    entity.entity_type = t.to_string();
                    changed.insert(key.clone(), value.clone());
                }
            }
            "name" => {
                if let Some(n) = value.as_str() {
                    entity.name = n.to_string();
                    changed.insert(key.clone(), value.clone());
                }
            }
            // Audit and identity columns are not settable
            "$id" | "createdAt" | "createdBy" | "updatedAt" | "updatedBy" | "deletedAt"
            | "deletedBy" | "version" => {}
            _ => {
                entity.data.insert(key.clone(), value.clone());
                changed.insert(key.clone(), value.clone());
            }
        }
    }

    for key in ops.unset.keys() {
        // Unsetting a missing key is a no-op
        if entity.data.remove(key).is_some() {
            changed.insert(key.clone(), Value::Null);
        }
    }

    for (key, delta) in &ops.inc {
        let delta = delta.as_f64().unwrap_or(0.0);
        // A missing counter starts from zero
        let current = entity.data.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let next = current + delta;
        let next_value = if next.fract() == 0.0 && next.abs() < (i64::MAX as f64) {
            Value::from(next as i64)
        } else {
            serde_json::Number::from_f64(next).map(Value::Number).unwrap_or(Value::Null)
        };
        entity.data.insert(key.clone(), next_value.clone());
        changed.insert(key.clone(), next_value);
    }

    for (key, value) in &ops.push {
        let array = entity
            .data
            .entry(key.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = array {
            items.push(value.clone());
            changed.insert(key.clone(), array.clone());
        }
    }

    for (key, value) in &ops.pull {
        if let Some(Value::Array(items)) = entity.data.get_mut(key) {
            let before = items.len();
            items.retain(|item| item != value);
            if items.len() != before {
                changed.insert(key.clone(), entity.data[key].clone());
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity() -> Entity {
        serde_json::from_value(json!({
            "$id": "posts/id1", "$type": "Post", "name": "First",
            "createdAt": 1000, "createdBy": "u1",
            "updatedAt": 1000, "updatedBy": "u1",
            "version": 1,
            "views": 5, "tags": ["a", "b", "a"]
        }))
        .unwrap()
    }

    #[test]
    fn set_updates_payload_and_specials() {
        let mut e = entity();
        let changed = apply_update(
            &mut e,
            &UpdateDoc::default()
                .set("title", json!("Hello"))
                .set("name", json!("Renamed"))
                .set("$type", json!("Article")),
        );
        assert_eq!(e.data["title"], json!("Hello"));
        assert_eq!(e.name, "Renamed");
        assert_eq!(e.entity_type, "Article");
        assert_eq!(changed.len(), 3);
    }

    #[test]
    fn set_cannot_touch_audit_columns() {
        let mut e = entity();
        let changed = apply_update(&mut e, &UpdateDoc::default().set("version", json!(99)));
        assert_eq!(e.version, 1);
        assert!(changed.is_empty());
    }

    #[test]
    fn unset_missing_key_is_noop() {
        let mut e = entity();
        let changed = apply_update(
            &mut e,
            &UpdateDoc::default().unset("views").unset("missing"),
        );
        assert!(!e.data.contains_key("views"));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["views"], Value::Null);
    }

    #[test]
    fn inc_starts_missing_keys_from_zero() {
        let mut e = entity();
        apply_update(
            &mut e,
            &UpdateDoc::default().inc("views", 3).inc("fresh", 2),
        );
        assert_eq!(e.data["views"], json!(8));
        assert_eq!(e.data["fresh"], json!(2));
    }

    #[test]
    fn push_and_pull() {
        let mut e = entity();
        apply_update(&mut e, &UpdateDoc::default().push("tags", json!("c")));
        assert_eq!(e.data["tags"], json!(["a", "b", "a", "c"]));

        // Pull removes every equal element
        apply_update(&mut e, &UpdateDoc::default().pull("tags", json!("a")));
        assert_eq!(e.data["tags"], json!(["b", "c"]));

        apply_update(&mut e, &UpdateDoc::default().push("fresh", json!(1)));
        assert_eq!(e.data["fresh"], json!([1]));
    }

    #[test]
    fn operators_apply_in_fixed_order() {
        // $set writes the key, then $unset removes it, then $inc recreates
        // it from zero
        let mut e = entity();
        let ops = UpdateDoc::default()
            .set("counter", json!(100))
            .unset("counter")
            .inc("counter", 1);
        apply_update(&mut e, &ops);
        assert_eq!(e.data["counter"], json!(1));
    }

    #[test]
    fn from_json_accepts_bare_and_operator_forms() {
        let bare = UpdateDoc::from_json(&json!({"title": "x"})).unwrap();
        assert_eq!(bare.set["title"], json!("x"));

        let ops = UpdateDoc::from_json(&json!({"$inc": {"views": 1}})).unwrap();
        assert_eq!(ops.inc["views"], json!(1));

        assert!(UpdateDoc::from_json(&json!([1, 2])).is_err());
    }
}
