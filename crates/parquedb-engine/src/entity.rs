//! Entities, relationships and identifier encoding

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

/// Encode a per-namespace entity sequence number as its short opaque id:
/// `id` followed by the base-36 rendering of the counter.
pub fn encode_entity_id(seq: u64) -> String {
    format!("id{}", to_base36(seq))
}

/// Inverse of `encode_entity_id`; `None` for foreign id shapes.
pub fn decode_entity_seq(id: &str) -> Option<u64> {
    let digits = id.strip_prefix("id")?;
    if digits.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(36)?;
        value = value.checked_mul(36)?.checked_add(u64::from(digit))?;
    }
    Some(value)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

/// Split a full `$id` of the form `<ns>/<id>` into its parts.
pub fn parse_entity_ref(full_id: &str) -> Result<(&str, &str)> {
    full_id
        .split_once('/')
        .filter(|(ns, id)| !ns.is_empty() && !id.is_empty())
        .ok_or_else(|| {
            EngineError::InvalidInput(format!("'{full_id}' is not a '<ns>/<id>' reference"))
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Full id `<ns>/<id>`.
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$type")]
    pub entity_type: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    #[serde(rename = "updatedBy")]
    pub updated_by: String,
    #[serde(rename = "deletedAt", default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(rename = "deletedBy", default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub version: u64,
    /// User payload.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Entity {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The `<id>` half of `$id`.
    pub fn local_id(&self) -> &str {
        self.id.split_once('/').map(|(_, id)| id).unwrap_or(&self.id)
    }

    pub fn namespace(&self) -> &str {
        self.id.split_once('/').map(|(ns, _)| ns).unwrap_or("")
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationshipDirection {
    #[default]
    Outbound,
    Inbound,
    Both,
}

/// Directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "fromNs")]
    pub from_ns: String,
    #[serde(rename = "fromId")]
    pub from_id: String,
    pub predicate: String,
    /// Auto-derived unless the schema supplies one.
    pub reverse: String,
    #[serde(rename = "toNs")]
    pub to_ns: String,
    #[serde(rename = "toId")]
    pub to_id: String,
    #[serde(rename = "matchMode", default, skip_serializing_if = "Option::is_none")]
    pub match_mode: Option<MatchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    #[serde(rename = "updatedBy")]
    pub updated_by: String,
    #[serde(rename = "deletedAt", default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(rename = "deletedBy", default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub version: u64,
}

impl Relationship {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from_ns: self.from_ns.clone(),
            from_id: self.from_id.clone(),
            predicate: self.predicate.clone(),
            to_ns: self.to_ns.clone(),
            to_id: self.to_id.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Primary key of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from_ns: String,
    pub from_id: String,
    pub predicate: String,
    pub to_ns: String,
    pub to_id: String,
}

impl EdgeKey {
    /// Event target string `fromNs:fromId:predicate:toNs:toId`.
    pub fn target(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.from_ns, self.from_id, self.predicate, self.to_ns, self.to_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_encoding_round_trips() {
        assert_eq!(encode_entity_id(1), "id1");
        assert_eq!(encode_entity_id(10), "ida");
        assert_eq!(encode_entity_id(36), "id10");

        for seq in [1u64, 9, 35, 36, 1000, 1_000_000] {
            assert_eq!(decode_entity_seq(&encode_entity_id(seq)), Some(seq));
        }
        assert_eq!(decode_entity_seq("nope"), None);
        assert_eq!(decode_entity_seq("id"), None);
    }

    #[test]
    fn entity_refs_parse() {
        assert_eq!(parse_entity_ref("posts/id1").unwrap(), ("posts", "id1"));
        assert!(parse_entity_ref("posts").is_err());
        assert!(parse_entity_ref("/id1").is_err());
    }

    #[test]
    fn entity_json_shape_uses_dollar_keys() {
        let entity = Entity {
            id: "posts/id1".to_string(),
            entity_type: "Post".to_string(),
            name: "First".to_string(),
            created_at: 1000,
            created_by: "u1".to_string(),
            updated_at: 1000,
            updated_by: "u1".to_string(),
            deleted_at: None,
            deleted_by: None,
            version: 1,
            data: json!({"views": 3}).as_object().unwrap().clone(),
        };
        let value = entity.to_json();
        assert_eq!(value["$id"], json!("posts/id1"));
        assert_eq!(value["$type"], json!("Post"));
        assert_eq!(value["views"], json!(3));
        assert!(value.get("deletedAt").is_none());

        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back, entity);
    }
}
