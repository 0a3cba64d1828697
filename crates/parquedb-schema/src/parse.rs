//! Schema document parsing and validation
//!
//! A schema document is a JSON object mapping type names to type
//! definitions. Keys beginning with `$` inside a definition are meta fields
//! (`$extends`, `$abstract`, `$shred`); everything else is a field whose
//! value is a field-type string or a relation string:
//!
//! ```json
//! {
//!   "Content": { "$abstract": true, "title": "string!" },
//!   "Post": {
//!     "$extends": "Content",
//!     "$shred": ["status"],
//!     "status": "enum(draft,published) = 'draft'",
//!     "author": "-> User.posts[]"
//!   },
//!   "User": { "email": "email##", "posts": "<- Post.author[]" }
//! }
//! ```

use crate::error::{Result, SchemaError};
use crate::field::{FieldType, IndexKind};
use crate::relation::Relation;
use crate::RESERVED_ALLOW_LIST;

const DEFAULT_NS_URI: &str = "parquedb://types";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldDef {
    Scalar(FieldType),
    Relation(Relation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub uri: String,
    pub ns_uri: String,
    pub extends: Option<String>,
    pub is_abstract: bool,
    /// Fields to write as dedicated Parquet columns.
    pub shred_fields: Vec<String>,
    /// Definition order is preserved.
    pub fields: Vec<(String, FieldDef)>,
}

impl TypeDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Indexed scalar fields with their index kinds.
    pub fn indexes(&self) -> Vec<(&str, IndexKind)> {
        self.fields
            .iter()
            .filter_map(|(name, def)| match def {
                FieldDef::Scalar(ft) => ft.index.map(|kind| (name.as_str(), kind)),
                FieldDef::Relation(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub ns_uri: String,
    pub types: Vec<TypeDef>,
}

impl Schema {
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Field resolution walking the `$extends` chain, nearest definition
    /// winning. Inheritance is structural; there is no dispatch.
    pub fn resolved_fields<'a>(&'a self, type_name: &str) -> Vec<(&'a str, &'a FieldDef)> {
        let mut chain = Vec::new();
        let mut cursor = self.get_type(type_name);
        while let Some(def) = cursor {
            chain.push(def);
            cursor = def.extends.as_deref().and_then(|p| self.get_type(p));
            // A cycle in $extends would loop forever; definitions already seen end the walk.
            if chain.len() > self.types.len() {
                break;
            }
        }

        let mut out: Vec<(&str, &FieldDef)> = Vec::new();
        for def in chain.iter().rev() {
            for (name, field) in &def.fields {
                if let Some(slot) = out.iter_mut().find(|(n, _)| *n == name) {
                    slot.1 = field;
                } else {
                    out.push((name.as_str(), field));
                }
            }
        }
        out
    }

    /// Shred list for a type including inherited entries.
    pub fn resolved_shred_fields(&self, type_name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.get_type(type_name);
        let mut hops = 0;
        while let Some(def) = cursor {
            for f in &def.shred_fields {
                if !out.contains(f) {
                    out.push(f.clone());
                }
            }
            cursor = def.extends.as_deref().and_then(|p| self.get_type(p));
            hops += 1;
            if hops > self.types.len() {
                break;
            }
        }
        out
    }
}

/// Parse and validate a schema document.
pub fn parse_schema(doc: &serde_json::Value) -> Result<Schema> {
    let Some(root) = doc.as_object() else {
        return Err(SchemaError::EmptySchema);
    };

    let ns_uri = root
        .get("$ns")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_NS_URI)
        .to_string();

    let mut types = Vec::new();
    for (name, body) in root {
        if name.starts_with('$') {
            continue;
        }
        types.push(parse_type(name, body, &ns_uri)?);
    }

    if types.is_empty() {
        return Err(SchemaError::EmptySchema);
    }

    validate_relations(&types)?;
    Ok(Schema { ns_uri, types })
}

fn parse_type(name: &str, body: &serde_json::Value, ns_uri: &str) -> Result<TypeDef> {
    if !is_valid_type_name(name) {
        return Err(SchemaError::InvalidTypeName {
            name: name.to_string(),
        });
    }

    let Some(entries) = body.as_object() else {
        return Err(SchemaError::EmptyType {
            name: name.to_string(),
        });
    };

    let extends = entries
        .get("$extends")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let is_abstract = entries
        .get("$abstract")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let shred_fields: Vec<String> = entries
        .get("$shred")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut fields = Vec::new();
    for (field_name, value) in entries {
        if field_name.starts_with('$') {
            if !RESERVED_ALLOW_LIST.contains(&field_name.as_str()) && field_name != "$ns" {
                return Err(SchemaError::ReservedFieldName {
                    type_name: name.to_string(),
                    field: field_name.clone(),
                });
            }
            continue;
        }

        let spec = value.as_str().ok_or_else(|| SchemaError::InvalidFieldType {
            type_name: name.to_string(),
            field: field_name.clone(),
            detail: "field definition must be a string".to_string(),
        })?;

        let def = match Relation::parse(spec) {
            Some(Ok(relation)) => FieldDef::Relation(relation),
            Some(Err(detail)) => {
                return Err(SchemaError::InvalidFieldType {
                    type_name: name.to_string(),
                    field: field_name.clone(),
                    detail,
                })
            }
            None => FieldDef::Scalar(FieldType::parse(spec).map_err(|detail| {
                SchemaError::InvalidFieldType {
                    type_name: name.to_string(),
                    field: field_name.clone(),
                    detail,
                }
            })?),
        };
        fields.push((field_name.clone(), def));
    }

    // Abstract bases may carry nothing but meta fields.
    if fields.is_empty() && !is_abstract {
        return Err(SchemaError::EmptyType {
            name: name.to_string(),
        });
    }

    Ok(TypeDef {
        name: name.to_string(),
        uri: format!("{ns_uri}/{name}"),
        ns_uri: ns_uri.to_string(),
        extends,
        is_abstract,
        shred_fields,
        fields,
    })
}

fn validate_relations(types: &[TypeDef]) -> Result<()> {
    for def in types {
        if let Some(parent) = &def.extends {
            if !types.iter().any(|t| &t.name == parent) {
                return Err(SchemaError::MissingTargetType {
                    type_name: def.name.clone(),
                    field: "$extends".to_string(),
                    target: parent.clone(),
                });
            }
        }

        for (field_name, field) in &def.fields {
            let FieldDef::Relation(rel) = field else {
                continue;
            };
            if !types.iter().any(|t| t.name == rel.target) {
                return Err(SchemaError::MissingTargetType {
                    type_name: def.name.clone(),
                    field: field_name.clone(),
                    target: rel.target.clone(),
                });
            }
            if rel.field.is_none() {
                return Err(SchemaError::MissingReverseField {
                    type_name: def.name.clone(),
                    field: field_name.clone(),
                    target: rel.target.clone(),
                });
            }
        }
    }
    Ok(())
}

fn is_valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
