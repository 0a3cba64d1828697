//! Field-type string parser
//!
//! Grammar:
//!   base ( '(' params ')' )? ( '[]' )? ( '#' index? )? ( '!' | '?' )? ( '=' default )?
//!
//! Examples: `string!`, `int?`, `string[]`, `decimal(10,2)#`, `varchar(64)##`,
//! `text#fts`, `vector(768)#vec`, `enum(a,b,c) = 'a'`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    String,
    Int,
    Float,
    Double,
    Number,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Uuid,
    Email,
    Url,
    Text,
    Markdown,
    Json,
    Binary,
    Decimal,
    Varchar,
    Char,
    Vector,
    Enum,
}

impl BaseType {
    /// Case-insensitive lookup. Accepts the physical-type spellings used in
    /// wire-facing schemas (`STRING`, `INT64`, `DOUBLE`, `BOOL`) as aliases.
    pub fn parse(name: &str) -> Option<BaseType> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(BaseType::String),
            "int" | "int32" | "int64" | "integer" | "long" => Some(BaseType::Int),
            "float" => Some(BaseType::Float),
            "double" | "float64" => Some(BaseType::Double),
            "number" => Some(BaseType::Number),
            "boolean" | "bool" => Some(BaseType::Boolean),
            "date" => Some(BaseType::Date),
            "datetime" => Some(BaseType::DateTime),
            "timestamp" => Some(BaseType::Timestamp),
            "uuid" => Some(BaseType::Uuid),
            "email" => Some(BaseType::Email),
            "url" => Some(BaseType::Url),
            "text" => Some(BaseType::Text),
            "markdown" => Some(BaseType::Markdown),
            "json" => Some(BaseType::Json),
            "binary" => Some(BaseType::Binary),
            "decimal" => Some(BaseType::Decimal),
            "varchar" => Some(BaseType::Varchar),
            "char" => Some(BaseType::Char),
            "vector" => Some(BaseType::Vector),
            "enum" => Some(BaseType::Enum),
            _ => None,
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BaseType::String => "string",
            BaseType::Int => "int",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::Number => "number",
            BaseType::Boolean => "boolean",
            BaseType::Date => "date",
            BaseType::DateTime => "datetime",
            BaseType::Timestamp => "timestamp",
            BaseType::Uuid => "uuid",
            BaseType::Email => "email",
            BaseType::Url => "url",
            BaseType::Text => "text",
            BaseType::Markdown => "markdown",
            BaseType::Json => "json",
            BaseType::Binary => "binary",
            BaseType::Decimal => "decimal",
            BaseType::Varchar => "varchar",
            BaseType::Char => "char",
            BaseType::Vector => "vector",
            BaseType::Enum => "enum",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Bare `#`: non-unique btree
    BTree,
    /// `##` or `#unique`
    Unique,
    /// `#fts`: full-text search
    Fts,
    /// `#vec`: vector similarity
    Vec,
    /// `#hash`
    Hash,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub base: BaseType,
    /// Raw parameter strings, e.g. `["10", "2"]` for `decimal(10,2)` or the
    /// member list for `enum(a,b,c)`.
    pub params: Vec<String>,
    pub is_array: bool,
    pub index: Option<IndexKind>,
    pub required: bool,
    /// Raw default literal text, quotes preserved.
    pub default: Option<String>,
}

impl FieldType {
    /// Parse a field-type string. Errors carry a human-readable detail; the
    /// caller wraps them into `SchemaError::InvalidFieldType`.
    pub fn parse(input: &str) -> Result<FieldType, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("empty field type".to_string());
        }

        // Split off the default first so literal text stays untouched.
        let (head, default) = match trimmed.split_once('=') {
            Some((head, default)) => (head.trim_end(), Some(default.trim_start().to_string())),
            None => (trimmed, None),
        };

        let mut rest = head;

        let base_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        let base_name = &rest[..base_len];
        let base = BaseType::parse(base_name)
            .ok_or_else(|| format!("unknown base type '{base_name}'"))?;
        rest = &rest[base_len..];

        let mut params = Vec::new();
        if let Some(stripped) = rest.strip_prefix('(') {
            let close = stripped
                .find(')')
                .ok_or_else(|| "unterminated parameter list".to_string())?;
            let inner = &stripped[..close];
            if !inner.trim().is_empty() {
                params = inner.split(',').map(|p| p.trim().to_string()).collect();
            }
            rest = &stripped[close + 1..];
        }

        let mut is_array = false;
        if let Some(stripped) = rest.strip_prefix("[]") {
            is_array = true;
            rest = stripped;
        }

        let mut index = None;
        if let Some(stripped) = rest.strip_prefix('#') {
            let (kind, after) = if let Some(after) = stripped.strip_prefix('#') {
                (IndexKind::Unique, after)
            } else {
                let word_len = stripped
                    .find(|c: char| !c.is_ascii_alphanumeric())
                    .unwrap_or(stripped.len());
                match &stripped[..word_len] {
                    "" => (IndexKind::BTree, stripped),
                    "unique" => (IndexKind::Unique, &stripped[word_len..]),
                    "fts" => (IndexKind::Fts, &stripped[word_len..]),
                    "vec" => (IndexKind::Vec, &stripped[word_len..]),
                    "hash" => (IndexKind::Hash, &stripped[word_len..]),
                    other => return Err(format!("unknown index kind '{other}'")),
                }
            };
            index = Some(kind);
            rest = after;
        }

        let mut required = false;
        match rest {
            "" => {}
            "!" => required = true,
            "?" => required = false,
            other => return Err(format!("unexpected trailing '{other}'")),
        }

        validate_params(base, &params)?;

        Ok(FieldType {
            base,
            params,
            is_array,
            index,
            required,
            default,
        })
    }

    /// Decimal precision/scale, defaulting to (18, 2).
    pub fn decimal_precision_scale(&self) -> (u8, i8) {
        let precision = self
            .params
            .first()
            .and_then(|p| p.parse().ok())
            .unwrap_or(18);
        let scale = self.params.get(1).and_then(|p| p.parse().ok()).unwrap_or(2);
        (precision, scale)
    }
}

fn validate_params(base: BaseType, params: &[String]) -> Result<(), String> {
    match base {
        BaseType::Decimal => {
            if params.len() > 2 {
                return Err("decimal takes at most (precision, scale)".to_string());
            }
            for p in params {
                p.parse::<u32>()
                    .map_err(|_| format!("decimal parameter '{p}' is not a number"))?;
            }
        }
        BaseType::Varchar | BaseType::Char | BaseType::Vector => {
            if params.len() > 1 {
                return Err(format!("{base} takes a single length parameter"));
            }
            if let Some(p) = params.first() {
                p.parse::<u32>()
                    .map_err(|_| format!("{base} parameter '{p}' is not a number"))?;
            }
        }
        BaseType::Enum => {
            if params.is_empty() {
                return Err("enum requires at least one member".to_string());
            }
        }
        _ => {
            if !params.is_empty() {
                return Err(format!("{base} takes no parameters"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_required_and_optional() {
        let required = FieldType::parse("string!").unwrap();
        assert_eq!(required.base, BaseType::String);
        assert!(required.required);
        assert!(!required.is_array);

        let optional = FieldType::parse("int?").unwrap();
        assert_eq!(optional.base, BaseType::Int);
        assert!(!optional.required);

        // Optional is the default
        let bare = FieldType::parse("boolean").unwrap();
        assert!(!bare.required);
    }

    #[test]
    fn parses_uppercase_physical_aliases() {
        assert_eq!(FieldType::parse("STRING!").unwrap().base, BaseType::String);
        assert_eq!(FieldType::parse("INT64?").unwrap().base, BaseType::Int);
        assert_eq!(FieldType::parse("DOUBLE").unwrap().base, BaseType::Double);
    }

    #[test]
    fn parses_arrays() {
        let ft = FieldType::parse("string[]").unwrap();
        assert!(ft.is_array);
        let ft = FieldType::parse("int[]!").unwrap();
        assert!(ft.is_array && ft.required);
    }

    #[test]
    fn parses_index_modifiers() {
        assert_eq!(FieldType::parse("string#").unwrap().index, Some(IndexKind::BTree));
        assert_eq!(FieldType::parse("string##").unwrap().index, Some(IndexKind::Unique));
        assert_eq!(
            FieldType::parse("string#unique").unwrap().index,
            Some(IndexKind::Unique)
        );
        assert_eq!(FieldType::parse("text#fts").unwrap().index, Some(IndexKind::Fts));
        assert_eq!(
            FieldType::parse("vector(768)#vec").unwrap().index,
            Some(IndexKind::Vec)
        );
        assert_eq!(FieldType::parse("string#hash").unwrap().index, Some(IndexKind::Hash));
    }

    #[test]
    fn parses_parametric_types() {
        let ft = FieldType::parse("decimal(10,2)#").unwrap();
        assert_eq!(ft.base, BaseType::Decimal);
        assert_eq!(ft.params, ["10", "2"]);
        assert_eq!(ft.decimal_precision_scale(), (10, 2));
        assert_eq!(ft.index, Some(IndexKind::BTree));

        let ft = FieldType::parse("decimal").unwrap();
        assert_eq!(ft.decimal_precision_scale(), (18, 2));

        let ft = FieldType::parse("enum(draft,published,archived)").unwrap();
        assert_eq!(ft.params, ["draft", "published", "archived"]);

        let ft = FieldType::parse("varchar(64)##").unwrap();
        assert_eq!(ft.params, ["64"]);
        assert_eq!(ft.index, Some(IndexKind::Unique));
    }

    #[test]
    fn default_keeps_raw_literal() {
        let ft = FieldType::parse("string? = 'draft'").unwrap();
        assert_eq!(ft.default.as_deref(), Some("'draft'"));

        let ft = FieldType::parse("int = 0").unwrap();
        assert_eq!(ft.default.as_deref(), Some("0"));

        let ft = FieldType::parse("string! = \"a = b\"").unwrap();
        assert_eq!(ft.default.as_deref(), Some("\"a = b\""));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(FieldType::parse("").is_err());
        assert!(FieldType::parse("wibble!").is_err());
        assert!(FieldType::parse("decimal(10").is_err());
        assert!(FieldType::parse("string#btree").is_err());
        assert!(FieldType::parse("string!?").is_err());
        assert!(FieldType::parse("enum()").is_err());
        assert!(FieldType::parse("string(5)").is_err());
    }
}
