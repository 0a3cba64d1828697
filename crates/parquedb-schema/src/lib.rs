// parquedb-schema - Schema language for entity types
//
// Parses the field-type DSL ("string!", "decimal(10,2)#", "-> User.posts[]"),
// validates whole schema documents into a typed graph, infers schemas from
// sample documents, and maps field types onto the Arrow/Parquet type system.

mod error;
mod field;
mod infer;
mod mapping;
mod parse;
mod relation;

pub use error::{Result, SchemaError};
pub use field::{BaseType, FieldType, IndexKind};
pub use infer::infer_schema;
pub use mapping::{mapped_type, MappedType};
pub use parse::{parse_schema, FieldDef, Schema, TypeDef};
pub use relation::{Direction, Relation};

/// `$`-prefixed field names permitted in user documents and type definitions.
pub const RESERVED_ALLOW_LIST: [&str; 6] = ["$id", "$type", "$data", "$extends", "$abstract", "$shred"];
