//! Schema validation errors
//!
//! Each variant carries a stable machine-readable code so callers can key on
//! failures without matching message text.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("[EMPTY_SCHEMA] schema defines no types")]
    EmptySchema,

    #[error("[INVALID_TYPE_NAME] type name '{name}' must start with an uppercase ASCII letter")]
    InvalidTypeName { name: String },

    #[error("[EMPTY_TYPE] type '{name}' has no fields")]
    EmptyType { name: String },

    #[error("[INVALID_FIELD_TYPE] field '{type_name}.{field}': {detail}")]
    InvalidFieldType {
        type_name: String,
        field: String,
        detail: String,
    },

    #[error("[MISSING_TARGET_TYPE] relation '{type_name}.{field}' points at unknown type '{target}'")]
    MissingTargetType {
        type_name: String,
        field: String,
        target: String,
    },

    #[error("[MISSING_REVERSE_FIELD] relation '{type_name}.{field}' must name the field on '{target}'")]
    MissingReverseField {
        type_name: String,
        field: String,
        target: String,
    },

    #[error("[RESERVED_FIELD_NAME] field name '{field}' on '{type_name}' is reserved")]
    ReservedFieldName { type_name: String, field: String },
}

impl SchemaError {
    /// The stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::EmptySchema => "EMPTY_SCHEMA",
            SchemaError::InvalidTypeName { .. } => "INVALID_TYPE_NAME",
            SchemaError::EmptyType { .. } => "EMPTY_TYPE",
            SchemaError::InvalidFieldType { .. } => "INVALID_FIELD_TYPE",
            SchemaError::MissingTargetType { .. } => "MISSING_TARGET_TYPE",
            SchemaError::MissingReverseField { .. } => "MISSING_REVERSE_FIELD",
            SchemaError::ReservedFieldName { .. } => "RESERVED_FIELD_NAME",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchemaError>;
