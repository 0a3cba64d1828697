//! Relation string parser
//!
//! Grammar: direction ws TypeName ('.' fieldName ('[]')?)? where direction is
//! one of `->`, `<-`, `~>`, `<~` (tilde arrows are fuzzy matches). Forward
//! relations name the reverse field on the target type; backward relations
//! name the field on the source type. Trailing `[]` marks cardinality many.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    FuzzyForward,
    FuzzyBackward,
}

impl Direction {
    pub fn is_forward(self) -> bool {
        matches!(self, Direction::Forward | Direction::FuzzyForward)
    }

    pub fn is_fuzzy(self) -> bool {
        matches!(self, Direction::FuzzyForward | Direction::FuzzyBackward)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub direction: Direction,
    pub target: String,
    /// Reverse field on the target (forward) or field on the source
    /// (backward).
    pub field: Option<String>,
    pub many: bool,
}

impl Relation {
    /// Returns `Some` when the input begins with a relation arrow, `None`
    /// when it is a plain field type, and `Err` for a malformed relation.
    pub fn parse(input: &str) -> Option<Result<Relation, String>> {
        let trimmed = input.trim();
        let (direction, rest) = if let Some(rest) = trimmed.strip_prefix("->") {
            (Direction::Forward, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<-") {
            (Direction::Backward, rest)
        } else if let Some(rest) = trimmed.strip_prefix("~>") {
            (Direction::FuzzyForward, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<~") {
            (Direction::FuzzyBackward, rest)
        } else {
            return None;
        };
        Some(Self::parse_after_arrow(direction, rest))
    }

    fn parse_after_arrow(direction: Direction, rest: &str) -> Result<Relation, String> {
        let rest = rest.trim();
        if rest.is_empty() {
            return Err("relation is missing a target type".to_string());
        }

        let (target_part, field_part) = match rest.split_once('.') {
            Some((target, field)) => (target, Some(field)),
            None => (rest, None),
        };

        let target = target_part.trim().to_string();
        if target.is_empty() || !is_type_name(&target) {
            return Err(format!("'{target}' is not a valid target type name"));
        }

        let (field, many) = match field_part {
            Some(raw) => {
                let raw = raw.trim();
                let (name, many) = match raw.strip_suffix("[]") {
                    Some(name) => (name, true),
                    None => (raw, false),
                };
                if name.is_empty() || !is_field_name(name) {
                    return Err(format!("'{name}' is not a valid field name"));
                }
                (Some(name.to_string()), many)
            }
            None => (None, false),
        };

        Ok(Relation {
            direction,
            target,
            field,
            many,
        })
    }
}

fn is_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derive the reverse name of a predicate: append `s` unless the predicate
/// already ends with one. An explicit `-> Type.field` wins over this rule.
pub fn derive_reverse_name(predicate: &str) -> String {
    if predicate.ends_with('s') {
        predicate.to_string()
    } else {
        format!("{predicate}s")
    }
}
