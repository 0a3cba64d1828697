//! Shredding: splitting an object into indexed columns and a remainder
//!
//! `shred` pulls the listed fields out so they can be written as dedicated
//! Parquet columns; the remainder keeps everything else for the `$data`
//! column. `merge` is the inverse, with shredded keys winning on conflict.

use crate::error::ShredError;
use crate::value::Variant;

/// Split `object` into `(shredded, remaining)` by field name.
///
/// Listed fields that are absent from the object are simply not present in
/// the shredded half. Field order within each half follows the original.
pub fn shred(object: &Variant, fields: &[&str]) -> Result<(Variant, Variant), ShredError> {
    let Variant::Object(entries) = object else {
        return Err(ShredError::NotAnObject);
    };

    let mut shredded = Vec::new();
    let mut remaining = Vec::new();
    for (key, value) in entries {
        if fields.contains(&key.as_str()) {
            shredded.push((key.clone(), value.clone()));
        } else {
            remaining.push((key.clone(), value.clone()));
        }
    }
    Ok((Variant::Object(shredded), Variant::Object(remaining)))
}

/// Recombine a shredded pair. Shredded keys win when both halves carry the
/// same key; shredded fields come first in the result.
pub fn merge(shredded: &Variant, remaining: &Variant) -> Result<Variant, ShredError> {
    let Variant::Object(shredded_entries) = shredded else {
        return Err(ShredError::NotAnObject);
    };
    let Variant::Object(remaining_entries) = remaining else {
        return Err(ShredError::NotAnObject);
    };

    let mut merged = shredded_entries.clone();
    for (key, value) in remaining_entries {
        if !merged.iter().any(|(k, _)| k == key) {
            merged.push((key.clone(), value.clone()));
        }
    }
    Ok(Variant::Object(merged))
}
