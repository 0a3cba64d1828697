//! Query-parameter parsing for the HTTP surface
//!
//! The HTTP layer itself is a collaborator; these helpers define the
//! recognized shapes: `filter` (JSON), `sort` (JSON or `field[:asc|desc],…`),
//! `project` (JSON or `fieldA,fieldB,-excludedC`), `limit`, `skip`,
//! `cursor` (opaque skip token).

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;

use parquedb_query::{Projection, SortDir};

/// `filter` is a JSON document.
pub fn parse_filter_param(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow!("filter is not valid JSON: {e}"))
}

/// `sort` accepts JSON (`{"age": "desc"}`, `{"age": -1}`, `["-age"]`) or
/// the compact `age:desc,name` form. A `-` prefix also means descending.
pub fn parse_sort_param(raw: &str) -> Result<Vec<(String, SortDir)>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| anyhow!("sort is not valid JSON: {e}"))?;
        return match value {
            Value::Object(fields) => fields
                .into_iter()
                .map(|(field, dir)| Ok((field, json_sort_dir(&dir)?)))
                .collect(),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(split_sort_field(&s)?),
                    other => bail!("sort array entries must be strings, got {other}"),
                })
                .collect(),
            other => bail!("sort must be an object or array, got {other}"),
        };
    }

    trimmed.split(',').map(split_sort_field).collect()
}

fn json_sort_dir(value: &Value) -> Result<SortDir> {
    match value {
        Value::String(s) => match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDir::Asc),
            "desc" | "descending" => Ok(SortDir::Desc),
            other => bail!("unknown sort direction '{other}'"),
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(SortDir::Asc),
            Some(-1) => Ok(SortDir::Desc),
            _ => bail!("numeric sort direction must be 1 or -1"),
        },
        other => bail!("sort direction must be a string or number, got {other}"),
    }
}

fn split_sort_field(raw: &str) -> Result<(String, SortDir)> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty sort field");
    }
    if let Some(field) = raw.strip_prefix('-') {
        return Ok((field.to_string(), SortDir::Desc));
    }
    match raw.split_once(':') {
        Some((field, dir)) => {
            let dir = match dir.trim().to_lowercase().as_str() {
                "asc" | "ascending" | "1" => SortDir::Asc,
                "desc" | "descending" | "-1" => SortDir::Desc,
                other => bail!("unknown sort direction '{other}'"),
            };
            Ok((field.trim().to_string(), dir))
        }
        None => Ok((raw.to_string(), SortDir::Asc)),
    }
}

/// `project` accepts JSON (`{"name": 1, "body": 0}`) or the compact
/// `fieldA,fieldB,-excludedC` form. Included names win when both appear.
pub fn parse_project_param(raw: &str) -> Result<Option<Projection>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let (include, exclude) = if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("project is not valid JSON: {e}"))?;
        let Some(fields) = value.as_object() else {
            bail!("project must be an object");
        };
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for (field, flag) in fields {
            let keep = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64() != Some(0),
                other => bail!("project flag for '{field}' must be a boolean or number, got {other}"),
            };
            if keep {
                include.push(field.clone());
            } else {
                exclude.push(field.clone());
            }
        }
        (include, exclude)
    } else {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.strip_prefix('-') {
                Some(field) => exclude.push(field.to_string()),
                None => include.push(part.to_string()),
            }
        }
        (include, exclude)
    };

    if !include.is_empty() {
        Ok(Some(Projection::Include(include)))
    } else if !exclude.is_empty() {
        Ok(Some(Projection::Exclude(exclude)))
    } else {
        Ok(None)
    }
}

pub fn parse_limit_param(raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("limit must be a non-negative integer, got '{raw}'"))
}

pub fn parse_skip_param(raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("skip must be a non-negative integer, got '{raw}'"))
}

/// Opaque continuation token carrying the next skip offset.
pub fn encode_cursor(skip: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("o:{skip}"))
}

pub fn parse_cursor(raw: &str) -> Result<usize> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .map_err(|_| anyhow!("malformed cursor"))?;
    let text = String::from_utf8(bytes).map_err(|_| anyhow!("malformed cursor"))?;
    text.strip_prefix("o:")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| anyhow!("malformed cursor"))
}
