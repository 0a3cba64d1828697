//! Cache key construction and parsing
//!
//! Shape: `base(?v=version)?(#start-end)?`. The version segment makes new
//! namespace versions read as cache misses; the range segment keys partial
//! responses for range-aware content types.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub path: String,
    pub version: Option<u64>,
    /// Inclusive byte range `(start, end)`.
    pub range: Option<(u64, u64)>,
}

pub fn build_key(path: &str, version: Option<u64>, range: Option<(u64, u64)>) -> String {
    let mut key = path.to_string();
    if let Some(version) = version {
        key.push_str("?v=");
        key.push_str(&version.to_string());
    }
    if let Some((start, end)) = range {
        key.push('#');
        key.push_str(&start.to_string());
        key.push('-');
        key.push_str(&end.to_string());
    }
    key
}

/// Inverse of `build_key`. Unparseable suffixes stay part of the path.
pub fn parse_key(key: &str) -> CacheKey {
    let (rest, range) = match key.rsplit_once('#') {
        Some((head, frag)) => match parse_range(frag) {
            Some(range) => (head, Some(range)),
            None => (key, None),
        },
        None => (key, None),
    };

    let (path, version) = match rest.rsplit_once("?v=") {
        Some((head, v)) => match v.parse::<u64>() {
            Ok(version) => (head, Some(version)),
            Err(_) => (rest, None),
        },
        None => (rest, None),
    };

    CacheKey {
        path: path.to_string(),
        version,
        range,
    }
}

fn parse_range(fragment: &str) -> Option<(u64, u64)> {
    let (start, end) = fragment.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
