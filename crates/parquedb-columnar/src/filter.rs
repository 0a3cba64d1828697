//! Predicate push-down
//!
//! `relevant_row_groups` consults per-row-group column statistics and keeps a
//! group unless the predicate is provably unsatisfiable on its [min, max]
//! range. Absent statistics or an absent column always include the group.
//! The function is pure: same metadata and filter, same answer.

use parquet::file::metadata::{ParquetMetaData, RowGroupMetaData};
use parquet::file::statistics::Statistics;
use serde_json::Value;
use std::cmp::Ordering;

use crate::rows::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<FilterOp> {
        match s {
            "eq" => Some(FilterOp::Eq),
            "ne" => Some(FilterOp::Ne),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            "isNull" => Some(FilterOp::IsNull),
            "isNotNull" => Some(FilterOp::IsNotNull),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    /// Comparison operand; an array for `In`, ignored for the null checks.
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

/// Indices of row groups that may contain matching rows.
pub fn relevant_row_groups(meta: &ParquetMetaData, filter: &Filter) -> Vec<usize> {
    (0..meta.num_row_groups())
        .filter(|&idx| row_group_may_match(meta.row_group(idx), filter))
        .collect()
}

fn row_group_may_match(rg: &RowGroupMetaData, filter: &Filter) -> bool {
    let Some(column) = rg
        .columns()
        .iter()
        .find(|c| c.column_path().string() == filter.column)
    else {
        // Unknown column: include conservatively
        return true;
    };

    let stats = column.statistics();
    let null_count = stats.and_then(|s| s.null_count_opt());
    let range = stats.and_then(stat_range);

    match filter.op {
        FilterOp::IsNull => null_count != Some(0),
        FilterOp::IsNotNull => {
            // Exclude only a group that is provably all-null
            null_count.is_none_or(|nulls| nulls < rg.num_rows() as u64)
        }
        FilterOp::Eq => match (&range, scalar(&filter.value)) {
            (Some((min, max)), Some(v)) => in_range(&v, min, max),
            _ => true,
        },
        FilterOp::Ne => match (&range, scalar(&filter.value)) {
            // Only prunable when every value in the group equals the operand
            (Some((min, max)), Some(v)) => {
                !(compare(min, max) == Some(Ordering::Equal)
                    && compare(&v, min) == Some(Ordering::Equal)
                    && null_count == Some(0))
            }
            _ => true,
        },
        FilterOp::Gt => match (&range, scalar(&filter.value)) {
            (Some((_, max)), Some(v)) => compare(max, &v) == Some(Ordering::Greater),
            _ => true,
        },
        FilterOp::Gte => match (&range, scalar(&filter.value)) {
            (Some((_, max)), Some(v)) => {
                matches!(compare(max, &v), Some(Ordering::Greater | Ordering::Equal))
            }
            _ => true,
        },
        FilterOp::Lt => match (&range, scalar(&filter.value)) {
            (Some((min, _)), Some(v)) => compare(min, &v) == Some(Ordering::Less),
            _ => true,
        },
        FilterOp::Lte => match (&range, scalar(&filter.value)) {
            (Some((min, _)), Some(v)) => {
                matches!(compare(min, &v), Some(Ordering::Less | Ordering::Equal))
            }
            _ => true,
        },
        FilterOp::In => match (&range, filter.value.as_array()) {
            (Some((min, max)), Some(values)) => values
                .iter()
                .filter_map(scalar_ref)
                .any(|v| in_range(&v, min, max)),
            _ => true,
        },
    }
}

/// Scalar domain shared by statistics and JSON operands.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

fn scalar(value: &Value) -> Option<Scalar> {
    scalar_ref(value)
}

fn scalar_ref(value: &Value) -> Option<Scalar> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Scalar::Int(i))
            } else {
                n.as_f64().map(Scalar::Float)
            }
        }
        Value::String(s) => Some(Scalar::Str(s.clone())),
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        _ => None,
    }
}

fn stat_range(stats: &Statistics) -> Option<(Scalar, Scalar)> {
    match stats {
        Statistics::Int32(vs) => Some((
            Scalar::Int(i64::from(*vs.min_opt()?)),
            Scalar::Int(i64::from(*vs.max_opt()?)),
        )),
        Statistics::Int64(vs) => {
            Some((Scalar::Int(*vs.min_opt()?), Scalar::Int(*vs.max_opt()?)))
        }
        Statistics::Float(vs) => Some((
            Scalar::Float(f64::from(*vs.min_opt()?)),
            Scalar::Float(f64::from(*vs.max_opt()?)),
        )),
        Statistics::Double(vs) => {
            Some((Scalar::Float(*vs.min_opt()?), Scalar::Float(*vs.max_opt()?)))
        }
        Statistics::Boolean(vs) => {
            Some((Scalar::Bool(*vs.min_opt()?), Scalar::Bool(*vs.max_opt()?)))
        }
        Statistics::ByteArray(vs) => Some((
            Scalar::Str(vs.min_opt()?.as_utf8().ok()?.to_string()),
            Scalar::Str(vs.max_opt()?.as_utf8().ok()?.to_string()),
        )),
        _ => None,
    }
}

fn compare(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(y)),
        (Scalar::Float(x), Scalar::Float(y)) => x.partial_cmp(y),
        (Scalar::Int(x), Scalar::Float(y)) => (*x as f64).partial_cmp(y),
        (Scalar::Float(x), Scalar::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Scalar::Str(x), Scalar::Str(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn in_range(v: &Scalar, min: &Scalar, max: &Scalar) -> bool {
    match (compare(v, min), compare(v, max)) {
        (Some(lo), Some(hi)) => lo != Ordering::Less && hi != Ordering::Greater,
        // Incomparable types: include conservatively
        _ => true,
    }
}

/// Row-level predicate, used for residual filtering after pruning.
pub fn matches_row(row: &Row, filter: &Filter) -> bool {
    let cell = row.get(&filter.column).unwrap_or(&Value::Null);
    match filter.op {
        FilterOp::IsNull => cell.is_null(),
        FilterOp::IsNotNull => !cell.is_null(),
        FilterOp::In => match (scalar_ref(cell), filter.value.as_array()) {
            (Some(v), Some(values)) => values
                .iter()
                .filter_map(scalar_ref)
                .any(|candidate| compare(&v, &candidate) == Some(Ordering::Equal)),
            _ => false,
        },
        op => {
            let (Some(v), Some(operand)) = (scalar_ref(cell), scalar_ref(&filter.value)) else {
                return false;
            };
            let Some(ordering) = compare(&v, &operand) else {
                return false;
            };
            match op {
                FilterOp::Eq => ordering == Ordering::Equal,
                FilterOp::Ne => ordering != Ordering::Equal,
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Gte => ordering != Ordering::Less,
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Lte => ordering != Ordering::Greater,
                _ => unreachable!(),
            }
        }
    }
}
