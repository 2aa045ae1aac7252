//! Field-by-field copying between two record shapes.
//!
//! Fields are paired by normalized name: the serialized key (so
//! `#[serde(rename = "...")]` acts as the rename tag) lower-cased with
//! underscores removed. `user_name`, `userName` and `UserName` all pair up.
//!
//! Mapping is best effort and never fails. For each destination field with
//! a source counterpart, the pair of JSON kinds decides what happens:
//!
//! | source \ destination | null      | same kind | number            | other |
//! |----------------------|-----------|-----------|-------------------|-------|
//! | object               | allocate  | recurse   | skip              | skip  |
//! | number               | assign    | assign    | convert           | skip  |
//! | anything else        | assign    | assign    | skip              | skip  |
//!
//! A `null` destination is an `Option` (or other lazily built value) that
//! has not been populated yet, so it takes the source value whole. Every
//! assignment is tried against the destination's `Deserialize` impl and
//! reverted if the destination would no longer deserialize, which is how
//! incompatible pairs that share a JSON kind get skipped. Date and time
//! values serialize to strings, so they are copied as leaves and never
//! recursed into.

use crate::record::{self, Object};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use std::collections::HashMap;

/// What [`map_into`] did with each destination field, by dotted path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapReport {
    /// Fields copied as-is.
    pub assigned: Vec<String>,
    /// Fields copied after numeric conversion.
    pub converted: Vec<String>,
    /// Fields with a source counterpart that could not be copied.
    pub skipped: Vec<String>,
}

impl MapReport {
    /// Number of destination fields that received a value.
    pub fn copied(&self) -> usize {
        self.assigned.len() + self.converted.len()
    }
}

/// Normalize a field name for matching.
pub fn normalize_field_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug)]
struct Assignment {
    path: Vec<String>,
    value: Json,
    converted: bool,
}

/// Copy matching fields of `source` into `destination`.
///
/// Fields of `destination` with no counterpart keep their current value.
/// If either side does not serialize to an object, nothing is copied.
pub fn map_into<S, D>(source: &S, destination: &mut D) -> MapReport
where
    S: Serialize,
    D: Serialize + DeserializeOwned,
{
    let mut report = MapReport::default();

    let (src, mut dst) = match (record::to_object(source), record::to_object(destination)) {
        (Ok(src), Ok(dst)) => (src, dst),
        (Err(e), _) | (_, Err(e)) => {
            tracing::trace!(error = %e, "Mapper skipped non-record value");
            return report;
        }
    };

    let mut plan = Vec::new();
    plan_object(&src, &dst, &mut Vec::new(), &mut plan, &mut report);

    let mut current: Option<D> = None;
    for assignment in plan {
        let dotted = assignment.path.join(".");
        let previous = swap_at(&mut dst, &assignment.path, assignment.value);
        match record::from_object::<D>(dst.clone()) {
            Ok(rebuilt) => {
                current = Some(rebuilt);
                if assignment.converted {
                    report.converted.push(dotted);
                } else {
                    report.assigned.push(dotted);
                }
            }
            Err(e) => {
                tracing::trace!(field = %dotted, error = %e, "Mapper reverted incompatible field");
                if let Some(previous) = previous {
                    swap_at(&mut dst, &assignment.path, previous);
                }
                report.skipped.push(dotted);
            }
        }
    }

    if let Some(rebuilt) = current {
        *destination = rebuilt;
    }

    tracing::trace!(
        assigned = report.assigned.len(),
        converted = report.converted.len(),
        skipped = report.skipped.len(),
        "Mapped record"
    );
    report
}

/// Build a fresh `D` from its default and copy matching fields of `source` into it.
pub fn map_new<S, D>(source: &S) -> D
where
    S: Serialize,
    D: Serialize + DeserializeOwned + Default,
{
    let mut destination = D::default();
    map_into(source, &mut destination);
    destination
}

fn plan_object(
    src: &Object,
    dst: &Object,
    prefix: &mut Vec<String>,
    plan: &mut Vec<Assignment>,
    report: &mut MapReport,
) {
    let mut by_name: HashMap<String, &Json> = HashMap::with_capacity(src.len());
    for (key, value) in src {
        by_name.entry(normalize_field_name(key)).or_insert(value);
    }

    for (key, current) in dst {
        let Some(incoming) = by_name.get(&normalize_field_name(key)) else {
            continue;
        };
        prefix.push(key.clone());
        match (incoming, current) {
            (Json::Object(src_inner), Json::Object(dst_inner)) => {
                plan_object(src_inner, dst_inner, prefix, plan, report);
            }
            _ => match convert(incoming, current) {
                Some((value, converted)) => plan.push(Assignment {
                    path: prefix.clone(),
                    value,
                    converted,
                }),
                None => report.skipped.push(prefix.join(".")),
            },
        }
        prefix.pop();
    }
}

/// Decide what to write for one `(source, destination)` pair.
fn convert(incoming: &Json, current: &Json) -> Option<(Json, bool)> {
    match (incoming, current) {
        (_, Json::Null) => Some((incoming.clone(), false)),
        (Json::Null, _) => Some((Json::Null, false)),
        (Json::Number(src), Json::Number(dst)) => {
            let dst_is_int = dst.is_i64() || dst.is_u64();
            let src_is_int = src.is_i64() || src.is_u64();
            if dst_is_int == src_is_int {
                return Some((incoming.clone(), false));
            }
            if dst_is_int {
                let f = src.as_f64()?;
                if f.fract() != 0.0 || !f.is_finite() || f.abs() >= 9.0e15 {
                    return None;
                }
                #[allow(clippy::cast_possible_truncation)]
                Some((Json::from(f as i64), true))
            } else {
                let f = src.as_f64()?;
                serde_json::Number::from_f64(f).map(|n| (Json::Number(n), true))
            }
        }
        (Json::Bool(_), Json::Bool(_))
        | (Json::String(_), Json::String(_))
        | (Json::Array(_), Json::Array(_)) => Some((incoming.clone(), false)),
        _ => None,
    }
}

/// Replace the value at `path`, returning what was there.
fn swap_at(root: &mut Object, path: &[String], value: Json) -> Option<Json> {
    let (last, parents) = path.split_last()?;
    let mut node = root;
    for key in parents {
        node = match node.get_mut(key) {
            Some(Json::Object(inner)) => inner,
            _ => return None,
        };
    }
    node.insert(last.clone(), value)
}
