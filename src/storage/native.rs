//! Native filter, update and pipeline evaluation
//!
//! Shared by the memory and file stores. Filters are compiled once into a
//! [`Matcher`] and then applied per document. Unknown operators are errors.

use super::{RawDocument, StoreError, StoreResult, ID_FIELD};
use crate::query::{NativeFilter, NativeFindOptions, NativePipeline, NativeSort, NativeUpdate};
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A compiled native filter
#[derive(Debug)]
pub enum Matcher {
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Field {
        path: String,
        predicates: Vec<Predicate>,
    },
}

/// One operator applied to one field
#[derive(Debug)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidFilter {
        message: message.into(),
    }
}

impl Matcher {
    pub fn compile(filter: &NativeFilter) -> StoreResult<Self> {
        Self::from_value(filter.as_value())
    }

    fn from_value(value: &Value) -> StoreResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid(format!("filter must be an object, got {}", value)))?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, expression) in object {
            let clause = match key.as_str() {
                "$and" => Matcher::All(Self::group(key, expression)?),
                "$or" => Matcher::Any(Self::group(key, expression)?),
                op if op.starts_with('$') => {
                    return Err(invalid(format!("unknown top-level operator '{}'", op)))
                }
                path => Matcher::Field {
                    path: path.to_string(),
                    predicates: Predicate::parse(path, expression)?,
                },
            };
            clauses.push(clause);
        }
        Ok(Matcher::All(clauses))
    }

    fn group(key: &str, expression: &Value) -> StoreResult<Vec<Matcher>> {
        let terms = expression
            .as_array()
            .ok_or_else(|| invalid(format!("'{}' requires an array", key)))?;
        if terms.is_empty() {
            return Err(invalid(format!("'{}' requires at least one term", key)));
        }
        terms.iter().map(Self::from_value).collect()
    }

    pub fn matches(&self, doc: &RawDocument) -> bool {
        match self {
            Matcher::All(terms) => terms.iter().all(|t| t.matches(doc)),
            Matcher::Any(terms) => terms.iter().any(|t| t.matches(doc)),
            Matcher::Field { path, predicates } => {
                let value = lookup(doc, path);
                predicates.iter().all(|p| p.test(value))
            }
        }
    }
}

impl Predicate {
    fn parse(path: &str, expression: &Value) -> StoreResult<Vec<Predicate>> {
        let operators = match expression {
            Value::Object(map) if map.keys().all(|k| k.starts_with('$')) && !map.is_empty() => map,
            // Plain value: implicit equality
            other => return Ok(vec![Predicate::Eq(other.clone())]),
        };

        operators
            .iter()
            .map(|(op, operand)| {
                let predicate = match op.as_str() {
                    "$eq" => Predicate::Eq(operand.clone()),
                    "$ne" => Predicate::Ne(operand.clone()),
                    "$gt" => Predicate::Gt(operand.clone()),
                    "$gte" => Predicate::Gte(operand.clone()),
                    "$lt" => Predicate::Lt(operand.clone()),
                    "$lte" => Predicate::Lte(operand.clone()),
                    "$in" => Predicate::In(expect_array(path, op, operand)?),
                    "$nin" => Predicate::Nin(expect_array(path, op, operand)?),
                    "$exists" => Predicate::Exists(operand.as_bool().ok_or_else(|| {
                        invalid(format!("'$exists' on '{}' requires a boolean", path))
                    })?),
                    "$regex" => {
                        let pattern = operand.as_str().ok_or_else(|| {
                            invalid(format!("'$regex' on '{}' requires a string", path))
                        })?;
                        Predicate::Regex(Regex::new(pattern).map_err(|e| invalid(e.to_string()))?)
                    }
                    unknown => {
                        return Err(invalid(format!(
                            "unknown operator '{}' on '{}'",
                            unknown, path
                        )))
                    }
                };
                Ok(predicate)
            })
            .collect()
    }

    /// `value` is `None` when the field is absent
    fn test(&self, value: Option<&Value>) -> bool {
        match self {
            Predicate::Exists(expected) => value.is_some() == *expected,
            Predicate::Eq(operand) => matches_eq(value, operand),
            Predicate::Ne(operand) => !matches_eq(value, operand),
            Predicate::In(operands) => operands.iter().any(|o| matches_eq(value, o)),
            Predicate::Nin(operands) => !operands.iter().any(|o| matches_eq(value, o)),
            Predicate::Gt(operand) => matches_cmp(value, operand, |o| o == Ordering::Greater),
            Predicate::Gte(operand) => matches_cmp(value, operand, |o| o != Ordering::Less),
            Predicate::Lt(operand) => matches_cmp(value, operand, |o| o == Ordering::Less),
            Predicate::Lte(operand) => matches_cmp(value, operand, |o| o != Ordering::Greater),
            Predicate::Regex(regex) => candidates(value)
                .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false)),
        }
    }
}

fn expect_array(path: &str, op: &str, operand: &Value) -> StoreResult<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| invalid(format!("'{}' on '{}' requires an array", op, path)))
}

/// The value itself, plus its elements when it is an array
fn candidates(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    let elements = match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
    value.into_iter().chain(elements.iter())
}

fn matches_eq(value: Option<&Value>, operand: &Value) -> bool {
    match value {
        // A missing field equals null
        None => operand.is_null(),
        Some(_) => candidates(value).any(|v| values_equal(v, operand)),
    }
}

fn matches_cmp(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates(value).any(|v| compare_same_type(v, operand).map(&accept).unwrap_or(false))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_same_type(a, b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Ordering between values of the same kind; `None` across kinds
fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => match (timestamp(x), timestamp(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// RFC 3339 timestamps carry a variable number of fractional digits, so
/// they are ordered as instants rather than as text
fn timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let bytes = value.as_bytes();
    if bytes.len() < 20 || bytes[10] != b'T' {
        return None;
    }
    DateTime::parse_from_rfc3339(value).ok()
}

/// Look up a dotted path
pub fn lookup<'a>(doc: &'a RawDocument, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: missing/null first, then by type, then by value
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(a), Some(b)) => compare_same_type(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

pub fn sort_documents(docs: &mut [RawDocument], sort: &NativeSort) -> StoreResult<()> {
    if sort.is_empty() {
        return Ok(());
    }
    let keys = sort
        .as_map()
        .iter()
        .map(|(field, direction)| match direction.as_i64() {
            Some(1) => Ok((field.as_str(), false)),
            Some(-1) => Ok((field.as_str(), true)),
            _ => Err(invalid(format!("sort direction for '{}' must be 1 or -1", field))),
        })
        .collect::<StoreResult<Vec<_>>>()?;

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let cmp = compare_for_sort(lookup(a, field), lookup(b, field));
            if cmp != Ordering::Equal {
                return if *descending { cmp.reverse() } else { cmp };
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// Filter, order and window a snapshot of a collection
pub fn find(docs: Vec<RawDocument>, options: &NativeFindOptions) -> StoreResult<Vec<RawDocument>> {
    let matcher = Matcher::compile(&options.filter)?;
    let mut found: Vec<_> = docs.into_iter().filter(|d| matcher.matches(d)).collect();
    sort_documents(&mut found, &options.sort)?;

    let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
    let found = found.into_iter().skip(skip);
    Ok(match options.limit {
        Some(limit) => found
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect(),
        None => found.collect(),
    })
}

/// Id of a record, if it has a string or numeric one
pub fn document_id(doc: &RawDocument) -> Option<String> {
    match doc.get(ID_FIELD)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Make sure a record has an id, generating one when missing
pub fn ensure_id(doc: &mut RawDocument) -> String {
    match document_id(doc) {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    }
}

/// Apply `$set` / `$unset`; returns whether the record changed
pub fn apply_update(doc: &mut RawDocument, update: &NativeUpdate) -> StoreResult<bool> {
    let operators = update.as_value().as_object().ok_or_else(|| StoreError::InvalidUpdate {
        message: "update must be an object".to_string(),
    })?;

    let before = doc.clone();
    for (op, fields) in operators {
        let fields = fields.as_object().ok_or_else(|| StoreError::InvalidUpdate {
            message: format!("'{}' requires an object", op),
        })?;
        for (path, value) in fields {
            if path == ID_FIELD {
                return Err(StoreError::InvalidUpdate {
                    message: "the id field cannot be updated".to_string(),
                });
            }
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => unset_path(doc, path),
                unknown => {
                    return Err(StoreError::InvalidUpdate {
                        message: format!("unknown update operator '{}'", unknown),
                    })
                }
            }
        }
    }
    Ok(*doc != before)
}

fn set_path(doc: &mut RawDocument, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

fn unset_path(doc: &mut RawDocument, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

/// Build the stored form of a replacement: keeps the existing id
pub fn replacement(existing: &RawDocument, mut doc: RawDocument) -> RawDocument {
    if let Some(id) = existing.get(ID_FIELD) {
        doc.insert(ID_FIELD.to_string(), id.clone());
    }
    doc
}

/// Run aggregate stages over a snapshot of a collection
pub fn aggregate(docs: Vec<RawDocument>, pipeline: &NativePipeline) -> StoreResult<Vec<Value>> {
    let mut current = docs;
    for stage in pipeline.stages() {
        let (name, spec) = stage
            .as_object()
            .filter(|s| s.len() == 1)
            .and_then(|s| s.iter().next())
            .ok_or_else(|| pipeline_error(format!("stage must have one operator: {}", stage)))?;

        current = match name.as_str() {
            "$match" => {
                let matcher = Matcher::compile(&native_filter(spec))?;
                current.into_iter().filter(|d| matcher.matches(d)).collect()
            }
            "$sort" => {
                let sort = native_sort(spec)?;
                sort_documents(&mut current, &sort)?;
                current
            }
            "$skip" => {
                let skip = count_operand(name, spec)?;
                current.into_iter().skip(skip).collect()
            }
            "$limit" => {
                let limit = count_operand(name, spec)?;
                current.into_iter().take(limit).collect()
            }
            "$project" => project(current, spec)?,
            "$group" => group(current, spec)?,
            "$count" => {
                let into = spec
                    .as_str()
                    .ok_or_else(|| pipeline_error("'$count' requires a field name"))?;
                if current.is_empty() {
                    Vec::new()
                } else {
                    let mut row = Map::new();
                    row.insert(into.to_string(), Value::from(current.len() as u64));
                    vec![row]
                }
            }
            unknown => return Err(pipeline_error(format!("unknown stage '{}'", unknown))),
        };
    }
    Ok(current.into_iter().map(Value::Object).collect())
}

fn pipeline_error(message: impl Into<String>) -> StoreError {
    StoreError::InvalidPipeline {
        message: message.into(),
    }
}

fn native_filter(spec: &Value) -> NativeFilter {
    NativeFilter::from_value(spec.clone())
}

fn native_sort(spec: &Value) -> StoreResult<NativeSort> {
    let map = spec
        .as_object()
        .ok_or_else(|| pipeline_error("'$sort' requires an object"))?;
    Ok(NativeSort::from_map(map.clone()))
}

fn count_operand(name: &str, spec: &Value) -> StoreResult<usize> {
    spec.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| pipeline_error(format!("'{}' requires a non-negative integer", name)))
}

fn project(docs: Vec<RawDocument>, spec: &Value) -> StoreResult<Vec<RawDocument>> {
    let fields = spec
        .as_object()
        .ok_or_else(|| pipeline_error("'$project' requires an object"))?;
    Ok(docs
        .into_iter()
        .map(|doc| {
            let mut projected = Map::new();
            if let Some(id) = doc.get(ID_FIELD) {
                projected.insert(ID_FIELD.to_string(), id.clone());
            }
            for field in fields.keys() {
                if let Some(value) = lookup(&doc, field) {
                    projected.insert(field.clone(), value.clone());
                }
            }
            projected
        })
        .collect())
}

/// `$group` with a `"$field"` key and `{ $sum: 1 }` accumulators
fn group(docs: Vec<RawDocument>, spec: &Value) -> StoreResult<Vec<RawDocument>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| pipeline_error("'$group' requires an object"))?;
    let key_path = spec
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|k| k.strip_prefix('$'))
        .ok_or_else(|| pipeline_error("'$group' requires an '_id' of the form \"$field\""))?;

    let mut counters = Vec::new();
    for (name, accumulator) in spec.iter().filter(|(name, _)| *name != ID_FIELD) {
        match accumulator.get("$sum").and_then(Value::as_i64) {
            Some(1) => counters.push(name.clone()),
            _ => {
                return Err(pipeline_error(format!(
                    "unsupported accumulator for '{}'",
                    name
                )))
            }
        }
    }

    let mut groups: Vec<(Value, u64)> = Vec::new();
    for doc in &docs {
        let key = lookup(doc, key_path).cloned().unwrap_or(Value::Null);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
            Some((_, count)) => *count += 1,
            None => groups.push((key, 1)),
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, count)| {
            let mut row = Map::new();
            row.insert(ID_FIELD.to_string(), key);
            for counter in &counters {
                row.insert(counter.clone(), Value::from(count));
            }
            row
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> RawDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn matches(filter: Value, document: Value) -> bool {
        Matcher::compile(&NativeFilter::from_value(filter))
            .unwrap()
            .matches(&doc(document))
    }

    #[test]
    fn test_exists_distinguishes_absent_from_null() {
        let filter = json!({ "unassignedOn": { "$exists": false } });
        assert!(matches(filter.clone(), json!({ "caseId": "a" })));
        assert!(!matches(filter, json!({ "caseId": "a", "unassignedOn": null })));
    }

    #[test]
    fn test_in_matches_scalars_and_array_elements() {
        let filter = json!({ "caseId": { "$in": ["a", "b"] } });
        assert!(matches(filter.clone(), json!({ "caseId": "b" })));
        assert!(!matches(filter.clone(), json!({ "caseId": "c" })));
        assert!(matches(json!({ "tags": { "$in": ["x"] } }), json!({ "tags": ["w", "x"] })));
    }

    #[test]
    fn test_comparisons() {
        assert!(matches(json!({ "n": { "$gt": 3 } }), json!({ "n": 5 })));
        assert!(matches(json!({ "n": { "$lte": 5.0 } }), json!({ "n": 5 })));
        assert!(!matches(json!({ "n": { "$gt": 3 } }), json!({ "n": "5" })));
        assert!(!matches(json!({ "n": { "$lt": 3 } }), json!({})));
        assert!(matches(
            json!({ "on": { "$gte": "2024-01-01" } }),
            json!({ "on": "2024-03-01T00:00:00Z" })
        ));
    }

    #[test]
    fn test_timestamps_compare_as_instants() {
        let whole = "2024-01-01T12:00:00Z";
        let fractional = "2024-01-01T12:00:00.500Z";
        assert!(matches(json!({ "on": { "$gt": whole } }), json!({ "on": fractional })));
        assert!(!matches(
            json!({ "on": { "$lt": "2024-01-01T12:00:00.123Z" } }),
            json!({ "on": "2024-01-01T12:00:00.123456Z" })
        ));
        assert!(matches(
            json!({ "on": { "$eq": "2024-01-01T12:00:00.000Z" } }),
            json!({ "on": whole })
        ));

        let docs = vec![
            doc(json!({ "_id": "older", "on": whole })),
            doc(json!({ "_id": "newer", "on": fractional })),
        ];
        let mut sort = Map::new();
        sort.insert("on".to_string(), json!(-1));
        let options = NativeFindOptions::new(NativeFilter::match_all()).with_sort(NativeSort::from_map(sort));
        let found = find(docs, &options).unwrap();
        let ids: Vec<_> = found.iter().filter_map(document_id).collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn test_nested_groups_and_regex() {
        let filter = json!({ "$or": [
            { "$and": [{ "a": { "$eq": 1 } }, { "b": { "$ne": 2 } }] },
            { "name": { "$regex": "^Jo" } }
        ]});
        assert!(matches(filter.clone(), json!({ "a": 1, "b": 3 })));
        assert!(matches(filter.clone(), json!({ "name": "Joan" })));
        assert!(!matches(filter, json!({ "a": 1, "b": 2, "name": "Ann" })));
    }

    #[test]
    fn test_unknown_operator_fails() {
        let result = Matcher::compile(&NativeFilter::from_value(json!({ "a": { "$near": 1 } })));
        assert!(matches!(result, Err(StoreError::InvalidFilter { .. })));

        let result = Matcher::compile(&NativeFilter::from_value(json!({ "$and": [] })));
        assert!(result.is_err());
    }

    #[test]
    fn test_find_sorts_and_windows() {
        let docs = vec![
            doc(json!({ "_id": "1", "n": 2 })),
            doc(json!({ "_id": "2", "n": 3 })),
            doc(json!({ "_id": "3" })),
            doc(json!({ "_id": "4", "n": 1 })),
        ];
        let mut sort = Map::new();
        sort.insert("n".to_string(), json!(-1));
        let options = NativeFindOptions {
            filter: NativeFilter::match_all(),
            sort: NativeSort::from_map(sort),
            skip: 1,
            limit: Some(2),
        };
        let found = find(docs, &options).unwrap();
        let ids: Vec<_> = found.iter().filter_map(document_id).collect();
        assert_eq!(ids, vec!["1", "4"]);
    }

    #[test]
    fn test_apply_update_reports_change() {
        let mut record = doc(json!({ "_id": "1", "title": "a", "old": true }));
        let update = NativeUpdate::from_value(json!({
            "$set": { "title": "b", "meta.by": "u1" },
            "$unset": { "old": "" }
        }));
        assert!(apply_update(&mut record, &update).unwrap());
        assert_eq!(
            Value::Object(record.clone()),
            json!({ "_id": "1", "title": "b", "meta": { "by": "u1" } })
        );
        assert!(!apply_update(&mut record, &update).unwrap());
    }

    #[test]
    fn test_aggregate_group_count() {
        let docs = vec![
            doc(json!({ "userId": "u1" })),
            doc(json!({ "userId": "u2" })),
            doc(json!({ "userId": "u1" })),
        ];
        let pipeline = NativePipeline::from_stages(vec![
            json!({ "$group": { "_id": "$userId", "count": { "$sum": 1 } } }),
            json!({ "$sort": { "count": -1 } }),
        ]);
        let rows = aggregate(docs, &pipeline).unwrap();
        assert_eq!(
            rows,
            vec![
                json!({ "_id": "u1", "count": 2 }),
                json!({ "_id": "u2", "count": 1 })
            ]
        );
    }
}
