//! Query plan compilation
//!
//! Translates the AST into the store's native filter, sort, update and
//! pipeline documents. Every condition kind and conjunction operator has a
//! translation; malformed nodes are compile errors rather than filters that
//! silently match everything.
//!
//! | AST                        | native                     |
//! |----------------------------|----------------------------|
//! | `EQUALS`                   | `{ f: { $eq: v } }`        |
//! | `NOT_EQUALS`               | `{ f: { $ne: v } }`        |
//! | `GREATER_THAN(_OR_EQUAL)`  | `$gt` / `$gte`             |
//! | `LESS_THAN(_OR_EQUAL)`     | `$lt` / `$lte`             |
//! | `CONTAINS` / `NOT_CONTAINS`| `$in` / `$nin`             |
//! | `EXISTS` / `NOT_EXISTS`    | `{ f: { $exists: bool } }` |
//! | `REGEX`                    | `{ f: { $regex: p } }`     |
//! | `AND` / `OR`               | `$and` / `$or`             |

use docket_query::{
    Condition, ConditionKind, Conjunction, Direction, Operator, PaginationQuery, Patch, Pipeline,
    Query, SortSpec, Stage,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Raised for AST nodes that have no valid native translation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{operator} conjunction has no terms")]
    EmptyConjunction { operator: &'static str },

    #[error("Condition has an empty field name")]
    EmptyField,

    #[error("{kind} condition on '{field}' is missing its operand")]
    MissingOperand { kind: &'static str, field: String },

    #[error("{kind} condition on '{field}' does not take an operand")]
    UnexpectedOperand { kind: &'static str, field: String },

    #[error("{kind} condition on '{field}' requires an array operand")]
    ExpectedArray { kind: &'static str, field: String },

    #[error("REGEX condition on '{field}' has an invalid pattern: {message}")]
    InvalidPattern { field: String, message: String },

    #[error("Update has no assignments")]
    EmptyPatch,

    #[error("Update both sets and unsets '{field}'")]
    ConflictingPatch { field: String },

    #[error("Limit must be greater than zero")]
    InvalidLimit,
}

/// Native filter document
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFilter(Value);

impl NativeFilter {
    /// Filter matching every document
    pub fn match_all() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Wrap an already-native filter document
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Native ordering document, keys in significance order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeSort(Map<String, Value>);

impl NativeSort {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Filter plus ordering and window for a find call
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFindOptions {
    pub filter: NativeFilter,
    pub sort: NativeSort,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl NativeFindOptions {
    pub fn new(filter: NativeFilter) -> Self {
        Self {
            filter,
            sort: NativeSort::default(),
            skip: 0,
            limit: None,
        }
    }

    pub fn with_sort(mut self, sort: NativeSort) -> Self {
        self.sort = sort;
        self
    }
}

/// Native update document (`$set` / `$unset`)
#[derive(Debug, Clone, PartialEq)]
pub struct NativeUpdate(Value);

impl NativeUpdate {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Native aggregate pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct NativePipeline(Vec<Value>);

impl NativePipeline {
    pub fn from_stages(stages: Vec<Value>) -> Self {
        Self(stages)
    }

    pub fn stages(&self) -> &[Value] {
        &self.0
    }
}

/// Compile a condition or conjunction into a native filter
pub fn compile(query: &Query) -> Result<NativeFilter, CompileError> {
    let filter = compile_node(query)?;
    tracing::trace!(filter = %filter, "compiled query");
    Ok(NativeFilter(filter))
}

fn compile_node(query: &Query) -> Result<Value, CompileError> {
    match query {
        Query::Condition(condition) => compile_condition(condition),
        Query::Conjunction(conjunction) => compile_conjunction(conjunction),
    }
}

fn compile_conjunction(conjunction: &Conjunction) -> Result<Value, CompileError> {
    let (native, name) = match conjunction.operator() {
        Operator::And => ("$and", "AND"),
        Operator::Or => ("$or", "OR"),
    };
    if conjunction.is_empty() {
        return Err(CompileError::EmptyConjunction { operator: name });
    }

    let terms = conjunction
        .terms()
        .iter()
        .map(compile_node)
        .collect::<Result<Vec<_>, _>>()?;

    let mut filter = Map::new();
    filter.insert(native.to_string(), Value::Array(terms));
    Ok(Value::Object(filter))
}

fn compile_condition(condition: &Condition) -> Result<Value, CompileError> {
    let field = condition.field().name.as_str();
    if field.is_empty() {
        return Err(CompileError::EmptyField);
    }
    let kind = condition.kind();

    let operand = match (kind.takes_operand(), condition.operand()) {
        (true, Some(operand)) => Some(operand),
        (true, None) => {
            return Err(CompileError::MissingOperand {
                kind: kind.as_str(),
                field: field.to_string(),
            })
        }
        (false, Some(_)) => {
            return Err(CompileError::UnexpectedOperand {
                kind: kind.as_str(),
                field: field.to_string(),
            })
        }
        (false, None) => None,
    };

    let expression = match (kind, operand) {
        (ConditionKind::Exists, _) => json!({ "$exists": true }),
        (ConditionKind::NotExists, _) => json!({ "$exists": false }),
        (ConditionKind::Equals, Some(v)) => json!({ "$eq": v }),
        (ConditionKind::NotEquals, Some(v)) => json!({ "$ne": v }),
        (ConditionKind::GreaterThan, Some(v)) => json!({ "$gt": v }),
        (ConditionKind::GreaterThanOrEqual, Some(v)) => json!({ "$gte": v }),
        (ConditionKind::LessThan, Some(v)) => json!({ "$lt": v }),
        (ConditionKind::LessThanOrEqual, Some(v)) => json!({ "$lte": v }),
        (ConditionKind::Contains, Some(v)) => json!({ "$in": expect_array(kind, field, v)? }),
        (ConditionKind::NotContains, Some(v)) => json!({ "$nin": expect_array(kind, field, v)? }),
        (ConditionKind::Regex, Some(v)) => json!({ "$regex": expect_pattern(field, v)? }),
        (_, None) => {
            return Err(CompileError::MissingOperand {
                kind: kind.as_str(),
                field: field.to_string(),
            })
        }
    };

    let mut filter = Map::new();
    filter.insert(field.to_string(), expression);
    Ok(Value::Object(filter))
}

fn expect_array<'a>(
    kind: ConditionKind,
    field: &str,
    operand: &'a Value,
) -> Result<&'a Value, CompileError> {
    if operand.is_array() {
        Ok(operand)
    } else {
        Err(CompileError::ExpectedArray {
            kind: kind.as_str(),
            field: field.to_string(),
        })
    }
}

fn expect_pattern<'a>(field: &str, operand: &'a Value) -> Result<&'a str, CompileError> {
    let pattern = operand.as_str().ok_or_else(|| CompileError::InvalidPattern {
        field: field.to_string(),
        message: "pattern must be a string".to_string(),
    })?;
    regex::Regex::new(pattern).map_err(|err| CompileError::InvalidPattern {
        field: field.to_string(),
        message: err.to_string(),
    })?;
    Ok(pattern)
}

/// Compile an ordering; an empty spec yields an empty native sort
pub fn compile_sort(sort: &SortSpec) -> NativeSort {
    let mut native = Map::new();
    for term in sort.fields() {
        let direction = match term.direction {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        };
        native.insert(term.field.name.clone(), Value::from(direction));
    }
    NativeSort(native)
}

/// Compile a result window into find options
pub fn compile_pagination(query: &PaginationQuery) -> Result<NativeFindOptions, CompileError> {
    if query.limit() == 0 {
        return Err(CompileError::InvalidLimit);
    }
    let filter = compile(&Query::Conjunction(query.filter().clone()))?;
    Ok(NativeFindOptions {
        filter,
        sort: compile_sort(query.sort()),
        skip: query.offset(),
        limit: Some(query.limit()),
    })
}

/// Compile a partial update into `$set` / `$unset`
pub fn compile_patch<T>(patch: &Patch<T>) -> Result<NativeUpdate, CompileError> {
    if patch.is_empty() {
        return Err(CompileError::EmptyPatch);
    }
    if let Some(field) = patch
        .removals()
        .iter()
        .find(|removed| patch.assignments().iter().any(|(set, _)| set.name == removed.name))
    {
        return Err(CompileError::ConflictingPatch {
            field: field.name.clone(),
        });
    }

    let mut update = Map::new();
    if !patch.assignments().is_empty() {
        let set: Map<String, Value> = patch
            .assignments()
            .iter()
            .map(|(field, value)| (field.name.clone(), value.clone()))
            .collect();
        update.insert("$set".to_string(), Value::Object(set));
    }
    if !patch.removals().is_empty() {
        let unset: Map<String, Value> = patch
            .removals()
            .iter()
            .map(|field| (field.name.clone(), Value::String(String::new())))
            .collect();
        update.insert("$unset".to_string(), Value::Object(unset));
    }
    Ok(NativeUpdate(Value::Object(update)))
}

/// Compile aggregate stages in order
pub fn compile_pipeline(pipeline: &Pipeline) -> Result<NativePipeline, CompileError> {
    let mut stages = Vec::with_capacity(pipeline.stages().len());
    for stage in pipeline.stages() {
        let native = match stage {
            Stage::Match(query) => json!({ "$match": compile(query)?.into_value() }),
            Stage::Sort(sort) => json!({ "$sort": compile_sort(sort).to_value() }),
            Stage::Skip(skip) => json!({ "$skip": skip }),
            Stage::Limit(0) => return Err(CompileError::InvalidLimit),
            Stage::Limit(limit) => json!({ "$limit": limit }),
            Stage::Project(fields) => {
                let projection: Map<String, Value> = fields
                    .iter()
                    .map(|field| (field.name.clone(), Value::from(1)))
                    .collect();
                json!({ "$project": projection })
            }
            Stage::GroupCount { by } => json!({
                "$group": { "_id": format!("${}", by.name), "count": { "$sum": 1 } }
            }),
            Stage::Count { into } => json!({ "$count": into }),
        };
        stages.push(native);
    }
    Ok(NativePipeline(stages))
}
