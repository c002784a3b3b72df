//! Query plan AST
//!
//! Every node is an immutable value. The serialized form is the wire/debug
//! shape used in fixtures and logs:
//!
//! ```text
//! Conjunction := { conjunction: "AND" | "OR", values: [Condition | Conjunction] }
//! Condition   := { condition: "EQUALS" | ..., leftOperand: { name }, rightOperand: <value> }
//! ```

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a stored field by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
}

impl FieldRef {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Comparison performed by a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// Field value is one of the operand values
    Contains,
    /// Field value is none of the operand values
    NotContains,
    Exists,
    NotExists,
    Regex,
}

impl ConditionKind {
    /// Existence checks carry no right operand
    pub fn takes_operand(self) -> bool {
        !matches!(self, ConditionKind::Exists | ConditionKind::NotExists)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::Equals => "EQUALS",
            ConditionKind::NotEquals => "NOT_EQUALS",
            ConditionKind::GreaterThan => "GREATER_THAN",
            ConditionKind::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            ConditionKind::LessThan => "LESS_THAN",
            ConditionKind::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            ConditionKind::Contains => "CONTAINS",
            ConditionKind::NotContains => "NOT_CONTAINS",
            ConditionKind::Exists => "EXISTS",
            ConditionKind::NotExists => "NOT_EXISTS",
            ConditionKind::Regex => "REGEX",
        }
    }
}

/// One comparison against one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "condition")]
    kind: ConditionKind,
    left_operand: FieldRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    right_operand: Option<Value>,
}

impl Condition {
    pub(crate) fn new(kind: ConditionKind, field: &str, operand: Option<Value>) -> Self {
        Self {
            kind,
            left_operand: FieldRef::new(field),
            right_operand: operand,
        }
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn field(&self) -> &FieldRef {
        &self.left_operand
    }

    pub fn operand(&self) -> Option<&Value> {
        self.right_operand.as_ref()
    }
}

/// Boolean grouping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    And,
    Or,
}

/// Boolean grouping of conditions and nested groupings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conjunction {
    #[serde(rename = "conjunction")]
    operator: Operator,
    values: Vec<Query>,
}

impl Conjunction {
    pub(crate) fn new(operator: Operator, values: Vec<Query>) -> Self {
        Self { operator, values }
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn terms(&self) -> &[Query] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Any node of a query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Condition(Condition),
    Conjunction(Conjunction),
}

impl Query {
    /// Parse a query plan from its wire shape.
    ///
    /// Unknown condition kinds or conjunction operators are rejected.
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        Ok(Query::deserialize(value)?)
    }

    /// Parse a query plan from JSON text
    pub fn from_json_str(input: &str) -> Result<Self, QueryError> {
        Ok(serde_json::from_str(input)?)
    }

    /// `condition AND self`
    pub fn restricted(self, condition: Condition) -> Query {
        Query::Conjunction(Conjunction::new(
            Operator::And,
            vec![Query::Condition(condition), self],
        ))
    }

    pub fn to_json(&self) -> Value {
        // Serializing plain data with string keys cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Condition> for Query {
    fn from(condition: Condition) -> Self {
        Query::Condition(condition)
    }
}

impl From<Conjunction> for Query {
    fn from(conjunction: Conjunction) -> Self {
        Query::Conjunction(conjunction)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Ascending,
    Descending,
}

/// One ordering term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: FieldRef,
    pub direction: Direction,
}

/// Ordered list of sort terms. Empty means store-defined order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortSpec {
    fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A bounded window over an AND-ed filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationQuery {
    offset: u64,
    limit: u64,
    filter: Conjunction,
    sort: SortSpec,
}

impl PaginationQuery {
    pub(crate) fn new(offset: u64, limit: u64, filter: Conjunction, sort: SortSpec) -> Self {
        Self {
            offset,
            limit,
            filter,
            sort,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn filter(&self) -> &Conjunction {
        &self.filter
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    /// Same window with `condition` AND-ed in front of the filter
    pub fn restricted(mut self, condition: Condition) -> Self {
        self.filter.values.insert(0, Query::Condition(condition));
        self
    }
}

/// Aggregate pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Match(Query),
    Sort(SortSpec),
    Skip(u64),
    Limit(u64),
    /// Keep only the listed fields
    Project(Vec<FieldRef>),
    /// Group by a field, emitting `{ _id: <value>, count: <n> }` rows
    GroupCount { by: FieldRef },
    /// Replace the stream with a single `{ <into>: <n> }` row
    Count { into: String },
}

/// Ordered list of aggregate stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same stages behind a leading match on `condition`
    pub fn restricted(mut self, condition: Condition) -> Self {
        self.stages.insert(0, Stage::Match(Query::Condition(condition)));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn matching(mut self, query: impl Into<Query>) -> Self {
        self.stages.push(Stage::Match(query.into()));
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.stages.push(Stage::Sort(sort));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.stages.push(Stage::Skip(skip));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.stages.push(Stage::Limit(limit));
        self
    }

    pub fn project<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.stages
            .push(Stage::Project(fields.into_iter().map(Into::into).collect()));
        self
    }

    pub fn group_count(mut self, by: impl Into<FieldRef>) -> Self {
        self.stages.push(Stage::GroupCount { by: by.into() });
        self
    }

    pub fn count(mut self, into: impl Into<String>) -> Self {
        self.stages.push(Stage::Count { into: into.into() });
        self
    }
}
