//! Combinators over conditions: conjunctions, ordering, pagination

use crate::ast::{Conjunction, Operator, PaginationQuery, Query, SortField, SortSpec};
use crate::error::QueryError;

/// Group terms so that all must match
pub fn and<I, Q>(terms: I) -> Conjunction
where
    I: IntoIterator<Item = Q>,
    Q: Into<Query>,
{
    Conjunction::new(Operator::And, terms.into_iter().map(Into::into).collect())
}

/// Group terms so that at least one must match
pub fn or<I, Q>(terms: I) -> Conjunction
where
    I: IntoIterator<Item = Q>,
    Q: Into<Query>,
{
    Conjunction::new(Operator::Or, terms.into_iter().map(Into::into).collect())
}

/// Build an ordering from sort terms, first term most significant
pub fn sort_by<I>(fields: I) -> SortSpec
where
    I: IntoIterator<Item = SortField>,
{
    SortSpec::new(fields.into_iter().collect())
}

/// Wrap filters (AND-ed together) and an ordering into a result window
pub fn paginate<I, Q>(
    offset: u64,
    limit: u64,
    filters: I,
    sort: SortSpec,
) -> Result<PaginationQuery, QueryError>
where
    I: IntoIterator<Item = Q>,
    Q: Into<Query>,
{
    if limit == 0 {
        return Err(QueryError::InvalidLimit);
    }
    Ok(PaginationQuery::new(offset, limit, and(filters), sort))
}

/// `and![a, b, ...]` groups terms of mixed node types under AND
#[macro_export]
macro_rules! and {
    ($($term:expr),+ $(,)?) => {
        $crate::and([$($crate::Query::from($term)),+])
    };
}

/// `or![a, b, ...]` groups terms of mixed node types under OR
#[macro_export]
macro_rules! or {
    ($($term:expr),+ $(,)?) => {
        $crate::or([$($crate::Query::from($term)),+])
    };
}
