//! Typed field accessors
//!
//! A document type declares its queryable fields once with [`fields!`]. The
//! generated accessor is the only way to obtain a [`Field`], so every
//! condition names a field the document actually has and carries an operand
//! of the field's declared type.
//!
//! ```
//! use docket_query::{and, fields, using};
//!
//! struct Note;
//!
//! fields! {
//!     pub struct NoteFields for Note as "NOTE" {
//!         document_type: String => "documentType",
//!         case_id: String => "caseId",
//!     }
//! }
//!
//! let doc = using::<Note>();
//! let query = and![doc.document_type().equals("NOTE"), doc.case_id().equals("12-12345")];
//! assert_eq!(query.terms().len(), 2);
//! ```

use crate::ast::{Condition, ConditionKind, Direction, FieldRef, SortField};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Field name of the document discriminator in shared collections
pub const DOCUMENT_TYPE_FIELD: &str = "documentType";

/// A document shape that can be queried
pub trait Queryable: 'static {
    /// Accessor handing out the document's fields
    type Fields: Default;

    /// Discriminator stored in `documentType`, if the type lives in a shared collection
    const DOCUMENT_TYPE: Option<&'static str> = None;
}

/// Returns the field accessor for `T`
pub fn using<T: Queryable>() -> T::Fields {
    T::Fields::default()
}

/// `documentType == T::DOCUMENT_TYPE`, for types that carry a discriminator
pub fn discriminator<T: Queryable>() -> Option<Condition> {
    T::DOCUMENT_TYPE.map(|tag| {
        Condition::new(
            ConditionKind::Equals,
            DOCUMENT_TYPE_FIELD,
            Some(Value::String(tag.to_string())),
        )
    })
}

/// Values that can appear on the right side of a condition
pub trait Operand {
    fn into_operand(self) -> Value;
}

impl Operand for String {
    fn into_operand(self) -> Value {
        Value::String(self)
    }
}

impl Operand for bool {
    fn into_operand(self) -> Value {
        Value::Bool(self)
    }
}

impl Operand for i64 {
    fn into_operand(self) -> Value {
        Value::from(self)
    }
}

impl Operand for i32 {
    fn into_operand(self) -> Value {
        Value::from(self)
    }
}

impl Operand for u32 {
    fn into_operand(self) -> Value {
        Value::from(self)
    }
}

impl Operand for u64 {
    fn into_operand(self) -> Value {
        Value::from(self)
    }
}

impl Operand for f64 {
    fn into_operand(self) -> Value {
        Value::from(self)
    }
}

/// Same text as the serialized form of the timestamp
impl Operand for DateTime<Utc> {
    fn into_operand(self) -> Value {
        Value::String(self.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl Operand for NaiveDate {
    fn into_operand(self) -> Value {
        Value::String(self.format("%Y-%m-%d").to_string())
    }
}

/// Handle on one field `name` of document `T`, holding values of type `V`
pub struct Field<T, V> {
    name: &'static str,
    _marker: PhantomData<fn() -> (T, V)>,
}

impl<T, V> Clone for Field<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Field<T, V> {}

impl<T, V> fmt::Debug for Field<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

impl<T, V> Field<T, V> {
    /// Used by [`fields!`]; not meant to be called directly.
    #[doc(hidden)]
    pub const fn declare(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field_ref(&self) -> FieldRef {
        FieldRef::new(self.name)
    }

    pub fn exists(self) -> Condition {
        Condition::new(ConditionKind::Exists, self.name, None)
    }

    /// Matches documents where the field is absent, not where it is null
    pub fn not_exists(self) -> Condition {
        Condition::new(ConditionKind::NotExists, self.name, None)
    }

    pub fn ascending(self) -> SortField {
        SortField {
            field: self.field_ref(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(self) -> SortField {
        SortField {
            field: self.field_ref(),
            direction: Direction::Descending,
        }
    }
}

impl<T, V: Operand> Field<T, V> {
    fn compare(self, kind: ConditionKind, value: V) -> Condition {
        Condition::new(kind, self.name, Some(value.into_operand()))
    }

    fn membership<I>(self, kind: ConditionKind, values: I) -> Condition
    where
        I: IntoIterator,
        I::Item: Into<V>,
    {
        let values = values
            .into_iter()
            .map(|v| v.into().into_operand())
            .collect();
        Condition::new(kind, self.name, Some(Value::Array(values)))
    }

    pub fn equals(self, value: impl Into<V>) -> Condition {
        self.compare(ConditionKind::Equals, value.into())
    }

    pub fn not_equals(self, value: impl Into<V>) -> Condition {
        self.compare(ConditionKind::NotEquals, value.into())
    }

    pub fn greater_than(self, value: impl Into<V>) -> Condition {
        self.compare(ConditionKind::GreaterThan, value.into())
    }

    pub fn greater_than_or_equal(self, value: impl Into<V>) -> Condition {
        self.compare(ConditionKind::GreaterThanOrEqual, value.into())
    }

    pub fn less_than(self, value: impl Into<V>) -> Condition {
        self.compare(ConditionKind::LessThan, value.into())
    }

    pub fn less_than_or_equal(self, value: impl Into<V>) -> Condition {
        self.compare(ConditionKind::LessThanOrEqual, value.into())
    }

    /// Matches documents whose field value is one of `values`
    pub fn contains<I>(self, values: I) -> Condition
    where
        I: IntoIterator,
        I::Item: Into<V>,
    {
        self.membership(ConditionKind::Contains, values)
    }

    pub fn not_contains<I>(self, values: I) -> Condition
    where
        I: IntoIterator,
        I::Item: Into<V>,
    {
        self.membership(ConditionKind::NotContains, values)
    }
}

impl<T> Field<T, String> {
    pub fn regex(self, pattern: impl Into<String>) -> Condition {
        Condition::new(
            ConditionKind::Regex,
            self.name,
            Some(Value::String(pattern.into())),
        )
    }
}

impl<T, V> From<Field<T, V>> for FieldRef {
    fn from(field: Field<T, V>) -> Self {
        field.field_ref()
    }
}

/// Declare the queryable fields of a document type.
///
/// ```text
/// fields! {
///     pub struct NoteFields for CaseNote as "NOTE" {
///         case_id: String => "caseId",
///         archived_on: DateTime<Utc> => "archivedOn",
///     }
/// }
/// ```
///
/// The optional `as "TAG"` sets [`Queryable::DOCUMENT_TYPE`].
#[macro_export]
macro_rules! fields {
    (
        $(#[$meta:meta])*
        $vis:vis struct $accessor:ident for $doc:ty $(as $tag:literal)? {
            $( $(#[$fmeta:meta])* $method:ident : $vty:ty => $name:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy)]
        $vis struct $accessor;

        impl $accessor {
            $(
                $(#[$fmeta])*
                pub const fn $method(&self) -> $crate::Field<$doc, $vty> {
                    $crate::Field::declare($name)
                }
            )*
        }

        impl $crate::Queryable for $doc {
            type Fields = $accessor;
            $( const DOCUMENT_TYPE: ::core::option::Option<&'static str> = ::core::option::Option::Some($tag); )?
        }
    };
}
