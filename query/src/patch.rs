//! Typed partial updates

use crate::ast::FieldRef;
use crate::field::{Field, Operand};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Field assignments and removals applied to one matched document of `T`
pub struct Patch<T> {
    set: Vec<(FieldRef, Value)>,
    unset: Vec<FieldRef>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Patch<T> {
    pub fn new() -> Self {
        Self {
            set: Vec::new(),
            unset: Vec::new(),
            _doc: PhantomData,
        }
    }

    pub fn set<V: Operand>(mut self, field: Field<T, V>, value: impl Into<V>) -> Self {
        self.set
            .push((field.field_ref(), value.into().into_operand()));
        self
    }

    pub fn unset<V>(mut self, field: Field<T, V>) -> Self {
        self.unset.push(field.field_ref());
        self
    }

    pub fn assignments(&self) -> &[(FieldRef, Value)] {
        &self.set
    }

    pub fn removals(&self) -> &[FieldRef] {
        &self.unset
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Patch<T> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
            unset: self.unset.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Patch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("set", &self.set)
            .field("unset", &self.unset)
            .finish()
    }
}
