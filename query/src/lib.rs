//! Docket query plans
//!
//! A typed predicate DSL for document collections. Call sites describe
//! filters with field accessors and combinators; the result is a plain,
//! serializable AST that a store adapter compiles into its native filter
//! syntax. Building a plan never performs I/O.
//!
//! # Overview
//!
//! ```text
//! let doc = using::<CaseAssignment>();
//! and![
//!     doc.document_type().equals("ASSIGNMENT"),
//!     doc.user_id().equals("u1"),
//!     doc.unassigned_on().not_exists(),
//! ]
//! ```
//!
//! serializes to
//!
//! ```text
//! { "conjunction": "AND", "values": [
//!     { "condition": "EQUALS", "leftOperand": { "name": "documentType" }, "rightOperand": "ASSIGNMENT" },
//!     { "condition": "EQUALS", "leftOperand": { "name": "userId" }, "rightOperand": "u1" },
//!     { "condition": "NOT_EXISTS", "leftOperand": { "name": "unassignedOn" } } ] }
//! ```
//!
//! # Building blocks
//!
//! - [`fields!`] / [`using`] - typed field accessors
//! - [`and`] / [`or`] (and the `and!` / `or!` macros) - groupings
//! - [`sort_by`] / [`paginate`] - ordering and result windows
//! - [`Patch`] - partial updates
//! - [`Pipeline`] - aggregate stages

mod ast;
mod builder;
mod error;
mod field;
mod patch;

pub use ast::*;
pub use builder::{and, or, paginate, sort_by};
pub use error::QueryError;
pub use field::{discriminator, using, Field, Operand, Queryable, DOCUMENT_TYPE_FIELD};
pub use patch::Patch;
