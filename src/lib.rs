//! Docket - typed document queries over pooled repositories
//!
//! Case-management records (assignments, notes, lists, runtime state and
//! trustee appointments) live in document collections. Call sites describe
//! filters with the typed `docket_query` DSL; repositories compile those
//! plans into native store queries and run them over a shared, reference
//! counted connection.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ApplicationContext                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌──────────────────────────────────────────┐  │
//! │  │  AppConfig  │  │   ConnectionPool (one slot per type)     │  │
//! │  │  (YAML/env) │  │   get_instance -> Lease, release, close  │  │
//! │  └─────────────┘  └──────────────────┬───────────────────────┘  │
//! │                                      │                          │
//! │                                      ▼                          │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                     Repositories                            ││
//! │  │  assignments · notes · lists · runtime-state · appointments ││
//! │  └──────────────────────────┬──────────────────────────────────┘│
//! │                             │  docket_query AST                 │
//! │                             ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │        CollectionAdapter  ─►  compile (AST → native)        ││
//! │  └──────────────────────────┬──────────────────────────────────┘│
//! │                             │  native filter / update / stages  │
//! │                             ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                 DocumentStore (memory, file)                ││
//! │  │   /<root>/<database>/<collection>/<id>.json                 ││
//! │  └─────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod query;
pub mod repositories;
pub mod storage;
pub mod validation;

pub use config::{AppConfig, ConnectionConfig};
pub use context::ApplicationContext;
pub use error::{wrap_error, Error, RepositoryError, Result};
pub use pool::{ConnectionPool, Lease, PooledRepository};
pub use query::{CollectionAdapter, Page};
