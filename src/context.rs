//! Composition root
//!
//! Owns the configuration and the connection pool. Callers ask it for
//! repositories and shut it down once at exit.

use crate::config::AppConfig;
use crate::error::Result;
use crate::pool::{ConnectionPool, Lease, PooledRepository};
use crate::storage::{Connector, DefaultConnector};
use std::sync::Arc;

#[derive(Debug)]
pub struct ApplicationContext {
    config: AppConfig,
    pool: Arc<ConnectionPool>,
}

impl ApplicationContext {
    /// Context using the `memory://` / `file://` connector
    pub fn new(config: AppConfig) -> Self {
        Self::with_connector(config, Arc::new(DefaultConnector::new()))
    }

    pub fn with_connector(config: AppConfig, connector: Arc<dyn Connector>) -> Self {
        let pool = ConnectionPool::new(config.database.clone(), connector);
        Self { config, pool }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub async fn repository<R: PooledRepository>(&self) -> Result<Lease<R>> {
        self.pool.get_instance::<R>().await
    }

    /// Close all connections; returns how many closed cleanly
    pub async fn shutdown(&self) -> usize {
        self.pool.shutdown().await
    }
}
