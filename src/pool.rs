//! Reference-counted repository instances
//!
//! One live instance (and one store connection) per repository type. Each
//! [`ConnectionPool::get_instance`] call hands out a [`Lease`]; when the last
//! lease for a type is released the instance is dropped and its connection
//! closed in the background. [`ConnectionPool::shutdown`] waits for every
//! such close.
//!
//! ```text
//! EMPTY --get--> ACTIVE(1) --get--> ACTIVE(n) --release--> ... ACTIVE(1)
//!   ^                                                            |
//!   +----------------- close done <---- CLOSING <---- release ---+
//! ```

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::storage::{Connector, SharedStore};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// A repository that owns one store connection
pub trait PooledRepository: Send + Sync + 'static {
    /// Module tag used in logs and errors
    const NAME: &'static str;

    fn from_store(store: SharedStore, config: &ConnectionConfig) -> Self;
}

type Instance = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct SlotState {
    reference_count: usize,
    instance: Option<Instance>,
    store: Option<SharedStore>,
}

struct Slot {
    name: &'static str,
    /// Held across connect so only one caller opens a connection
    opening: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl Slot {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            opening: tokio::sync::Mutex::new(()),
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection close in flight, or queued when no runtime was available
enum Closing {
    Spawned(JoinHandle<bool>),
    Pending {
        name: &'static str,
        store: SharedStore,
    },
}

pub struct ConnectionPool {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    slots: Mutex<HashMap<TypeId, Arc<Slot>>>,
    closing: Mutex<Vec<Closing>>,
    shut_down: AtomicBool,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let counts: Vec<(&str, usize)> = slots
            .values()
            .map(|slot| (slot.name, slot.lock().reference_count))
            .collect();
        f.debug_struct("ConnectionPool")
            .field("target", &self.config.connection_string)
            .field("slots", &counts)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            slots: Mutex::new(HashMap::new()),
            closing: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Lease the live instance of `R`, constructing it on first use.
    ///
    /// A failed connect leaves the slot empty and the count unchanged.
    pub async fn get_instance<R: PooledRepository>(self: &Arc<Self>) -> Result<Lease<R>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::PoolShutDown);
        }
        let slot = self.slot::<R>();
        let _opening = slot.opening.lock().await;

        {
            let mut state = slot.lock();
            let live = state
                .instance
                .clone()
                .and_then(|instance| instance.downcast::<R>().ok());
            if let Some(repository) = live {
                state.reference_count += 1;
                tracing::debug!(
                    repository = R::NAME,
                    count = state.reference_count,
                    "acquired repository"
                );
                return Ok(Lease::new(Arc::clone(self), repository));
            }
        }

        let store = self
            .connector
            .connect(&self.config)
            .await
            .map_err(|source| Error::ConnectionFailed {
                repository: R::NAME,
                source,
            })?;
        tracing::info!(repository = R::NAME, target = store.target(), "opened connection");

        let repository = Arc::new(R::from_store(Arc::clone(&store), &self.config));
        let installed = {
            let mut state = slot.lock();
            // shutdown() may have drained the slots while we were connecting
            if self.shut_down.load(Ordering::SeqCst) {
                false
            } else {
                state.instance = Some(Arc::clone(&repository) as Instance);
                state.store = Some(Arc::clone(&store));
                state.reference_count = 1;
                true
            }
        };
        if !installed {
            tracing::debug!(repository = R::NAME, "pool shut down during connect");
            close_store(R::NAME, store).await;
            return Err(Error::PoolShutDown);
        }
        tracing::debug!(repository = R::NAME, count = 1, "acquired repository");
        Ok(Lease::new(Arc::clone(self), repository))
    }

    /// Give a lease back; returns the remaining count
    pub fn drop_instance<R: PooledRepository>(&self, lease: Lease<R>) -> Result<usize> {
        lease.release()
    }

    /// Decrement the count for `R`, closing the connection at zero.
    ///
    /// Refused with [`Error::NotHeld`] when nothing is outstanding.
    pub(crate) fn release_slot<R: PooledRepository>(&self) -> Result<usize> {
        let slot = self.slot::<R>();
        let mut state = slot.lock();
        if state.reference_count == 0 {
            tracing::warn!(repository = R::NAME, "release with no outstanding instance");
            return Err(Error::NotHeld {
                repository: R::NAME,
            });
        }

        state.reference_count -= 1;
        let remaining = state.reference_count;
        tracing::debug!(repository = R::NAME, count = remaining, "released repository");

        if remaining == 0 {
            state.instance = None;
            let store = state.store.take();
            drop(state);
            if let Some(store) = store {
                self.schedule_close(R::NAME, store);
            }
        }
        Ok(remaining)
    }

    pub fn reference_count<R: PooledRepository>(&self) -> usize {
        self.existing_slot::<R>()
            .map(|slot| slot.lock().reference_count)
            .unwrap_or(0)
    }

    pub fn is_live<R: PooledRepository>(&self) -> bool {
        self.existing_slot::<R>()
            .map(|slot| slot.lock().instance.is_some())
            .unwrap_or(false)
    }

    /// Close every connection and wait for all closes to finish.
    ///
    /// Returns how many connections closed cleanly. Leases still held keep
    /// their instance, but their store is closed and later releases are refused.
    pub async fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::SeqCst);

        let live: Vec<(&'static str, SharedStore)> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .values()
                .filter_map(|slot| {
                    let mut state = slot.lock();
                    state.instance = None;
                    state.reference_count = 0;
                    state.store.take().map(|store| (slot.name, store))
                })
                .collect()
        };
        for (name, store) in live {
            tracing::warn!(repository = name, "closing connection still in use");
            self.schedule_close(name, store);
        }

        let pending = {
            let mut closing = self.closing.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *closing)
        };

        let mut closed = 0;
        for entry in pending {
            let ok = match entry {
                Closing::Spawned(handle) => match handle.await {
                    Ok(ok) => ok,
                    Err(err) => {
                        tracing::warn!("close task failed: {}", err);
                        false
                    }
                },
                Closing::Pending { name, store } => close_store(name, store).await,
            };
            if ok {
                closed += 1;
            }
        }
        tracing::info!(closed, "connection pool shut down");
        closed
    }

    fn slot<R: PooledRepository>(&self) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(TypeId::of::<R>())
                .or_insert_with(|| Arc::new(Slot::new(R::NAME))),
        )
    }

    fn existing_slot<R: PooledRepository>(&self) -> Option<Arc<Slot>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&TypeId::of::<R>()).cloned()
    }

    fn schedule_close(&self, name: &'static str, store: SharedStore) {
        let entry = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Closing::Spawned(runtime.spawn(close_store(name, store))),
            Err(_) => {
                tracing::debug!(repository = name, "no runtime, close deferred to shutdown");
                Closing::Pending { name, store }
            }
        };

        let mut closing = self.closing.lock().unwrap_or_else(PoisonError::into_inner);
        closing.retain(|c| !matches!(c, Closing::Spawned(handle) if handle.is_finished()));
        closing.push(entry);
    }
}

async fn close_store(name: &'static str, store: SharedStore) -> bool {
    match store.close().await {
        Ok(()) => {
            tracing::debug!(repository = name, target = store.target(), "closed connection");
            true
        }
        Err(err) => {
            tracing::warn!(repository = name, "failed to close connection: {}", err);
            false
        }
    }
}

/// A counted handle on a pooled repository.
///
/// Dereferences to the repository. Dropping a lease releases it.
pub struct Lease<R: PooledRepository> {
    pool: Arc<ConnectionPool>,
    repository: Arc<R>,
    released: bool,
}

impl<R: PooledRepository> Lease<R> {
    fn new(pool: Arc<ConnectionPool>, repository: Arc<R>) -> Self {
        Self {
            pool,
            repository,
            released: false,
        }
    }

    /// Release explicitly; returns the remaining count
    pub fn release(mut self) -> Result<usize> {
        self.released = true;
        self.pool.release_slot::<R>()
    }
}

impl<R: PooledRepository> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.repository
    }
}

impl<R: PooledRepository> Drop for Lease<R> {
    fn drop(&mut self) {
        if !self.released {
            // Refusals are already logged
            let _ = self.pool.release_slot::<R>();
        }
    }
}

impl<R: PooledRepository> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("repository", &R::NAME)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct CountingConnector {
        backing: MemoryStore,
        opened: Mutex<Vec<MemoryStore>>,
    }

    impl CountingConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                backing: MemoryStore::new("memory://pool"),
                opened: Mutex::new(Vec::new()),
            })
        }

        fn opened(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn closed(&self) -> usize {
            self.opened
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.is_closed())
                .count()
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _config: &ConnectionConfig) -> StoreResult<SharedStore> {
            // Widen the window for racing callers
            tokio::task::yield_now().await;
            let connection = self.backing.connection();
            self.opened.lock().unwrap().push(connection.clone());
            Ok(Arc::new(connection))
        }
    }

    #[derive(Debug)]
    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self, config: &ConnectionConfig) -> StoreResult<SharedStore> {
            Err(StoreError::Closed {
                target: config.connection_string.clone(),
            })
        }
    }

    struct Probe {
        store: SharedStore,
    }

    impl PooledRepository for Probe {
        const NAME: &'static str = "PROBE";

        fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
            Self { store }
        }
    }

    /// Holds every connect until the gate opens
    #[derive(Debug)]
    struct GatedConnector {
        inner: Arc<CountingConnector>,
        entered: tokio::sync::Notify,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(&self, config: &ConnectionConfig) -> StoreResult<SharedStore> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.connect(config).await
        }
    }

    fn pool(connector: Arc<dyn Connector>) -> Arc<ConnectionPool> {
        ConnectionPool::new(ConnectionConfig::in_memory("pool"), connector)
    }

    #[tokio::test]
    async fn test_concurrent_get_opens_once() {
        let connector = CountingConnector::new();
        let pool = pool(connector.clone());

        let (a, b) = tokio::join!(
            pool.get_instance::<Probe>(),
            pool.get_instance::<Probe>()
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(pool.reference_count::<Probe>(), 2);
        assert_eq!(connector.opened(), 1);
        assert!(Arc::ptr_eq(&a.store, &b.store));

        assert_eq!(a.release().unwrap(), 1);
        assert!(pool.is_live::<Probe>());
        assert_eq!(pool.drop_instance(b).unwrap(), 0);
        assert!(!pool.is_live::<Probe>());

        assert_eq!(pool.shutdown().await, 1);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_release_on_empty_is_refused() {
        let connector = CountingConnector::new();
        let pool = pool(connector.clone());

        assert!(matches!(
            pool.release_slot::<Probe>(),
            Err(Error::NotHeld { repository: "PROBE" })
        ));
        assert_eq!(pool.reference_count::<Probe>(), 0);
        assert_eq!(pool.shutdown().await, 0);
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_reacquire_after_close_opens_new_connection() {
        let connector = CountingConnector::new();
        let pool = pool(connector.clone());

        let first = pool.get_instance::<Probe>().await.unwrap();
        first.release().unwrap();
        let second = pool.get_instance::<Probe>().await.unwrap();

        assert_eq!(connector.opened(), 2);
        assert_eq!(pool.reference_count::<Probe>(), 1);
        drop(second);
        assert_eq!(pool.reference_count::<Probe>(), 0);

        pool.shutdown().await;
        // Each connection closed exactly once
        assert_eq!(connector.closed(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_slot_empty() {
        let pool = pool(Arc::new(FailingConnector));

        let result = pool.get_instance::<Probe>().await;
        assert!(matches!(
            result,
            Err(Error::ConnectionFailed { repository: "PROBE", .. })
        ));
        assert_eq!(pool.reference_count::<Probe>(), 0);
        assert!(!pool.is_live::<Probe>());
    }

    #[tokio::test]
    async fn test_shutdown_closes_live_connections() {
        let connector = CountingConnector::new();
        let pool = pool(connector.clone());

        let lease = pool.get_instance::<Probe>().await.unwrap();
        assert_eq!(pool.shutdown().await, 1);
        assert_eq!(connector.closed(), 1);
        assert!(matches!(
            pool.get_instance::<Probe>().await,
            Err(Error::PoolShutDown)
        ));
        assert!(lease.release().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_during_connect_closes_new_connection() {
        let counting = CountingConnector::new();
        let connector = Arc::new(GatedConnector {
            inner: counting.clone(),
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        });
        let pool = pool(connector.clone());

        let pending = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.get_instance::<Probe>().await.map(|lease| lease.release()) }
        });
        connector.entered.notified().await;

        assert_eq!(pool.shutdown().await, 0);
        connector.gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::PoolShutDown)));
        assert!(!pool.is_live::<Probe>());
        assert_eq!(pool.reference_count::<Probe>(), 0);
        assert_eq!(counting.opened(), 1);
        assert_eq!(counting.closed(), 1);
    }
}
