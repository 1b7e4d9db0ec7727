//! A fixed-capacity connection pool.
//!
//! The pool opens every connection up front and never opens another one. Callers
//! borrow a connection with [`Pool::acquire`], which waits while all of them are
//! checked out, and hand it back with [`Pool::release`].
//!
//! # Example
//!
//! ```rust, no_run
//! use async_trait::async_trait;
//! use bounded_pool::{ManageConnection, Pool};
//! use tokio::net::TcpStream;
//!
//! struct Upstream {
//!     addr: std::net::SocketAddr,
//! }
//!
//! #[async_trait]
//! impl ManageConnection for Upstream {
//!     type Connection = TcpStream;
//!     type Error = std::io::Error;
//!
//!     async fn connect(&self) -> std::io::Result<Self::Connection> {
//!         TcpStream::connect(self.addr).await
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(4, Upstream { addr: "127.0.0.1:8080".parse()? }).await?;
//! let conn = pool.acquire().await?;
//! println!("peer: {:?}", conn.peer_addr());
//! pool.release(conn)?;
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::time::timeout;

use crate::error::{PoolError, ReleaseError};
use crate::manager::ManageConnection;

pub const DEFAULT_CAPACITY: usize = 10;

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Acquire and release both work.
    Open,
    /// [`Pool::shutdown`] is waiting for outstanding checkouts; releases still work.
    Draining,
    /// Terminal. Idle connections have been closed.
    Closed,
}

/// A snapshot of the pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of connections opened when the pool was built.
    pub capacity: usize,
    /// Connections sitting in the pool.
    pub idle: usize,
    /// Connections currently held by callers.
    pub checked_out: usize,
    /// Checkouts that were dropped or detached instead of released.
    pub lost: usize,
    pub state: PoolState,
}

/// A builder for a connection pool.
pub struct Builder<M: ManageConnection> {
    pub capacity: usize,
    pub acquire_timeout: Option<Duration>,
    _pd: PhantomData<M>,
}

impl<M: ManageConnection> std::fmt::Debug for Builder<M> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Builder")
            .field("capacity", &self.capacity)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl<M: ManageConnection> Default for Builder<M> {
    fn default() -> Self {
        Builder {
            capacity: DEFAULT_CAPACITY,
            acquire_timeout: None,
            _pd: PhantomData,
        }
    }
}

impl<M: ManageConnection> Builder<M> {
    /// Constructs a new `Builder`.
    ///
    /// Parameters are initialized with their default values.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Sets the number of connections the pool opens and manages.
    ///
    /// Defaults to 10. Building with 0 fails.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how long [`Pool::acquire`] waits for a free connection.
    ///
    /// Defaults to `None`, which waits forever. The zero `Duration` also means forever.
    pub fn acquire_timeout(mut self, acquire_timeout: Option<Duration>) -> Self {
        self.acquire_timeout = acquire_timeout.filter(|d| !d.is_zero());
        self
    }

    /// Opens every connection and returns the filled pool.
    ///
    /// Connections are opened one after another. If any of them fails, the ones
    /// already opened are closed again and no pool is returned.
    pub async fn build(&self, manager: M) -> Result<Pool<M>, PoolError<M::Error>> {
        let capacity = self.capacity;
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        log::info!(
            "Creating connection pool with {capacity} connections, acquire_timeout: {:?}",
            self.acquire_timeout
        );

        let mut idle = VecDeque::with_capacity(capacity);
        for slot in 0..capacity {
            match manager.connect().await {
                Ok(conn) => {
                    log::trace!("Opened connection for slot {slot}");
                    idle.push_back(IdleConn { slot, conn });
                }
                Err(source) => {
                    log::error!("Failed to open connection {} of {capacity}: {source}", slot + 1);
                    for opened in idle.drain(..) {
                        if let Err(e) = manager.close(opened.conn).await {
                            log::warn!("Failed to close connection for slot {}: {e}", opened.slot);
                        }
                    }
                    return Err(PoolError::Provisioning {
                        index: slot + 1,
                        capacity,
                        source,
                    });
                }
            }
        }

        let shared = SharedPool {
            internals: Mutex::new(PoolInternals {
                idle,
                checked_out: 0,
                lost: 0,
                state: PoolState::Open,
            }),
            available: Semaphore::new(capacity),
            drained: Notify::new(),
            capacity,
            acquire_timeout: self.acquire_timeout,
            manager,
        };

        Ok(Pool { inner: Arc::new(shared) })
    }
}

/// A borrowed connection.
///
/// Only the pool that issued it accepts it back through [`Pool::release`], which
/// consumes it. Dropping it without releasing loses the connection for good.
pub struct Pooled<M: ManageConnection> {
    conn: Option<M::Connection>,
    slot: usize,
    pool: Arc<SharedPool<M>>,
}

impl<M: ManageConnection> Pooled<M> {
    /// The pool slot this connection was opened for, in `0..capacity`.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Takes the connection out of the pool for good.
    ///
    /// The pool counts it as lost and will not replace it.
    pub fn detach(mut self) -> M::Connection {
        let conn = self.conn.take().expect("checkout holds its connection until consumed");
        log::debug!("Connection from slot {} detached from pool", self.slot);
        self.pool.forget(self.slot);
        conn
    }
}

impl<M: ManageConnection> Drop for Pooled<M> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            log::warn!("Connection from slot {} dropped without being released", self.slot);
            self.pool.forget(self.slot);
        }
    }
}

impl<M: ManageConnection> Deref for Pooled<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        self.conn.as_ref().expect("checkout holds its connection until consumed")
    }
}

impl<M: ManageConnection> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().expect("checkout holds its connection until consumed")
    }
}

impl<M: ManageConnection> std::fmt::Debug for Pooled<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("slot", &self.slot).finish_non_exhaustive()
    }
}

/// A fixed-capacity connection pool.
pub struct Pool<M: ManageConnection> {
    inner: Arc<SharedPool<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Pool<M> {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ManageConnection> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("status", &self.status()).finish()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Opens `capacity` connections with the default configuration.
    pub async fn new(capacity: usize, manager: M) -> Result<Pool<M>, PoolError<M::Error>> {
        Pool::builder().capacity(capacity).build(manager).await
    }

    /// Returns a builder type to configure a new pool.
    pub fn builder() -> Builder<M> {
        Builder::new()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the current bookkeeping of the pool.
    pub fn status(&self) -> PoolStatus {
        let internals = self.inner.internals.lock();
        PoolStatus {
            capacity: self.inner.capacity,
            idle: internals.idle.len(),
            checked_out: internals.checked_out,
            lost: internals.lost,
            state: internals.state,
        }
    }

    /// Borrows a connection, waiting until one is free.
    ///
    /// Waits forever unless the pool was built with an acquire timeout. Dropping the
    /// returned future stops waiting without side effects.
    pub async fn acquire(&self) -> Result<Pooled<M>, PoolError<M::Error>> {
        match self.inner.acquire_timeout {
            Some(wait) => self.acquire_timeout(wait).await,
            None => self.wait_for_connection().await,
        }
    }

    /// Borrows a connection, waiting at most `wait` for one to become free.
    pub async fn acquire_timeout(
        &self,
        wait: Duration,
    ) -> Result<Pooled<M>, PoolError<M::Error>> {
        match timeout(wait, self.wait_for_connection()).await {
            Ok(result) => result,
            Err(_) => {
                log::debug!("No connection became free within {wait:?}");
                Err(PoolError::Timeout)
            }
        }
    }

    /// Borrows a connection only if one is free right now.
    pub fn try_acquire(&self) -> Result<Pooled<M>, PoolError<M::Error>> {
        let permit = self.inner.available.try_acquire().map_err(|e| match e {
            TryAcquireError::Closed => PoolError::Closed,
            TryAcquireError::NoPermits => PoolError::Exhausted,
        })?;
        permit.forget();
        self.checkout()
    }

    async fn wait_for_connection(&self) -> Result<Pooled<M>, PoolError<M::Error>> {
        log::trace!("Waiting for a free connection");
        // One permit per idle connection; the semaphore queues waiters fairly.
        let permit = self.inner.available.acquire().await.map_err(|_| PoolError::Closed)?;
        permit.forget();
        self.checkout()
    }

    fn checkout(&self) -> Result<Pooled<M>, PoolError<M::Error>> {
        let mut internals = self.inner.internals.lock();
        if internals.state != PoolState::Open {
            return Err(PoolError::Closed);
        }
        // A granted permit always has an idle connection behind it while open.
        let Some(IdleConn { slot, conn }) = internals.idle.pop_front() else {
            log::error!("Permit granted but no idle connection found");
            return Err(PoolError::Exhausted);
        };
        internals.checked_out += 1;
        log::debug!(
            "Checked out connection from slot {slot} (idle: {}, checked out: {})",
            internals.idle.len(),
            internals.checked_out
        );
        Ok(Pooled {
            conn: Some(conn),
            slot,
            pool: self.inner.clone(),
        })
    }

    /// Returns a borrowed connection to the pool, waking one waiter.
    ///
    /// Never waits. The checkout is handed back inside the error if it came from
    /// another pool or if this pool has been closed.
    pub fn release(&self, mut conn: Pooled<M>) -> Result<(), ReleaseError<M>> {
        if !Arc::ptr_eq(&self.inner, &conn.pool) {
            log::warn!("Refusing connection from slot {} issued by another pool", conn.slot);
            return Err(ReleaseError::Foreign(conn));
        }

        let mut internals = self.inner.internals.lock();
        if internals.state == PoolState::Closed {
            drop(internals);
            log::warn!("Refusing connection from slot {}, pool is closed", conn.slot);
            return Err(ReleaseError::Closed(conn));
        }

        if let Some(raw) = conn.conn.take() {
            internals.idle.push_back(IdleConn { slot: conn.slot, conn: raw });
            internals.checked_out -= 1;
            log::trace!(
                "Connection from slot {} returned to pool (idle: {})",
                conn.slot,
                internals.idle.len()
            );
            match internals.state {
                PoolState::Open => self.inner.available.add_permits(1),
                _ => self.inner.settle(&internals),
            }
        }
        Ok(())
    }

    /// Closes the pool without waiting for outstanding checkouts.
    ///
    /// Every idle connection is closed through the manager and waiters are woken
    /// with [`PoolError::Closed`]. Connections still checked out are left alone and
    /// can no longer be released. Returns how many connections were closed; calling
    /// it on a closed pool returns 0.
    pub async fn close(&self) -> usize {
        let drained: Vec<IdleConn<M::Connection>> = {
            let mut internals = self.inner.internals.lock();
            if internals.state == PoolState::Closed {
                log::warn!("Connection pool is already closed");
                return 0;
            }
            internals.state = PoolState::Closed;
            self.inner.available.close();
            self.inner.drained.notify_waiters();
            if internals.checked_out > 0 {
                log::warn!(
                    "Closing pool with {} connections still checked out",
                    internals.checked_out
                );
            }
            internals.idle.drain(..).collect()
        };

        let count = drained.len();
        for IdleConn { slot, conn } in drained {
            if let Err(e) = self.inner.manager.close(conn).await {
                log::warn!("Failed to close connection for slot {slot}: {e}");
            }
        }
        log::info!("Connection pool closed, drained {count} connections");
        count
    }

    /// Stops lending connections, waits for every checkout to come back, then closes.
    ///
    /// Checkouts that are dropped or detached meanwhile count as returned. If
    /// [`Pool::close`] runs while this is waiting, it stops waiting and returns 0.
    /// Wrap the call in [`tokio::time::timeout`] to bound the wait.
    pub async fn shutdown(&self) -> usize {
        {
            let mut internals = self.inner.internals.lock();
            match internals.state {
                PoolState::Closed => {
                    log::warn!("Connection pool is already closed");
                    return 0;
                }
                PoolState::Open => {
                    internals.state = PoolState::Draining;
                    self.inner.available.close();
                    log::info!(
                        "Shutting down pool, waiting for {} checked out connections",
                        internals.checked_out
                    );
                }
                PoolState::Draining => {}
            }
        }

        loop {
            let notified = self.inner.drained.notified();
            let outstanding = {
                let internals = self.inner.internals.lock();
                if internals.state == PoolState::Closed {
                    log::warn!("Connection pool was closed while shutting down");
                    return 0;
                }
                internals.checked_out
            };
            if outstanding == 0 {
                break;
            }
            log::trace!("Waiting for {outstanding} connections to be returned");
            notified.await;
        }

        self.close().await
    }
}

struct SharedPool<M: ManageConnection> {
    internals: Mutex<PoolInternals<M::Connection>>,
    available: Semaphore,
    drained: Notify,
    capacity: usize,
    acquire_timeout: Option<Duration>,
    manager: M,
}

impl<M: ManageConnection> SharedPool<M> {
    /// Removes a checkout that will never be released from the books.
    fn forget(&self, slot: usize) {
        let mut internals = self.internals.lock();
        internals.checked_out -= 1;
        internals.lost += 1;
        log::debug!(
            "Slot {slot} lost, pool now has {} of {} connections",
            self.capacity - internals.lost,
            self.capacity
        );
        self.settle(&internals);
    }

    fn settle(&self, internals: &PoolInternals<M::Connection>) {
        if internals.state == PoolState::Draining && internals.checked_out == 0 {
            self.drained.notify_waiters();
        }
    }
}

struct IdleConn<C> {
    slot: usize,
    conn: C,
}

struct PoolInternals<C> {
    idle: VecDeque<IdleConn<C>>,
    checked_out: usize,
    lost: usize,
    state: PoolState,
}
