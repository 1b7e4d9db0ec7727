use crate::manager::ManageConnection;
use crate::pool::Pooled;

/// Errors returned while building a pool or acquiring from it.
#[derive(Debug, thiserror::Error)]
pub enum PoolError<E> {
    #[error("Pool capacity must be greater than zero")]
    ZeroCapacity,
    #[error("Failed to open connection {index} of {capacity}: {source}")]
    Provisioning {
        index: usize,
        capacity: usize,
        #[source]
        source: E,
    },
    #[error("Connection pool is closed")]
    Closed,
    #[error("Timed out waiting for a free connection")]
    Timeout,
    #[error("No free connection available")]
    Exhausted,
}

/// A checkout the pool refused to take back.
///
/// The checkout is handed back to the caller, who still owns the connection.
#[derive(thiserror::Error)]
pub enum ReleaseError<M: ManageConnection> {
    #[error("Connection pool is closed, connection from slot {} was not returned", .0.slot())]
    Closed(Pooled<M>),
    #[error("Connection from slot {} was issued by another pool", .0.slot())]
    Foreign(Pooled<M>),
}

impl<M: ManageConnection> ReleaseError<M> {
    /// Recovers the rejected checkout.
    pub fn into_inner(self) -> Pooled<M> {
        match self {
            ReleaseError::Closed(conn) | ReleaseError::Foreign(conn) => conn,
        }
    }
}

impl<M: ManageConnection> std::fmt::Debug for ReleaseError<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseError::Closed(conn) => f.debug_tuple("Closed").field(conn).finish(),
            ReleaseError::Foreign(conn) => f.debug_tuple("Foreign").field(conn).finish(),
        }
    }
}
