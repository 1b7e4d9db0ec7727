/// A trait which provides connection-specific functionality.
///
/// The pool calls [`ManageConnection::connect`] exactly `capacity` times while it is
/// being built and [`ManageConnection::close`] once per connection it drains on close.
/// It never calls `connect` again afterwards: lost connections are not replaced.
#[async_trait::async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// The connection type this manager deals with.
    type Connection: Send + 'static;

    /// Error returned when a connection cannot be opened or closed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Attempts to create a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Closes a connection the pool is draining.
    ///
    /// Defaults to dropping it.
    async fn close(&self, conn: Self::Connection) -> Result<(), Self::Error> {
        drop(conn);
        Ok(())
    }
}
