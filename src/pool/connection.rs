use crate::pool::PoolError;
use crate::types::HostAndPort;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};

/// PooledConnection is one RPC channel to a host.
#[async_trait::async_trait]
pub trait PooledConnection: Send + Sync + 'static {
    /// Establishes the channel. Runs once, before the connection is first handed out.
    async fn setup(&mut self, timeout: Duration) -> Result<(), PoolError>;

    /// Re-validates an idle channel.
    async fn refresh(&mut self, timeout: Duration) -> Result<(), PoolError>;

    fn is_healthy(&self) -> bool;
}

pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: PooledConnection;

    fn make_connection(&self, host: &HostAndPort, generation: u64) -> Self::Connection;
}

/// A connection travelling back into its pool.
pub(super) struct ReturnedConnection<Conn> {
    pub(super) conn: Conn,
    pub(super) id: u64,
    pub(super) generation: u64,
    pub(super) host: HostAndPort,
    pub(super) checked_out_at: Instant,
    pub(super) outcome: Option<Result<(), PoolError>>,
}

pub(super) trait ReturnConnection<Conn>: Send + Sync {
    fn return_connection(self: Arc<Self>, returned: ReturnedConnection<Conn>);
}

/// ConnectionHandle lends a pooled connection to a caller. Dropping the handle returns the
/// connection to its pool, which then decides from the indicated outcome whether to keep it.
pub struct ConnectionHandle<Conn: PooledConnection> {
    conn: Option<Conn>,
    id: u64,
    generation: u64,
    host: HostAndPort,
    checked_out_at: Instant,
    outcome: Option<Result<(), PoolError>>,
    pool: Weak<dyn ReturnConnection<Conn>>,
}

impl<Conn: PooledConnection> ConnectionHandle<Conn> {
    pub(super) fn new(
        conn: Conn,
        id: u64,
        generation: u64,
        host: HostAndPort,
        checked_out_at: Instant,
        pool: Weak<dyn ReturnConnection<Conn>>,
    ) -> Self {
        ConnectionHandle {
            conn: Some(conn),
            id,
            generation,
            host,
            checked_out_at,
            outcome: None,
            pool,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn host(&self) -> &HostAndPort {
        &self.host
    }

    pub fn indicate_success(&mut self) {
        self.outcome = Some(Ok(()));
    }

    /// The pool discards a connection returned with a failure.
    pub fn indicate_failure(&mut self, error: PoolError) {
        self.outcome = Some(Err(error));
    }
}

impl<Conn: PooledConnection> Deref for ConnectionHandle<Conn> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("connection is present until the handle drops")
    }
}

impl<Conn: PooledConnection> DerefMut for ConnectionHandle<Conn> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("connection is present until the handle drops")
    }
}

impl<Conn: PooledConnection> std::fmt::Debug for ConnectionHandle<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("host", &self.host)
            .finish()
    }
}

impl<Conn: PooledConnection> Drop for ConnectionHandle<Conn> {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if let Some(pool) = self.pool.upgrade() {
            pool.return_connection(ReturnedConnection {
                conn,
                id: self.id,
                generation: self.generation,
                host: self.host.clone(),
                checked_out_at: self.checked_out_at,
                outcome: self.outcome.take(),
            });
        }
    }
}
