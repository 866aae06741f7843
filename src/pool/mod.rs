mod connection;
mod connection_pool;
mod error;
mod options;

#[cfg(test)]
mod test_utils;

pub use connection::ConnectionFactory;
pub use connection::ConnectionHandle;
pub use connection::PooledConnection;
pub use connection_pool::ConnectionPool;
pub use connection_pool::HostPoolState;
pub use connection_pool::HostStats;
pub use connection_pool::PoolStats;
pub use error::PoolError;
pub use options::ConnectionPoolOptions;
pub use options::ConnectionPoolOptionsValidated;
