mod client;
mod conversions;
mod server;

pub use client::GrpcConnection;
pub use client::GrpcConnectionFactory;
pub use client::GrpcConnectionPool;
pub use client::GrpcNetwork;
pub use client::RemoteRollbackSource;
pub use server::RpcServer;
