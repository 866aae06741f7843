//! This mod holds the node-facing API: configuration, the node factory and the node handle.
mod event_bus;
mod node;
mod options;
mod wiring;

pub use event_bus::MemberStateEvent;
pub use event_bus::NodeEvent;
pub use event_bus::NodeEventListener;
pub use node::NodeRollbackError;
pub use node::ReplSetNode;
pub use node::WriteError;
pub use options::ReplicationOptions;
pub use wiring::try_create_node;
pub use wiring::NodeTransport;
pub use wiring::ReplSetNodeConfig;
pub use wiring::ReplSetNodeCreationError;
