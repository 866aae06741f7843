use crate::actor::{CoordinatorClient, WeakCoordinatorClient};
use crate::replica::{
    HeartbeatInput, HeartbeatOutput, NetworkError, RequestVotesInput, RequestVotesOutput, UpdatePositionInput,
};
use crate::rollback::InMemoryRollbackSource;
use crate::types::HostAndPort;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// ReplicationNetwork carries the coordinator's outbound RPCs to other members.
#[async_trait]
pub trait ReplicationNetwork: Send + Sync + 'static {
    async fn heartbeat(&self, target: &HostAndPort, input: HeartbeatInput) -> Result<HeartbeatOutput, NetworkError>;

    async fn request_votes(
        &self,
        target: &HostAndPort,
        input: RequestVotesInput,
    ) -> Result<RequestVotesOutput, NetworkError>;

    async fn update_position(&self, target: &HostAndPort, input: UpdatePositionInput) -> Result<(), NetworkError>;
}

#[derive(Default)]
struct Hub {
    nodes: HashMap<HostAndPort, WeakCoordinatorClient>,
    sync_sources: HashMap<HostAndPort, InMemoryRollbackSource>,
    isolated: HashSet<HostAndPort>,
}

/// LoopbackNetwork wires several coordinators in one process together, with switches to cut a
/// node off from everyone else.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        LoopbackNetwork::default()
    }

    pub fn register(&self, host: HostAndPort, client: &CoordinatorClient) {
        self.hub().nodes.insert(host, client.weak());
    }

    /// Lets the other nodes read `host`'s oplog and documents.
    pub fn register_sync_source(&self, host: HostAndPort, source: InMemoryRollbackSource) {
        self.hub().sync_sources.insert(host, source);
    }

    /// `target`'s data as `source` would read it. Isolation applies as it does to RPCs.
    pub fn sync_source(&self, source: &HostAndPort, target: &HostAndPort) -> Result<InMemoryRollbackSource, NetworkError> {
        let hub = self.hub();
        if hub.isolated.contains(source) || hub.isolated.contains(target) {
            return Err(NetworkError::Unreachable(target.to_string()));
        }
        hub.sync_sources
            .get(target)
            .cloned()
            .ok_or_else(|| NetworkError::Unreachable(target.to_string()))
    }

    /// Drops every RPC to or from `host` until `reconnect`.
    pub fn isolate(&self, host: &HostAndPort) {
        self.hub().isolated.insert(host.clone());
    }

    pub fn reconnect(&self, host: &HostAndPort) {
        self.hub().isolated.remove(host);
    }

    /// The view of the network from `host`.
    pub fn endpoint(&self, host: HostAndPort) -> LoopbackEndpoint {
        LoopbackEndpoint {
            network: self.clone(),
            source: host,
        }
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().expect("LoopbackNetwork mutex guard poison")
    }

    fn route(&self, source: &HostAndPort, target: &HostAndPort) -> Result<CoordinatorClient, NetworkError> {
        let hub = self.hub();
        if hub.isolated.contains(source) || hub.isolated.contains(target) {
            return Err(NetworkError::Unreachable(target.to_string()));
        }
        hub.nodes
            .get(target)
            .and_then(WeakCoordinatorClient::upgrade)
            .ok_or_else(|| NetworkError::Unreachable(target.to_string()))
    }
}

pub struct LoopbackEndpoint {
    network: LoopbackNetwork,
    source: HostAndPort,
}

#[async_trait]
impl ReplicationNetwork for LoopbackEndpoint {
    async fn heartbeat(&self, target: &HostAndPort, input: HeartbeatInput) -> Result<HeartbeatOutput, NetworkError> {
        let client = self.network.route(&self.source, target)?;
        client.heartbeat(input).await.map_err(|e| NetworkError::Remote {
            code: e.code(),
            message: e.to_string(),
        })
    }

    async fn request_votes(
        &self,
        target: &HostAndPort,
        input: RequestVotesInput,
    ) -> Result<RequestVotesOutput, NetworkError> {
        let client = self.network.route(&self.source, target)?;
        client.request_votes(input).await.map_err(|e| NetworkError::Remote {
            code: e.code(),
            message: e.to_string(),
        })
    }

    async fn update_position(&self, target: &HostAndPort, input: UpdatePositionInput) -> Result<(), NetworkError> {
        let client = self.network.route(&self.source, target)?;
        client.update_position(input).await.map_err(|e| NetworkError::Remote {
            code: e.code(),
            message: e.to_string(),
        })
    }
}
