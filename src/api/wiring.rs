use crate::actor::{CoordinatorActor, CoordinatorClient, WeakCoordinatorClient};
use crate::api::node::ReplSetNode;
use crate::api::options::ReplicationOptionsValidated;
use crate::clock::{stop_pair, RealClock};
use crate::pool::ConnectionPool;
use crate::replica::{
    CatalogLocalState, Coordinator, CoordinatorConfig, InitiateError, LoopbackNetwork, MemberState,
    PersistentLocalState, ReplicationNetwork, StateChangeListener,
};
use crate::rollback::{InMemoryRollbackSource, Rollback};
use crate::server::{GrpcConnectionFactory, GrpcNetwork, RpcServer};
use crate::storage::{NoopJournal, StorageCatalog, StorageError};
use crate::sync::{BackgroundSync, SyncSourceConnector};
use crate::types::HostAndPort;
use crate::ReplicationOptions;
use std::convert::TryFrom;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// How the node talks to the other members.
pub enum NodeTransport {
    /// Serve peers on `listen_addr` and reach them over pooled gRPC channels.
    Grpc { listen_addr: SocketAddr },
    /// Route RPCs between nodes in this process.
    Loopback(LoopbackNetwork),
}

pub struct ReplSetNodeConfig {
    /// The address other members know this node by. Must match its entry in the set config.
    pub self_host: HostAndPort,
    /// None accepts whichever set initiates the node.
    pub set_name: Option<String>,
    pub transport: NodeTransport,
    pub info_logger: slog::Logger,
    pub options: ReplicationOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplSetNodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Storage initialization failure: {0}")]
    StorageInitialization(StorageError),
    #[error("Failed to load local replica set state: {0}")]
    LocalStateLoad(InitiateError),
}

/// Must be called within a tokio runtime.
pub async fn try_create_node(config: ReplSetNodeConfig) -> Result<ReplSetNode, ReplSetNodeCreationError> {
    let root_logger = config
        .info_logger
        .new(slog::o!("Host" => config.self_host.to_string()));

    let options = ReplicationOptionsValidated::try_from(config.options)
        .map_err(|e| ReplSetNodeCreationError::IllegalOptions(e.to_string()))?;

    let catalog = Arc::new(
        StorageCatalog::new(root_logger.clone(), options.oplog_size_bytes, Arc::new(NoopJournal))
            .map_err(ReplSetNodeCreationError::StorageInitialization)?,
    );
    let local_state: Arc<dyn PersistentLocalState> = Arc::new(CatalogLocalState::new(root_logger.clone(), catalog.clone()));
    let rollback_source = InMemoryRollbackSource::new(catalog.clone(), local_state.clone());

    let (actor_client, actor_queue_rx) = CoordinatorClient::new(64);

    let (background_stop, stop_token) = stop_pair();

    let (network, pool, connector): (Arc<dyn ReplicationNetwork>, _, _) = match config.transport {
        NodeTransport::Grpc { listen_addr } => {
            let pool = ConnectionPool::new(
                root_logger.new(slog::o!("Component" => "ConnectionPool")),
                GrpcConnectionFactory,
                options.connection_pool.clone(),
            );
            let network = GrpcNetwork::new(root_logger.clone(), pool.clone(), options.rpc_timeout);

            let rpc_server = RpcServer::new(root_logger.clone(), actor_client.weak(), rollback_source.clone());
            tokio::spawn(rpc_server.run(listen_addr, stop_token.clone()));

            let connector = SyncSourceConnector::Grpc {
                pool: pool.clone(),
                rpc_timeout: options.rpc_timeout,
            };
            (Arc::new(network) as Arc<dyn ReplicationNetwork>, Some(pool), connector)
        }
        NodeTransport::Loopback(loopback) => {
            loopback.register(config.self_host.clone(), &actor_client);
            loopback.register_sync_source(config.self_host.clone(), rollback_source.clone());
            let endpoint = loopback.endpoint(config.self_host.clone());
            let connector = SyncSourceConnector::Loopback {
                network: loopback,
                self_host: config.self_host.clone(),
            };
            (Arc::new(endpoint) as Arc<dyn ReplicationNetwork>, None, connector)
        }
    };

    let coordinator = Coordinator::new(CoordinatorConfig {
        logger: root_logger.clone(),
        self_host: config.self_host.clone(),
        set_name: config.set_name,
        local_state: local_state.clone(),
        network,
        actor_client: actor_client.weak(),
        default_election_timeout: options.election_timeout,
        default_heartbeat_interval: options.heartbeat_interval,
        election_timeout_offset_limit: options.election_timeout_offset_limit,
        rpc_timeout: options.rpc_timeout,
        clock: RealClock,
    });
    tokio::spawn(CoordinatorActor::new(actor_queue_rx, coordinator).run_event_loop());

    actor_client
        .load_local_config()
        .await
        .map_err(ReplSetNodeCreationError::LocalStateLoad)?;

    let state_listener = actor_client.state_listener().await;
    tokio::spawn(follow_state_changes(
        root_logger.clone(),
        actor_client.weak(),
        state_listener,
    ));

    let rollback = Rollback::new(
        root_logger.new(slog::o!("Component" => "Rollback")),
        catalog.clone(),
        local_state,
        options.db_path.clone(),
    );

    let new_op_lock = Arc::new(AsyncMutex::new(()));
    let sync = Arc::new(BackgroundSync::new(
        root_logger.new(slog::o!("Component" => "BackgroundSync")),
        actor_client.weak(),
        connector,
        catalog.clone(),
        new_op_lock.clone(),
        options.max_sync_source_lag,
        options.sync_batch_limit,
    ));
    if let Some(interval) = options.sync_interval {
        tokio::spawn(sync.clone().run(interval, stop_token));
    }

    Ok(ReplSetNode {
        logger: root_logger,
        coordinator: actor_client,
        catalog,
        rollback,
        rollback_source,
        pool,
        rpc_timeout: options.rpc_timeout,
        write_concern_majority_journal_default: options.write_concern_majority_journal_default,
        sync,
        background_stop: Mutex::new(Some(background_stop)),
        new_op_lock,
    })
}

/// Nothing is ever cloned or buffered for apply on this node, so STARTUP2 is left as soon as it
/// is entered and a new primary's drain finishes right away.
async fn follow_state_changes(
    logger: slog::Logger,
    coordinator: WeakCoordinatorClient,
    mut listener: StateChangeListener,
) {
    loop {
        let snapshot = match listener
            .wait_for(|s| s.state == MemberState::Startup2 || (s.state == MemberState::Primary && s.is_draining))
            .await
        {
            Some(snapshot) => snapshot,
            None => return,
        };
        let client = match coordinator.upgrade() {
            Some(client) => client,
            None => return,
        };
        if snapshot.state == MemberState::Startup2 {
            match client.signal_initial_sync_complete().await {
                Ok(()) => slog::info!(logger, "Initial sync complete"),
                Err(e) => slog::warn!(logger, "Failed to leave STARTUP2: {}", e),
            }
        } else {
            client.signal_drain_complete().await;
            slog::info!(logger, "Drain complete in term {:?}", snapshot.term);
        }
        drop(client);

        if listener.wait_for(|s| *s != snapshot).await.is_none() {
            return;
        }
    }
}
