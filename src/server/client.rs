use crate::grpc::grpc_repl_set_client::GrpcReplSetClient;
use crate::grpc::grpc_sync_source_client::GrpcSyncSourceClient;
use crate::grpc::{
    proto_get_collection_info_result, ProtoCopyCollectionReq, ProtoDocument, ProtoFindOneReq,
    ProtoGetCollectionInfoReq, ProtoGetLastOperationReq, ProtoGetRollbackIdReq, ProtoScanOplogReq,
};
use crate::oplog::{self, OplogEntry, OplogIterator, OplogReadError};
use crate::pool::{ConnectionFactory, ConnectionHandle, ConnectionPool, PoolError, PooledConnection};
use crate::replica::{
    HeartbeatInput, HeartbeatOutput, NetworkError, ReplicationNetwork, RequestVotesInput, RequestVotesOutput,
    UpdatePositionInput,
};
use crate::rollback::{CollectionCopy, RollbackSource, RollbackSourceError};
use crate::server::conversions;
use crate::storage::CollectionOptions;
use crate::types::{Document, ErrorCode, HostAndPort, RecordId, Value};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use tokio::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// GrpcConnection is one tonic channel to a peer, as the connection pool manages it.
pub struct GrpcConnection {
    host: HostAndPort,
    channel: Option<Channel>,
    healthy: bool,
}

impl GrpcConnection {
    pub fn new(host: HostAndPort) -> Self {
        GrpcConnection {
            host,
            channel: None,
            healthy: false,
        }
    }

    fn channel(&self) -> Result<Channel, PoolError> {
        self.channel
            .clone()
            .ok_or_else(|| PoolError::NetworkError(format!("connection to {} was never set up", self.host)))
    }

    pub fn repl_set(&self) -> Result<GrpcReplSetClient<Channel>, PoolError> {
        Ok(GrpcReplSetClient::new(self.channel()?))
    }

    pub fn sync_source(&self) -> Result<GrpcSyncSourceClient<Channel>, PoolError> {
        Ok(GrpcSyncSourceClient::new(self.channel()?))
    }
}

#[async_trait]
impl PooledConnection for GrpcConnection {
    async fn setup(&mut self, timeout: Duration) -> Result<(), PoolError> {
        let url = format!("http://{}", self.host);
        let endpoint = Endpoint::from_shared(url).map_err(|e| PoolError::HostUnreachable(e.to_string()))?;

        let channel = match tokio::time::timeout(timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                self.healthy = false;
                return Err(PoolError::NetworkError(e.to_string()));
            }
            Err(_) => {
                self.healthy = false;
                return Err(PoolError::ExceededTimeLimit);
            }
        };
        self.channel = Some(channel);
        self.healthy = true;
        Ok(())
    }

    /// Pings the peer with the cheapest call it serves.
    async fn refresh(&mut self, timeout: Duration) -> Result<(), PoolError> {
        let mut client = self.sync_source()?;
        let result = match tokio::time::timeout(timeout, client.get_rollback_id(ProtoGetRollbackIdReq {})).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) => Err(PoolError::NetworkError(status.message().to_string())),
            Err(_) => Err(PoolError::ExceededTimeLimit),
        };
        self.healthy = result.is_ok();
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

#[derive(Clone, Default)]
pub struct GrpcConnectionFactory;

impl ConnectionFactory for GrpcConnectionFactory {
    type Connection = GrpcConnection;

    fn make_connection(&self, host: &HostAndPort, _generation: u64) -> GrpcConnection {
        GrpcConnection::new(host.clone())
    }
}

pub type GrpcConnectionPool = ConnectionPool<GrpcConnectionFactory>;

fn pool_error_to_network_error(host: &HostAndPort, e: PoolError) -> NetworkError {
    match e {
        PoolError::ExceededTimeLimit => NetworkError::Timeout,
        other => NetworkError::Unreachable(format!("{}: {}", host, other)),
    }
}

/// Runs `call` with its connection checked out of the pool, bounded by `rpc_timeout`.
/// Transport failures mark the connection bad so the pool replaces it.
async fn with_connection<T, F, Fut>(
    pool: &GrpcConnectionPool,
    target: &HostAndPort,
    rpc_timeout: Duration,
    call: F,
) -> Result<T, NetworkError>
where
    F: FnOnce(&GrpcConnection) -> Result<Fut, PoolError>,
    Fut: Future<Output = Result<T, tonic::Status>>,
{
    let mut conn: ConnectionHandle<GrpcConnection> = pool
        .get(target, rpc_timeout)
        .await
        .map_err(|e| pool_error_to_network_error(target, e))?;

    let future = match call(&conn) {
        Ok(future) => future,
        Err(e) => {
            conn.indicate_failure(e.clone());
            return Err(pool_error_to_network_error(target, e));
        }
    };

    match tokio::time::timeout(rpc_timeout, future).await {
        Ok(Ok(response)) => {
            conn.indicate_success();
            Ok(response)
        }
        Ok(Err(status)) => {
            let error = conversions::status_to_network_error(status);
            match &error {
                NetworkError::Remote { .. } => conn.indicate_success(),
                _ => conn.indicate_failure(PoolError::NetworkError(error.to_string())),
            }
            Err(error)
        }
        Err(_) => {
            conn.indicate_failure(PoolError::ExceededTimeLimit);
            Err(NetworkError::Timeout)
        }
    }
}

/// GrpcNetwork sends the coordinator's RPCs to peers over pooled tonic channels.
pub struct GrpcNetwork {
    logger: slog::Logger,
    pool: GrpcConnectionPool,
    rpc_timeout: Duration,
}

impl GrpcNetwork {
    pub fn new(logger: slog::Logger, pool: GrpcConnectionPool, rpc_timeout: Duration) -> Self {
        GrpcNetwork {
            logger,
            pool,
            rpc_timeout,
        }
    }
}

#[async_trait]
impl ReplicationNetwork for GrpcNetwork {
    async fn heartbeat(&self, target: &HostAndPort, input: HeartbeatInput) -> Result<HeartbeatOutput, NetworkError> {
        let rpc_request = conversions::heartbeat_input_to_proto(&input);
        slog::debug!(self.logger, "ClientWire - {} - {:?}", target, rpc_request);

        let rpc_result = with_connection(&self.pool, target, self.rpc_timeout, |conn| {
            let mut client = conn.repl_set()?;
            Ok(async move { client.heartbeat(rpc_request).await })
        })
        .await;
        slog::debug!(self.logger, "ClientWire - {} - {:?}", target, rpc_result);

        conversions::heartbeat_result_from_proto(rpc_result?.into_inner())
    }

    async fn request_votes(
        &self,
        target: &HostAndPort,
        input: RequestVotesInput,
    ) -> Result<RequestVotesOutput, NetworkError> {
        let rpc_request = conversions::request_votes_input_to_proto(&input);
        slog::debug!(self.logger, "ClientWire - {} - {:?}", target, rpc_request);

        let rpc_result = with_connection(&self.pool, target, self.rpc_timeout, |conn| {
            let mut client = conn.repl_set()?;
            Ok(async move { client.request_votes(rpc_request).await })
        })
        .await;
        slog::debug!(self.logger, "ClientWire - {} - {:?}", target, rpc_result);

        conversions::request_votes_result_from_proto(rpc_result?.into_inner())
    }

    async fn update_position(&self, target: &HostAndPort, input: UpdatePositionInput) -> Result<(), NetworkError> {
        let rpc_request = conversions::update_position_input_to_proto(&input, None);
        slog::debug!(self.logger, "ClientWire - {} - {:?}", target, rpc_request);

        let rpc_result = with_connection(&self.pool, target, self.rpc_timeout, |conn| {
            let mut client = conn.repl_set()?;
            Ok(async move { client.update_position(rpc_request).await })
        })
        .await;
        slog::debug!(self.logger, "ClientWire - {} - {:?}", target, rpc_result);

        conversions::update_position_result_from_proto(rpc_result?.into_inner())
    }
}

/// RemoteRollbackSource reads a sync source over its sync-source service.
#[derive(Clone)]
pub struct RemoteRollbackSource {
    pool: GrpcConnectionPool,
    host: HostAndPort,
    rpc_timeout: Duration,
    page_size: u32,
}

fn network_to_source_error(e: NetworkError) -> RollbackSourceError {
    RollbackSourceError::Network(e.to_string())
}

fn decode(proto: ProtoDocument, what: &str) -> Result<Document, RollbackSourceError> {
    oplog::document_from_proto(proto).map_err(|e| RollbackSourceError::BadResponse(format!("{}: {}", what, e)))
}

fn decode_entry(proto: ProtoDocument) -> Result<OplogEntry, RollbackSourceError> {
    let doc = decode(proto, "oplog entry")?;
    OplogEntry::parse(&doc).map_err(|e| RollbackSourceError::BadResponse(format!("oplog entry: {}", e)))
}

fn decode_options(proto: ProtoDocument) -> Result<CollectionOptions, RollbackSourceError> {
    let doc = decode(proto, "collection options")?;
    CollectionOptions::parse(&doc).map_err(|e| RollbackSourceError::BadResponse(format!("collection options: {}", e)))
}

impl RemoteRollbackSource {
    pub fn new(pool: GrpcConnectionPool, host: HostAndPort, rpc_timeout: Duration) -> Self {
        RemoteRollbackSource {
            pool,
            host,
            rpc_timeout,
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn scan_page(&self, before: Option<RecordId>) -> Result<(Vec<(OplogEntry, RecordId)>, bool), RollbackSourceError> {
        let rpc_request = ProtoScanOplogReq {
            before_record_id: before.map_or(0, |id| id.repr()),
            limit: self.page_size,
        };
        let response = with_connection(&self.pool, &self.host, self.rpc_timeout, |conn| {
            let mut client = conn.sync_source()?;
            Ok(async move { client.scan_oplog(rpc_request).await })
        })
        .await
        .map_err(network_to_source_error)?
        .into_inner();

        let mut page = Vec::with_capacity(response.records.len());
        for record in response.records {
            let entry = record
                .entry
                .ok_or_else(|| RollbackSourceError::BadResponse("oplog record without entry".to_string()))?;
            page.push((decode_entry(entry)?, RecordId::new(record.record_id)));
        }
        Ok((page, response.exhausted))
    }
}

#[async_trait]
impl RollbackSource for RemoteRollbackSource {
    async fn get_rollback_id(&self) -> Result<i32, RollbackSourceError> {
        let response = with_connection(&self.pool, &self.host, self.rpc_timeout, |conn| {
            let mut client = conn.sync_source()?;
            Ok(async move { client.get_rollback_id(ProtoGetRollbackIdReq {}).await })
        })
        .await
        .map_err(network_to_source_error)?;
        Ok(response.into_inner().rbid)
    }

    async fn get_last_operation(&self) -> Result<Option<OplogEntry>, RollbackSourceError> {
        let response = with_connection(&self.pool, &self.host, self.rpc_timeout, |conn| {
            let mut client = conn.sync_source()?;
            Ok(async move { client.get_last_operation(ProtoGetLastOperationReq {}).await })
        })
        .await
        .map_err(network_to_source_error)?;
        response.into_inner().entry.map(decode_entry).transpose()
    }

    async fn oplog(&self) -> Result<Box<dyn OplogIterator>, RollbackSourceError> {
        Ok(Box::new(RemoteOplogIterator {
            source: self.clone(),
            buffered: VecDeque::new(),
            last_seen: None,
            exhausted: false,
        }))
    }

    async fn find_one(&self, ns: &str, id: &Value) -> Result<Option<Document>, RollbackSourceError> {
        let rpc_request = ProtoFindOneReq {
            ns: ns.to_string(),
            id: Some(oplog::value_to_proto(id)),
        };
        let response = with_connection(&self.pool, &self.host, self.rpc_timeout, |conn| {
            let mut client = conn.sync_source()?;
            Ok(async move { client.find_one(rpc_request).await })
        })
        .await
        .map_err(network_to_source_error)?;
        response
            .into_inner()
            .document
            .map(|doc| decode(doc, "document"))
            .transpose()
    }

    async fn get_collection_info(&self, ns: &str) -> Result<Option<CollectionOptions>, RollbackSourceError> {
        let rpc_request = ProtoGetCollectionInfoReq { ns: ns.to_string() };
        let response = with_connection(&self.pool, &self.host, self.rpc_timeout, |conn| {
            let mut client = conn.sync_source()?;
            Ok(async move { client.get_collection_info(rpc_request).await })
        })
        .await
        .map_err(network_to_source_error)?;

        match response.into_inner().result {
            Some(proto_get_collection_info_result::Result::Options(options)) => decode_options(options).map(Some),
            Some(proto_get_collection_info_result::Result::Err(err))
                if ErrorCode::from_code(err.code) == ErrorCode::NamespaceNotFound =>
            {
                Ok(None)
            }
            Some(proto_get_collection_info_result::Result::Err(err)) => Err(RollbackSourceError::BadResponse(err.message)),
            None => Err(RollbackSourceError::BadResponse("empty collection info".to_string())),
        }
    }

    async fn copy_collection(&self, ns: &str) -> Result<CollectionCopy, RollbackSourceError> {
        let rpc_request = ProtoCopyCollectionReq { ns: ns.to_string() };
        let mut conn = self
            .pool
            .get(&self.host, self.rpc_timeout)
            .await
            .map_err(|e| network_to_source_error(pool_error_to_network_error(&self.host, e)))?;
        let mut client = conn
            .sync_source()
            .map_err(|e| network_to_source_error(pool_error_to_network_error(&self.host, e)))?;

        // Collections can be large, so the copy isn't bounded by the RPC timeout.
        let response = match client.copy_collection(rpc_request).await {
            Ok(response) => {
                conn.indicate_success();
                response.into_inner()
            }
            Err(status) if status.code() == tonic::Code::NotFound => {
                conn.indicate_success();
                return Err(RollbackSourceError::NamespaceNotFound(ns.to_string()));
            }
            Err(status) => {
                conn.indicate_failure(PoolError::NetworkError(status.message().to_string()));
                return Err(network_to_source_error(conversions::status_to_network_error(status)));
            }
        };

        let options = match response.options {
            Some(options) => decode_options(options)?,
            None => CollectionOptions::default(),
        };
        let mut documents = Vec::with_capacity(response.documents.len());
        for doc in response.documents {
            documents.push(decode(doc, "document")?);
        }
        Ok(CollectionCopy { options, documents })
    }
}

/// Pages backward through a remote oplog.
struct RemoteOplogIterator {
    source: RemoteRollbackSource,
    buffered: VecDeque<(OplogEntry, RecordId)>,
    last_seen: Option<RecordId>,
    exhausted: bool,
}

#[async_trait]
impl OplogIterator for RemoteOplogIterator {
    async fn next(&mut self) -> Result<Option<(OplogEntry, RecordId)>, OplogReadError> {
        if self.buffered.is_empty() && !self.exhausted {
            let (page, exhausted) = self
                .source
                .scan_page(self.last_seen)
                .await
                .map_err(|e| OplogReadError::Remote(e.to_string()))?;
            self.exhausted = exhausted || page.is_empty();
            self.buffered.extend(page);
        }

        let next = self.buffered.pop_front();
        if let Some((_, id)) = &next {
            self.last_seen = Some(*id);
        }
        Ok(next)
    }
}
