use crate::actor::{CoordinatorClient, WeakCoordinatorClient};
use crate::clock::StopToken;
use crate::grpc::grpc_repl_set_server::{GrpcReplSet, GrpcReplSetServer};
use crate::grpc::grpc_sync_source_server::{GrpcSyncSource, GrpcSyncSourceServer};
use crate::grpc::{
    proto_get_collection_info_result, ProtoCopyCollectionReq, ProtoCopyCollectionResult, ProtoFindOneReq,
    ProtoFindOneResult, ProtoGetCollectionInfoReq, ProtoGetCollectionInfoResult, ProtoGetLastOperationReq,
    ProtoGetLastOperationResult, ProtoGetRollbackIdReq, ProtoGetRollbackIdResult, ProtoHeartbeatReq,
    ProtoHeartbeatResult, ProtoOplogRecord, ProtoRequestVotesReq, ProtoRequestVotesResult, ProtoScanOplogReq,
    ProtoScanOplogResult, ProtoUpdatePositionReq, ProtoUpdatePositionResult,
};
use crate::oplog;
use crate::replica::{HeartbeatError, RequestVotesError, UpdatePositionError};
use crate::rollback::{InMemoryRollbackSource, RollbackSource, RollbackSourceError};
use crate::server::conversions;
use crate::types::{ErrorCode, RecordId};
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Upper bound on one ScanOplog page, whatever the caller asks for.
const MAX_SCAN_PAGE: usize = 10_000;

/// RpcServer answers peer RPCs: the replica set protocol goes to the coordinator, sync-source
/// reads are served from this node's catalog.
#[derive(Clone)]
pub struct RpcServer {
    logger: slog::Logger,
    coordinator: WeakCoordinatorClient,
    sync_source: InMemoryRollbackSource,
}

impl RpcServer {
    pub fn new(logger: slog::Logger, coordinator: WeakCoordinatorClient, sync_source: InMemoryRollbackSource) -> Self {
        RpcServer {
            logger,
            coordinator,
            sync_source,
        }
    }

    /// Serves until `stop` fires.
    pub(crate) async fn run(self, socket_addr: SocketAddr, mut stop: StopToken) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcReplSetServer::new(self.clone()))
            .add_service(GrpcSyncSourceServer::new(self))
            .serve_with_shutdown(socket_addr, async move { stop.stopped().await })
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    fn coordinator(&self) -> Option<CoordinatorClient> {
        self.coordinator.upgrade()
    }

    async fn handle_heartbeat(&self, rpc_request: ProtoHeartbeatReq) -> Result<ProtoHeartbeatResult, Status> {
        let app_input = conversions::heartbeat_input_from_proto(rpc_request)?;
        let app_result = match self.coordinator() {
            Some(coordinator) => coordinator.heartbeat(app_input).await,
            None => Err(HeartbeatError::ShutdownInProgress),
        };
        Ok(conversions::heartbeat_result_to_proto(app_result))
    }

    async fn handle_request_votes(&self, rpc_request: ProtoRequestVotesReq) -> Result<ProtoRequestVotesResult, Status> {
        let app_input = conversions::request_votes_input_from_proto(rpc_request);
        let app_result = match self.coordinator() {
            Some(coordinator) => coordinator.request_votes(app_input).await,
            None => Err(RequestVotesError::ShutdownInProgress),
        };
        Ok(conversions::request_votes_result_to_proto(app_result))
    }

    async fn handle_update_position(
        &self,
        rpc_request: ProtoUpdatePositionReq,
    ) -> Result<ProtoUpdatePositionResult, Status> {
        let (app_input, metadata) = conversions::update_position_input_from_proto(rpc_request)?;
        let app_result = match self.coordinator() {
            Some(coordinator) => {
                if let Some(metadata) = metadata {
                    coordinator.process_metadata(metadata).await;
                }
                coordinator.update_position(app_input).await
            }
            None => Err(UpdatePositionError::ShutdownInProgress),
        };
        Ok(conversions::update_position_result_to_proto(app_result))
    }

    async fn handle_scan_oplog(&self, rpc_request: ProtoScanOplogReq) -> Result<ProtoScanOplogResult, Status> {
        let before = match rpc_request.before_record_id {
            0 => None,
            id => Some(RecordId::new(id)),
        };
        let limit = (rpc_request.limit as usize).clamp(1, MAX_SCAN_PAGE);

        let page = self.sync_source.scan_oplog(before, limit).await.map_err(source_error)?;
        let exhausted = page.len() < limit;
        Ok(ProtoScanOplogResult {
            records: page
                .into_iter()
                .map(|(entry, id)| ProtoOplogRecord {
                    record_id: id.repr(),
                    entry: Some(oplog::document_to_proto(&entry.to_document())),
                })
                .collect(),
            exhausted,
        })
    }

    async fn handle_find_one(&self, rpc_request: ProtoFindOneReq) -> Result<ProtoFindOneResult, Status> {
        let id = rpc_request
            .id
            .ok_or_else(|| Status::invalid_argument("missing _id"))
            .and_then(|id| {
                oplog::value_from_proto("_id", id).map_err(|e| Status::invalid_argument(e.to_string()))
            })?;

        let document = self
            .sync_source
            .find_one(&rpc_request.ns, &id)
            .await
            .map_err(source_error)?;
        Ok(ProtoFindOneResult {
            document: document.as_ref().map(oplog::document_to_proto),
        })
    }

    async fn handle_get_collection_info(
        &self,
        rpc_request: ProtoGetCollectionInfoReq,
    ) -> Result<ProtoGetCollectionInfoResult, Status> {
        let info = self
            .sync_source
            .get_collection_info(&rpc_request.ns)
            .await
            .map_err(source_error)?;
        let result = match info {
            Some(options) => {
                proto_get_collection_info_result::Result::Options(oplog::document_to_proto(&options.to_document()))
            }
            None => proto_get_collection_info_result::Result::Err(conversions::error_to_proto(
                ErrorCode::NamespaceNotFound,
                format!("namespace '{}' not found", rpc_request.ns),
            )),
        };
        Ok(ProtoGetCollectionInfoResult { result: Some(result) })
    }

    async fn handle_copy_collection(
        &self,
        rpc_request: ProtoCopyCollectionReq,
    ) -> Result<ProtoCopyCollectionResult, Status> {
        let copy = self
            .sync_source
            .copy_collection(&rpc_request.ns)
            .await
            .map_err(source_error)?;
        Ok(ProtoCopyCollectionResult {
            options: Some(oplog::document_to_proto(&copy.options.to_document())),
            documents: copy.documents.iter().map(oplog::document_to_proto).collect(),
        })
    }
}

fn source_error(e: RollbackSourceError) -> Status {
    match e {
        RollbackSourceError::NamespaceNotFound(ns) => Status::not_found(ns),
        other => Status::internal(other.to_string()),
    }
}

#[async_trait::async_trait]
impl GrpcReplSet for RpcServer {
    async fn heartbeat(
        &self,
        rpc_request_wrapped: Request<ProtoHeartbeatReq>,
    ) -> Result<Response<ProtoHeartbeatResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_heartbeat(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn request_votes(
        &self,
        rpc_request_wrapped: Request<ProtoRequestVotesReq>,
    ) -> Result<Response<ProtoRequestVotesResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_request_votes(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn update_position(
        &self,
        rpc_request_wrapped: Request<ProtoUpdatePositionReq>,
    ) -> Result<Response<ProtoUpdatePositionResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_update_position(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}

#[async_trait::async_trait]
impl GrpcSyncSource for RpcServer {
    async fn get_rollback_id(
        &self,
        _: Request<ProtoGetRollbackIdReq>,
    ) -> Result<Response<ProtoGetRollbackIdResult>, Status> {
        let rbid = self.sync_source.get_rollback_id().await.map_err(source_error)?;
        slog::debug!(self.logger, "ServerWire - GetRollbackId -> {}", rbid);
        Ok(Response::new(ProtoGetRollbackIdResult { rbid }))
    }

    async fn get_last_operation(
        &self,
        _: Request<ProtoGetLastOperationReq>,
    ) -> Result<Response<ProtoGetLastOperationResult>, Status> {
        let entry = self.sync_source.get_last_operation().await.map_err(source_error)?;
        slog::debug!(self.logger, "ServerWire - GetLastOperation -> {:?}", entry);
        Ok(Response::new(ProtoGetLastOperationResult {
            entry: entry.map(|e| oplog::document_to_proto(&e.to_document())),
        }))
    }

    async fn scan_oplog(
        &self,
        rpc_request_wrapped: Request<ProtoScanOplogReq>,
    ) -> Result<Response<ProtoScanOplogResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_scan_oplog(rpc_request).await;
        slog::debug!(
            self.logger,
            "ServerWire - ScanOplog -> {:?}",
            rpc_result.as_ref().map(|r| r.records.len())
        );

        rpc_result.map(Response::new)
    }

    async fn find_one(&self, rpc_request_wrapped: Request<ProtoFindOneReq>) -> Result<Response<ProtoFindOneResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_find_one(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn get_collection_info(
        &self,
        rpc_request_wrapped: Request<ProtoGetCollectionInfoReq>,
    ) -> Result<Response<ProtoGetCollectionInfoResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_get_collection_info(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn copy_collection(
        &self,
        rpc_request_wrapped: Request<ProtoCopyCollectionReq>,
    ) -> Result<Response<ProtoCopyCollectionResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_copy_collection(rpc_request).await;
        slog::debug!(
            self.logger,
            "ServerWire - CopyCollection -> {:?}",
            rpc_result.as_ref().map(|r| r.documents.len())
        );

        rpc_result.map(Response::new)
    }
}
