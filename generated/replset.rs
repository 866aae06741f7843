// -- Documents --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoDocument {
    #[prost(message, repeated, tag = "1")]
    pub fields: ::prost::alloc::vec::Vec<ProtoField>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoField {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub value: ::core::option::Option<ProtoValue>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoArray {
    #[prost(message, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<ProtoValue>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoValue {
    #[prost(oneof = "proto_value::Kind", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10")]
    pub kind: ::core::option::Option<proto_value::Kind>,
}
/// Nested message and enum types in `ProtoValue`.
pub mod proto_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(bool, tag = "1")]
        NullValue(bool),
        #[prost(bool, tag = "2")]
        BoolValue(bool),
        #[prost(int32, tag = "3")]
        Int32Value(i32),
        #[prost(int64, tag = "4")]
        Int64Value(i64),
        #[prost(double, tag = "5")]
        DoubleValue(f64),
        #[prost(string, tag = "6")]
        StringValue(::prost::alloc::string::String),
        #[prost(uint64, tag = "7")]
        TimestampValue(u64),
        #[prost(message, tag = "8")]
        DocumentValue(super::ProtoDocument),
        #[prost(message, tag = "9")]
        ArrayValue(super::ProtoArray),
        #[prost(bytes, tag = "10")]
        BinaryValue(::prost::alloc::vec::Vec<u8>),
    }
}
// -- Shared --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoOpTime {
    /// (secs << 32) | inc
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(int64, tag = "2")]
    pub term: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoError {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    /// Populated when the error is a config version mismatch.
    #[prost(int64, tag = "3")]
    pub config_version: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReplSetMetadata {
    #[prost(message, optional, tag = "1")]
    pub last_op_committed: ::core::option::Option<ProtoOpTime>,
    #[prost(message, optional, tag = "2")]
    pub last_op_visible: ::core::option::Option<ProtoOpTime>,
    #[prost(int64, tag = "3")]
    pub config_version: i64,
    #[prost(int32, tag = "4")]
    pub primary_index: i32,
    #[prost(int64, tag = "5")]
    pub term: i64,
    #[prost(int32, tag = "6")]
    pub sync_source_index: i32,
}
// -- Heartbeat --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHeartbeatReq {
    #[prost(string, tag = "1")]
    pub set_name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub config_version: i64,
    #[prost(int64, tag = "3")]
    pub term: i64,
    #[prost(string, tag = "4")]
    pub sender_host: ::prost::alloc::string::String,
    #[prost(int32, tag = "5")]
    pub sender_id: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHeartbeatSuccess {
    #[prost(string, tag = "1")]
    pub set_name: ::prost::alloc::string::String,
    #[prost(enumeration = "ProtoMemberState", tag = "2")]
    pub state: i32,
    #[prost(int64, tag = "3")]
    pub term: i64,
    #[prost(int64, tag = "4")]
    pub config_version: i64,
    #[prost(message, optional, tag = "5")]
    pub durable_op_time: ::core::option::Option<ProtoOpTime>,
    #[prost(message, optional, tag = "6")]
    pub applied_op_time: ::core::option::Option<ProtoOpTime>,
    #[prost(bool, tag = "7")]
    pub electable: bool,
    /// Present only when the responder's config is newer than the requester's.
    #[prost(message, optional, tag = "8")]
    pub config: ::core::option::Option<ProtoDocument>,
    #[prost(message, optional, tag = "9")]
    pub metadata: ::core::option::Option<ProtoReplSetMetadata>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHeartbeatResult {
    #[prost(oneof = "proto_heartbeat_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_heartbeat_result::Result>,
}
/// Nested message and enum types in `ProtoHeartbeatResult`.
pub mod proto_heartbeat_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoHeartbeatSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- RequestVotes --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVotesReq {
    #[prost(string, tag = "1")]
    pub set_name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub term: i64,
    #[prost(int32, tag = "3")]
    pub candidate_index: i32,
    #[prost(int64, tag = "4")]
    pub config_version: i64,
    #[prost(bool, tag = "5")]
    pub dry_run: bool,
    #[prost(message, optional, tag = "6")]
    pub last_committed_op: ::core::option::Option<ProtoOpTime>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVotesSuccess {
    #[prost(int64, tag = "1")]
    pub term: i64,
    #[prost(bool, tag = "2")]
    pub vote_granted: bool,
    #[prost(string, tag = "3")]
    pub reason: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVotesResult {
    #[prost(oneof = "proto_request_votes_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_request_votes_result::Result>,
}
/// Nested message and enum types in `ProtoRequestVotesResult`.
pub mod proto_request_votes_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoRequestVotesSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- UpdatePosition --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPositionEntry {
    #[prost(int32, tag = "1")]
    pub member_id: i32,
    #[prost(int64, tag = "2")]
    pub config_version: i64,
    #[prost(message, optional, tag = "3")]
    pub applied_op_time: ::core::option::Option<ProtoOpTime>,
    #[prost(message, optional, tag = "4")]
    pub durable_op_time: ::core::option::Option<ProtoOpTime>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLegacyPositionEntry {
    #[prost(int32, tag = "1")]
    pub member_id: i32,
    #[prost(int64, tag = "2")]
    pub config_version: i64,
    #[prost(uint64, tag = "3")]
    pub optime: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoUpdatePositionReq {
    #[prost(message, repeated, tag = "1")]
    pub optimes: ::prost::alloc::vec::Vec<ProtoPositionEntry>,
    #[prost(message, repeated, tag = "2")]
    pub legacy_optimes: ::prost::alloc::vec::Vec<ProtoLegacyPositionEntry>,
    #[prost(message, optional, tag = "3")]
    pub metadata: ::core::option::Option<ProtoReplSetMetadata>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoUpdatePositionSuccess {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoUpdatePositionResult {
    #[prost(oneof = "proto_update_position_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_update_position_result::Result>,
}
/// Nested message and enum types in `ProtoUpdatePositionResult`.
pub mod proto_update_position_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoUpdatePositionSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- Sync source --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetRollbackIdReq {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetRollbackIdResult {
    #[prost(int32, tag = "1")]
    pub rbid: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetLastOperationReq {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetLastOperationResult {
    /// Absent when the oplog is empty.
    #[prost(message, optional, tag = "1")]
    pub entry: ::core::option::Option<ProtoDocument>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoScanOplogReq {
    /// 0 starts from the newest entry.
    #[prost(int64, tag = "1")]
    pub before_record_id: i64,
    #[prost(uint32, tag = "2")]
    pub limit: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoOplogRecord {
    #[prost(int64, tag = "1")]
    pub record_id: i64,
    #[prost(message, optional, tag = "2")]
    pub entry: ::core::option::Option<ProtoDocument>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoScanOplogResult {
    #[prost(message, repeated, tag = "1")]
    pub records: ::prost::alloc::vec::Vec<ProtoOplogRecord>,
    #[prost(bool, tag = "2")]
    pub exhausted: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoFindOneReq {
    #[prost(string, tag = "1")]
    pub ns: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub id: ::core::option::Option<ProtoValue>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoFindOneResult {
    /// Absent when no document matches.
    #[prost(message, optional, tag = "1")]
    pub document: ::core::option::Option<ProtoDocument>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetCollectionInfoReq {
    #[prost(string, tag = "1")]
    pub ns: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetCollectionInfoResult {
    #[prost(oneof = "proto_get_collection_info_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_get_collection_info_result::Result>,
}
/// Nested message and enum types in `ProtoGetCollectionInfoResult`.
pub mod proto_get_collection_info_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Options(super::ProtoDocument),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCopyCollectionReq {
    #[prost(string, tag = "1")]
    pub ns: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCopyCollectionResult {
    #[prost(message, optional, tag = "1")]
    pub options: ::core::option::Option<ProtoDocument>,
    #[prost(message, repeated, tag = "2")]
    pub documents: ::prost::alloc::vec::Vec<ProtoDocument>,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoMemberState {
    Startup = 0,
    Primary = 1,
    Secondary = 2,
    Recovering = 3,
    Startup2 = 5,
    Unknown = 6,
    Arbiter = 7,
    Down = 8,
    Rollback = 9,
    Removed = 10,
}
#[doc = r" Generated client implementations."]
pub mod grpc_repl_set_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Replica set peer protocol: liveness, elections and progress reporting."]
    pub struct GrpcReplSetClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcReplSetClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcReplSetClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn heartbeat(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoHeartbeatReq>,
        ) -> Result<tonic::Response<super::ProtoHeartbeatResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replset.GrpcReplSet/Heartbeat");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn request_votes(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoRequestVotesReq>,
        ) -> Result<tonic::Response<super::ProtoRequestVotesResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replset.GrpcReplSet/RequestVotes");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn update_position(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoUpdatePositionReq>,
        ) -> Result<tonic::Response<super::ProtoUpdatePositionResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replset.GrpcReplSet/UpdatePosition");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcReplSetClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcReplSetClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcReplSetClient {{ ... }}")
        }
    }
}
#[doc = r" Generated client implementations."]
pub mod grpc_sync_source_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Calls a rolling-back node makes against its sync source."]
    pub struct GrpcSyncSourceClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcSyncSourceClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcSyncSourceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn get_rollback_id(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGetRollbackIdReq>,
        ) -> Result<tonic::Response<super::ProtoGetRollbackIdResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replset.GrpcSyncSource/GetRollbackId");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn get_last_operation(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGetLastOperationReq>,
        ) -> Result<tonic::Response<super::ProtoGetLastOperationResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replset.GrpcSyncSource/GetLastOperation");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn scan_oplog(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoScanOplogReq>,
        ) -> Result<tonic::Response<super::ProtoScanOplogResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replset.GrpcSyncSource/ScanOplog");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn find_one(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoFindOneReq>,
        ) -> Result<tonic::Response<super::ProtoFindOneResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replset.GrpcSyncSource/FindOne");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn get_collection_info(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGetCollectionInfoReq>,
        ) -> Result<tonic::Response<super::ProtoGetCollectionInfoResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replset.GrpcSyncSource/GetCollectionInfo");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn copy_collection(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoCopyCollectionReq>,
        ) -> Result<tonic::Response<super::ProtoCopyCollectionResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replset.GrpcSyncSource/CopyCollection");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcSyncSourceClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcSyncSourceClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcSyncSourceClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_repl_set_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcReplSetServer."]
    #[async_trait]
    pub trait GrpcReplSet: Send + Sync + 'static {
        async fn heartbeat(
            &self,
            request: tonic::Request<super::ProtoHeartbeatReq>,
        ) -> Result<tonic::Response<super::ProtoHeartbeatResult>, tonic::Status>;
        async fn request_votes(
            &self,
            request: tonic::Request<super::ProtoRequestVotesReq>,
        ) -> Result<tonic::Response<super::ProtoRequestVotesResult>, tonic::Status>;
        async fn update_position(
            &self,
            request: tonic::Request<super::ProtoUpdatePositionReq>,
        ) -> Result<tonic::Response<super::ProtoUpdatePositionResult>, tonic::Status>;
    }
    #[doc = " Replica set peer protocol: liveness, elections and progress reporting."]
    #[derive(Debug)]
    pub struct GrpcReplSetServer<T: GrpcReplSet> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcReplSet> GrpcReplSetServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcReplSetServer<T>
    where
        T: GrpcReplSet,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/replset.GrpcReplSet/Heartbeat" => {
                    #[allow(non_camel_case_types)]
                    struct HeartbeatSvc<T: GrpcReplSet>(pub Arc<T>);
                    impl<T: GrpcReplSet> tonic::server::UnaryService<super::ProtoHeartbeatReq> for HeartbeatSvc<T> {
                        type Response = super::ProtoHeartbeatResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoHeartbeatReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).heartbeat(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = HeartbeatSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcReplSet/RequestVotes" => {
                    #[allow(non_camel_case_types)]
                    struct RequestVotesSvc<T: GrpcReplSet>(pub Arc<T>);
                    impl<T: GrpcReplSet> tonic::server::UnaryService<super::ProtoRequestVotesReq>
                        for RequestVotesSvc<T>
                    {
                        type Response = super::ProtoRequestVotesResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoRequestVotesReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).request_votes(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = RequestVotesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcReplSet/UpdatePosition" => {
                    #[allow(non_camel_case_types)]
                    struct UpdatePositionSvc<T: GrpcReplSet>(pub Arc<T>);
                    impl<T: GrpcReplSet> tonic::server::UnaryService<super::ProtoUpdatePositionReq>
                        for UpdatePositionSvc<T>
                    {
                        type Response = super::ProtoUpdatePositionResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoUpdatePositionReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).update_position(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = UpdatePositionSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcReplSet> Clone for GrpcReplSetServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcReplSet> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcReplSet> tonic::transport::NamedService for GrpcReplSetServer<T> {
        const NAME: &'static str = "replset.GrpcReplSet";
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_sync_source_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcSyncSourceServer."]
    #[async_trait]
    pub trait GrpcSyncSource: Send + Sync + 'static {
        async fn get_rollback_id(
            &self,
            request: tonic::Request<super::ProtoGetRollbackIdReq>,
        ) -> Result<tonic::Response<super::ProtoGetRollbackIdResult>, tonic::Status>;
        async fn get_last_operation(
            &self,
            request: tonic::Request<super::ProtoGetLastOperationReq>,
        ) -> Result<tonic::Response<super::ProtoGetLastOperationResult>, tonic::Status>;
        async fn scan_oplog(
            &self,
            request: tonic::Request<super::ProtoScanOplogReq>,
        ) -> Result<tonic::Response<super::ProtoScanOplogResult>, tonic::Status>;
        async fn find_one(
            &self,
            request: tonic::Request<super::ProtoFindOneReq>,
        ) -> Result<tonic::Response<super::ProtoFindOneResult>, tonic::Status>;
        async fn get_collection_info(
            &self,
            request: tonic::Request<super::ProtoGetCollectionInfoReq>,
        ) -> Result<tonic::Response<super::ProtoGetCollectionInfoResult>, tonic::Status>;
        async fn copy_collection(
            &self,
            request: tonic::Request<super::ProtoCopyCollectionReq>,
        ) -> Result<tonic::Response<super::ProtoCopyCollectionResult>, tonic::Status>;
    }
    #[doc = " Calls a rolling-back node makes against its sync source."]
    #[derive(Debug)]
    pub struct GrpcSyncSourceServer<T: GrpcSyncSource> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcSyncSource> GrpcSyncSourceServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcSyncSourceServer<T>
    where
        T: GrpcSyncSource,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/replset.GrpcSyncSource/GetRollbackId" => {
                    #[allow(non_camel_case_types)]
                    struct GetRollbackIdSvc<T: GrpcSyncSource>(pub Arc<T>);
                    impl<T: GrpcSyncSource>
                        tonic::server::UnaryService<super::ProtoGetRollbackIdReq>
                        for GetRollbackIdSvc<T>
                    {
                        type Response = super::ProtoGetRollbackIdResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGetRollbackIdReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).get_rollback_id(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GetRollbackIdSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcSyncSource/GetLastOperation" => {
                    #[allow(non_camel_case_types)]
                    struct GetLastOperationSvc<T: GrpcSyncSource>(pub Arc<T>);
                    impl<T: GrpcSyncSource>
                        tonic::server::UnaryService<super::ProtoGetLastOperationReq>
                        for GetLastOperationSvc<T>
                    {
                        type Response = super::ProtoGetLastOperationResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGetLastOperationReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).get_last_operation(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GetLastOperationSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcSyncSource/ScanOplog" => {
                    #[allow(non_camel_case_types)]
                    struct ScanOplogSvc<T: GrpcSyncSource>(pub Arc<T>);
                    impl<T: GrpcSyncSource> tonic::server::UnaryService<super::ProtoScanOplogReq> for ScanOplogSvc<T> {
                        type Response = super::ProtoScanOplogResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoScanOplogReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).scan_oplog(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = ScanOplogSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcSyncSource/FindOne" => {
                    #[allow(non_camel_case_types)]
                    struct FindOneSvc<T: GrpcSyncSource>(pub Arc<T>);
                    impl<T: GrpcSyncSource> tonic::server::UnaryService<super::ProtoFindOneReq> for FindOneSvc<T> {
                        type Response = super::ProtoFindOneResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoFindOneReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).find_one(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = FindOneSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcSyncSource/GetCollectionInfo" => {
                    #[allow(non_camel_case_types)]
                    struct GetCollectionInfoSvc<T: GrpcSyncSource>(pub Arc<T>);
                    impl<T: GrpcSyncSource>
                        tonic::server::UnaryService<super::ProtoGetCollectionInfoReq>
                        for GetCollectionInfoSvc<T>
                    {
                        type Response = super::ProtoGetCollectionInfoResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGetCollectionInfoReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).get_collection_info(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GetCollectionInfoSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replset.GrpcSyncSource/CopyCollection" => {
                    #[allow(non_camel_case_types)]
                    struct CopyCollectionSvc<T: GrpcSyncSource>(pub Arc<T>);
                    impl<T: GrpcSyncSource>
                        tonic::server::UnaryService<super::ProtoCopyCollectionReq>
                        for CopyCollectionSvc<T>
                    {
                        type Response = super::ProtoCopyCollectionResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoCopyCollectionReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).copy_collection(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = CopyCollectionSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcSyncSource> Clone for GrpcSyncSourceServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcSyncSource> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcSyncSource> tonic::transport::NamedService for GrpcSyncSourceServer<T> {
        const NAME: &'static str = "replset.GrpcSyncSource";
    }
}
