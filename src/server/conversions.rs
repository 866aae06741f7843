//! Translation between the wire messages and the coordinator's input/output types. Requests
//! that can't be understood are rejected with `Status::invalid_argument`; operation failures
//! travel as a `ProtoError` inside an otherwise successful response.

use crate::grpc::{
    proto_heartbeat_result, proto_request_votes_result, proto_update_position_result, ProtoError,
    ProtoHeartbeatReq, ProtoHeartbeatResult, ProtoHeartbeatSuccess, ProtoLegacyPositionEntry, ProtoOpTime,
    ProtoPositionEntry, ProtoReplSetMetadata, ProtoRequestVotesReq, ProtoRequestVotesResult,
    ProtoRequestVotesSuccess, ProtoUpdatePositionReq, ProtoUpdatePositionResult, ProtoUpdatePositionSuccess,
};
use crate::oplog;
use crate::replica::{
    HeartbeatError, HeartbeatInput, HeartbeatOutput, LegacyUpdatePositionEntry, MemberState, NetworkError,
    ReplSetMetadata, RequestVotesError, RequestVotesInput, RequestVotesOutput, UpdatePositionEntry,
    UpdatePositionError, UpdatePositionInput,
};
use crate::types::{ErrorCode, HostAndPort, OpTime, Term, Timestamp};
use tonic::Status;

// -- shared --

pub(crate) fn op_time_to_proto(op_time: OpTime) -> ProtoOpTime {
    ProtoOpTime {
        timestamp: op_time.timestamp().as_u64(),
        term: op_time.term().as_i64(),
    }
}

/// An absent optime reads as the null optime.
pub(crate) fn op_time_from_proto(proto: Option<ProtoOpTime>) -> OpTime {
    match proto {
        Some(proto) => OpTime::new(Timestamp::from_u64(proto.timestamp), Term::new(proto.term)),
        None => OpTime::null(),
    }
}

pub(crate) fn metadata_to_proto(metadata: &ReplSetMetadata) -> ProtoReplSetMetadata {
    ProtoReplSetMetadata {
        last_op_committed: Some(op_time_to_proto(metadata.last_op_committed)),
        last_op_visible: Some(op_time_to_proto(metadata.last_op_visible)),
        config_version: metadata.config_version,
        primary_index: metadata.primary_index as i32,
        term: metadata.term.as_i64(),
        sync_source_index: metadata.sync_source_index as i32,
    }
}

pub(crate) fn metadata_from_proto(proto: ProtoReplSetMetadata) -> ReplSetMetadata {
    ReplSetMetadata {
        last_op_committed: op_time_from_proto(proto.last_op_committed),
        last_op_visible: op_time_from_proto(proto.last_op_visible),
        config_version: proto.config_version,
        primary_index: proto.primary_index as i64,
        term: Term::new(proto.term),
        sync_source_index: proto.sync_source_index as i64,
    }
}

pub(crate) fn error_to_proto(code: ErrorCode, message: String) -> ProtoError {
    ProtoError {
        code: code.code(),
        message,
        config_version: 0,
    }
}

pub(crate) fn error_from_proto(proto: ProtoError) -> NetworkError {
    NetworkError::Remote {
        code: ErrorCode::from_code(proto.code),
        message: proto.message,
    }
}

pub(crate) fn status_to_network_error(status: Status) -> NetworkError {
    match status.code() {
        tonic::Code::Unavailable => NetworkError::Unreachable(status.message().to_string()),
        tonic::Code::DeadlineExceeded => NetworkError::Timeout,
        tonic::Code::InvalidArgument => NetworkError::Remote {
            code: ErrorCode::BadValue,
            message: status.message().to_string(),
        },
        _ => NetworkError::Remote {
            code: ErrorCode::InternalError,
            message: status.message().to_string(),
        },
    }
}

fn malformed_response(what: &str) -> NetworkError {
    NetworkError::Remote {
        code: ErrorCode::FailedToParse,
        message: format!("malformed {} response", what),
    }
}

// -- heartbeat --

pub(crate) fn heartbeat_input_to_proto(input: &HeartbeatInput) -> ProtoHeartbeatReq {
    ProtoHeartbeatReq {
        set_name: input.set_name.clone(),
        config_version: input.config_version,
        term: input.term.as_i64(),
        sender_host: input.sender_host.to_string(),
        sender_id: input.sender_id as i32,
    }
}

pub(crate) fn heartbeat_input_from_proto(proto: ProtoHeartbeatReq) -> Result<HeartbeatInput, Status> {
    let sender_host: HostAndPort = proto
        .sender_host
        .parse()
        .map_err(|e| Status::invalid_argument(format!("bad sender host: {}", e)))?;

    Ok(HeartbeatInput {
        set_name: proto.set_name,
        config_version: proto.config_version,
        term: Term::new(proto.term),
        sender_host,
        sender_id: proto.sender_id as i64,
    })
}

pub(crate) fn heartbeat_result_to_proto(result: Result<HeartbeatOutput, HeartbeatError>) -> ProtoHeartbeatResult {
    let result = match result {
        Ok(output) => proto_heartbeat_result::Result::Ok(ProtoHeartbeatSuccess {
            set_name: output.set_name,
            state: output.state.as_i32(),
            term: output.term.as_i64(),
            config_version: output.config_version,
            durable_op_time: Some(op_time_to_proto(output.durable_op_time)),
            applied_op_time: Some(op_time_to_proto(output.applied_op_time)),
            electable: output.electable,
            config: output.config.as_ref().map(oplog::document_to_proto),
            metadata: Some(metadata_to_proto(&output.metadata)),
        }),
        Err(e) => proto_heartbeat_result::Result::Err(error_to_proto(e.code(), e.to_string())),
    };

    ProtoHeartbeatResult { result: Some(result) }
}

pub(crate) fn heartbeat_result_from_proto(proto: ProtoHeartbeatResult) -> Result<HeartbeatOutput, NetworkError> {
    match proto.result {
        Some(proto_heartbeat_result::Result::Ok(ok)) => {
            let config = match ok.config {
                Some(config) => Some(oplog::document_from_proto(config).map_err(|_| malformed_response("heartbeat"))?),
                None => None,
            };
            let metadata = ok.metadata.ok_or_else(|| malformed_response("heartbeat"))?;

            Ok(HeartbeatOutput {
                set_name: ok.set_name,
                state: MemberState::from_i32(ok.state),
                term: Term::new(ok.term),
                config_version: ok.config_version,
                applied_op_time: op_time_from_proto(ok.applied_op_time),
                durable_op_time: op_time_from_proto(ok.durable_op_time),
                electable: ok.electable,
                config,
                metadata: metadata_from_proto(metadata),
            })
        }
        Some(proto_heartbeat_result::Result::Err(err)) => Err(error_from_proto(err)),
        None => Err(malformed_response("heartbeat")),
    }
}

// -- elections --

pub(crate) fn request_votes_input_to_proto(input: &RequestVotesInput) -> ProtoRequestVotesReq {
    ProtoRequestVotesReq {
        set_name: input.set_name.clone(),
        term: input.term.as_i64(),
        candidate_index: input.candidate_index as i32,
        config_version: input.config_version,
        dry_run: input.dry_run,
        last_committed_op: Some(op_time_to_proto(input.last_committed_op)),
    }
}

pub(crate) fn request_votes_input_from_proto(proto: ProtoRequestVotesReq) -> RequestVotesInput {
    RequestVotesInput {
        set_name: proto.set_name,
        term: Term::new(proto.term),
        candidate_index: proto.candidate_index as i64,
        config_version: proto.config_version,
        dry_run: proto.dry_run,
        last_committed_op: op_time_from_proto(proto.last_committed_op),
    }
}

pub(crate) fn request_votes_result_to_proto(
    result: Result<RequestVotesOutput, RequestVotesError>,
) -> ProtoRequestVotesResult {
    let result = match result {
        Ok(output) => proto_request_votes_result::Result::Ok(ProtoRequestVotesSuccess {
            term: output.term.as_i64(),
            vote_granted: output.vote_granted,
            reason: output.reason,
        }),
        Err(e) => proto_request_votes_result::Result::Err(error_to_proto(e.code(), e.to_string())),
    };

    ProtoRequestVotesResult { result: Some(result) }
}

pub(crate) fn request_votes_result_from_proto(
    proto: ProtoRequestVotesResult,
) -> Result<RequestVotesOutput, NetworkError> {
    match proto.result {
        Some(proto_request_votes_result::Result::Ok(ok)) => Ok(RequestVotesOutput {
            term: Term::new(ok.term),
            vote_granted: ok.vote_granted,
            reason: ok.reason,
        }),
        Some(proto_request_votes_result::Result::Err(err)) => Err(error_from_proto(err)),
        None => Err(malformed_response("requestVotes")),
    }
}

// -- progress --

pub(crate) fn update_position_input_to_proto(
    input: &UpdatePositionInput,
    metadata: Option<&ReplSetMetadata>,
) -> ProtoUpdatePositionReq {
    let mut proto = ProtoUpdatePositionReq {
        optimes: Vec::new(),
        legacy_optimes: Vec::new(),
        metadata: metadata.map(metadata_to_proto),
    };
    match input {
        UpdatePositionInput::Modern(entries) => {
            proto.optimes = entries
                .iter()
                .map(|e| ProtoPositionEntry {
                    member_id: e.member_id as i32,
                    config_version: e.config_version,
                    applied_op_time: Some(op_time_to_proto(e.applied_op_time)),
                    durable_op_time: Some(op_time_to_proto(e.durable_op_time)),
                })
                .collect();
        }
        UpdatePositionInput::Legacy(entries) => {
            proto.legacy_optimes = entries
                .iter()
                .map(|e| ProtoLegacyPositionEntry {
                    member_id: e.member_id as i32,
                    config_version: e.config_version,
                    optime: e.op_time.as_u64(),
                })
                .collect();
        }
    }
    proto
}

/// The two entry forms are mutually exclusive within one request.
pub(crate) fn update_position_input_from_proto(
    proto: ProtoUpdatePositionReq,
) -> Result<(UpdatePositionInput, Option<ReplSetMetadata>), Status> {
    let metadata = proto.metadata.map(metadata_from_proto);
    let input = match (proto.optimes.is_empty(), proto.legacy_optimes.is_empty()) {
        (false, false) => {
            return Err(Status::invalid_argument(
                "entries mix the optime and appliedOpTime forms",
            ))
        }
        (true, false) => UpdatePositionInput::Legacy(
            proto
                .legacy_optimes
                .into_iter()
                .map(|e| LegacyUpdatePositionEntry {
                    member_id: e.member_id as i64,
                    config_version: e.config_version,
                    op_time: Timestamp::from_u64(e.optime),
                })
                .collect(),
        ),
        _ => UpdatePositionInput::Modern(
            proto
                .optimes
                .into_iter()
                .map(|e| UpdatePositionEntry {
                    member_id: e.member_id as i64,
                    config_version: e.config_version,
                    applied_op_time: op_time_from_proto(e.applied_op_time),
                    durable_op_time: op_time_from_proto(e.durable_op_time),
                })
                .collect(),
        ),
    };
    Ok((input, metadata))
}

pub(crate) fn update_position_result_to_proto(result: Result<(), UpdatePositionError>) -> ProtoUpdatePositionResult {
    let result = match result {
        Ok(()) => proto_update_position_result::Result::Ok(ProtoUpdatePositionSuccess {}),
        Err(e) => {
            let mut err = error_to_proto(e.code(), e.to_string());
            if let UpdatePositionError::InvalidReplicaSetConfig { ours, .. } = e {
                err.config_version = ours;
            }
            proto_update_position_result::Result::Err(err)
        }
    };

    ProtoUpdatePositionResult { result: Some(result) }
}

pub(crate) fn update_position_result_from_proto(proto: ProtoUpdatePositionResult) -> Result<(), NetworkError> {
    match proto.result {
        Some(proto_update_position_result::Result::Ok(_)) => Ok(()),
        Some(proto_update_position_result::Result::Err(err)) => Err(error_from_proto(err)),
        None => Err(malformed_response("updatePosition")),
    }
}
