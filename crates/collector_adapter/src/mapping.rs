#![forbid(unsafe_code)]

use collector_kernel_contracts::session::{
    AuthTag, Header, LeaseId, RpcMethod, SessionId, SessionRecord, TtlSeconds,
};
use collector_kernel_contracts::sessionstatus::{
    SessionStatusAck, SessionStatusDeleteRequest, SessionStatusReadRequest,
    SessionStatusReadResponse, SessionStatusUpdateRequest,
};
use collector_kernel_contracts::ContractViolation;
use collector_os::client::StatusClientError;
use collector_os::sessionstatus::SessionStatusError;
use collector_storage::lease_store::LeaseStoreError;
use collector_storage::session_repo::SessionRepoError;
use thiserror::Error;
use tonic::{Code, Status};

use crate::grpc_api as pb;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("header is missing")]
    MissingHeader,
    #[error("unknown caller {0:?}")]
    UnknownCaller(String),
    #[error("unknown auth method {0:?}")]
    UnknownAuth(String),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl From<MappingError> for Status {
    fn from(err: MappingError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

pub fn header_from_proto(header: Option<pb::Header>) -> Result<Header, MappingError> {
    let header = header.ok_or(MappingError::MissingHeader)?;
    Ok(Header::v1(
        SessionId::new(header.session_id)?,
        header.os,
        header.auth_method,
        header.auth_token,
        header.data_token,
    )?)
}

pub fn header_to_proto(header: &Header) -> pb::Header {
    pb::Header {
        session_id: header.session_id.as_str().to_string(),
        os: header.os.clone(),
        auth_method: header.auth_method.clone(),
        auth_token: header.auth_token.clone(),
        data_token: header.data_token.clone(),
    }
}

fn caller_from_wire(value: &str) -> Result<Option<RpcMethod>, MappingError> {
    if value.is_empty() {
        return Ok(None);
    }
    RpcMethod::parse_wire(value)
        .map(Some)
        .ok_or_else(|| MappingError::UnknownCaller(value.to_string()))
}

fn auth_from_wire(value: &str) -> Result<AuthTag, MappingError> {
    AuthTag::parse_wire(value).ok_or_else(|| MappingError::UnknownAuth(value.to_string()))
}

pub fn read_request_from_proto(
    req: pb::SessionStatusReadRequest,
) -> Result<SessionStatusReadRequest, MappingError> {
    Ok(SessionStatusReadRequest::v1(header_from_proto(req.header)?)?)
}

pub fn read_request_to_proto(req: &SessionStatusReadRequest) -> pb::SessionStatusReadRequest {
    pb::SessionStatusReadRequest {
        header: Some(header_to_proto(&req.header)),
    }
}

pub fn read_response_to_proto(resp: &SessionStatusReadResponse) -> pb::SessionStatusReadResponse {
    pb::SessionStatusReadResponse {
        header: Some(header_to_proto(&resp.header)),
        caller: resp.record.caller_wire().to_string(),
        auth: resp.record.auth.as_str().to_string(),
        lease: resp.record.lease.to_wire(),
    }
}

pub fn read_response_from_proto(
    resp: pb::SessionStatusReadResponse,
) -> Result<SessionStatusReadResponse, MappingError> {
    let header = header_from_proto(resp.header)?;
    let record = SessionRecord::v1(
        caller_from_wire(&resp.caller)?,
        auth_from_wire(&resp.auth)?,
        LeaseId::parse_wire(&resp.lease)?,
    );
    Ok(SessionStatusReadResponse::v1(header, record)?)
}

/// An update must name a known method; an empty caller is never written.
pub fn update_request_from_proto(
    req: pb::SessionStatusUpdateRequest,
) -> Result<SessionStatusUpdateRequest, MappingError> {
    let header = header_from_proto(req.header)?;
    let caller = caller_from_wire(&req.caller)?
        .ok_or_else(|| MappingError::UnknownCaller(String::new()))?;
    Ok(SessionStatusUpdateRequest::v1(
        header,
        caller,
        auth_from_wire(&req.auth)?,
        LeaseId::parse_wire(&req.lease)?,
        TtlSeconds::parse_wire(&req.ttl)?,
    )?)
}

pub fn update_request_to_proto(req: &SessionStatusUpdateRequest) -> pb::SessionStatusUpdateRequest {
    pb::SessionStatusUpdateRequest {
        header: Some(header_to_proto(&req.header)),
        caller: req.caller.as_str().to_string(),
        auth: req.auth.as_str().to_string(),
        lease: req.lease.to_wire(),
        ttl: req.ttl.to_wire(),
    }
}

pub fn delete_request_from_proto(
    req: pb::SessionStatusDeleteRequest,
) -> Result<SessionStatusDeleteRequest, MappingError> {
    Ok(SessionStatusDeleteRequest::v1(header_from_proto(req.header)?)?)
}

pub fn delete_request_to_proto(req: &SessionStatusDeleteRequest) -> pb::SessionStatusDeleteRequest {
    pb::SessionStatusDeleteRequest {
        header: Some(header_to_proto(&req.header)),
    }
}

pub fn update_ack_to_proto(ack: SessionStatusAck) -> pb::SessionStatusUpdateResponse {
    pb::SessionStatusUpdateResponse { ok: ack.ok }
}

pub fn delete_ack_to_proto(ack: SessionStatusAck) -> pb::SessionStatusDeleteResponse {
    pb::SessionStatusDeleteResponse { ok: ack.ok }
}

pub fn status_from_service_error(err: &SessionStatusError) -> Status {
    let message = err.to_string();
    match err {
        SessionStatusError::OutsideServiceWindow { .. } => Status::unavailable(message),
        SessionStatusError::InvalidRequest(_) => Status::invalid_argument(message),
        SessionStatusError::Repo(SessionRepoError::CorruptRecord { .. }) => {
            Status::data_loss(message)
        }
        SessionStatusError::Repo(SessionRepoError::Store {
            source: LeaseStoreError::Timeout { .. },
            ..
        }) => Status::deadline_exceeded(message),
        SessionStatusError::Repo(SessionRepoError::Store { .. }) => Status::unavailable(message),
    }
}

pub fn client_error_from_status(status: &Status) -> StatusClientError {
    let message = status.message().to_string();
    match status.code() {
        Code::InvalidArgument => StatusClientError::InvalidRequest(message),
        Code::DeadlineExceeded => StatusClientError::Timeout(message),
        // tonic reports its own request deadline as Cancelled("Timeout expired").
        Code::Cancelled if message.to_ascii_lowercase().contains("timeout") => {
            StatusClientError::Timeout(message)
        }
        Code::Unavailable | Code::Cancelled => StatusClientError::Unavailable(message),
        Code::DataLoss => StatusClientError::CorruptRecord(message),
        _ => StatusClientError::Internal(format!("{:?}: {message}", status.code())),
    }
}
