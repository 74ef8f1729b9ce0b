#![forbid(unsafe_code)]

use crate::session::{AuthTag, Header, LeaseId, RpcMethod, SessionId, SessionRecord, TtlSeconds};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const SESSIONSTATUS_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatusEndpoint {
    Read,
    Update,
    Delete,
}

impl SessionStatusEndpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatusEndpoint::Read => "RPC.SessionStatusRead",
            SessionStatusEndpoint::Update => "RPC.SessionStatusUpdate",
            SessionStatusEndpoint::Delete => "RPC.SessionStatusDelete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusReadRequest {
    pub schema_version: SchemaVersion,
    pub header: Header,
}

impl SessionStatusReadRequest {
    pub fn v1(header: Header) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: SESSIONSTATUS_CONTRACT_VERSION,
            header,
        };
        req.validate()?;
        Ok(req)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.header.session_id
    }
}

impl Validate for SessionStatusReadRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_schema(self.schema_version)?;
        self.header.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusReadResponse {
    pub schema_version: SchemaVersion,
    pub header: Header,
    pub record: SessionRecord,
}

impl SessionStatusReadResponse {
    pub fn v1(header: Header, record: SessionRecord) -> Result<Self, ContractViolation> {
        let resp = Self {
            schema_version: SESSIONSTATUS_CONTRACT_VERSION,
            header,
            record,
        };
        resp.validate()?;
        Ok(resp)
    }
}

impl Validate for SessionStatusReadResponse {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_schema(self.schema_version)?;
        self.header.validate()
    }
}

/// Whole-record replacement. `lease == LeaseId::NONE` asks the store for a
/// fresh lease of `ttl` seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusUpdateRequest {
    pub schema_version: SchemaVersion,
    pub header: Header,
    pub caller: RpcMethod,
    pub auth: AuthTag,
    pub lease: LeaseId,
    pub ttl: TtlSeconds,
}

impl SessionStatusUpdateRequest {
    pub fn v1(
        header: Header,
        caller: RpcMethod,
        auth: AuthTag,
        lease: LeaseId,
        ttl: TtlSeconds,
    ) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: SESSIONSTATUS_CONTRACT_VERSION,
            header,
            caller,
            auth,
            lease,
            ttl,
        };
        req.validate()?;
        Ok(req)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.header.session_id
    }
}

impl Validate for SessionStatusUpdateRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_schema(self.schema_version)?;
        self.header.validate()?;
        self.ttl.validate()?;
        if self.lease.0 < 0 {
            return Err(ContractViolation::InvalidValue {
                field: "session_status_update_request.lease",
                reason: "must be >= 0",
            });
        }
        if !self.auth.is_resolved() {
            return Err(ContractViolation::InvalidValue {
                field: "session_status_update_request.auth",
                reason: "must be a resolved auth method",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusDeleteRequest {
    pub schema_version: SchemaVersion,
    pub header: Header,
}

impl SessionStatusDeleteRequest {
    pub fn v1(header: Header) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: SESSIONSTATUS_CONTRACT_VERSION,
            header,
        };
        req.validate()?;
        Ok(req)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.header.session_id
    }
}

impl Validate for SessionStatusDeleteRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_schema(self.schema_version)?;
        self.header.validate()
    }
}

/// Acknowledgement of Update and Delete. Failures travel as errors, so a
/// constructed response always carries `ok = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatusAck {
    pub schema_version: SchemaVersion,
    pub ok: bool,
}

impl SessionStatusAck {
    pub fn ok_v1() -> Self {
        Self {
            schema_version: SESSIONSTATUS_CONTRACT_VERSION,
            ok: true,
        }
    }

    pub fn from_wire(ok: bool) -> Self {
        Self {
            schema_version: SESSIONSTATUS_CONTRACT_VERSION,
            ok,
        }
    }
}

fn validate_schema(version: SchemaVersion) -> Result<(), ContractViolation> {
    if version != SESSIONSTATUS_CONTRACT_VERSION {
        return Err(ContractViolation::InvalidValue {
            field: "schema_version",
            reason: "must match SESSIONSTATUS_CONTRACT_VERSION",
        });
    }
    Ok(())
}
