#![forbid(unsafe_code)]

use std::fmt;

use crate::common::{validate_printable_ascii, validate_token_ascii};
use crate::{ContractViolation, Validate};

pub const SESSION_ID_MAX_LEN: usize = 128;
pub const TTL_SECONDS_MAX: u32 = 86_400;

/// Client-supplied session correlation token. Untrusted until a matching
/// server-side record says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(value.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SessionId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token_ascii("session_id", &self.0, SESSION_ID_MAX_LEN)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication method a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AuthTag {
    #[default]
    None,
    IdCard,
    MobileId,
    SmartId,
    WebEid,
}

impl AuthTag {
    pub const RESOLVED: [AuthTag; 4] = [
        AuthTag::IdCard,
        AuthTag::MobileId,
        AuthTag::SmartId,
        AuthTag::WebEid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuthTag::None => "",
            AuthTag::IdCard => "id",
            AuthTag::MobileId => "mid",
            AuthTag::SmartId => "sid",
            AuthTag::WebEid => "wid",
        }
    }

    pub fn parse_wire(value: &str) -> Option<Self> {
        match value {
            "" => Some(AuthTag::None),
            "id" => Some(AuthTag::IdCard),
            "mid" => Some(AuthTag::MobileId),
            "sid" => Some(AuthTag::SmartId),
            "wid" => Some(AuthTag::WebEid),
            _ => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        self != AuthTag::None
    }
}

impl fmt::Display for AuthTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_resolved() {
            f.write_str(self.as_str())
        } else {
            f.write_str("<none>")
        }
    }
}

/// Front-end RPC methods that take part in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RpcMethod {
    Authenticate,
    AuthenticateStatus,
    Challenge,
    Token,
    VoterChoices,
    GetCertificate,
    GetCertificateStatus,
    Sign,
    SignStatus,
    Vote,
    Verify,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 11] = [
        RpcMethod::Authenticate,
        RpcMethod::AuthenticateStatus,
        RpcMethod::Challenge,
        RpcMethod::Token,
        RpcMethod::VoterChoices,
        RpcMethod::GetCertificate,
        RpcMethod::GetCertificateStatus,
        RpcMethod::Sign,
        RpcMethod::SignStatus,
        RpcMethod::Vote,
        RpcMethod::Verify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::Authenticate => "RPC.Authenticate",
            RpcMethod::AuthenticateStatus => "RPC.AuthenticateStatus",
            RpcMethod::Challenge => "RPC.Challenge",
            RpcMethod::Token => "RPC.Token",
            RpcMethod::VoterChoices => "RPC.VoterChoices",
            RpcMethod::GetCertificate => "RPC.GetCertificate",
            RpcMethod::GetCertificateStatus => "RPC.GetCertificateStatus",
            RpcMethod::Sign => "RPC.Sign",
            RpcMethod::SignStatus => "RPC.SignStatus",
            RpcMethod::Vote => "RPC.Vote",
            RpcMethod::Verify => "RPC.Verify",
        }
    }

    pub fn parse_wire(value: &str) -> Option<Self> {
        RpcMethod::ALL.into_iter().find(|m| m.as_str() == value)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle of the TTL timer bound to a stored record. Zero means "none yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeaseId(pub i64);

impl LeaseId {
    pub const NONE: LeaseId = LeaseId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Decimal text on the wire; `""` and `"0"` both mean none.
    pub fn parse_wire(value: &str) -> Result<Self, ContractViolation> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(LeaseId::NONE);
        }
        let parsed = trimmed
            .parse::<i64>()
            .map_err(|_| ContractViolation::InvalidValue {
                field: "lease",
                reason: "must be decimal text",
            })?;
        if parsed < 0 {
            return Err(ContractViolation::InvalidValue {
                field: "lease",
                reason: "must be >= 0",
            });
        }
        Ok(LeaseId(parsed))
    }

    pub fn to_wire(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtlSeconds(u32);

impl TtlSeconds {
    pub fn new(seconds: u32) -> Result<Self, ContractViolation> {
        let ttl = Self(seconds);
        ttl.validate()?;
        Ok(ttl)
    }

    /// For constants only; out-of-range values fail const evaluation.
    pub const fn from_const(seconds: u32) -> Self {
        assert!(seconds > 0 && seconds <= TTL_SECONDS_MAX);
        Self(seconds)
    }

    pub fn parse_wire(value: &str) -> Result<Self, ContractViolation> {
        let seconds = value
            .trim()
            .parse::<u32>()
            .map_err(|_| ContractViolation::InvalidValue {
                field: "ttl",
                reason: "must be decimal seconds",
            })?;
        Self::new(seconds)
    }

    pub fn seconds(self) -> u32 {
        self.0
    }

    pub fn to_wire(self) -> String {
        self.0.to_string()
    }
}

impl Validate for TtlSeconds {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 || self.0 > TTL_SECONDS_MAX {
            return Err(ContractViolation::InvalidRange {
                field: "ttl",
                min: 1,
                max: i64::from(TTL_SECONDS_MAX),
                got: i64::from(self.0),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TtlSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Server-side view of a session. The zero value means "no record".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionRecord {
    pub caller: Option<RpcMethod>,
    pub auth: AuthTag,
    pub lease: LeaseId,
}

impl SessionRecord {
    pub fn v1(caller: Option<RpcMethod>, auth: AuthTag, lease: LeaseId) -> Self {
        Self {
            caller,
            auth,
            lease,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.caller.is_none() && !self.auth.is_resolved()
    }

    pub fn caller_wire(&self) -> &'static str {
        self.caller.map(RpcMethod::as_str).unwrap_or("")
    }
}

/// How the transport-level auth filter authenticated the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportAuth {
    /// TLS client certificate (ID card).
    Tls,
    /// Ticket issued after Mobile-ID, Smart-ID or Web eID authentication.
    Ticket,
}

impl TransportAuth {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportAuth::Tls => "tls",
            TransportAuth::Ticket => "ticket",
        }
    }
}

impl fmt::Display for TransportAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common prefix of every front-end and Session Status message. Only
/// `session_id` is interpreted by the session protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub session_id: SessionId,
    pub os: String,
    pub auth_method: String,
    pub auth_token: Vec<u8>,
    pub data_token: Vec<u8>,
}

impl Header {
    pub fn v1(
        session_id: SessionId,
        os: String,
        auth_method: String,
        auth_token: Vec<u8>,
        data_token: Vec<u8>,
    ) -> Result<Self, ContractViolation> {
        let header = Self {
            session_id,
            os,
            auth_method,
            auth_token,
            data_token,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id,
            os: String::new(),
            auth_method: String::new(),
            auth_token: Vec::new(),
            data_token: Vec::new(),
        }
    }
}

impl Validate for Header {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.session_id.validate()?;
        validate_printable_ascii("header.os", &self.os, 256)?;
        validate_printable_ascii("header.auth_method", &self.auth_method, 64)?;
        if self.auth_token.len() > 16 * 1024 {
            return Err(ContractViolation::InvalidValue {
                field: "header.auth_token",
                reason: "exceeds max length",
            });
        }
        if self.data_token.len() > 16 * 1024 {
            return Err(ContractViolation::InvalidValue {
                field: "header.data_token",
                reason: "exceeds max length",
            });
        }
        Ok(())
    }
}
