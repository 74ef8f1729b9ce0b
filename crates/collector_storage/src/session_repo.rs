#![forbid(unsafe_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use collector_kernel_contracts::session::{AuthTag, RpcMethod, SessionId, SessionRecord};
use thiserror::Error;
use tracing::error;

use crate::lease_store::{LeaseStore, LeaseStoreError, PutOptions};
use crate::repo::{SessionStatusRepo, SessionWrite};

pub const SESSION_KEY_PREFIX: &str = "/session/";
/// ASCII unit separator; never part of a method name or auth tag.
pub const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptReason {
    #[error("value is not valid base64")]
    InvalidBase64,
    #[error("decoded value is not UTF-8")]
    InvalidUtf8,
    #[error("expected 2 fields, got {0}")]
    FieldCount(usize),
    #[error("unknown caller {0:?}")]
    UnknownCaller(String),
    #[error("unknown auth tag {0:?}")]
    UnknownAuth(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionRepoError {
    #[error("corrupt session record at {key}: {reason}")]
    CorruptRecord { key: String, reason: CorruptReason },
    #[error("session store failure at {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: LeaseStoreError,
    },
}

impl SessionRepoError {
    pub fn key(&self) -> &str {
        match self {
            SessionRepoError::CorruptRecord { key, .. } | SessionRepoError::Store { key, .. } => {
                key
            }
        }
    }
}

pub fn session_key(session_id: &SessionId) -> String {
    format!("{SESSION_KEY_PREFIX}{}", session_id.as_str())
}

pub fn encode_session_value(caller: Option<RpcMethod>, auth: AuthTag) -> Vec<u8> {
    let caller = caller.map(RpcMethod::as_str).unwrap_or("");
    let plain = format!("{caller}{FIELD_SEPARATOR}{}", auth.as_str());
    STANDARD.encode(plain.as_bytes()).into_bytes()
}

pub fn decode_session_value(raw: &[u8]) -> Result<(Option<RpcMethod>, AuthTag), CorruptReason> {
    let decoded = STANDARD
        .decode(raw)
        .map_err(|_| CorruptReason::InvalidBase64)?;
    let plain = String::from_utf8(decoded).map_err(|_| CorruptReason::InvalidUtf8)?;
    let fields: Vec<&str> = plain.split(FIELD_SEPARATOR).collect();
    let [caller, auth] = fields.as_slice() else {
        return Err(CorruptReason::FieldCount(fields.len()));
    };
    let caller = if caller.is_empty() {
        None
    } else {
        Some(
            RpcMethod::parse_wire(caller)
                .ok_or_else(|| CorruptReason::UnknownCaller((*caller).to_string()))?,
        )
    };
    let auth =
        AuthTag::parse_wire(auth).ok_or_else(|| CorruptReason::UnknownAuth((*auth).to_string()))?;
    Ok((caller, auth))
}

/// Session repository backed by any `LeaseStore`.
#[derive(Debug, Clone)]
pub struct LeaseStoreSessionRepo<S> {
    store: S,
}

impl<S: LeaseStore> LeaseStoreSessionRepo<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: LeaseStore> SessionStatusRepo for LeaseStoreSessionRepo<S> {
    async fn read_session(&self, session_id: &SessionId) -> Result<SessionRecord, SessionRepoError> {
        let key = session_key(session_id);
        let stored = match self.store.get_with_lease(&key).await {
            Ok(stored) => stored,
            Err(source) => {
                error!(key = %key, error = %source, "session read failed");
                return Err(SessionRepoError::Store { key, source });
            }
        };
        let Some(stored) = stored else {
            return Ok(SessionRecord::empty());
        };
        match decode_session_value(&stored.value) {
            Ok((caller, auth)) => Ok(SessionRecord::v1(caller, auth, stored.lease)),
            Err(reason) => {
                error!(key = %key, reason = %reason, "corrupt session record");
                Err(SessionRepoError::CorruptRecord { key, reason })
            }
        }
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        write: SessionWrite,
    ) -> Result<(), SessionRepoError> {
        let key = session_key(session_id);
        let value = encode_session_value(Some(write.caller), write.auth);
        self.store
            .put_force_with_opts(&key, value, PutOptions::v1(write.lease, write.ttl))
            .await
            .map_err(|source| {
                error!(key = %key, error = %source, "session update failed");
                SessionRepoError::Store {
                    key: key.clone(),
                    source,
                }
            })
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), SessionRepoError> {
        let key = session_key(session_id);
        self.store.delete(&key).await.map_err(|source| {
            error!(key = %key, error = %source, "session delete failed");
            SessionRepoError::Store {
                key: key.clone(),
                source,
            }
        })
    }
}
