#![forbid(unsafe_code)]

use async_trait::async_trait;
use collector_kernel_contracts::session::{
    AuthTag, LeaseId, RpcMethod, SessionId, SessionRecord, TtlSeconds,
};

use crate::session_repo::SessionRepoError;

/// Whole-record write for one accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWrite {
    pub caller: RpcMethod,
    pub auth: AuthTag,
    pub lease: LeaseId,
    pub ttl: TtlSeconds,
}

impl SessionWrite {
    pub fn v1(caller: RpcMethod, auth: AuthTag, lease: LeaseId, ttl: TtlSeconds) -> Self {
        Self {
            caller,
            auth,
            lease,
            ttl,
        }
    }
}

/// Typed repository interface for session status persistence.
#[async_trait]
pub trait SessionStatusRepo: Send + Sync {
    /// Absent records come back as `SessionRecord::empty()`.
    async fn read_session(&self, session_id: &SessionId) -> Result<SessionRecord, SessionRepoError>;
    async fn update_session(
        &self,
        session_id: &SessionId,
        write: SessionWrite,
    ) -> Result<(), SessionRepoError>;
    async fn delete_session(&self, session_id: &SessionId) -> Result<(), SessionRepoError>;
}
