#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use collector_kernel_contracts::sessionstatus::{
    SessionStatusAck, SessionStatusDeleteRequest, SessionStatusReadRequest,
    SessionStatusReadResponse, SessionStatusUpdateRequest,
};
use collector_storage::lease_store::LeaseStoreError;
use collector_storage::repo::SessionStatusRepo;
use collector_storage::session_repo::SessionRepoError;
use thiserror::Error;

use crate::sessionstatus::{SessionStatusError, SessionStatusService};

/// Failures of a Session Status call as seen by a front-end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusClientError {
    #[error("invalid session status request: {0}")]
    InvalidRequest(String),
    #[error("session status call timed out: {0}")]
    Timeout(String),
    #[error("session status unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt session record: {0}")]
    CorruptRecord(String),
    #[error("session status call failed: {0}")]
    Internal(String),
}

impl From<SessionStatusError> for StatusClientError {
    fn from(err: SessionStatusError) -> Self {
        match err {
            SessionStatusError::InvalidRequest(v) => {
                StatusClientError::InvalidRequest(v.to_string())
            }
            SessionStatusError::OutsideServiceWindow { .. } => {
                StatusClientError::Unavailable(err.to_string())
            }
            SessionStatusError::Repo(repo) => match &repo {
                SessionRepoError::CorruptRecord { .. } => {
                    StatusClientError::CorruptRecord(repo.to_string())
                }
                SessionRepoError::Store {
                    source: LeaseStoreError::Timeout { .. },
                    ..
                } => StatusClientError::Timeout(repo.to_string()),
                SessionRepoError::Store { .. } => StatusClientError::Unavailable(repo.to_string()),
            },
        }
    }
}

/// The seam every front-end verifier talks through: in-process service or
/// remote transport.
#[async_trait]
pub trait SessionStatusClient: Send + Sync {
    async fn read(
        &self,
        req: SessionStatusReadRequest,
    ) -> Result<SessionStatusReadResponse, StatusClientError>;

    async fn update(
        &self,
        req: SessionStatusUpdateRequest,
    ) -> Result<SessionStatusAck, StatusClientError>;

    async fn delete(
        &self,
        req: SessionStatusDeleteRequest,
    ) -> Result<SessionStatusAck, StatusClientError>;
}

#[async_trait]
impl<R: SessionStatusRepo> SessionStatusClient for SessionStatusService<R> {
    async fn read(
        &self,
        req: SessionStatusReadRequest,
    ) -> Result<SessionStatusReadResponse, StatusClientError> {
        Ok(SessionStatusService::read(self, &req).await?)
    }

    async fn update(
        &self,
        req: SessionStatusUpdateRequest,
    ) -> Result<SessionStatusAck, StatusClientError> {
        Ok(SessionStatusService::update(self, &req).await?)
    }

    async fn delete(
        &self,
        req: SessionStatusDeleteRequest,
    ) -> Result<SessionStatusAck, StatusClientError> {
        Ok(SessionStatusService::delete(self, &req).await?)
    }
}

#[async_trait]
impl<C: SessionStatusClient + ?Sized> SessionStatusClient for Arc<C> {
    async fn read(
        &self,
        req: SessionStatusReadRequest,
    ) -> Result<SessionStatusReadResponse, StatusClientError> {
        (**self).read(req).await
    }

    async fn update(
        &self,
        req: SessionStatusUpdateRequest,
    ) -> Result<SessionStatusAck, StatusClientError> {
        (**self).update(req).await
    }

    async fn delete(
        &self,
        req: SessionStatusDeleteRequest,
    ) -> Result<SessionStatusAck, StatusClientError> {
        (**self).delete(req).await
    }
}
