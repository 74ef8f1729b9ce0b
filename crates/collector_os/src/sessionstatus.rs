#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use collector_kernel_contracts::sessionstatus::{
    SessionStatusAck, SessionStatusDeleteRequest, SessionStatusEndpoint, SessionStatusReadRequest,
    SessionStatusReadResponse, SessionStatusUpdateRequest,
};
use collector_kernel_contracts::{ContractViolation, Validate};
use collector_storage::repo::{SessionStatusRepo, SessionWrite};
use collector_storage::session_repo::SessionRepoError;
use thiserror::Error;
use tracing::{debug, error, info};

/// Unix-second bounds outside which the service refuses every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceWindow {
    pub not_before: Option<u64>,
    pub not_after: Option<u64>,
}

impl ServiceWindow {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn v1(not_before: Option<u64>, not_after: Option<u64>) -> Result<Self, ContractViolation> {
        let window = Self {
            not_before,
            not_after,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn contains(&self, now_unix_secs: u64) -> bool {
        self.not_before.map_or(true, |start| now_unix_secs >= start)
            && self.not_after.map_or(true, |end| now_unix_secs < end)
    }
}

impl Validate for ServiceWindow {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let (Some(start), Some(end)) = (self.not_before, self.not_after) {
            if start >= end {
                return Err(ContractViolation::InvalidValue {
                    field: "service_window",
                    reason: "not_before must be earlier than not_after",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionStatusError {
    #[error("session status service is outside its service window at {now}")]
    OutsideServiceWindow { now: u64 },
    #[error("invalid session status request: {0}")]
    InvalidRequest(#[from] ContractViolation),
    #[error(transparent)]
    Repo(#[from] SessionRepoError),
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Shared source of truth for every front-end verifier. Stateless apart
/// from the repository it fronts.
#[derive(Debug, Clone)]
pub struct SessionStatusService<R> {
    repo: R,
    window: ServiceWindow,
    clock: fn() -> u64,
}

impl<R: SessionStatusRepo> SessionStatusService<R> {
    pub fn new(repo: R, window: ServiceWindow) -> Result<Self, ContractViolation> {
        window.validate()?;
        Ok(Self {
            repo,
            window,
            clock: unix_now_secs,
        })
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    fn check_window(&self, endpoint: SessionStatusEndpoint) -> Result<(), SessionStatusError> {
        let now = (self.clock)();
        if self.window.contains(now) {
            return Ok(());
        }
        info!(endpoint = endpoint.as_str(), now, "request outside service window");
        Err(SessionStatusError::OutsideServiceWindow { now })
    }

    pub async fn read(
        &self,
        req: &SessionStatusReadRequest,
    ) -> Result<SessionStatusReadResponse, SessionStatusError> {
        self.check_window(SessionStatusEndpoint::Read)?;
        req.validate()?;
        let session_id = req.session_id();
        debug!(session_id = %session_id, "session status read");

        let record = self.repo.read_session(session_id).await.map_err(|err| {
            error!(session_id = %session_id, key = err.key(), error = %err, "session status read failed");
            SessionStatusError::Repo(err)
        })?;
        info!(
            session_id = %session_id,
            caller = record.caller_wire(),
            auth = record.auth.as_str(),
            lease = %record.lease,
            "session status read"
        );
        Ok(SessionStatusReadResponse::v1(req.header.clone(), record)?)
    }

    pub async fn update(
        &self,
        req: &SessionStatusUpdateRequest,
    ) -> Result<SessionStatusAck, SessionStatusError> {
        self.check_window(SessionStatusEndpoint::Update)?;
        req.validate()?;
        let session_id = req.session_id();

        let write = SessionWrite::v1(req.caller, req.auth, req.lease, req.ttl);
        self.repo
            .update_session(session_id, write)
            .await
            .map_err(|err| {
                error!(session_id = %session_id, key = err.key(), error = %err, "session status update failed");
                SessionStatusError::Repo(err)
            })?;
        info!(
            session_id = %session_id,
            caller = %req.caller,
            auth = req.auth.as_str(),
            lease = %req.lease,
            ttl = req.ttl.seconds(),
            ok = true,
            "session status update"
        );
        Ok(SessionStatusAck::ok_v1())
    }

    pub async fn delete(
        &self,
        req: &SessionStatusDeleteRequest,
    ) -> Result<SessionStatusAck, SessionStatusError> {
        self.check_window(SessionStatusEndpoint::Delete)?;
        req.validate()?;
        let session_id = req.session_id();

        self.repo.delete_session(session_id).await.map_err(|err| {
            error!(session_id = %session_id, key = err.key(), error = %err, "session status delete failed");
            SessionStatusError::Repo(err)
        })?;
        info!(session_id = %session_id, ok = true, "session status delete");
        Ok(SessionStatusAck::ok_v1())
    }
}
