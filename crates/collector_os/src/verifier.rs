#![forbid(unsafe_code)]

use std::fmt;

use collector_engines::workflow::{
    Advance, SessionTtlConfig, TransitionRejection, WorkflowTable,
};
use collector_kernel_contracts::session::{
    AuthTag, Header, LeaseId, RpcMethod, TransportAuth, TtlSeconds,
};
use collector_kernel_contracts::sessionstatus::{
    SessionStatusDeleteRequest, SessionStatusReadRequest, SessionStatusUpdateRequest,
};
use collector_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::client::{SessionStatusClient, StatusClientError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Updated { ttl: TtlSeconds },
    Deleted,
}

/// A step the session store has acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedTransition {
    pub method: RpcMethod,
    pub auth: AuthTag,
    pub lease: LeaseId,
    pub outcome: AdvanceOutcome,
    pub reason_code: ReasonCodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Rejected(TransitionRejection),
    #[error("session status lookup failed: {0}")]
    Status(StatusClientError),
    #[error("{method} accepted but the session advance was not acknowledged")]
    UpdateNotAcknowledged {
        method: RpcMethod,
        #[source]
        source: Option<StatusClientError>,
    },
}

/// What a front-end may tell its client. Never carries session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFacingError {
    BadRequest,
    Internal,
}

impl ClientFacingError {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientFacingError::BadRequest => "BAD_REQUEST",
            ClientFacingError::Internal => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl fmt::Display for ClientFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VerifyError {
    pub fn client_facing(&self) -> ClientFacingError {
        match self {
            VerifyError::Rejected(_) => ClientFacingError::BadRequest,
            VerifyError::Status(_) | VerifyError::UpdateNotAcknowledged { .. } => {
                ClientFacingError::Internal
            }
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, VerifyError::Rejected(_))
    }
}

fn invalid_request(v: ContractViolation) -> VerifyError {
    VerifyError::Status(StatusClientError::InvalidRequest(v.to_string()))
}

/// Read, evaluate, advance. One instance per front-end service, differing
/// only in the table it holds.
#[derive(Debug, Clone)]
pub struct SessionVerifier<C> {
    table: WorkflowTable,
    ttl: SessionTtlConfig,
    client: C,
}

impl<C: SessionStatusClient> SessionVerifier<C> {
    pub fn new(
        table: WorkflowTable,
        ttl: SessionTtlConfig,
        client: C,
    ) -> Result<Self, ContractViolation> {
        ttl.validate()?;
        Ok(Self { table, ttl, client })
    }

    pub async fn verify(
        &self,
        header: &Header,
        method: RpcMethod,
        transport: TransportAuth,
    ) -> Result<AcceptedTransition, VerifyError> {
        let workflow = self.table.kind();
        let session_id = &header.session_id;

        let read_req = SessionStatusReadRequest::v1(header.clone())
            .map_err(invalid_request)?;
        let record = match self.client.read(read_req).await {
            Ok(resp) => resp.record,
            Err(err) => {
                error!(%workflow, session_id = %session_id, %method, error = %err, "session status read failed");
                return Err(VerifyError::Status(err));
            }
        };

        let transition = match self.table.evaluate(method, &record, transport) {
            Ok(t) => t,
            Err(rejection) => {
                warn!(
                    %workflow,
                    session_id = %session_id,
                    %method,
                    caller = record.caller_wire(),
                    auth = record.auth.as_str(),
                    %transport,
                    reason_code = rejection.reason_code().0,
                    "session transition rejected"
                );
                return Err(VerifyError::Rejected(rejection));
            }
        };

        let outcome = match transition.advance {
            Advance::Update { ttl } => {
                let ttl = self.ttl.ttl_for(ttl);
                let update = SessionStatusUpdateRequest::v1(
                    header.clone(),
                    method,
                    transition.auth,
                    transition.lease,
                    ttl,
                )
                .map_err(invalid_request)?;
                let ack = self.client.update(update).await;
                self.require_ack(method, ack.map(|a| a.ok))?;
                AdvanceOutcome::Updated { ttl }
            }
            Advance::Delete => {
                let delete = SessionStatusDeleteRequest::v1(header.clone())
                    .map_err(invalid_request)?;
                let ack = self.client.delete(delete).await;
                self.require_ack(method, ack.map(|a| a.ok))?;
                AdvanceOutcome::Deleted
            }
        };

        info!(
            %workflow,
            session_id = %session_id,
            %method,
            auth = transition.auth.as_str(),
            lease = %transition.lease,
            ?outcome,
            "session transition accepted"
        );
        Ok(AcceptedTransition {
            method,
            auth: transition.auth,
            lease: transition.lease,
            outcome,
            reason_code: transition.reason_code(),
        })
    }

    fn require_ack(
        &self,
        method: RpcMethod,
        ack: Result<bool, StatusClientError>,
    ) -> Result<(), VerifyError> {
        match ack {
            Ok(true) => Ok(()),
            Ok(false) => {
                error!(workflow = %self.table.kind(), %method, "session advance reported failure");
                Err(VerifyError::UpdateNotAcknowledged {
                    method,
                    source: None,
                })
            }
            Err(err) => {
                error!(workflow = %self.table.kind(), %method, error = %err, "session advance failed");
                Err(VerifyError::UpdateNotAcknowledged {
                    method,
                    source: Some(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use collector_engines::workflow::{reason_codes, VoteCompletion};
    use collector_kernel_contracts::session::{SessionId, SessionRecord};
    use collector_kernel_contracts::sessionstatus::{SessionStatusAck, SessionStatusReadResponse};
    use collector_storage::lease_store::{InMemoryLeaseStore, LeaseStore, PutOptions};
    use collector_storage::repo::{SessionStatusRepo, SessionWrite};
    use collector_storage::session_repo::{session_key, LeaseStoreSessionRepo};

    use super::*;
    use crate::sessionstatus::{ServiceWindow, SessionStatusService};

    type MemService = SessionStatusService<LeaseStoreSessionRepo<InMemoryLeaseStore>>;

    fn shared_service(store: &InMemoryLeaseStore) -> Arc<MemService> {
        Arc::new(
            SessionStatusService::new(
                LeaseStoreSessionRepo::new(store.clone()),
                ServiceWindow::always(),
            )
            .unwrap(),
        )
    }

    fn verifier(table: WorkflowTable, svc: &Arc<MemService>) -> SessionVerifier<Arc<MemService>> {
        SessionVerifier::new(table, SessionTtlConfig::mvp_v1(), svc.clone()).unwrap()
    }

    fn header(id: &str) -> Header {
        Header::for_session(SessionId::new(id).unwrap())
    }

    async fn record_of(svc: &MemService, id: &str) -> SessionRecord {
        svc.read(&SessionStatusReadRequest::v1(header(id)).unwrap())
            .await
            .unwrap()
            .record
    }

    async fn seed(store: &InMemoryLeaseStore, id: &str, caller: RpcMethod, auth: AuthTag) {
        let repo = LeaseStoreSessionRepo::new(store.clone());
        repo.update_session(
            &SessionId::new(id).unwrap(),
            SessionWrite::v1(caller, auth, LeaseId::NONE, TtlSeconds::new(300).unwrap()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn at_verifier_01_id_card_first_contact_records_id() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let choices = verifier(WorkflowTable::choice_selection(), &svc);

        let accepted = choices
            .verify(&header("s1"), RpcMethod::VoterChoices, TransportAuth::Tls)
            .await
            .unwrap();
        assert_eq!(accepted.auth, AuthTag::IdCard);
        assert_eq!(
            accepted.outcome,
            AdvanceOutcome::Updated {
                ttl: SessionTtlConfig::DEFAULT_CHOICE
            }
        );
        let record = record_of(&svc, "s1").await;
        assert_eq!(record.caller, Some(RpcMethod::VoterChoices));
        assert_eq!(record.auth, AuthTag::IdCard);
    }

    #[tokio::test]
    async fn at_verifier_02_empty_session_over_ticket_is_rejected_without_write() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let choices = verifier(WorkflowTable::choice_selection(), &svc);

        let err = choices
            .verify(&header("s1"), RpcMethod::VoterChoices, TransportAuth::Ticket)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Rejected(TransitionRejection::EmptySessionForNonIdCard { .. })
        ));
        assert_eq!(err.client_facing(), ClientFacingError::BadRequest);
        assert_eq!(store.live_key_count(), 0);
    }

    #[tokio::test]
    async fn at_verifier_03_status_poll_advances_and_repeats() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let mid = verifier(WorkflowTable::mobile_id_flow(AuthTag::MobileId).unwrap(), &svc);
        seed(&store, "s1", RpcMethod::Authenticate, AuthTag::MobileId).await;
        let seeded_lease = record_of(&svc, "s1").await.lease;

        for _ in 0..2 {
            let accepted = mid
                .verify(&header("s1"), RpcMethod::AuthenticateStatus, TransportAuth::Ticket)
                .await
                .unwrap();
            assert_eq!(accepted.lease, seeded_lease);
            let record = record_of(&svc, "s1").await;
            assert_eq!(record.caller, Some(RpcMethod::AuthenticateStatus));
            assert_eq!(record.auth, AuthTag::MobileId);
            assert_eq!(record.lease, seeded_lease);
        }
    }

    #[tokio::test]
    async fn at_verifier_04_vote_deletes_record() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let voting = verifier(WorkflowTable::vote_casting(VoteCompletion::Delete), &svc);
        seed(&store, "s1", RpcMethod::VoterChoices, AuthTag::IdCard).await;

        let accepted = voting
            .verify(&header("s1"), RpcMethod::Vote, TransportAuth::Tls)
            .await
            .unwrap();
        assert_eq!(accepted.outcome, AdvanceOutcome::Deleted);
        assert_eq!(accepted.reason_code, reason_codes::SESSION_OK_TERMINAL);
        assert!(record_of(&svc, "s1").await.is_empty());
        assert_eq!(store.live_lease_count(), 0);
    }

    #[tokio::test]
    async fn at_verifier_05_concurrent_votes_leave_no_reusable_session() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let voting = Arc::new(verifier(
            WorkflowTable::vote_casting(VoteCompletion::Delete),
            &svc,
        ));
        seed(&store, "s1", RpcMethod::SignStatus, AuthTag::MobileId).await;

        let a = tokio::spawn({
            let v = voting.clone();
            async move {
                v.verify(&header("s1"), RpcMethod::Vote, TransportAuth::Ticket)
                    .await
            }
        });
        let b = tokio::spawn({
            let v = voting.clone();
            async move {
                v.verify(&header("s1"), RpcMethod::Vote, TransportAuth::Ticket)
                    .await
            }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert!(results.iter().any(Result::is_ok));
        assert_eq!(store.live_key_count(), 0);

        let again = voting
            .verify(&header("s1"), RpcMethod::Vote, TransportAuth::Ticket)
            .await
            .unwrap_err();
        assert_eq!(
            again,
            VerifyError::Rejected(TransitionRejection::InvalidCallerOrAuth {
                method: RpcMethod::Vote,
                caller: None,
                auth: AuthTag::None,
            })
        );
    }

    #[tokio::test]
    async fn at_verifier_06_handoff_reaches_verification() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let voting = verifier(
            WorkflowTable::vote_casting(VoteCompletion::HandoffToVerification),
            &svc,
        );
        let verification = verifier(WorkflowTable::verification(), &svc);
        seed(&store, "s1", RpcMethod::VoterChoices, AuthTag::WebEid).await;

        let voted = voting
            .verify(&header("s1"), RpcMethod::Vote, TransportAuth::Ticket)
            .await
            .unwrap();
        assert_eq!(
            voted.outcome,
            AdvanceOutcome::Updated {
                ttl: SessionTtlConfig::DEFAULT_VERIFY
            }
        );
        assert!(voted.lease.is_none());
        assert_eq!(store.live_lease_count(), 1);

        for _ in 0..3 {
            let verified = verification
                .verify(&header("s1"), RpcMethod::Verify, TransportAuth::Tls)
                .await
                .unwrap();
            assert_eq!(verified.auth, AuthTag::WebEid);
        }
    }

    #[tokio::test]
    async fn at_verifier_07_full_mobile_id_session() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let sid = verifier(WorkflowTable::mobile_id_flow(AuthTag::SmartId).unwrap(), &svc);
        let choices = verifier(WorkflowTable::choice_selection(), &svc);
        let voting = verifier(WorkflowTable::vote_casting(VoteCompletion::Delete), &svc);
        let h = header("flow_1");

        let steps: [(&SessionVerifier<Arc<MemService>>, RpcMethod); 9] = [
            (&sid, RpcMethod::Authenticate),
            (&sid, RpcMethod::AuthenticateStatus),
            (&sid, RpcMethod::AuthenticateStatus),
            (&choices, RpcMethod::VoterChoices),
            (&sid, RpcMethod::GetCertificate),
            (&sid, RpcMethod::GetCertificateStatus),
            (&sid, RpcMethod::Sign),
            (&sid, RpcMethod::SignStatus),
            (&voting, RpcMethod::Vote),
        ];
        for (v, method) in steps {
            let accepted = v.verify(&h, method, TransportAuth::Ticket).await.unwrap();
            assert_eq!(accepted.auth, AuthTag::SmartId, "{method}");
        }
        assert!(record_of(&svc, "flow_1").await.is_empty());
    }

    #[tokio::test]
    async fn at_verifier_08_skipping_a_step_is_rejected() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let mid = verifier(WorkflowTable::mobile_id_flow(AuthTag::MobileId).unwrap(), &svc);
        seed(&store, "s1", RpcMethod::Authenticate, AuthTag::MobileId).await;

        let err = mid
            .verify(&header("s1"), RpcMethod::Sign, TransportAuth::Ticket)
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(
            record_of(&svc, "s1").await.caller,
            Some(RpcMethod::Authenticate)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn at_verifier_09_expired_session_is_treated_as_empty() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let mid = verifier(WorkflowTable::mobile_id_flow(AuthTag::MobileId).unwrap(), &svc);
        let choices = verifier(WorkflowTable::choice_selection(), &svc);

        mid.verify(&header("s1"), RpcMethod::Authenticate, TransportAuth::Ticket)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(mid
            .verify(&header("s1"), RpcMethod::AuthenticateStatus, TransportAuth::Ticket)
            .await
            .unwrap_err()
            .is_rejection());
        assert!(choices
            .verify(&header("s1"), RpcMethod::VoterChoices, TransportAuth::Ticket)
            .await
            .unwrap_err()
            .is_rejection());
        assert!(choices
            .verify(&header("s1"), RpcMethod::VoterChoices, TransportAuth::Tls)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn at_verifier_10_corrupt_record_is_status_error() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let voting = verifier(WorkflowTable::vote_casting(VoteCompletion::Delete), &svc);
        store
            .put_force_with_opts(
                &session_key(&SessionId::new("s1").unwrap()),
                b"!!not base64!!".to_vec(),
                PutOptions::v1(LeaseId::NONE, TtlSeconds::new(60).unwrap()),
            )
            .await
            .unwrap();

        let err = voting
            .verify(&header("s1"), RpcMethod::Vote, TransportAuth::Tls)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Status(StatusClientError::CorruptRecord(_))
        ));
        assert_eq!(err.client_facing(), ClientFacingError::Internal);
    }

    /// Answers reads from a fixed record; update and delete behave per `ack`.
    struct ScriptedClient {
        record: SessionRecord,
        ack: Result<bool, StatusClientError>,
    }

    #[async_trait]
    impl SessionStatusClient for ScriptedClient {
        async fn read(
            &self,
            req: SessionStatusReadRequest,
        ) -> Result<SessionStatusReadResponse, StatusClientError> {
            Ok(SessionStatusReadResponse::v1(req.header, self.record).unwrap())
        }

        async fn update(
            &self,
            _req: SessionStatusUpdateRequest,
        ) -> Result<SessionStatusAck, StatusClientError> {
            self.ack.clone().map(SessionStatusAck::from_wire)
        }

        async fn delete(
            &self,
            _req: SessionStatusDeleteRequest,
        ) -> Result<SessionStatusAck, StatusClientError> {
            self.ack.clone().map(SessionStatusAck::from_wire)
        }
    }

    #[tokio::test]
    async fn at_verifier_11_unacknowledged_advance_fails_verification() {
        let record = SessionRecord::v1(
            Some(RpcMethod::Challenge),
            AuthTag::WebEid,
            LeaseId(3),
        );
        for ack in [
            Ok(false),
            Err(StatusClientError::Timeout("deadline".into())),
        ] {
            let v = SessionVerifier::new(
                WorkflowTable::web_eid(),
                SessionTtlConfig::mvp_v1(),
                ScriptedClient { record, ack },
            )
            .unwrap();
            let err = v
                .verify(&header("s1"), RpcMethod::Token, TransportAuth::Ticket)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                VerifyError::UpdateNotAcknowledged {
                    method: RpcMethod::Token,
                    ..
                }
            ));
            assert_eq!(err.client_facing(), ClientFacingError::Internal);
        }
    }

    #[tokio::test]
    async fn at_verifier_12_store_outage_is_not_a_rejection() {
        let v = SessionVerifier::new(
            WorkflowTable::verification(),
            SessionTtlConfig::mvp_v1(),
            UnavailableClient,
        )
        .unwrap();
        let err = v
            .verify(&header("s1"), RpcMethod::Verify, TransportAuth::Tls)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Status(StatusClientError::Unavailable(_))));
        assert!(!err.is_rejection());
    }

    struct UnavailableClient;

    #[async_trait]
    impl SessionStatusClient for UnavailableClient {
        async fn read(
            &self,
            _req: SessionStatusReadRequest,
        ) -> Result<SessionStatusReadResponse, StatusClientError> {
            Err(StatusClientError::Unavailable("connection refused".into()))
        }

        async fn update(
            &self,
            _req: SessionStatusUpdateRequest,
        ) -> Result<SessionStatusAck, StatusClientError> {
            Err(StatusClientError::Unavailable("connection refused".into()))
        }

        async fn delete(
            &self,
            _req: SessionStatusDeleteRequest,
        ) -> Result<SessionStatusAck, StatusClientError> {
            Err(StatusClientError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn at_verifier_13_each_step_restarts_the_session_clock() {
        let store = InMemoryLeaseStore::new();
        let svc = shared_service(&store);
        let mid = verifier(WorkflowTable::mobile_id_flow(AuthTag::MobileId).unwrap(), &svc);
        let choices = verifier(WorkflowTable::choice_selection(), &svc);
        let auth = Duration::from_secs(u64::from(SessionTtlConfig::DEFAULT_AUTH.seconds()));
        let choice = Duration::from_secs(u64::from(SessionTtlConfig::DEFAULT_CHOICE.seconds()));
        let step = auth - Duration::from_secs(10);

        mid.verify(&header("s1"), RpcMethod::Authenticate, TransportAuth::Ticket)
            .await
            .unwrap();
        tokio::time::advance(step).await;
        mid.verify(&header("s1"), RpcMethod::AuthenticateStatus, TransportAuth::Ticket)
            .await
            .unwrap();
        tokio::time::advance(step).await;
        // Past the first grant's deadline; the status poll renewed it.
        assert_eq!(
            record_of(&svc, "s1").await.caller,
            Some(RpcMethod::AuthenticateStatus)
        );

        choices
            .verify(&header("s1"), RpcMethod::VoterChoices, TransportAuth::Ticket)
            .await
            .unwrap();
        tokio::time::advance(auth + Duration::from_secs(10)).await;
        assert_eq!(record_of(&svc, "s1").await.caller, Some(RpcMethod::VoterChoices));

        tokio::time::advance(choice - auth).await;
        assert!(record_of(&svc, "s1").await.is_empty());
        assert_eq!(store.live_lease_count(), 0);
    }
}
