#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use collector_adapter::client::{verifier_from_config, GrpcSessionStatusClient};
use collector_adapter::config::SessionStatusClientConfig;
use collector_adapter::server::GrpcSessionStatus;
use collector_engines::workflow::{
    SessionTtlConfig, VoteCompletion, WorkflowKind, WorkflowTable,
};
use collector_kernel_contracts::session::{
    AuthTag, Header, RpcMethod, SessionId, TransportAuth, TtlSeconds,
};
use collector_kernel_contracts::sessionstatus::SessionStatusReadRequest;
use collector_os::client::{SessionStatusClient, StatusClientError};
use collector_os::sessionstatus::{ServiceWindow, SessionStatusService};
use collector_os::verifier::{AdvanceOutcome, ClientFacingError, SessionVerifier, VerifyError};
use collector_storage::lease_store::{InMemoryLeaseStore, LeaseStoreClient, LeaseStoreConfig};
use collector_storage::session_repo::LeaseStoreSessionRepo;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;

async fn spawn_server(store: InMemoryLeaseStore) -> SocketAddr {
    let client = LeaseStoreClient::new(store, LeaseStoreConfig::mvp_v1()).unwrap();
    let service =
        SessionStatusService::new(LeaseStoreSessionRepo::new(client), ServiceWindow::always())
            .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(GrpcSessionStatus::new(service).into_server())
            .serve_with_incoming(incoming),
    );
    addr
}

fn local_config(addr: SocketAddr) -> SessionStatusClientConfig {
    let mut cfg = SessionStatusClientConfig::mvp_v1();
    cfg.endpoint = format!("http://{addr}");
    cfg
}

fn remote(addr: SocketAddr) -> Arc<GrpcSessionStatusClient> {
    Arc::new(GrpcSessionStatusClient::connect_lazy(&local_config(addr)).unwrap())
}

fn verifier(
    table: WorkflowTable,
    client: &Arc<GrpcSessionStatusClient>,
) -> SessionVerifier<Arc<GrpcSessionStatusClient>> {
    SessionVerifier::new(table, SessionTtlConfig::mvp_v1(), client.clone()).unwrap()
}

fn header(id: &str) -> Header {
    Header::for_session(SessionId::new(id).unwrap())
}

#[tokio::test]
async fn at_grpc_wiring_01_web_eid_session_runs_to_vote_over_grpc() {
    let store = InMemoryLeaseStore::new();
    let client = remote(spawn_server(store.clone()).await);
    let web_eid = verifier(WorkflowTable::web_eid(), &client);
    let choices = verifier(WorkflowTable::choice_selection(), &client);
    let votes = verifier(WorkflowTable::vote_casting(VoteCompletion::Delete), &client);
    let h = header("wid_session_01");

    let challenge = web_eid
        .verify(&h, RpcMethod::Challenge, TransportAuth::Ticket)
        .await
        .unwrap();
    assert_eq!(challenge.auth, AuthTag::WebEid);
    web_eid
        .verify(&h, RpcMethod::Token, TransportAuth::Ticket)
        .await
        .unwrap();
    let chosen = choices
        .verify(&h, RpcMethod::VoterChoices, TransportAuth::Ticket)
        .await
        .unwrap();
    assert_eq!(
        chosen.outcome,
        AdvanceOutcome::Updated {
            ttl: SessionTtlConfig::DEFAULT_CHOICE
        }
    );

    let read = client
        .read(SessionStatusReadRequest::v1(h.clone()).unwrap())
        .await
        .unwrap();
    assert_eq!(read.record.caller, Some(RpcMethod::VoterChoices));
    assert_eq!(read.record.auth, AuthTag::WebEid);
    assert!(!read.record.lease.is_none());

    let voted = votes
        .verify(&h, RpcMethod::Vote, TransportAuth::Ticket)
        .await
        .unwrap();
    assert_eq!(voted.outcome, AdvanceOutcome::Deleted);
    assert_eq!(store.live_key_count(), 0);

    let replay = votes
        .verify(&h, RpcMethod::Vote, TransportAuth::Ticket)
        .await
        .unwrap_err();
    assert!(replay.is_rejection());
    assert_eq!(replay.client_facing(), ClientFacingError::BadRequest);
}

#[tokio::test]
async fn at_grpc_wiring_02_id_card_first_contact_over_grpc() {
    let store = InMemoryLeaseStore::new();
    let client = remote(spawn_server(store.clone()).await);
    let choices = verifier(WorkflowTable::choice_selection(), &client);

    let err = choices
        .verify(&header("ticket_01"), RpcMethod::VoterChoices, TransportAuth::Ticket)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(store.live_key_count(), 0);

    let accepted = choices
        .verify(&header("card_01"), RpcMethod::VoterChoices, TransportAuth::Tls)
        .await
        .unwrap();
    assert_eq!(accepted.auth, AuthTag::IdCard);
    assert_eq!(store.live_key_count(), 1);
}

#[tokio::test]
async fn at_grpc_wiring_03_unreachable_service_is_internal_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = remote(addr);
    let web_eid = verifier(WorkflowTable::web_eid(), &client);
    let err = web_eid
        .verify(&header("s1"), RpcMethod::Challenge, TransportAuth::Ticket)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::Status(_)));
    assert_eq!(err.client_facing(), ClientFacingError::Internal);
}

#[tokio::test]
async fn at_grpc_wiring_04_silent_peer_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut cfg = local_config(addr);
    cfg.request_timeout = Duration::from_millis(200);
    let client = Arc::new(GrpcSessionStatusClient::connect_lazy(&cfg).unwrap());
    let web_eid = verifier(WorkflowTable::web_eid(), &client);

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        web_eid.verify(&header("s1"), RpcMethod::Challenge, TransportAuth::Ticket),
    )
    .await
    .expect("call must be bounded by the request timeout")
    .unwrap_err();
    assert!(
        matches!(err, VerifyError::Status(StatusClientError::Timeout(_))),
        "{err:?}"
    );
    assert_eq!(err.client_facing(), ClientFacingError::Internal);
}

#[tokio::test]
async fn at_grpc_wiring_05_configured_ttls_and_vote_completion_reach_the_store() {
    let store = InMemoryLeaseStore::new();
    let addr = spawn_server(store.clone()).await;
    let mut cfg = local_config(addr);
    cfg.ttl = SessionTtlConfig::v1(42, 120, 180, 600).unwrap();
    cfg.vote_completion = VoteCompletion::HandoffToVerification;
    let client = remote(addr);

    let web_eid = verifier_from_config(WorkflowKind::WebEid, &cfg, client.clone()).unwrap();
    let choices =
        verifier_from_config(WorkflowKind::ChoiceSelection, &cfg, client.clone()).unwrap();
    let votes = verifier_from_config(WorkflowKind::VoteCasting, &cfg, client.clone()).unwrap();
    let h = header("cfg_session_01");
    let remaining = |lease| store.time_to_live(lease).unwrap();
    let lease_of = |client: Arc<GrpcSessionStatusClient>, h: Header| async move {
        client
            .read(SessionStatusReadRequest::v1(h).unwrap())
            .await
            .unwrap()
            .record
            .lease
    };

    let challenge = web_eid
        .verify(&h, RpcMethod::Challenge, TransportAuth::Ticket)
        .await
        .unwrap();
    assert_eq!(
        challenge.outcome,
        AdvanceOutcome::Updated {
            ttl: TtlSeconds::new(42).unwrap()
        }
    );
    let ttl = remaining(lease_of(client.clone(), h.clone()).await);
    assert!(ttl <= Duration::from_secs(42) && ttl > Duration::from_secs(40), "{ttl:?}");

    web_eid
        .verify(&h, RpcMethod::Token, TransportAuth::Ticket)
        .await
        .unwrap();
    choices
        .verify(&h, RpcMethod::VoterChoices, TransportAuth::Ticket)
        .await
        .unwrap();
    let ttl = remaining(lease_of(client.clone(), h.clone()).await);
    assert!(ttl <= Duration::from_secs(120) && ttl > Duration::from_secs(118), "{ttl:?}");

    let voted = votes
        .verify(&h, RpcMethod::Vote, TransportAuth::Ticket)
        .await
        .unwrap();
    assert_eq!(
        voted.outcome,
        AdvanceOutcome::Updated {
            ttl: TtlSeconds::new(600).unwrap()
        }
    );
    assert_eq!(store.live_key_count(), 1);
    let ttl = remaining(lease_of(client.clone(), h.clone()).await);
    assert!(ttl <= Duration::from_secs(600) && ttl > Duration::from_secs(598), "{ttl:?}");
}
