#![forbid(unsafe_code)]

use collector_adapter::config::{
    duration_ms, load_server_tls, open_lease_store, ServerTransport, SessionStatusServerConfig,
};
use collector_adapter::server::{wait_for_shutdown, GrpcSessionStatus};
use collector_adapter::telemetry::init_tracing;
use collector_os::sessionstatus::SessionStatusService;
use collector_storage::lease_store::LeaseStoreClient;
use collector_storage::session_repo::LeaseStoreSessionRepo;
use tonic::transport::Server;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = SessionStatusServerConfig::from_env().map_err(|err| {
        error!(error = %err, "invalid session status configuration");
        err
    })?;

    let backend = open_lease_store(&config.backend).await.map_err(|err| {
        error!(store = config.backend.name(), error = %err, "cannot open lease store");
        err
    })?;
    let store = LeaseStoreClient::new(backend, config.store)?;
    let service = SessionStatusService::new(LeaseStoreSessionRepo::new(store), config.window)?;
    let grpc = GrpcSessionStatus::new(service);

    let mut builder = Server::builder();
    match &config.transport {
        ServerTransport::MutualTls(paths) => {
            builder = builder.tls_config(load_server_tls(paths)?)?;
        }
        ServerTransport::InsecurePlaintextLoopback => {
            warn!(bind = %config.bind, "serving plaintext on loopback; not for deployment");
        }
    }

    info!(
        bind = %config.bind,
        tls = config.transport.is_tls(),
        store = config.backend.name(),
        op_timeout_ms = duration_ms(config.store.op_timeout),
        max_retries = config.store.max_retries,
        "collector session status listening"
    );
    builder
        .add_service(grpc.into_server())
        .serve_with_shutdown(config.bind, wait_for_shutdown(tokio::signal::ctrl_c()))
        .await?;
    Ok(())
}
