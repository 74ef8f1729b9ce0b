#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use collector_engines::workflow::{WorkflowKind, WorkflowTable};
use collector_kernel_contracts::sessionstatus::{
    SessionStatusAck, SessionStatusDeleteRequest, SessionStatusReadRequest,
    SessionStatusReadResponse, SessionStatusUpdateRequest,
};
use collector_os::client::{SessionStatusClient, StatusClientError};
use collector_os::verifier::SessionVerifier;
use tonic::transport::{Channel, Endpoint};
use tonic::{Response, Status};
use tracing::{debug, warn};

use crate::config::{
    duration_ms, load_client_tls, ClientTransport, ConfigError, SessionStatusClientConfig,
};
use crate::grpc_api::session_status_client::SessionStatusClient as GeneratedClient;
use crate::mapping::{
    client_error_from_status, delete_request_to_proto, read_request_to_proto,
    read_response_from_proto, update_request_to_proto,
};

/// Remote Session Status over gRPC. Cheap to clone; all clones share one
/// channel.
#[derive(Debug, Clone)]
pub struct GrpcSessionStatusClient {
    inner: GeneratedClient<Channel>,
    request_timeout: Duration,
}

impl GrpcSessionStatusClient {
    fn from_channel(channel: Channel, request_timeout: Duration) -> Self {
        Self {
            inner: GeneratedClient::new(channel),
            request_timeout,
        }
    }

    /// Builds the channel without dialing; the first call connects.
    pub fn connect_lazy(config: &SessionStatusClientConfig) -> Result<Self, ConfigError> {
        let mut endpoint = Endpoint::from_shared(config.endpoint.clone())?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);
        if let ClientTransport::MutualTls(paths) = &config.transport {
            endpoint = endpoint.tls_config(load_client_tls(paths, config.server_name.as_deref())?)?;
        }
        debug!(
            endpoint = %config.endpoint,
            tls = config.transport.is_tls(),
            request_timeout_ms = duration_ms(config.request_timeout),
            "session status channel configured"
        );
        Ok(Self::from_channel(endpoint.connect_lazy(), config.request_timeout))
    }

    /// Every call is bounded, including the time spent dialing.
    async fn call<T, F>(&self, endpoint: &'static str, fut: F) -> Result<T, StatusClientError>
    where
        F: Future<Output = Result<Response<T>, Status>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(resp)) => Ok(resp.into_inner()),
            Ok(Err(status)) => Err(client_error_from_status(&status)),
            Err(_) => {
                let timeout_ms = duration_ms(self.request_timeout);
                warn!(endpoint, timeout_ms, "session status call timed out");
                Err(StatusClientError::Timeout(format!(
                    "{endpoint} got no answer within {timeout_ms}ms"
                )))
            }
        }
    }
}

/// Verifier for `kind` with the TTLs and vote completion taken from
/// `config` rather than the built-in defaults.
pub fn verifier_from_config<C: SessionStatusClient>(
    kind: WorkflowKind,
    config: &SessionStatusClientConfig,
    client: C,
) -> Result<SessionVerifier<C>, ConfigError> {
    let table = WorkflowTable::for_kind(kind, config.vote_completion)?;
    Ok(SessionVerifier::new(table, config.ttl, client)?)
}

#[async_trait]
impl SessionStatusClient for GrpcSessionStatusClient {
    async fn read(
        &self,
        req: SessionStatusReadRequest,
    ) -> Result<SessionStatusReadResponse, StatusClientError> {
        let mut inner = self.inner.clone();
        let resp = self
            .call(
                "RPC.SessionStatusRead",
                inner.session_status_read(read_request_to_proto(&req)),
            )
            .await?;
        read_response_from_proto(resp).map_err(|err| {
            StatusClientError::Internal(format!("malformed session status response: {err}"))
        })
    }

    async fn update(
        &self,
        req: SessionStatusUpdateRequest,
    ) -> Result<SessionStatusAck, StatusClientError> {
        let mut inner = self.inner.clone();
        let resp = self
            .call(
                "RPC.SessionStatusUpdate",
                inner.session_status_update(update_request_to_proto(&req)),
            )
            .await?;
        Ok(SessionStatusAck::from_wire(resp.ok))
    }

    async fn delete(
        &self,
        req: SessionStatusDeleteRequest,
    ) -> Result<SessionStatusAck, StatusClientError> {
        let mut inner = self.inner.clone();
        let resp = self
            .call(
                "RPC.SessionStatusDelete",
                inner.session_status_delete(delete_request_to_proto(&req)),
            )
            .await?;
        Ok(SessionStatusAck::from_wire(resp.ok))
    }
}
