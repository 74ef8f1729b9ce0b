#![forbid(unsafe_code)]

use std::future::Future;
use std::io;
use std::sync::Arc;

use collector_os::sessionstatus::SessionStatusService;
use collector_storage::repo::SessionStatusRepo;
use tonic::{Request, Response, Status};
use tracing::{error, info, warn};

use crate::grpc_api::{
    session_status_server::{SessionStatus, SessionStatusServer},
    SessionStatusDeleteRequest, SessionStatusDeleteResponse, SessionStatusReadRequest,
    SessionStatusReadResponse, SessionStatusUpdateRequest, SessionStatusUpdateResponse,
};
use crate::mapping::{
    delete_ack_to_proto, delete_request_from_proto, read_request_from_proto,
    read_response_to_proto, status_from_service_error, update_ack_to_proto,
    update_request_from_proto,
};

/// gRPC face of the Session Status service. Every request is validated at the
/// boundary before it reaches the service.
pub struct GrpcSessionStatus<R> {
    service: Arc<SessionStatusService<R>>,
}

impl<R> Clone for GrpcSessionStatus<R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<R: SessionStatusRepo + 'static> GrpcSessionStatus<R> {
    pub fn new(service: SessionStatusService<R>) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn into_server(self) -> SessionStatusServer<Self> {
        SessionStatusServer::new(self)
    }
}

/// Resolves once `signal` fires. If the signal listener cannot be installed
/// the future never resolves and the server keeps serving.
pub async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!(error = %err, "cannot listen for shutdown signal; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[tonic::async_trait]
impl<R: SessionStatusRepo + 'static> SessionStatus for GrpcSessionStatus<R> {
    async fn session_status_read(
        &self,
        request: Request<SessionStatusReadRequest>,
    ) -> Result<Response<SessionStatusReadResponse>, Status> {
        let req = read_request_from_proto(request.into_inner()).map_err(|err| {
            warn!(endpoint = "RPC.SessionStatusRead", error = %err, "rejected malformed request");
            Status::from(err)
        })?;
        let resp = self
            .service
            .read(&req)
            .await
            .map_err(|err| status_from_service_error(&err))?;
        Ok(Response::new(read_response_to_proto(&resp)))
    }

    async fn session_status_update(
        &self,
        request: Request<SessionStatusUpdateRequest>,
    ) -> Result<Response<SessionStatusUpdateResponse>, Status> {
        let req = update_request_from_proto(request.into_inner()).map_err(|err| {
            warn!(endpoint = "RPC.SessionStatusUpdate", error = %err, "rejected malformed request");
            Status::from(err)
        })?;
        let ack = self
            .service
            .update(&req)
            .await
            .map_err(|err| status_from_service_error(&err))?;
        Ok(Response::new(update_ack_to_proto(ack)))
    }

    async fn session_status_delete(
        &self,
        request: Request<SessionStatusDeleteRequest>,
    ) -> Result<Response<SessionStatusDeleteResponse>, Status> {
        let req = delete_request_from_proto(request.into_inner()).map_err(|err| {
            warn!(endpoint = "RPC.SessionStatusDelete", error = %err, "rejected malformed request");
            Status::from(err)
        })?;
        let ack = self
            .service
            .delete(&req)
            .await
            .map_err(|err| status_from_service_error(&err))?;
        Ok(Response::new(delete_ack_to_proto(ack)))
    }
}
