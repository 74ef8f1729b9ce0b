#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod mapping;
pub mod server;
pub mod telemetry;

/// Wire messages and generated service plumbing for
/// `collector.sessionstatus.v1.SessionStatus`, compiled from
/// `proto/sessionstatus.proto`.
pub mod grpc_api {
    tonic::include_proto!("collector.sessionstatus.v1");
}
