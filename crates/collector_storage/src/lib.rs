#![forbid(unsafe_code)]

pub mod etcd_store;
pub mod lease_store;
pub mod repo;
pub mod session_repo;
