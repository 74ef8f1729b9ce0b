#![forbid(unsafe_code)]

pub mod client;
pub mod sessionstatus;
pub mod verifier;
