#![forbid(unsafe_code)]

pub mod common;
pub mod session;
pub mod sessionstatus;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};
