#![forbid(unsafe_code)]

pub mod workflow;
