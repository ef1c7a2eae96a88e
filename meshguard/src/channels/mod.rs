//! Error-chain types shared by the telemetry formatter and every fallible
//! operation in the orchestration core.

pub mod errors;
