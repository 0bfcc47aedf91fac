//! Scenario-based tests for conduit

mod concurrency;
mod failure_cascade;
mod infra_retry;
mod linear_chain;
mod manual_gate;
#[cfg(feature = "sqlite")]
mod resume;
