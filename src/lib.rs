//! Grid compliance pipeline
//!
//! Evaluates uploaded distribution grid models against the voltage band of a
//! grid-connection code and records exactly one auditable verdict per distinct
//! model content, no matter how often or how concurrently a model is submitted.

pub mod compliance;
pub mod config;
pub mod domain;
pub mod pipeline;
pub mod power_flow;
pub mod repo;
pub mod telemetry;
