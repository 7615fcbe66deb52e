// Common library for the job dispatcher: store, polling, dispatch and producers

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod executor;
pub mod models;
pub mod queue;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod worker;
