pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;
pub mod telemetry;
