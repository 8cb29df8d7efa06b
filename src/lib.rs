//! perchd - federated presence and roster daemon.
//!
//! The core of the server: subscription state, roster storage and
//! synchronization, presence broadcast, and the thin line-delimited JSON
//! gateway clients speak. The binary in `main.rs` wires this library to
//! configuration and the metrics endpoint.

pub mod accounts;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod metrics;
pub mod network;
pub mod offline;
pub mod presence;
pub mod roster;
pub mod session;
pub mod state;
pub mod telemetry;
