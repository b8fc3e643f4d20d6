//! Trapwire daemon library.
//!
//! Exposes the daemon modules for integration testing.
//! In production, `trapwire-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod health;
pub mod live_feed;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
