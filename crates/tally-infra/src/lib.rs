//! Tally infrastructure
//!
//! Process-level concerns shared by the worker and the CLI: tracing setup
//! and shutdown signal handling.

pub mod signal;
pub mod telemetry;

pub use signal::shutdown_signal;
pub use telemetry::init_telemetry;
