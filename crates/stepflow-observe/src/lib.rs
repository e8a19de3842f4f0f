//! Observability setup for the stepflow service.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
