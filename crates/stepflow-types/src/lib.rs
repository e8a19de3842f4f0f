//! Shared domain types for Stepflow.
//!
//! This crate contains the core domain types used across the Stepflow
//! engine: workflow instances, journal records, retry policies, buffered
//! events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod instance;
pub mod journal;
pub mod retry;
