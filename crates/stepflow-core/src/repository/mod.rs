//! Persistence ports and in-memory implementations.

pub mod journal;
pub mod memory;
