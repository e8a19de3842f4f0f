//! SQLite-backed persistence.

pub mod journal;
pub mod pool;
