//! Infrastructure layer: SQLite persistence and configuration loading.

pub mod config;
pub mod sqlite;

pub use sqlite::journal::SqliteJournalRepository;
pub use sqlite::pool::DatabasePool;
