//! Shared application state.
//!
//! Pins the engine's generics to the SQLite-backed repository and holds
//! everything the HTTP handlers need.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use stepflow_core::Engine;
use stepflow_infra::config::load_engine_config;
use stepflow_infra::{DatabasePool, SqliteJournalRepository};
use stepflow_types::config::EngineConfig;

pub type SqliteEngine = Engine<SqliteJournalRepository>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SqliteEngine>,
    pub config: EngineConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config, open the database, and
    /// construct the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(stepflow_infra::sqlite::pool::default_data_dir());
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;

        let db_url = config.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}?mode=rwc", data_dir.join("stepflow.db").display())
        });

        tracing::info!(data_dir = %data_dir.display(), "initializing engine");

        let pool = DatabasePool::new(&db_url)
            .await
            .context("failed to open database")?;
        let engine = Engine::new(SqliteJournalRepository::new(pool));

        Ok(Self {
            engine: Arc::new(engine),
            config,
            data_dir,
        })
    }
}
