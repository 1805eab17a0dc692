use std::path::PathBuf;
use std::sync::Arc;

use affinity_common::Result;
use affinity_config::{AppConfig, ConfigLoader};
use affinity_db::RecordStore;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Binds a port and serves the record store API.
pub struct GatewayServer {
    config: AppConfig,
    config_dir: PathBuf,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            config_dir: ConfigLoader::default_config_dir(),
        }
    }

    /// Resolve relative storage paths against `config_dir` instead of the default.
    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = config_dir.into();
        self
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let db_path = self.config.database_path(&self.config_dir);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = RecordStore::open(&db_path)?;

        let state = Arc::new(AppState::new(self.config, store));
        state.spawn_retention_cleanup();
        let app = build_router(state);

        info!("Affinity gateway listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .await
            .map_err(|e| affinity_common::Error::Gateway(format!("server error: {e}")))?;

        Ok(())
    }
}
