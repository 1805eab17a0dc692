use std::sync::Arc;
use std::time::Duration;

use affinity_config::AppConfig;
use affinity_db::{CleanupReport, RecordStore};
use chrono::Utc;
use tracing::{info, warn};

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: RecordStore,
}

impl AppState {
    pub fn new(config: AppConfig, store: RecordStore) -> Self {
        Self { config, store }
    }

    /// Apply the configured retention horizon once across all users.
    pub fn run_retention(&self) -> affinity_common::Result<CleanupReport> {
        let retention = &self.config.retention;
        self.store
            .cleanup(retention.cutoff(Utc::now()), retention.min_importance)
    }

    /// Spawn a background task that periodically applies retention.
    /// Does nothing unless `retention.interval_secs` is set.
    pub fn spawn_retention_cleanup(self: &Arc<Self>) {
        let Some(secs) = self.config.retention.interval_secs.filter(|s| *s > 0) else {
            return;
        };

        info!(
            "retention cleanup every {secs}s (keep {} days, min importance {})",
            self.config.retention.days_to_keep, self.config.retention.min_importance
        );

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            loop {
                interval.tick().await;
                if let Err(e) = state.run_retention() {
                    warn!("retention cleanup failed: {e}");
                }
            }
        });
    }
}

pub type SharedState = Arc<AppState>;
