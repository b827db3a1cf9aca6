use crate::api;
use crate::bootstrap::{self, BootstrapResources};
use crate::config::ChecklistConfig;
use crate::database::Database;
use anyhow::Result;

/// Bootstraps the backend once and hands out cloned handles for whichever
/// entrypoint (CLI or REST server) needs them.
pub struct ChecklistNode {
    config: ChecklistConfig,
    bootstrap: BootstrapResources,
}

impl ChecklistNode {
    pub fn start(config: ChecklistConfig) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config)?;

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            database_initialized = bootstrap.database_initialized,
            database_file_created = bootstrap.database.newly_created(),
            db_path = %config.paths.db_path.display(),
            blog_id = config.blog_id,
            "checklist node initialized"
        );

        Ok(Self { config, bootstrap })
    }

    pub fn config(&self) -> &ChecklistConfig {
        &self.config
    }

    /// Returns a clone of the database handle.
    pub fn database(&self) -> Database {
        self.bootstrap.database.clone()
    }

    /// Runs the REST API server until shutdown.
    pub async fn run_http_server(&self) -> Result<()> {
        api::serve_http(self.config.clone(), self.database()).await
    }
}
