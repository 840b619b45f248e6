pub mod auth;
pub mod db;

pub use auth::AuthAdapter;
pub use db::DbAdapter;

use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::AppError;

/// Both adapters, connected to the same database and ready for use.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<AuthAdapter>,
    pub store: Arc<DbAdapter>,
}

impl Backend {
    /// Connects to the configured database, runs migrations and checks the project key.
    pub async fn open(config: &Config) -> Result<Self, AppError> {
        let backend = &config.backend;
        // Every connection to an in-memory database is a separate database.
        let in_memory = backend.database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            // Closing the only connection would drop the database with it.
            options = options.idle_timeout(None).max_lifetime(None);
        }

        info!("Connecting to database...");
        let pool = options.connect(&backend.database_url).await?;

        let store = Arc::new(DbAdapter::new(pool.clone(), backend.project_id.clone()));
        info!("Running database migrations...");
        store.run_migrations().await?;
        info!("Database migrations complete.");
        store.register_project(&backend.api_key).await?;

        let auth = Arc::new(AuthAdapter::new(
            pool,
            backend.project_id.clone(),
            config.min_password_len,
        ));
        Ok(Self { auth, store })
    }
}
