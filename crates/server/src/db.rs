use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a PostgreSQL connection pool.
/// Returns None if PostgreSQL is not configured or unreachable.
///
/// The schema belongs to the services that create runs, so no migrations run here.
pub async fn init_pg_pool(config: &agentrun_core::config::PostgresConfig) -> Option<PgPool> {
    if !config.is_configured() {
        warn!("PG_URL not configured, run lookups and access checks disabled");
        return None;
    }

    match PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url())
        .await
    {
        Ok(pool) => {
            info!("PostgreSQL connected: {}", config.host);
            Some(pool)
        }
        Err(e) => {
            warn!("Failed to connect to PostgreSQL: {}, run endpoints disabled", e);
            None
        }
    }
}
