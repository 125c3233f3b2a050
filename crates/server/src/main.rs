use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use agentrun_core::Config;
use agentrun_relay::RedisBroker;
use agentrun_server::cli::{Cli, Command};
use agentrun_server::run_store::{PgRunStore, RunStore};
use agentrun_server::runs::stop_agent_run;
use agentrun_server::{build_router, db, AppState};

fn load_config(profile: Option<&str>) -> Config {
    match profile {
        Some(p) => Config::for_profile(p),
        None => Config::from_env(),
    }
}

/// Connect to Redis (required) and PostgreSQL (optional).
async fn connect(config: Config) -> anyhow::Result<AppState> {
    let broker = RedisBroker::connect(&config.redis.connection_url())
        .await
        .context("failed to connect to Redis")?;
    broker.ping().await.context("Redis did not answer PING")?;

    let runs = db::init_pg_pool(&config.postgres)
        .await
        .map(|pool| Arc::new(PgRunStore::new(pool)) as Arc<dyn RunStore>);

    Ok(AppState::new(config, Arc::new(broker), runs))
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl_c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, ending open streams");
    state.begin_shutdown();
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(connect(config).await?);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn stop(config: Config, run_id: &str, error: Option<&str>) -> anyhow::Result<()> {
    let state = connect(config).await?;
    let report = stop_agent_run(&state, run_id, error).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn profiles() {
    for profile in Config::available_profiles() {
        println!("{}", profile);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    agentrun_core::config::load_dotenv();
    let cli = Cli::parse();
    let config = load_config(cli.profile.as_deref());

    match cli.command() {
        Command::Serve => serve(config).await?,
        Command::Stop { run_id, error } => stop(config, &run_id, error.as_deref()).await?,
        Command::Profiles => profiles(),
    }

    Ok(())
}
