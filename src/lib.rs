pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod models;
pub mod realtime;
pub mod transform;

use crate::api::ApiState;
use crate::config::DashboardConfig;
use crate::db::Database;
use crate::errors::AppResult;
use crate::identity::DemoUserService;
use crate::realtime::RandomRealtimeGenerator;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const SESSION_PRUNE_INTERVAL_SECS: u64 = 3600;

/// Opens the database and wires the default user service and realtime source.
pub fn build_state(config: &DashboardConfig) -> AppResult<ApiState> {
    let db = Arc::new(Database::new(&config.database_path())?);
    let users = DemoUserService::new(
        db.clone(),
        config.oauth.clone(),
        config.oauth_identity.clone(),
        config.session_max_age_days,
    );
    Ok(ApiState {
        db,
        users: Arc::new(users),
        realtime: Arc::new(RandomRealtimeGenerator::new()),
        cookie_name: config.session_cookie_name.clone(),
        cookie_max_age_secs: config.session_max_age_secs(),
    })
}

pub async fn run() -> anyhow::Result<()> {
    let config = DashboardConfig::load().context("failed to load dashboard config")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    if let Err(error) = init_tracing(&config.log_dir()) {
        eprintln!("failed to initialize tracing: {}", error);
    }

    let state = build_state(&config).context("failed to open dashboard database")?;
    tracing::info!(
        bind = %config.bind_addr,
        database = %state.db.path().display(),
        "dashboard starting"
    );

    tokio::spawn({
        let db = state.db.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
            loop {
                interval.tick().await;
                match db.prune_expired_sessions(chrono::Utc::now()) {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "pruned expired sessions"),
                    Err(error) => tracing::warn!(error = %error, "session pruning failed"),
                }
            }
        }
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    api::serve(listener, state).await?;
    Ok(())
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::build_state;
    use crate::config::DashboardConfig;

    #[test]
    fn build_state_seeds_database_under_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DashboardConfig {
            data_dir: dir.path().to_path_buf(),
            ..DashboardConfig::default()
        };
        let state = build_state(&config).expect("state");

        assert_eq!(state.db.path(), config.database_path().as_path());
        assert_eq!(state.cookie_name, "dataflow_session_token");
        assert_eq!(state.cookie_max_age_secs, 5_184_000);
        assert_eq!(state.db.list_sales().expect("sales").len(), 12);
    }
}
