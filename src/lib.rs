#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod repository;
pub mod services;
pub mod telemetry;
pub mod workers;

use crate::adapters::database::DbPool;
use crate::api::ServiceContainer;
use crate::api::rate_limit::CredentialLimiter;
use crate::config::{Config, StorageBackend};
use crate::repository::Repositories;
use crate::services::auth_service::AuthService;
use crate::services::health_service::HealthService;
use crate::services::password_service::PasswordService;
use crate::services::token_service::TokenService;
use crate::workers::TokenCleanupWorker;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Opens the configured storage backend. Postgres pools are migrated before use.
///
/// # Errors
/// Returns an error if the postgres backend has no URL, the connection fails or migrations fail.
pub async fn connect_repositories(config: &Config) -> anyhow::Result<Repositories> {
    match config.database.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; all sessions are lost on restart");
            Ok(Repositories::memory())
        }
        StorageBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("TOKENVAULT_DATABASE_URL is required for the postgres backend"))?;
            let pool = adapters::database::init_pool(&config.database, url).await?;
            run_migrations(&pool).await?;
            Ok(Repositories::postgres(pool))
        }
    }
}

/// # Errors
/// Returns an error if a migration fails to apply.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// Flips `shutdown_tx` on Ctrl-C or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach the configured log sink.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        tracing::error!(location = %location, payload = %payload, "Panic occurred");
    }));
}

#[derive(Debug)]
pub struct Workers {
    token_cleanup: TokenCleanupWorker,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![tokio::spawn(self.token_cleanup.run(shutdown_rx))]
    }
}

#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
    pub workers: Workers,
}

/// Wires services and workers on top of an already opened storage backend.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    repos: Option<Repositories>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, repos: None }
    }

    #[must_use]
    pub fn with_repositories(mut self, repos: Repositories) -> Self {
        self.repos = Some(repos);
        self
    }

    /// # Errors
    /// Returns an error if no repositories were supplied.
    pub fn build(self) -> anyhow::Result<App> {
        let repos = self.repos.ok_or_else(|| anyhow::anyhow!("Repositories are required"))?;
        let config = self.config;

        let auth_service = AuthService::new(
            repos.clone(),
            TokenService::new(config.auth.clone()),
            PasswordService::new(),
            config.auth.ledger_failure_policy,
        );
        let credential_limiter = CredentialLimiter::new(config.server.trusted_proxies.clone());
        let health_service = HealthService::new(repos.users);

        let token_cleanup =
            TokenCleanupWorker::new(repos.refresh_tokens, repos.used_tokens, config.auth.cleanup_interval_secs);

        Ok(App {
            services: ServiceContainer { auth_service, credential_limiter },
            health_service,
            workers: Workers { token_cleanup },
        })
    }
}
