use clap::{Args, Parser, ValueEnum};
use ipnetwork::IpNetwork;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local stores; state is lost on restart
    Memory,
}

#[derive(Clone, Debug, Args)]
pub struct DatabaseConfig {
    /// Which storage backend holds users, refresh tokens and the used-token ledger
    #[arg(long = "storage", env = "TOKENVAULT_STORAGE", value_enum, default_value_t = StorageBackend::Postgres)]
    pub backend: StorageBackend,

    /// Database connection URL (required for the postgres backend)
    #[arg(long = "database-url", env = "TOKENVAULT_DATABASE_URL")]
    pub url: Option<String>,

    #[arg(long, env = "TOKENVAULT_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    #[arg(long, env = "TOKENVAULT_DB_MIN_CONNECTIONS", default_value_t = 2)]
    pub min_connections: u32,

    #[arg(long, env = "TOKENVAULT_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,

    #[arg(long, env = "TOKENVAULT_DB_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    #[arg(long, env = "TOKENVAULT_DB_MAX_LIFETIME_SECS", default_value_t = 1800)]
    pub max_lifetime_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "TOKENVAULT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "TOKENVAULT_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the health check listener
    #[arg(long, env = "TOKENVAULT_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Deployment environment; production marks the refresh cookie `Secure`
    #[arg(long, env = "TOKENVAULT_ENVIRONMENT", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    /// Seconds to wait for background tasks after the listeners stop
    #[arg(long, env = "TOKENVAULT_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Comma-separated list of CIDRs to trust for X-Forwarded-For IP extraction
    #[arg(
        long,
        env = "TOKENVAULT_TRUSTED_PROXIES",
        default_value = "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16,127.0.0.1/32",
        value_delimiter = ','
    )]
    pub trusted_proxies: Vec<IpNetwork>,
}

/// What the refresh flow does when the used-token ledger cannot be written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LedgerFailurePolicy {
    /// Log the failure and rotate anyway
    #[default]
    Continue,
    /// Fail the refresh with a storage error
    Abort,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret key for JWT signing
    #[arg(long, env = "TOKENVAULT_JWT_SECRET")]
    pub jwt_secret: String,

    /// Access token time-to-live in seconds
    #[arg(
        long,
        env = "TOKENVAULT_ACCESS_TOKEN_TTL_SECS",
        default_value_t = 900,
        value_parser = clap::value_parser!(u64).range(1..=86_400)
    )]
    pub access_token_ttl_secs: u64,

    /// Refresh token time-to-live in days
    #[arg(
        long,
        env = "TOKENVAULT_REFRESH_TOKEN_TTL_DAYS",
        default_value_t = 7,
        value_parser = clap::value_parser!(i64).range(1..=365)
    )]
    pub refresh_token_ttl_days: i64,

    /// Behaviour when recording a consumed refresh token fails
    #[arg(long, env = "TOKENVAULT_LEDGER_FAILURE_POLICY", value_enum, default_value_t = LedgerFailurePolicy::Continue)]
    pub ledger_failure_policy: LedgerFailurePolicy,

    /// How often to purge expired refresh tokens and ledger entries (0 disables)
    #[arg(long, env = "TOKENVAULT_CLEANUP_INTERVAL_SECS", default_value_t = 3600)]
    pub cleanup_interval_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct RateLimitConfig {
    /// Requests per second allowed for register/login
    #[arg(long, env = "TOKENVAULT_AUTH_RATE_LIMIT_PER_SECOND", default_value_t = 1)]
    pub auth_per_second: u32,

    /// Burst allowance for register/login
    #[arg(long, env = "TOKENVAULT_AUTH_RATE_LIMIT_BURST", default_value_t = 5)]
    pub auth_burst: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "TOKENVAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP gRPC endpoint for traces and metrics; exporting is disabled when unset
    #[arg(long, env = "TOKENVAULT_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
