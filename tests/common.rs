#![allow(dead_code)]

use clap::Parser;
use reqwest::header::{COOKIE, HeaderMap, SET_COOKIE};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Once;
use tokenvault_server::AppBuilder;
use tokenvault_server::config::Config;
use tokenvault_server::domain::auth::Claims;
use tokenvault_server::domain::user::Role;
use tokenvault_server::repository::Repositories;
use tokenvault_server::services::token_service::TokenService;
use tokio::net::TcpListener;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret";

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("tokenvault_server=debug".parse().unwrap())
            .add_directive("sqlx=warn".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

pub fn get_test_config() -> Config {
    Config::parse_from([
        "tokenvault-server",
        "--storage",
        "memory",
        "--jwt-secret",
        JWT_SECRET,
        "--port",
        "0",
        "--auth-per-second",
        "10000",
        "--auth-burst",
        "10000",
        "--cleanup-interval-secs",
        "0",
    ])
}

/// A server bound to an ephemeral port, backed by in-memory stores unless told otherwise.
pub struct TestApp {
    pub server_url: String,
    pub client: reqwest::Client,
    pub config: Config,
    pub repos: Repositories,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(get_test_config(), Repositories::memory()).await
    }

    pub async fn spawn_with(config: Config, repos: Repositories) -> Self {
        setup_tracing();

        let app = AppBuilder::new(config.clone()).with_repositories(repos.clone()).build().unwrap();
        let router = tokenvault_server::api::app_router(config.clone(), app.services);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
        });

        Self { server_url: format!("http://{addr}"), client: reqwest::Client::new(), config, repos }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    pub async fn register(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/register"))
            .json(&json!({ "email": email, "password": password, "name": "Test User" }))
            .send()
            .await
            .unwrap()
    }

    pub async fn login_as(&self, email: &str, password: &str, device: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .header("x-device-id", device)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap()
    }

    /// Presents `refresh_token` the way a browser would: in the cookie only.
    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/refresh"))
            .header(COOKIE, format!("refreshToken={refresh_token}"))
            .send()
            .await
            .unwrap()
    }

    pub async fn me(&self, access_token: &str) -> reqwest::Response {
        self.client.get(self.url("/auth/me")).bearer_auth(access_token).send().await.unwrap()
    }

    /// Signs claims with the server secret, for tokens the API would never hand out.
    pub fn sign(&self, claims: &Claims) -> String {
        TokenService::new(self.config.auth.clone()).sign(claims).unwrap()
    }
}

pub fn unique_email(prefix: &str) -> String {
    format!("{prefix}_{}@example.com", &Uuid::new_v4().simple().to_string()[..8])
}

/// Extracts the refresh token from a `Set-Cookie` header.
pub fn refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("refreshToken="))
        .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
}

pub fn set_cookie(headers: &HeaderMap) -> String {
    headers.get(SET_COOKIE).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

pub async fn body(resp: reqwest::Response) -> Value {
    resp.json().await.unwrap()
}

pub fn expired_claims(sub: Uuid) -> Claims {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    Claims { sub, jti: Uuid::new_v4(), role: Role::User, iat: now - 3600, exp: now - 60 }
}
