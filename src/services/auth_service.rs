use crate::config::LedgerFailurePolicy;
use crate::domain::auth::{RefreshToken, hash_token};
use crate::domain::auth_session::AuthSession;
use crate::domain::device::DeviceId;
use crate::domain::user::{AuthUser, NewUser, Role, User};
use crate::error::{AppError, AuthFailure, Result};
use crate::repository::Repositories;
use crate::services::password_service::PasswordService;
use crate::services::token_service::{TokenError, TokenService};
use opentelemetry::{global, metrics::Counter};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    register_total: Counter<u64>,
    login_total: Counter<u64>,
    login_failures_total: Counter<u64>,
    refresh_total: Counter<u64>,
    reuse_detected_total: Counter<u64>,
    ledger_write_failures_total: Counter<u64>,
    logout_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("tokenvault-server");
        Self {
            register_total: meter
                .u64_counter("auth_register_total")
                .with_description("Total number of successful registrations")
                .build(),
            login_total: meter
                .u64_counter("auth_login_total")
                .with_description("Total number of successful login attempts")
                .build(),
            login_failures_total: meter
                .u64_counter("auth_login_failures_total")
                .with_description("Total number of rejected login attempts")
                .build(),
            refresh_total: meter
                .u64_counter("auth_refresh_total")
                .with_description("Total number of successful token rotations")
                .build(),
            reuse_detected_total: meter
                .u64_counter("auth_refresh_reuse_detected_total")
                .with_description("Total number of replayed refresh tokens that triggered mass revocation")
                .build(),
            ledger_write_failures_total: meter
                .u64_counter("auth_ledger_write_failures_total")
                .with_description("Total number of consumed refresh tokens that could not be recorded")
                .build(),
            logout_total: meter
                .u64_counter("auth_logout_total")
                .with_description("Total number of successful logout attempts")
                .build(),
        }
    }
}

/// Outcome of recording a consumed refresh token in the ledger.
#[derive(Debug)]
pub enum LedgerWrite {
    Recorded,
    Failed(AppError),
}

#[derive(Clone, Debug)]
pub struct AuthService {
    repos: Repositories,
    tokens: TokenService,
    passwords: PasswordService,
    ledger_failure_policy: LedgerFailurePolicy,
    metrics: Metrics,
}

impl AuthService {
    #[must_use]
    pub fn new(
        repos: Repositories,
        tokens: TokenService,
        passwords: PasswordService,
        ledger_failure_policy: LedgerFailurePolicy,
    ) -> Self {
        Self { repos, tokens, passwords, ledger_failure_policy, metrics: Metrics::new() }
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Creates a user and issues their first token pair for `device_id`.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the email is taken.
    #[tracing::instrument(
        skip(self, email, password, name, device_id),
        fields(user_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
        device_id: &DeviceId,
    ) -> Result<(User, AuthSession)> {
        if self.repos.users.find_by_email(email).await?.is_some() {
            return Err(AppError::BadRequest("Email is already registered".into()));
        }

        let password_hash = self.passwords.hash(password).await?;
        let user = self
            .repos
            .users
            .create(NewUser { email: email.to_string(), name, password_hash, role: Role::User })
            .await?;

        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        let session = self.tokens.issue(self.repos.refresh_tokens.as_ref(), &user, device_id).await?;

        tracing::info!("User registered successfully");
        self.metrics.register_total.add(1, &[]);

        Ok((user, session))
    }

    /// Verifies credentials and issues a pair, replacing the device's previous grant.
    ///
    /// # Errors
    /// Returns `AuthFailure::InvalidCredentials` whether the email is unknown or the password wrong.
    #[tracing::instrument(
        skip(self, email, password, device_id),
        fields(user_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn login(&self, email: &str, password: &str, device_id: &DeviceId) -> Result<AuthSession> {
        let Some(user) = self.repos.users.find_by_email(email).await? else {
            tracing::warn!("Login failed: user not found");
            self.metrics.login_failures_total.add(1, &[]);
            return Err(AuthFailure::InvalidCredentials.into());
        };

        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        if !self.passwords.verify(password, &user.password_hash).await? {
            tracing::warn!("Login failed: invalid password");
            self.metrics.login_failures_total.add(1, &[]);
            return Err(AuthFailure::InvalidCredentials.into());
        }

        let session = self.tokens.issue(self.repos.refresh_tokens.as_ref(), &user, device_id).await?;

        tracing::info!("User logged in successfully");
        self.metrics.login_total.add(1, &[]);

        Ok(session)
    }

    /// Exchanges a refresh token for a new pair bound to the same device.
    ///
    /// Presenting a token that was already exchanged revokes every grant the owner holds.
    /// All rejections look the same to the caller.
    ///
    /// # Errors
    /// Returns `AuthFailure::RefreshTokenRequired` without a token, `AuthFailure::RefreshTokenInvalid`
    /// for any token that cannot be exchanged.
    #[tracing::instrument(
        skip(self, presented),
        fields(user_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn refresh(&self, presented: Option<&str>) -> Result<AuthSession> {
        let Some(raw_token) = presented.filter(|t| !t.is_empty()) else {
            return Err(AuthFailure::RefreshTokenRequired.into());
        };
        let token_hash = hash_token(raw_token);

        let Some(grant) = self.repos.refresh_tokens.find_by_hash(&token_hash).await? else {
            self.detect_reuse(&token_hash).await?;
            return Err(AuthFailure::RefreshTokenInvalid.into());
        };

        tracing::Span::current().record("user_id", tracing::field::display(grant.user_id));

        if grant.is_expired() {
            tracing::debug!("Refresh token expired");
            self.repos.refresh_tokens.delete_by_hash(&token_hash).await?;
            return Err(AuthFailure::RefreshTokenInvalid.into());
        }

        let Some(user) = self.repos.users.find_by_id(grant.user_id).await? else {
            tracing::warn!("Refresh token owner no longer exists");
            return Err(AuthFailure::RefreshTokenInvalid.into());
        };

        if let LedgerWrite::Failed(error) = self.consume(&grant).await {
            self.metrics.ledger_write_failures_total.add(1, &[]);
            match self.ledger_failure_policy {
                LedgerFailurePolicy::Abort => {
                    tracing::error!(error = %error, "Failed to record consumed refresh token, aborting rotation");
                    return Err(error);
                }
                LedgerFailurePolicy::Continue => {
                    tracing::warn!(error = %error, "Failed to record consumed refresh token, rotating anyway");
                }
            }
        }

        let (session, replacement) = self.tokens.mint(&user, &grant.device_id)?;
        if !self.repos.refresh_tokens.rotate(&token_hash, &replacement).await? {
            // Someone else spent this grant between lookup and rotation.
            tracing::warn!("Refresh token consumed concurrently");
            self.detect_reuse(&token_hash).await?;
            return Err(AuthFailure::RefreshTokenInvalid.into());
        }

        tracing::info!("Tokens rotated successfully");
        self.metrics.refresh_total.add(1, &[]);

        Ok(session)
    }

    /// Revokes the grant matching `refresh_token`. Unknown tokens are not an error.
    ///
    /// # Errors
    /// Returns a storage error if the deletion fails.
    #[tracing::instrument(err, skip(self, refresh_token))]
    pub async fn logout(&self, refresh_token: &str) -> Result<bool> {
        let revoked = self.repos.refresh_tokens.delete_by_hash(&hash_token(refresh_token)).await?;
        tracing::info!(revoked, "User logged out");
        self.metrics.logout_total.add(1, &[]);
        Ok(revoked)
    }

    /// Revokes every grant the user holds, on every device.
    ///
    /// # Errors
    /// Returns a storage error if the deletion fails.
    #[tracing::instrument(err, skip(self), fields(user_id = %user_id))]
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64> {
        let revoked = self.repos.refresh_tokens.delete_all_for_user(user_id).await?;
        tracing::info!(revoked, "Revoked all refresh tokens");
        Ok(revoked)
    }

    /// Active grants for `user_id`, oldest first.
    ///
    /// # Errors
    /// Returns a storage error if the lookup fails.
    #[tracing::instrument(err, skip(self), fields(user_id = %user_id))]
    pub async fn sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        self.repos.refresh_tokens.list_for_user(user_id).await
    }

    /// Resolves a bearer access token to its (still existing) user.
    ///
    /// # Errors
    /// Returns `TokenExpired`, `TokenInvalid` or `UserNotFound` as an `AppError::Unauthorized`.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthUser> {
        let claims = self.tokens.verify(access_token).map_err(|e| match e {
            TokenError::Expired => AuthFailure::TokenExpired,
            TokenError::Invalid => AuthFailure::TokenInvalid,
        })?;

        let user = self.repos.users.find_by_id(claims.sub).await?.ok_or(AuthFailure::UserNotFound)?;

        Ok(AuthUser { id: user.id, name: user.name, email: user.email, role: user.role, jti: claims.jti })
    }

    async fn consume(&self, grant: &RefreshToken) -> LedgerWrite {
        match self.repos.used_tokens.record(&grant.consumed()).await {
            Ok(()) => LedgerWrite::Recorded,
            Err(e) => LedgerWrite::Failed(e),
        }
    }

    /// Revokes the whole session family if `token_hash` was already spent.
    async fn detect_reuse(&self, token_hash: &str) -> Result<()> {
        if let Some(used) = self.repos.used_tokens.find_by_hash(token_hash).await? {
            let revoked = self.repos.refresh_tokens.delete_all_for_user(used.user_id).await?;
            tracing::warn!(
                user_id = %used.user_id,
                device_id = %used.device_id,
                revoked,
                "Refresh token reuse detected, revoked all sessions"
            );
            self.metrics.reuse_detected_total.add(1, &[]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryRefreshTokenRepository, MemoryUsedTokenRepository, MemoryUserRepository};
    use crate::config::AuthConfig;
    use crate::domain::auth::UsedRefreshToken;
    use crate::domain::device::derive_device_id;
    use crate::repository::{RefreshTokenRepository, UsedTokenRepository};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::{Duration, OffsetDateTime};

    struct Harness {
        service: AuthService,
        users: Arc<MemoryUserRepository>,
        refresh_tokens: Arc<MemoryRefreshTokenRepository>,
        used_tokens: Arc<dyn UsedTokenRepository>,
    }

    fn harness_with(used_tokens: Arc<dyn UsedTokenRepository>, policy: LedgerFailurePolicy) -> Harness {
        let users = Arc::new(MemoryUserRepository::new());
        let refresh_tokens = Arc::new(MemoryRefreshTokenRepository::new());
        let repos = Repositories {
            users: Arc::clone(&users) as Arc<dyn crate::repository::UserRepository>,
            refresh_tokens: Arc::clone(&refresh_tokens) as Arc<dyn RefreshTokenRepository>,
            used_tokens: Arc::clone(&used_tokens),
        };
        let tokens = TokenService::new(AuthConfig {
            jwt_secret: "test_secret".to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_days: 7,
            ledger_failure_policy: policy,
            cleanup_interval_secs: 0,
        });
        let service = AuthService::new(repos, tokens, PasswordService::new(), policy);
        Harness { service, users, refresh_tokens, used_tokens }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryUsedTokenRepository::new()), LedgerFailurePolicy::Continue)
    }

    fn device(name: &str) -> DeviceId {
        derive_device_id(Some(name))
    }

    fn assert_unauthorized(result: Result<AuthSession>, expected: AuthFailure) {
        match result {
            Err(AppError::Unauthorized(failure)) => assert_eq!(failure, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let h = harness();
        let (user, session) = h.service.register("a@x.com", "secret1", None, &device("ua")).await.unwrap();

        let claims = h.service.tokens().verify(&session.access_token).unwrap();
        assert_eq!(claims.sub, user.id);

        let login = h.service.login("A@X.com", "secret1", &device("ua")).await.unwrap();
        assert_ne!(login.refresh_token, session.refresh_token);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let h = harness();
        h.service.register("a@x.com", "secret1", None, &device("ua")).await.unwrap();

        let result = h.service.register("A@x.com", "secret2", None, &device("ua")).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let h = harness();
        h.service.register("a@x.com", "secret1", None, &device("ua")).await.unwrap();

        assert_unauthorized(h.service.login("a@x.com", "wrong", &device("ua")).await, AuthFailure::InvalidCredentials);
        assert_unauthorized(
            h.service.login("nobody@x.com", "secret1", &device("ua")).await,
            AuthFailure::InvalidCredentials,
        );
    }

    #[tokio::test]
    async fn test_login_keeps_one_grant_per_device() {
        let h = harness();
        let (user, _) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        h.service.login("a@x.com", "secret1", &device("phone")).await.unwrap();
        let latest = h.service.login("a@x.com", "secret1", &device("phone")).await.unwrap();
        h.service.login("a@x.com", "secret1", &device("laptop")).await.unwrap();

        let grants = h.refresh_tokens.list_for_user(user.id).await.unwrap();
        assert_eq!(grants.len(), 2);
        let phone_grants: Vec<_> = grants.iter().filter(|g| g.device_id == device("phone")).collect();
        assert_eq!(phone_grants.len(), 1);
        assert_eq!(phone_grants[0].token_hash, hash_token(&latest.refresh_token));
    }

    #[tokio::test]
    async fn test_refresh_requires_token() {
        let h = harness();
        assert_unauthorized(h.service.refresh(None).await, AuthFailure::RefreshTokenRequired);
        assert_unauthorized(h.service.refresh(Some("")).await, AuthFailure::RefreshTokenRequired);
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let h = harness();
        assert_unauthorized(h.service.refresh(Some("deadbeef")).await, AuthFailure::RefreshTokenInvalid);
    }

    #[tokio::test]
    async fn test_refresh_rotates_on_same_device() {
        let h = harness();
        let (user, first) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        let second = h.service.refresh(Some(&first.refresh_token)).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let grants = h.refresh_tokens.list_for_user(user.id).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].device_id, device("phone"));
        assert_eq!(grants[0].token_hash, hash_token(&second.refresh_token));

        let used = h.used_tokens.find_by_hash(&hash_token(&first.refresh_token)).await.unwrap().unwrap();
        assert_eq!(used.user_id, user.id);
    }

    #[tokio::test]
    async fn test_reuse_revokes_every_device() {
        let h = harness();
        let (user, phone) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();
        let laptop = h.service.login("a@x.com", "secret1", &device("laptop")).await.unwrap();

        let rotated = h.service.refresh(Some(&phone.refresh_token)).await.unwrap();
        assert_unauthorized(h.service.refresh(Some(&phone.refresh_token)).await, AuthFailure::RefreshTokenInvalid);

        assert!(h.refresh_tokens.list_for_user(user.id).await.unwrap().is_empty());
        assert_unauthorized(h.service.refresh(Some(&rotated.refresh_token)).await, AuthFailure::RefreshTokenInvalid);
        assert_unauthorized(h.service.refresh(Some(&laptop.refresh_token)).await, AuthFailure::RefreshTokenInvalid);
    }

    #[tokio::test]
    async fn test_expired_grant_is_rejected_and_removed() {
        let h = harness();
        let (user, _) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let stale = RefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_token("stale-token"),
            device_id: device("tablet"),
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::days(7),
        };
        h.refresh_tokens.upsert_for_device(&stale).await.unwrap();

        assert_unauthorized(h.service.refresh(Some("stale-token")).await, AuthFailure::RefreshTokenInvalid);
        assert!(h.refresh_tokens.find_by_hash(&stale.token_hash).await.unwrap().is_none());
        assert_eq!(h.refresh_tokens.list_for_user(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_owner_is_rejected() {
        let h = harness();
        let (user, session) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();
        h.users.remove(user.id);

        assert_unauthorized(h.service.refresh(Some(&session.refresh_token)).await, AuthFailure::RefreshTokenInvalid);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let h = harness();
        let (_, session) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        assert!(h.service.logout(&session.refresh_token).await.unwrap());
        assert!(!h.service.logout(&session.refresh_token).await.unwrap());
        assert_unauthorized(h.service.refresh(Some(&session.refresh_token)).await, AuthFailure::RefreshTokenInvalid);
    }

    #[tokio::test]
    async fn test_logout_all() {
        let h = harness();
        let (user, _) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();
        h.service.login("a@x.com", "secret1", &device("laptop")).await.unwrap();

        assert_eq!(h.service.logout_all(user.id).await.unwrap(), 2);
        assert!(h.refresh_tokens.list_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let h = harness();
        let (user, session) =
            h.service.register("a@x.com", "secret1", Some("Alice".into()), &device("phone")).await.unwrap();

        let auth_user = h.service.authenticate(&session.access_token).await.unwrap();
        assert_eq!(auth_user.id, user.id);
        assert_eq!(auth_user.name.as_deref(), Some("Alice"));
        assert_eq!(auth_user.role, Role::User);

        h.users.remove(user.id);
        let result = h.service.authenticate(&session.access_token).await;
        assert!(matches!(result, Err(AppError::Unauthorized(AuthFailure::UserNotFound))));

        let result = h.service.authenticate("not-a-jwt").await;
        assert!(matches!(result, Err(AppError::Unauthorized(AuthFailure::TokenInvalid))));
    }

    #[derive(Debug)]
    struct UnwritableLedger;

    #[async_trait]
    impl UsedTokenRepository for UnwritableLedger {
        async fn record(&self, _: &UsedRefreshToken) -> Result<()> {
            Err(AppError::Storage("ledger unavailable".into()))
        }
        async fn find_by_hash(&self, _: &str) -> Result<Option<UsedRefreshToken>> {
            Ok(None)
        }
        async fn purge_expired(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_continue_still_rotates() {
        let h = harness_with(Arc::new(UnwritableLedger), LedgerFailurePolicy::Continue);
        let (_, session) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        let rotated = h.service.refresh(Some(&session.refresh_token)).await.unwrap();
        assert_ne!(rotated.refresh_token, session.refresh_token);
    }

    #[tokio::test]
    async fn test_ledger_failure_abort_keeps_old_grant() {
        let h = harness_with(Arc::new(UnwritableLedger), LedgerFailurePolicy::Abort);
        let (_, session) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        let result = h.service.refresh(Some(&session.refresh_token)).await;
        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(h.refresh_tokens.find_by_hash(&hash_token(&session.refresh_token)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_of_one_token_yields_one_winner() {
        let h = harness();
        let (user, session) = h.service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();

        let (a, b) = tokio::join!(
            h.service.refresh(Some(&session.refresh_token)),
            h.service.refresh(Some(&session.refresh_token))
        );

        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);
        // The loser replays a spent token, which revokes the winner's grant too.
        assert!(h.refresh_tokens.list_for_user(user.id).await.unwrap().is_empty());
    }

    /// A store where every rotation loses to a concurrent exchange.
    #[derive(Debug, Default)]
    struct LostRotation {
        inner: MemoryRefreshTokenRepository,
        revocations: AtomicUsize,
    }

    #[async_trait]
    impl RefreshTokenRepository for LostRotation {
        async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
            self.inner.find_by_hash(token_hash).await
        }
        async fn upsert_for_device(&self, token: &RefreshToken) -> Result<()> {
            self.inner.upsert_for_device(token).await
        }
        async fn rotate(&self, _: &str, _: &RefreshToken) -> Result<bool> {
            Ok(false)
        }
        async fn delete_by_hash(&self, token_hash: &str) -> Result<bool> {
            self.inner.delete_by_hash(token_hash).await
        }
        async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64> {
            self.revocations.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_all_for_user(user_id).await
        }
        async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
            self.inner.list_for_user(user_id).await
        }
        async fn delete_expired(&self) -> Result<u64> {
            self.inner.delete_expired().await
        }
    }

    #[tokio::test]
    async fn test_lost_rotation_rejects_and_revokes_family() {
        let refresh_tokens = Arc::new(LostRotation::default());
        let repos = Repositories {
            users: Arc::new(MemoryUserRepository::new()),
            refresh_tokens: Arc::clone(&refresh_tokens) as Arc<dyn RefreshTokenRepository>,
            used_tokens: Arc::new(MemoryUsedTokenRepository::new()),
        };
        let tokens = TokenService::new(AuthConfig {
            jwt_secret: "test_secret".to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_days: 7,
            ledger_failure_policy: LedgerFailurePolicy::Continue,
            cleanup_interval_secs: 0,
        });
        let service = AuthService::new(repos, tokens, PasswordService::new(), LedgerFailurePolicy::Continue);

        let (user, session) = service.register("a@x.com", "secret1", None, &device("phone")).await.unwrap();
        service.login("a@x.com", "secret1", &device("laptop")).await.unwrap();

        let result = service.refresh(Some(&session.refresh_token)).await;
        assert!(matches!(result, Err(AppError::Unauthorized(AuthFailure::RefreshTokenInvalid))));
        assert_eq!(refresh_tokens.revocations.load(Ordering::SeqCst), 1);
        assert!(refresh_tokens.list_for_user(user.id).await.unwrap().is_empty());
    }
}
