use crate::config::AuthConfig;
use crate::domain::auth::{Claims, RefreshToken, hash_token};
use crate::domain::auth_session::AuthSession;
use crate::domain::device::DeviceId;
use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::repository::RefreshTokenRepository;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use rand::{RngCore, rngs::OsRng};
use time::OffsetDateTime;
use uuid::Uuid;

const REFRESH_TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

/// Mints access/refresh pairs and verifies access tokens.
#[derive(Clone, Debug)]
pub struct TokenService {
    config: AuthConfig,
}

impl TokenService {
    #[must_use]
    pub const fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn access_token_ttl_secs(&self) -> u64 {
        self.config.access_token_ttl_secs
    }

    /// Cookie lifetime matching the refresh grant.
    #[must_use]
    pub const fn refresh_token_ttl_secs(&self) -> i64 {
        self.config.refresh_token_ttl_days * 86_400
    }

    /// Signs a claim set with the server secret.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if signing fails.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()))
            .map_err(|_| AppError::Internal)
    }

    /// Verifies signature and expiry with no clock leeway.
    ///
    /// # Errors
    /// Returns `TokenError::Expired` for a well-signed token past `exp`, `TokenError::Invalid` otherwise.
    pub fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        decode::<Claims>(token, &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    /// Builds a token pair plus the grant record that must be persisted before the pair is handed out.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the access token cannot be signed.
    pub fn mint(&self, user: &User, device_id: &DeviceId) -> Result<(AuthSession, RefreshToken)> {
        let claims = Claims::new(user.id, user.role, self.config.access_token_ttl_secs);
        let access_token = self.sign(&claims)?;
        let refresh_token = generate_refresh_token();

        let now = OffsetDateTime::now_utc();
        let grant = RefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_token(&refresh_token),
            device_id: device_id.clone(),
            expires_at: now + time::Duration::days(self.config.refresh_token_ttl_days),
            created_at: now,
        };

        let session =
            AuthSession { access_token, refresh_token, expires_in: self.config.access_token_ttl_secs };

        Ok((session, grant))
    }

    /// Mints a pair and stores its grant, replacing whatever the device held before.
    ///
    /// # Errors
    /// Returns a storage error if the grant could not be persisted; no pair is returned in that case.
    #[tracing::instrument(err, skip(self, refresh_tokens, user, device_id), fields(user_id = %user.id))]
    pub async fn issue(
        &self,
        refresh_tokens: &dyn RefreshTokenRepository,
        user: &User,
        device_id: &DeviceId,
    ) -> Result<AuthSession> {
        let (session, grant) = self.mint(user, device_id)?;
        refresh_tokens.upsert_for_device(&grant).await?;
        Ok(session)
    }
}

/// 64 bytes from the OS RNG, hex encoded.
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
