//! Device identifiers scope a refresh grant to one client.

use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fingerprint used by HTTP call sites when the client declares nothing at all.
pub const PLACEHOLDER_FINGERPRINT: &str = "unknown-device";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps an id read back from storage.
    #[must_use]
    pub const fn from_stored(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives a device id from a client fingerprint.
///
/// A non-empty fingerprint hashes to the same SHA-256 hex digest every time.
/// Without one the id is 32 random bytes, so the caller gets a fresh device on each call.
#[must_use]
pub fn derive_device_id(fingerprint: Option<&str>) -> DeviceId {
    match fingerprint.filter(|f| !f.is_empty()) {
        Some(fingerprint) => {
            let mut hasher = Sha256::new();
            hasher.update(fingerprint.as_bytes());
            DeviceId(hex::encode(hasher.finalize()))
        }
        None => {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            DeviceId(hex::encode(bytes))
        }
    }
}

/// Picks the fingerprint for a request: declared id, then `X-Device-Id`, then
/// `User-Agent`, then [`PLACEHOLDER_FINGERPRINT`].
#[must_use]
pub fn resolve_fingerprint<'a>(
    declared: Option<&'a str>,
    device_header: Option<&'a str>,
    user_agent: Option<&'a str>,
) -> &'a str {
    [declared, device_header, user_agent]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(PLACEHOLDER_FINGERPRINT)
}
