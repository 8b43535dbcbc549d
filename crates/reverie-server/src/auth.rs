//! API-key authentication.
//!
//! Every request carries an opaque key in the `X-API-Key` header, shaped
//! `<key-id>.<secret>`. Only the salted, iterated SHA-256 hash of the secret
//! is stored; comparison is constant-time. Each key carries a permission
//! set, an optional per-key rate limit, and an optional expiry.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use reverie_memory::{ApiKeyRecord, Permission};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Length of a generated secret, bytes of entropy before hex encoding.
const SECRET_BYTES: usize = 24;

/// Length of a per-key salt.
const SALT_BYTES: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Auth context
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated caller, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: String,
    pub permissions: Vec<Permission>,
    /// Per-key rate limit; `None` falls back to the global quota.
    pub rate_limit_rpm: Option<u32>,
}

impl AuthContext {
    /// Whether this caller holds `required`, directly or via an implying
    /// scope.
    pub fn can(&self, required: Permission) -> bool {
        self.permissions.iter().any(|p| p.allows(required))
    }

    /// Fail with a permission error unless the caller holds `required`.
    pub fn require(&self, required: Permission) -> Result<(), ApiError> {
        if self.can(required) {
            Ok(())
        } else {
            Err(ApiError::Permission(format!(
                "key lacks '{}' scope",
                required.as_str()
            )))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hashing
// ─────────────────────────────────────────────────────────────────────────────

/// Hash a secret with its salt, iterated `2^salt_rounds` times.
///
/// The iteration count is the cost knob, bcrypt-style; each round feeds the
/// previous digest and the salt back through SHA-256.
pub fn hash_secret(secret: &str, salt: &[u8], salt_rounds: u32) -> Vec<u8> {
    let iterations = 1u64 << salt_rounds.min(31);
    let mut digest = {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(secret.as_bytes());
        hasher.finalize()
    };
    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt);
        digest = hasher.finalize();
    }
    digest.to_vec()
}

/// Generate a fresh key: the record to persist plus the full plaintext key
/// shown to the operator exactly once.
pub fn generate_key(
    name: &str,
    permissions: Vec<Permission>,
    rate_limit_rpm: Option<u32>,
    expires_in_days: Option<i64>,
    salt_rounds: u32,
) -> (ApiKeyRecord, String) {
    let mut rng = rand::thread_rng();

    let mut id_bytes = [0u8; 8];
    rng.fill_bytes(&mut id_bytes);
    let key_id = format!("rv_{}", hex_encode(&id_bytes));

    let mut secret_bytes = [0u8; SECRET_BYTES];
    rng.fill_bytes(&mut secret_bytes);
    let secret = hex_encode(&secret_bytes);

    let mut salt = vec![0u8; SALT_BYTES];
    rng.fill_bytes(&mut salt);

    let record = ApiKeyRecord {
        id: key_id.clone(),
        name: name.to_string(),
        key_hash: hash_secret(&secret, &salt, salt_rounds),
        salt,
        permissions,
        rate_limit_rpm,
        expires_at: expires_in_days.map(|days| Utc::now() + chrono::Duration::days(days)),
        revoked: false,
        created_at: Utc::now(),
        last_used_at: None,
    };

    (record, format!("{}.{}", key_id, secret))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Validate the `X-API-Key` header and inject an [`AuthContext`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(API_KEY_HEADER)
        .ok_or(ApiError::MissingKey)?;
    let presented = header.to_str().map_err(|_| ApiError::InvalidKey)?.to_string();

    let state_clone = state.clone();
    let context = tokio::task::spawn_blocking(move || validate_key(&state_clone, &presented))
        .await
        .map_err(|e| ApiError::Internal(format!("auth task failed: {}", e)))??;

    debug!(key_id = %context.key_id, "authenticated");
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Resolve and verify a presented key.
fn validate_key(state: &AppState, presented: &str) -> Result<AuthContext, ApiError> {
    let (key_id, secret) = presented.split_once('.').ok_or(ApiError::InvalidKey)?;

    let record = state
        .metadata()
        .get_api_key(key_id)
        .map_err(|e| ApiError::Internal(format!("key lookup failed: {}", e)))?
        .ok_or(ApiError::InvalidKey)?;

    if !record.is_usable(Utc::now()) {
        return Err(ApiError::InvalidKey);
    }

    // Hash the presented secret with the stored salt, compare in constant
    // time so timing never reveals how much of the hash matched.
    let presented_hash = hash_secret(secret, &record.salt, state.config().api_key_salt_rounds);
    let matches: bool = presented_hash
        .as_slice()
        .ct_eq(record.key_hash.as_slice())
        .into();
    if !matches {
        return Err(ApiError::InvalidKey);
    }

    // Last-used bookkeeping is best-effort; a failed stamp never blocks the
    // request.
    let _ = state.metadata().touch_api_key(key_id);

    Ok(AuthContext {
        key_id: record.id,
        permissions: record.permissions,
        rate_limit_rpm: record.rate_limit_rpm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_salted() {
        let salt_a = vec![1u8; 16];
        let salt_b = vec![2u8; 16];

        let h1 = hash_secret("secret", &salt_a, 4);
        let h2 = hash_secret("secret", &salt_a, 4);
        let h3 = hash_secret("secret", &salt_b, 4);
        let h4 = hash_secret("other", &salt_a, 4);

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_ne!(h1, h4);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn test_salt_rounds_change_hash() {
        let salt = vec![9u8; 16];
        assert_ne!(hash_secret("s", &salt, 4), hash_secret("s", &salt, 5));
    }

    #[test]
    fn test_generate_key_shape() {
        let (record, plaintext) = generate_key(
            "ci",
            vec![Permission::Read],
            Some(30),
            Some(7),
            4,
        );

        assert!(record.id.starts_with("rv_"));
        assert!(plaintext.starts_with(&format!("{}.", record.id)));
        assert!(record.expires_at.is_some());
        assert_eq!(record.rate_limit_rpm, Some(30));

        // The stored hash verifies against the plaintext secret.
        let (_, secret) = plaintext.split_once('.').unwrap();
        assert_eq!(record.key_hash, hash_secret(secret, &record.salt, 4));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let (a, _) = generate_key("a", vec![Permission::Read], None, None, 4);
        let (b, _) = generate_key("b", vec![Permission::Read], None, None, 4);
        assert_ne!(a.id, b.id);
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn test_auth_context_permissions() {
        let ctx = AuthContext {
            key_id: "rv_test".to_string(),
            permissions: vec![Permission::Read],
            rate_limit_rpm: None,
        };
        assert!(ctx.can(Permission::VectorsRead));
        assert!(ctx.require(Permission::PersonasRead).is_ok());
        assert!(matches!(
            ctx.require(Permission::VectorsWrite),
            Err(ApiError::Permission(_))
        ));
    }
}
