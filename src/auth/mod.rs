// Identity token service
//
// Short-lived HS256 bearer tokens. Revocation is cache-backed: a revoked
// token's hash lives in redis for exactly its remaining lifetime, giving
// constant-time logout without server-side session state.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::CacheService;
use crate::config::ACCESS_TOKEN_TTL_MINUTES;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "organizer" => Some(Role::Organizer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Identity of the caller, set by the auth middleware before any core
/// operation runs. Core code never reads transport headers itself.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin access required".into()))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(rename = "type")]
    token_type: String,
}

/// SHA-256 hex of the raw token, used as the revocation-set key.
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn encode_access(secret: &str, user_id: &str, role: Role) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = AccessClaims {
        sub: user_id.to_string(),
        role,
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_MINUTES * 60,
        jti: uuid::Uuid::new_v4().to_string(),
        token_type: "access".to_string(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign token: {}", e)))
}

fn decode_access(secret: &str, token: &str) -> Result<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })?;

    if data.claims.token_type != "access" {
        return Err(AppError::InvalidToken);
    }

    Ok(data.claims)
}

/// Decode an access token ignoring expiry, keeping the signature check.
/// Used by revoke, which must accept any well-signed token.
fn decode_unexpired_ok(secret: &str, token: &str) -> Result<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;

    let data = jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AppError::InvalidToken)?;

    Ok(data.claims)
}

#[derive(Clone)]
pub struct TokenService {
    secret: String,
    cache: CacheService,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, cache: CacheService) -> Self {
        Self {
            secret: secret.into(),
            cache,
        }
    }

    /// Issue a fresh access token for a user.
    pub fn issue(&self, user_id: &str, role: Role) -> Result<String> {
        encode_access(&self.secret, user_id, role)
    }

    /// Verify a token and return the caller identity.
    /// Rejects malformed, signature-invalid, expired, wrong-type and revoked tokens.
    pub async fn verify(&self, token: &str) -> Result<AuthContext> {
        let claims = decode_access(&self.secret, token)?;

        let key = CacheService::revoked_token_key(&token_hash(token));
        if self.cache.exists(&key).await {
            return Err(AppError::TokenRevoked);
        }

        Ok(AuthContext {
            user_id: claims.sub,
            role: claims.role,
        })
    }

    /// Revoke a token for its remaining lifetime. Idempotent; revoking an
    /// already-expired token is a no-op.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let claims = decode_unexpired_ok(&self.secret, token)?;
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }

        let key = CacheService::revoked_token_key(&token_hash(token));
        if let Err(e) = self.cache.set(&key, &true, remaining as u64).await {
            // Losing the revocation write would keep a token alive; surface it.
            tracing::error!(alert = true, "failed to record token revocation: {}", e);
            return Err(AppError::Internal("failed to revoke token".into()));
        }
        Ok(())
    }
}

// ============================================
// Password hashing (argon2, PHC string format)
// ============================================

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::password_hash::rand_core::OsRng;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))
}

/// Constant-time password verification.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issue_and_decode_roundtrip() {
        let token = encode_access(SECRET, "usr_abc", Role::Organizer).unwrap();
        let claims = decode_access(SECRET, &token).unwrap();
        assert_eq!(claims.sub, "usr_abc");
        assert_eq!(claims.role, Role::Organizer);
        assert_eq!(claims.token_type, "access");
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_MINUTES * 60);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = encode_access(SECRET, "usr_abc", Role::User).unwrap();
        let err = decode_access("other-secret", &token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn garbage_is_invalid() {
        let err = decode_access(SECRET, "not.a.token").unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn wrong_type_is_rejected() {
        // Forge a token with the right shape but the wrong type claim.
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: "usr_abc".into(),
            role: Role::User,
            iat: now,
            exp: now + 600,
            jti: "j1".into(),
            token_type: "refresh".into(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = decode_access(SECRET, &token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: "usr_abc".into(),
            role: Role::User,
            iat: now - 7200,
            exp: now - 3600,
            jti: "j1".into(),
            token_type: "access".into(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = decode_access(SECRET, &token).unwrap_err();
        assert!(matches!(err, AppError::TokenExpired));

        // revoke still accepts it (and treats it as a no-op upstream)
        let claims = decode_unexpired_ok(SECRET, &token).unwrap();
        assert!(claims.exp < Utc::now().timestamp());
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter2-but-longer").unwrap();
        assert!(verify_password("hunter2-but-longer", &hash));
        assert!(!verify_password("hunter2-but-wrong", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let h1 = token_hash("abc");
        let h2 = token_hash("abc");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
