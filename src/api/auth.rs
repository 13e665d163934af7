use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::AppState;
use crate::auth::{Role, hash_password, verify_password};
use crate::error::{AppError, Result};
use crate::middleware::{BearerToken, Identity};
use crate::models::new_id;
use crate::models::user::User;

/// E.164: leading + and 8-15 digits.
fn is_e164(phone: &str) -> bool {
    let Some(rest) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&rest.len()) && rest.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub user_id: String,
    pub role: Role,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if !is_e164(&req.phone) {
        return Err(AppError::FieldValidation {
            field: "phone".into(),
            message: "phone must be E.164, e.g. +919876543210".into(),
        });
    }

    let password_hash = match &req.password {
        Some(p) => Some(hash_password(p)?),
        None => None,
    };

    let user_id = new_id("usr");
    let row = sqlx::query(
        r#"
        INSERT INTO users (id, name, phone, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, 'user')
        ON CONFLICT (phone) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&user_id)
    .bind(&req.name)
    .bind(&req.phone)
    .bind(&req.email)
    .bind(&password_hash)
    .fetch_optional(&state.db)
    .await?;

    let Some(row) = row else {
        return Err(AppError::Conflict(
            "an account with this phone already exists".into(),
        ));
    };

    let user = User::from_row(&row);
    let token = state.tokens.issue(&user.id, user.role)?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok(Json(AuthResponse { token, user }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    // Brute-force guard; degrades open if redis is down.
    if let Ok((allowed, _, reset)) = state
        .cache
        .check_rate_limit(&format!("login:{}", req.phone), 10, 300)
        .await
    {
        if !allowed {
            return Err(AppError::RateLimited {
                retry_after_seconds: reset,
            });
        }
    }

    let row = sqlx::query("SELECT * FROM users WHERE phone = $1")
        .bind(&req.phone)
        .fetch_optional(&state.db)
        .await?;

    // Same error whether the phone or the password was wrong.
    let Some(row) = row else {
        return Err(AppError::InvalidCredentials);
    };
    let user = User::from_row(&row);

    let valid = user
        .password_hash
        .as_deref()
        // argon2 verification is constant-time over the hash
        .map(|h| verify_password(&req.password, h))
        .unwrap_or(false);
    if !valid {
        return Err(AppError::InvalidCredentials);
    }

    let token = state.tokens.issue(&user.id, user.role)?;
    Ok(Json(AuthResponse { token, user }))
}

/// Revoke the presented token. Idempotent.
pub async fn logout(
    State(state): State<AppState>,
    Identity(_ctx): Identity,
    axum::Extension(BearerToken(token)): axum::Extension<BearerToken>,
) -> Result<Json<serde_json::Value>> {
    state.tokens.revoke(&token).await?;
    Ok(Json(serde_json::json!({ "status": "logged_out" })))
}

/// Echo the verified caller identity (used by other services and the frontend).
pub async fn verify(Identity(ctx): Identity) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        user_id: ctx.user_id,
        role: ctx.role,
    })
}

pub async fn me(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = $1")
        .bind(&ctx.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::UserNotFound)?;

    Ok(Json(User::from_row(&row)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_accepts_international_numbers() {
        assert!(is_e164("+919876543210"));
        assert!(is_e164("+14155552671"));
    }

    #[test]
    fn e164_rejects_local_and_garbage() {
        assert!(!is_e164("9876543210"));
        assert!(!is_e164("+91-98765"));
        assert!(!is_e164("+123"));
        assert!(!is_e164(""));
    }
}
