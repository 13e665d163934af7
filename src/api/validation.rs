// Validation engine: at-most-once ticket scans.
//
// Outcomes are statuses, not HTTP errors: a scanner is a dumb terminal and
// always gets a 200 with {status, reason?}. The single-use guarantee comes
// from a row lock on the ticket — two concurrent scans serialize, the first
// validates, the second observes is_validated and reports already_scanned.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;

use super::AppState;
use crate::error::{AppError, Result};
use crate::middleware::Identity;
use crate::models::event::Event;
use crate::models::new_id;
use crate::models::points::registration_points;
use crate::models::ticket::{ReceivedQrToken, Ticket, ValidationEntry};
use crate::models::to_display;
use crate::qr;

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
    pub event_id: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScannedUser {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveQrRequest {
    pub token: String,
    pub event_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

const PASSTHROUGH_MAX_LEN: usize = 128;

fn invalid(reason: &str) -> Json<serde_json::Value> {
    Json(json!({ "status": "invalid", "reason": reason }))
}

// ============================================
// Validate
// ============================================

pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<serde_json::Value>> {
    // Device and operator are pass-through; only bound their size.
    if req.device.as_deref().is_some_and(|s| s.len() > PASSTHROUGH_MAX_LEN)
        || req.operator.as_deref().is_some_and(|s| s.len() > PASSTHROUGH_MAX_LEN)
    {
        return Err(AppError::Validation(
            "device/operator must be at most 128 characters".into(),
        ));
    }

    let claims = match qr::decode_qr_token(&state.config.jwt_secret, &req.token) {
        Ok(claims) => claims,
        Err(e) => return Ok(invalid(e.reason())),
    };

    if claims.event_id != req.event_id {
        return Ok(invalid("event_mismatch"));
    }

    let mut tx = state.db.begin().await?;

    // Row lock serializes concurrent scans of the same ticket.
    let ticket_row = sqlx::query("SELECT * FROM tickets WHERE id = $1 FOR UPDATE")
        .bind(&claims.ticket_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(ticket_row) = ticket_row else {
        tx.rollback().await?;
        return Ok(invalid("ticket_not_found"));
    };
    let ticket = Ticket::from_row(&ticket_row);

    if ticket.user_id != claims.user_id || ticket.event_id != claims.event_id {
        tx.rollback().await?;
        return Ok(invalid("claim_mismatch"));
    }

    let event_row = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(&ticket.event_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(event_row) = event_row else {
        tx.rollback().await?;
        return Ok(invalid("event_expired"));
    };
    let event = Event::from_row(&event_row);

    // The stored event end is authoritative, whatever the token claims.
    let now = Utc::now();
    if event.has_ended(now) {
        tx.rollback().await?;
        return Ok(invalid("event_expired"));
    }

    let user = sqlx::query("SELECT id, name, phone FROM users WHERE id = $1")
        .bind(&ticket.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| ScannedUser {
            id: r.get("id"),
            name: r.get("name"),
            phone: r.get("phone"),
        });

    if ticket.is_validated {
        tx.rollback().await?;
        return Ok(Json(json!({
            "status": "already_scanned",
            "ticket_id": ticket.id,
            "user": user,
            "issued_at": ticket.issued_at,
            "validated_at": ticket.validated_at,
            "validation_history": ticket.validation_history,
        })));
    }

    // Free-event points are earned on first validation, exactly once per
    // ticket. Prior entries can only carry the flag in legacy data.
    let award_free_points = event.is_free()
        && !ticket
            .validation_history
            .iter()
            .any(|e| e.points_awarded == Some(true));

    let entry = ValidationEntry {
        ts: to_display(now),
        device: req.device.clone(),
        operator: req.operator.clone(),
        points_awarded: award_free_points.then_some(true),
    };
    let entry_json =
        serde_json::to_value(&entry).map_err(|e| AppError::Internal(e.to_string()))?;

    let updated = sqlx::query(
        r#"
        UPDATE tickets
        SET is_validated = TRUE,
            validated_at = $2,
            validation_history = validation_history || jsonb_build_array($3::jsonb)
        WHERE id = $1 AND is_validated = FALSE
        "#,
    )
    .bind(&ticket.id)
    .bind(now)
    .bind(&entry_json)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        // Unreachable under the row lock; kept as the compare-and-set backstop.
        tx.rollback().await?;
        return Ok(Json(json!({
            "status": "already_scanned",
            "ticket_id": ticket.id,
            "user": user,
            "issued_at": ticket.issued_at,
            "validated_at": ticket.validated_at,
            "validation_history": ticket.validation_history,
        })));
    }

    if award_free_points {
        let points = registration_points(event.price_minor_units);
        super::points::award_points_in_tx(
            &mut tx,
            &ticket.user_id,
            points,
            &format!("free event validation for {}", event.title),
            None,
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(ticket_id = %ticket.id, event_id = %event.id, "ticket validated");

    let mut history = ticket.validation_history.clone();
    history.push(entry);

    let mut body = json!({
        "status": "valid",
        "ticket_id": ticket.id,
        "user": user,
        "event": event,
        "issued_at": ticket.issued_at,
        "validated_at": to_display(now),
        "validation_history": history,
    });
    if award_free_points {
        body["points_awarded"] = json!(true);
    }

    Ok(Json(body))
}

// ============================================
// Received-QR audit trail
// ============================================

pub async fn receive_qr_token(
    State(state): State<AppState>,
    Json(req): Json<ReceiveQrRequest>,
) -> Result<Json<serde_json::Value>> {
    if req.token.is_empty() {
        return Err(AppError::FieldValidation {
            field: "token".into(),
            message: "token is required".into(),
        });
    }

    let row = sqlx::query(
        r#"
        INSERT INTO received_qr_tokens (id, token, event_id, received_at, source)
        VALUES ($1, $2, $3, now(), $4)
        RETURNING *
        "#,
    )
    .bind(new_id("rt"))
    .bind(&req.token)
    .bind(&req.event_id)
    .bind(&req.source)
    .fetch_one(&state.db)
    .await?;

    let stored = ReceivedQrToken::from_row(&row);
    Ok(Json(json!({ "status": "stored", "received": stored })))
}

pub async fn list_received_tokens(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let rows = sqlx::query("SELECT * FROM received_qr_tokens ORDER BY received_at DESC")
        .fetch_all(&state.db)
        .await?;

    let tokens: Vec<ReceivedQrToken> = rows.iter().map(ReceivedQrToken::from_row).collect();
    Ok(Json(json!({ "count": tokens.len(), "qr_tokens": tokens })))
}

pub async fn received_tokens_by_event(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(event_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let rows = sqlx::query(
        "SELECT * FROM received_qr_tokens WHERE event_id = $1 ORDER BY received_at DESC",
    )
    .bind(&event_id)
    .fetch_all(&state.db)
    .await?;

    let tokens: Vec<ReceivedQrToken> = rows.iter().map(ReceivedQrToken::from_row).collect();
    Ok(Json(json!({ "count": tokens.len(), "qr_tokens": tokens })))
}
