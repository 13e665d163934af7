// Points ledger: append-only signed transactions, balance = algebraic sum.
//
// All writes go through the two helpers below so the balance and the
// transaction list can never drift apart; both mutate the row atomically.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Row, Transaction};

use super::AppState;
use crate::error::{AppError, Result};
use crate::middleware::Identity;
use crate::models::points::{TransactionKind, UserPoints, new_transaction};

/// Append an `earned` entry and bump the balance, creating the ledger row on
/// first touch. Runs inside the caller's transaction so earns commit together
/// with the operation that justified them.
pub(crate) async fn award_points_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    points: i64,
    reason: &str,
    actor: Option<&str>,
) -> Result<i64> {
    let entry = new_transaction(
        TransactionKind::Earned,
        points,
        reason.to_string(),
        actor.map(str::to_string),
    );
    let entry = serde_json::to_value(&entry).map_err(|e| AppError::Internal(e.to_string()))?;

    let row = sqlx::query(
        r#"
        INSERT INTO user_points (user_id, total_points, transactions)
        VALUES ($1, $2, jsonb_build_array($3::jsonb))
        ON CONFLICT (user_id) DO UPDATE SET
            total_points = user_points.total_points + $2,
            transactions = user_points.transactions || jsonb_build_array($3::jsonb)
        RETURNING total_points
        "#,
    )
    .bind(user_id)
    .bind(points)
    .bind(&entry)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.get("total_points"))
}

/// Append a `deducted` entry with negative signed points. The guarded UPDATE
/// refuses to take the balance below zero.
pub(crate) async fn deduct_points_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    points: i64,
    reason: &str,
    actor: &str,
) -> Result<i64> {
    let entry = new_transaction(
        TransactionKind::Deducted,
        -points,
        reason.to_string(),
        Some(actor.to_string()),
    );
    let entry = serde_json::to_value(&entry).map_err(|e| AppError::Internal(e.to_string()))?;

    let row = sqlx::query(
        r#"
        UPDATE user_points SET
            total_points = total_points - $2,
            transactions = transactions || jsonb_build_array($3::jsonb)
        WHERE user_id = $1 AND total_points >= $2
        RETURNING total_points
        "#,
    )
    .bind(user_id)
    .bind(points)
    .bind(&entry)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|r| r.get("total_points"))
        .ok_or(AppError::InsufficientPoints)
}

// ============================================
// Endpoints
// ============================================

#[derive(Debug, Deserialize)]
pub struct AdjustPointsRequest {
    pub user_id: String,
    pub points: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsParams {
    pub user_id: Option<String>,
    #[serde(default = "default_tx_limit")]
    pub limit: i64,
}

fn default_tx_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct LedgerTransaction {
    pub user_id: String,
    pub transaction: serde_json::Value,
}

async fn load_points(state: &AppState, user_id: &str) -> Result<UserPoints> {
    let row = sqlx::query("SELECT * FROM user_points WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;

    Ok(row
        .map(|r| UserPoints::from_row(&r))
        .unwrap_or_else(|| UserPoints::empty(user_id.to_string())))
}

pub async fn my_points(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<UserPoints>> {
    Ok(Json(load_points(&state, &ctx.user_id).await?))
}

pub async fn user_points(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(user_id): Path<String>,
) -> Result<Json<UserPoints>> {
    ctx.require_admin()?;
    Ok(Json(load_points(&state, &user_id).await?))
}

pub async fn award_points(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(req): Json<AdjustPointsRequest>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;
    if req.points <= 0 {
        return Err(AppError::FieldValidation {
            field: "points".into(),
            message: "points must be positive".into(),
        });
    }

    ensure_user_exists(&state, &req.user_id).await?;

    let mut tx = state.db.begin().await?;
    let balance = award_points_in_tx(
        &mut tx,
        &req.user_id,
        req.points,
        &req.reason,
        Some(&ctx.user_id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %req.user_id,
        points = req.points,
        actor = %ctx.user_id,
        "points awarded"
    );
    Ok(Json(json!({ "user_id": req.user_id, "total_points": balance })))
}

pub async fn deduct_points(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(req): Json<AdjustPointsRequest>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;
    if req.points <= 0 {
        return Err(AppError::FieldValidation {
            field: "points".into(),
            message: "points must be positive".into(),
        });
    }

    ensure_user_exists(&state, &req.user_id).await?;

    let mut tx = state.db.begin().await?;
    let balance =
        deduct_points_in_tx(&mut tx, &req.user_id, req.points, &req.reason, &ctx.user_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %req.user_id,
        points = req.points,
        actor = %ctx.user_id,
        "points deducted"
    );
    Ok(Json(json!({ "user_id": req.user_id, "total_points": balance })))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Query(params): Query<TransactionsParams>,
) -> Result<Json<Vec<LedgerTransaction>>> {
    ctx.require_admin()?;
    let limit = params.limit.clamp(1, 500);

    let rows = match &params.user_id {
        Some(user_id) => {
            sqlx::query(
                r#"
                SELECT user_id, tx
                FROM user_points, LATERAL jsonb_array_elements(transactions) AS tx
                WHERE user_id = $1
                ORDER BY tx->>'ts' DESC
                LIMIT $2
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT user_id, tx
                FROM user_points, LATERAL jsonb_array_elements(transactions) AS tx
                ORDER BY tx->>'ts' DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&state.db)
            .await?
        }
    };

    let transactions = rows
        .iter()
        .map(|r| LedgerTransaction {
            user_id: r.get("user_id"),
            transaction: r.get("tx"),
        })
        .collect();

    Ok(Json(transactions))
}

async fn ensure_user_exists(state: &AppState, user_id: &str) -> Result<()> {
    let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(AppError::UserNotFound)
    }
}
