// Payment orchestrator: gateway orders, callback verification, webhooks.
//
// Money-visible transitions all land in payment_audit_logs. Signature
// failures are rejected outright and never retried; ticket issuance is
// idempotent on the gateway payment id, so the interactive verify path and
// the webhook safety net can race freely.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgExecutor, Row};

use super::AppState;
use crate::config::PAYMENT_ORDER_TTL_MINUTES;
use crate::error::{AppError, Result};
use crate::middleware::Identity;
use crate::models::event::Event;
use crate::models::new_id;
use crate::models::payment::{Payment, PaymentAuditLog, PaymentOrder, PaymentStatus};
use crate::models::user::User;

const WEBHOOK_SIGNATURE_HEADER: &str = "x-razorpay-signature";

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub event_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub event_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<WebhookPayment>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    id: String,
    order_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

// ============================================
// Audit trail
// ============================================

#[allow(clippy::too_many_arguments)]
async fn insert_audit<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: &str,
    payment_id: Option<&str>,
    action: &str,
    old_status: Option<&str>,
    new_status: Option<&str>,
    details: Option<serde_json::Value>,
    created_by: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_audit_logs
            (id, order_id, payment_id, action, old_status, new_status, details, created_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8)
        "#,
    )
    .bind(new_id("audit"))
    .bind(order_id)
    .bind(payment_id)
    .bind(action)
    .bind(old_status)
    .bind(new_status)
    .bind(details)
    .bind(created_by)
    .execute(executor)
    .await?;
    Ok(())
}

/// Guarded status transition with an audit row; no-ops (and records nothing)
/// when the order is already past the requested state.
async fn transition_order(
    state: &AppState,
    gateway_order_id: &str,
    to: PaymentStatus,
    payment_id: Option<&str>,
    details: Option<serde_json::Value>,
    actor: &str,
) -> Result<bool> {
    let mut tx = state.db.begin().await?;

    let row = sqlx::query(
        "SELECT id, status FROM payment_orders WHERE gateway_order_id = $1 FOR UPDATE",
    )
    .bind(gateway_order_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::OrderNotFound)?;

    let order_id: String = row.get("id");
    let current = PaymentStatus::parse(&row.get::<String, _>("status"))
        .unwrap_or(PaymentStatus::Pending);

    if current == to || !current.can_transition_to(to) {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("UPDATE payment_orders SET status = $2, updated_at = now() WHERE id = $1")
        .bind(&order_id)
        .bind(to.as_str())
        .execute(&mut *tx)
        .await?;

    insert_audit(
        &mut *tx,
        &order_id,
        payment_id,
        "status_updated",
        Some(current.as_str()),
        Some(to.as_str()),
        details,
        actor,
    )
    .await?;

    tx.commit().await?;
    tracing::info!(
        gateway_order_id,
        from = current.as_str(),
        to = to.as_str(),
        "payment order transitioned"
    );
    Ok(true)
}

// ============================================
// Create order
// ============================================

pub async fn create_order(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<serde_json::Value>> {
    // Light abuse guard on outbound gateway calls.
    if let Ok((allowed, _, reset)) = state
        .cache
        .check_rate_limit(&format!("order:{}", ctx.user_id), 10, 60)
        .await
    {
        if !allowed {
            return Err(AppError::RateLimited {
                retry_after_seconds: reset,
            });
        }
    }

    let event_row = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(&req.event_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::EventNotFound)?;
    let event = Event::from_row(&event_row);

    if event.is_free() {
        return Err(AppError::FreeEventRejected);
    }
    if event.has_ended(Utc::now()) {
        return Err(AppError::EventExpired);
    }

    // The receipt is the idempotency key: an open order for this
    // (user, event) pair is returned instead of resubmitting the gateway call.
    let receipt = format!("rcpt_{}_{}", ctx.user_id, event.id);
    if let Some(row) = sqlx::query(
        r#"
        SELECT * FROM payment_orders
        WHERE receipt = $1 AND status = 'pending'
          AND (expires_at IS NULL OR expires_at > now())
        "#,
    )
    .bind(&receipt)
    .fetch_optional(&state.db)
    .await?
    {
        let order = PaymentOrder::from_row(&row);
        return Ok(Json(json!({
            "order_id": order.gateway_order_id,
            "key_id": state.config.gateway_key_id,
            "amount": order.amount_minor_units,
            "currency": order.currency,
            "status": "created",
        })));
    }

    let gateway_order = state
        .gateway
        .create_order(&event.id, event.price_minor_units, &receipt)
        .await?;

    let order_id = new_id("ord");
    let expires_at = Utc::now() + Duration::minutes(PAYMENT_ORDER_TTL_MINUTES);
    sqlx::query(
        r#"
        INSERT INTO payment_orders
            (id, gateway_order_id, user_id, event_id, amount_minor_units,
             currency, status, receipt, notes, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9)
        "#,
    )
    .bind(&order_id)
    .bind(&gateway_order.id)
    .bind(&ctx.user_id)
    .bind(&event.id)
    .bind(gateway_order.amount)
    .bind(&gateway_order.currency)
    .bind(&receipt)
    .bind(json!({ "eventId": event.id }))
    .bind(expires_at)
    .execute(&state.db)
    .await?;

    insert_audit(
        &state.db,
        &order_id,
        None,
        "order_created",
        None,
        Some("pending"),
        Some(json!({ "gateway_order_id": gateway_order.id, "amount": gateway_order.amount })),
        &ctx.user_id,
    )
    .await?;

    tracing::info!(
        order_id = %order_id,
        gateway_order_id = %gateway_order.id,
        event_id = %event.id,
        "payment order created"
    );

    Ok(Json(json!({
        "order_id": gateway_order.id,
        "key_id": state.config.gateway_key_id,
        "amount": gateway_order.amount,
        "currency": gateway_order.currency,
        "status": gateway_order.status,
    })))
}

// ============================================
// Verify and issue
// ============================================

pub async fn verify_payment(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<serde_json::Value>> {
    // Constant-time signature check before anything else is trusted.
    if !state.gateway.verify_payment_signature(
        &req.gateway_order_id,
        &req.gateway_payment_id,
        &req.gateway_signature,
    ) {
        if let Some(row) = sqlx::query("SELECT id FROM payment_orders WHERE gateway_order_id = $1")
            .bind(&req.gateway_order_id)
            .fetch_optional(&state.db)
            .await?
        {
            let order_id: String = row.get("id");
            insert_audit(
                &state.db,
                &order_id,
                Some(&req.gateway_payment_id),
                "signature_rejected",
                None,
                None,
                None,
                &ctx.user_id,
            )
            .await?;
        }
        return Err(AppError::InvalidSignature);
    }

    let user_row = sqlx::query("SELECT * FROM users WHERE id = $1")
        .bind(&ctx.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::UserNotFound)?;
    let user = User::from_row(&user_row);

    let event_row = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(&req.event_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::EventNotFound)?;
    let event = Event::from_row(&event_row);

    if event.is_free() {
        return Err(AppError::FreeEventRejected);
    }

    let (ticket, newly_issued) = super::registrations::issue_paid_ticket(
        &state,
        &user.id,
        &event,
        &req.gateway_order_id,
        &req.gateway_payment_id,
    )
    .await?;

    record_gateway_payment(
        &state,
        &req.gateway_order_id,
        &req.gateway_payment_id,
        Some(&req.gateway_signature),
        Some("captured"),
        None,
        None,
    )
    .await?;

    transition_order(
        &state,
        &req.gateway_order_id,
        PaymentStatus::Success,
        Some(&req.gateway_payment_id),
        Some(json!({ "via": "client_verify" })),
        &ctx.user_id,
    )
    .await?;

    Ok(Json(json!({
        "status": "success",
        "newly_issued": newly_issued,
        "ticket": ticket,
        "qr_token": ticket.qr_token,
    })))
}

/// Upsert the gateway payment record attached to an order.
async fn record_gateway_payment(
    state: &AppState,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: Option<&str>,
    status: Option<&str>,
    method: Option<&str>,
    error: Option<(&str, &str)>,
) -> Result<()> {
    let Some(order_row) =
        sqlx::query("SELECT id, amount_minor_units FROM payment_orders WHERE gateway_order_id = $1")
            .bind(gateway_order_id)
            .fetch_optional(&state.db)
            .await?
    else {
        return Ok(());
    };
    let order_id: String = order_row.get("id");
    let amount: i64 = order_row.get("amount_minor_units");

    sqlx::query(
        r#"
        INSERT INTO payments
            (id, order_id, gateway_payment_id, gateway_signature, amount_paid, status,
             method, error_code, error_description)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (gateway_payment_id) DO UPDATE SET
            status = EXCLUDED.status,
            gateway_signature = COALESCE(EXCLUDED.gateway_signature, payments.gateway_signature),
            method = COALESCE(EXCLUDED.method, payments.method),
            error_code = EXCLUDED.error_code,
            error_description = EXCLUDED.error_description
        "#,
    )
    .bind(new_id("pay"))
    .bind(&order_id)
    .bind(gateway_payment_id)
    .bind(signature)
    .bind(amount)
    .bind(status.unwrap_or("created"))
    .bind(method)
    .bind(error.map(|(c, _)| c))
    .bind(error.map(|(_, d)| d))
    .execute(&state.db)
    .await?;

    Ok(())
}

// ============================================
// Webhook
// ============================================

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidWebhookSignature)?;

    // Constant-time over the raw body; a mismatch is final, not retryable.
    if !state.gateway.verify_webhook_signature(&body, signature) {
        return Err(AppError::InvalidWebhookSignature);
    }

    let parsed: WebhookBody = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed webhook body: {}", e)))?;

    let Some(payment) = parsed.payload.payment else {
        return Ok(Json(json!({ "status": "ignored", "event": parsed.event })));
    };

    tracing::info!(
        event = %parsed.event,
        gateway_payment_id = %payment.id,
        gateway_order_id = %payment.order_id,
        "webhook received"
    );

    // Events for orders this service never created are acknowledged and
    // dropped; the gateway should not keep redelivering them.
    let known_order = sqlx::query("SELECT 1 FROM payment_orders WHERE gateway_order_id = $1")
        .bind(&payment.order_id)
        .fetch_optional(&state.db)
        .await?
        .is_some();
    if !known_order {
        tracing::warn!(gateway_order_id = %payment.order_id, "webhook for unknown order");
        return Ok(Json(json!({ "status": "ignored", "event": parsed.event })));
    }

    match parsed.event.as_str() {
        "payment.authorized" => {
            record_gateway_payment(
                &state,
                &payment.order_id,
                &payment.id,
                None,
                payment.status.as_deref(),
                payment.method.as_deref(),
                None,
            )
            .await?;
            transition_order(
                &state,
                &payment.order_id,
                PaymentStatus::Processing,
                Some(&payment.id),
                Some(json!({ "via": "webhook", "method": payment.method })),
                "webhook",
            )
            .await?;
        }
        "payment.captured" => {
            record_gateway_payment(
                &state,
                &payment.order_id,
                &payment.id,
                None,
                payment.status.as_deref(),
                payment.method.as_deref(),
                None,
            )
            .await?;
            transition_order(
                &state,
                &payment.order_id,
                PaymentStatus::Success,
                Some(&payment.id),
                Some(json!({ "via": "webhook", "method": payment.method })),
                "webhook",
            )
            .await?;

            // Safety net: a captured payment must end up with a ticket even
            // if the client never called verify.
            ensure_ticket_for_order(&state, &payment.order_id, &payment.id).await?;
        }
        "payment.failed" => {
            let error = payment
                .error_code
                .as_deref()
                .zip(payment.error_description.as_deref());
            record_gateway_payment(
                &state,
                &payment.order_id,
                &payment.id,
                None,
                payment.status.as_deref(),
                payment.method.as_deref(),
                error,
            )
            .await?;
            transition_order(
                &state,
                &payment.order_id,
                PaymentStatus::Failed,
                Some(&payment.id),
                Some(json!({
                    "via": "webhook",
                    "error_code": payment.error_code,
                    "error_description": payment.error_description,
                })),
                "webhook",
            )
            .await?;
        }
        other => {
            tracing::warn!(event = other, "unhandled webhook event");
            return Ok(Json(json!({ "status": "ignored", "event": other })));
        }
    }

    Ok(Json(json!({ "status": "ok", "event": parsed.event })))
}

async fn ensure_ticket_for_order(
    state: &AppState,
    gateway_order_id: &str,
    gateway_payment_id: &str,
) -> Result<()> {
    let Some(order_row) = sqlx::query("SELECT * FROM payment_orders WHERE gateway_order_id = $1")
        .bind(gateway_order_id)
        .fetch_optional(&state.db)
        .await?
    else {
        tracing::warn!(gateway_order_id, "captured payment for unknown order");
        return Ok(());
    };
    let order = PaymentOrder::from_row(&order_row);

    let Some(event_row) = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(&order.event_id)
        .fetch_optional(&state.db)
        .await?
    else {
        tracing::warn!(event_id = %order.event_id, "captured payment for deleted event");
        return Ok(());
    };
    let event = Event::from_row(&event_row);

    let (_, newly_issued) = super::registrations::issue_paid_ticket(
        state,
        &order.user_id,
        &event,
        gateway_order_id,
        gateway_payment_id,
    )
    .await?;

    if newly_issued {
        tracing::info!(
            gateway_payment_id,
            user_id = %order.user_id,
            "ticket issued by webhook safety net"
        );
    }
    Ok(())
}

// ============================================
// Order status & cleanup
// ============================================

pub async fn get_order(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(gateway_order_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let row = sqlx::query("SELECT * FROM payment_orders WHERE gateway_order_id = $1")
        .bind(&gateway_order_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    let order = PaymentOrder::from_row(&row);

    if order.user_id != ctx.user_id && !ctx.is_admin() {
        return Err(AppError::Forbidden("can only view your own orders".into()));
    }

    let payment_rows = sqlx::query("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at")
        .bind(&order.id)
        .fetch_all(&state.db)
        .await?;
    let payments: Vec<Payment> = payment_rows.iter().map(Payment::from_row).collect();

    let audit_rows = sqlx::query(
        "SELECT * FROM payment_audit_logs WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(&order.id)
    .fetch_all(&state.db)
    .await?;
    let audit: Vec<PaymentAuditLog> = audit_rows.iter().map(PaymentAuditLog::from_row).collect();

    Ok(Json(json!({ "order": order, "payments": payments, "audit": audit })))
}

/// Cancel pending orders past their expiry. Runs on a schedule.
pub async fn cleanup_expired(state: &AppState) -> Result<u64> {
    let mut tx = state.db.begin().await?;

    let rows = sqlx::query(
        r#"
        UPDATE payment_orders
        SET status = 'cancelled', updated_at = now()
        WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < now()
        RETURNING id
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    for row in &rows {
        let order_id: String = row.get("id");
        insert_audit(
            &mut *tx,
            &order_id,
            None,
            "order_expired",
            Some("pending"),
            Some("cancelled"),
            None,
            "system",
        )
        .await?;
    }

    tx.commit().await?;

    let count = rows.len() as u64;
    if count > 0 {
        tracing::info!(count, "expired payment orders cancelled");
    }
    Ok(count)
}
