// Registration engine: free registrations, paid issuance (invoked by the
// payment orchestrator), approval-gated join requests, ticket retrieval.
//
// Every entry point is one transaction: a ticket insert and its side
// effects (subscription append, points earn) land together or not at all.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Row, Transaction};

use super::AppState;
use crate::error::{AppError, Result};
use crate::middleware::Identity;
use crate::models::event::Event;
use crate::models::join_request::{EventJoinRequest, JoinRequestStatus};
use crate::models::new_id;
use crate::models::points::registration_points;
use crate::models::ticket::{Ticket, TicketMeta};
use crate::qr;

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct FreeRegistrationRequest {
    pub event_id: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum FreeRegistrationResponse {
    PendingApproval {
        status: &'static str,
        request_id: String,
    },
    Issued(Box<Ticket>),
}

#[derive(Debug, Serialize)]
pub struct TicketWithEvent {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub event_title: String,
    pub event_city: String,
    pub event_venue: String,
    pub event_start: DateTime<FixedOffset>,
    pub event_end: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Accept,
    Reject,
}

// ============================================
// Free registration
// ============================================

pub async fn register_free(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(req): Json<FreeRegistrationRequest>,
) -> Result<Json<FreeRegistrationResponse>> {
    let event = load_event(&state, &req.event_id).await?;

    let now = Utc::now();
    if event.has_ended(now) {
        return Err(AppError::EventExpired);
    }
    if !event.is_free() {
        return Err(AppError::PaidEventRequiresPayment);
    }
    if !event.is_active {
        return Err(AppError::EventInactive);
    }
    if !event.registration_open {
        return Err(AppError::EventClosed);
    }

    if already_registered(&state, &ctx.user_id, &event.id).await? {
        return Err(AppError::DuplicateRegistration);
    }

    if event.requires_approval {
        let request = upsert_join_request(&state, &ctx.user_id, &event.id).await?;
        return Ok(Json(FreeRegistrationResponse::PendingApproval {
            status: "pending_approval",
            request_id: request.id,
        }));
    }

    let mut tx = state.db.begin().await?;
    let ticket = insert_free_ticket(&mut tx, &state.config.jwt_secret, &ctx.user_id, &event).await?;
    tx.commit().await?;

    tracing::info!(ticket_id = %ticket.id, event_id = %event.id, "free ticket issued");
    Ok(Json(FreeRegistrationResponse::Issued(Box::new(ticket))))
}

async fn load_event(state: &AppState, event_id: &str) -> Result<Event> {
    let row = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::EventNotFound)?;
    Ok(Event::from_row(&row))
}

/// Subscribed-set membership or an existing ticket both count.
async fn already_registered(state: &AppState, user_id: &str, event_id: &str) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT
            EXISTS (
                SELECT 1 FROM users
                WHERE id = $1 AND subscribed_events @> to_jsonb($2::text)
            ) AS subscribed,
            EXISTS (
                SELECT 1 FROM tickets WHERE user_id = $1 AND event_id = $2
            ) AS has_ticket
        "#,
    )
    .bind(user_id)
    .bind(event_id)
    .fetch_one(&state.db)
    .await?;

    Ok(row.get::<bool, _>("subscribed") || row.get::<bool, _>("has_ticket"))
}

/// Append the event to the user's subscriptions and insert the ticket.
/// The guarded UPDATE doubles as the duplicate check under concurrency:
/// zero affected rows means someone else subscribed this user first.
pub(crate) async fn insert_free_ticket(
    tx: &mut Transaction<'_, Postgres>,
    jwt_secret: &str,
    user_id: &str,
    event: &Event,
) -> Result<Ticket> {
    let appended = sqlx::query(
        r#"
        UPDATE users
        SET subscribed_events = subscribed_events || to_jsonb($2::text)
        WHERE id = $1 AND NOT (subscribed_events @> to_jsonb($2::text))
        "#,
    )
    .bind(user_id)
    .bind(&event.id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if appended == 0 {
        let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        return Err(if exists {
            AppError::DuplicateRegistration
        } else {
            AppError::UserNotFound
        });
    }

    let duplicate = sqlx::query("SELECT 1 FROM tickets WHERE user_id = $1 AND event_id = $2")
        .bind(user_id)
        .bind(&event.id)
        .fetch_optional(&mut **tx)
        .await?
        .is_some();
    if duplicate {
        return Err(AppError::DuplicateRegistration);
    }

    insert_ticket(tx, jwt_secret, user_id, event, TicketMeta::Free).await
}

async fn insert_ticket(
    tx: &mut Transaction<'_, Postgres>,
    jwt_secret: &str,
    user_id: &str,
    event: &Event,
    meta: TicketMeta,
) -> Result<Ticket> {
    let ticket_id = new_id("t");
    let qr_token = qr::create_qr_token(
        jwt_secret,
        &ticket_id,
        user_id,
        &event.id,
        Some(event.end_at.with_timezone(&Utc)),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign QR token: {}", e)))?;

    let row = sqlx::query(
        r#"
        INSERT INTO tickets (id, event_id, user_id, qr_token, issued_at, meta)
        VALUES ($1, $2, $3, $4, now(), $5)
        RETURNING *
        "#,
    )
    .bind(&ticket_id)
    .bind(&event.id)
    .bind(user_id)
    .bind(&qr_token)
    .bind(serde_json::to_value(&meta).map_err(|e| AppError::Internal(e.to_string()))?)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Ticket::from_row(&row))
}

// ============================================
// Paid issuance (invoked after signature verification)
// ============================================

/// Idempotent on `payment_id`: however many times the verify callback or the
/// webhook land, one payment produces one ticket and one points earn.
pub(crate) async fn issue_paid_ticket(
    state: &AppState,
    user_id: &str,
    event: &Event,
    order_id: &str,
    payment_id: &str,
) -> Result<(Ticket, bool)> {
    let mut tx = state.db.begin().await?;

    if let Some(row) = sqlx::query("SELECT * FROM tickets WHERE meta->>'payment_id' = $1")
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?
    {
        tx.rollback().await?;
        return Ok((Ticket::from_row(&row), false));
    }

    let meta = TicketMeta::Paid {
        amount: event.price_minor_units,
        order_id: order_id.to_string(),
        payment_id: payment_id.to_string(),
    };
    let ticket = match insert_ticket(&mut tx, &state.config.jwt_secret, user_id, event, meta).await
    {
        Ok(ticket) => ticket,
        // A concurrent issuance for the same payment won the unique index.
        Err(AppError::Database(sqlx::Error::Database(db_err)))
            if db_err.constraint() == Some("idx_tickets_payment_id") =>
        {
            tx.rollback().await?;
            let row = sqlx::query("SELECT * FROM tickets WHERE meta->>'payment_id' = $1")
                .bind(payment_id)
                .fetch_one(&state.db)
                .await?;
            return Ok((Ticket::from_row(&row), false));
        }
        Err(e) => return Err(e),
    };

    let points = registration_points(event.price_minor_units);
    super::points::award_points_in_tx(
        &mut tx,
        user_id,
        points,
        &format!("paid registration for {}", event.title),
        None,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        ticket_id = %ticket.id,
        payment_id,
        points,
        "paid ticket issued"
    );
    Ok((ticket, true))
}

// ============================================
// Join requests
// ============================================

/// One row per (user, event): fresh requests insert, rejected ones revive,
/// pending and accepted ones are returned as they are.
async fn upsert_join_request(
    state: &AppState,
    user_id: &str,
    event_id: &str,
) -> Result<EventJoinRequest> {
    let existing = sqlx::query(
        "SELECT * FROM event_join_requests WHERE user_id = $1 AND event_id = $2",
    )
    .bind(user_id)
    .bind(event_id)
    .fetch_optional(&state.db)
    .await?;

    if let Some(row) = existing {
        let request = EventJoinRequest::from_row(&row);
        return match request.status {
            JoinRequestStatus::Pending | JoinRequestStatus::Accepted => Ok(request),
            JoinRequestStatus::Rejected => {
                let row = sqlx::query(
                    r#"
                    UPDATE event_join_requests
                    SET status = 'pending', requested_at = now(),
                        reviewed_at = NULL, reviewed_by = NULL
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(&request.id)
                .fetch_one(&state.db)
                .await?;
                Ok(EventJoinRequest::from_row(&row))
            }
        };
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO event_join_requests (id, user_id, event_id, status, requested_at)
        VALUES ($1, $2, $3, 'pending', now())
        ON CONFLICT (user_id, event_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(new_id("jr"))
    .bind(user_id)
    .bind(event_id)
    .fetch_optional(&state.db)
    .await?;

    match inserted {
        Some(row) => Ok(EventJoinRequest::from_row(&row)),
        // Lost a race with a concurrent request for the same pair.
        None => {
            let row = sqlx::query(
                "SELECT * FROM event_join_requests WHERE user_id = $1 AND event_id = $2",
            )
            .bind(user_id)
            .bind(event_id)
            .fetch_one(&state.db)
            .await?;
            Ok(EventJoinRequest::from_row(&row))
        }
    }
}

pub async fn list_join_requests(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<EventJoinRequest>>> {
    ctx.require_admin()?;

    let rows = sqlx::query(
        "SELECT * FROM event_join_requests WHERE event_id = $1 ORDER BY requested_at",
    )
    .bind(&event_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows.iter().map(EventJoinRequest::from_row).collect()))
}

pub async fn review_join_request(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(request_id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let decision = match req.decision {
        ReviewDecision::Accept => JoinRequestStatus::Accepted,
        ReviewDecision::Reject => JoinRequestStatus::Rejected,
    };

    let mut tx = state.db.begin().await?;

    // CAS on pending keeps two concurrent reviews from both succeeding.
    let row = sqlx::query(
        r#"
        UPDATE event_join_requests
        SET status = $2, reviewed_at = now(), reviewed_by = $3
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(&request_id)
    .bind(decision.as_str())
    .bind(&ctx.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        let exists = sqlx::query("SELECT 1 FROM event_join_requests WHERE id = $1")
            .bind(&request_id)
            .fetch_optional(&state.db)
            .await?
            .is_some();
        return Err(if exists {
            AppError::Conflict("join request already reviewed".into())
        } else {
            AppError::JoinRequestNotFound
        });
    };

    let request = EventJoinRequest::from_row(&row);

    let ticket = match req.decision {
        ReviewDecision::Reject => None,
        ReviewDecision::Accept => {
            let event_row = sqlx::query("SELECT * FROM events WHERE id = $1")
                .bind(&request.event_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AppError::EventNotFound)?;
            let event = Event::from_row(&event_row);
            if event.has_ended(Utc::now()) {
                tx.rollback().await?;
                return Err(AppError::EventExpired);
            }

            let ticket = insert_free_ticket(
                &mut tx,
                &state.config.jwt_secret,
                &request.user_id,
                &event,
            )
            .await?;
            Some(ticket)
        }
    };

    tx.commit().await?;

    tracing::info!(
        request_id = %request.id,
        decision = decision.as_str(),
        reviewed_by = %ctx.user_id,
        "join request reviewed"
    );

    Ok(Json(json!({
        "request": request,
        "ticket": ticket,
    })))
}

// ============================================
// Ticket retrieval
// ============================================

pub async fn my_tickets(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<Vec<TicketWithEvent>>> {
    let rows = sqlx::query(
        r#"
        SELECT t.*, e.title AS event_title, e.city AS event_city,
               e.venue AS event_venue, e.start_at AS event_start, e.end_at AS event_end
        FROM tickets t
        JOIN events e ON e.id = t.event_id
        WHERE t.user_id = $1
        ORDER BY t.issued_at DESC
        "#,
    )
    .bind(&ctx.user_id)
    .fetch_all(&state.db)
    .await?;

    let tickets = rows
        .iter()
        .map(|row| TicketWithEvent {
            ticket: Ticket::from_row(row),
            event_title: row.get("event_title"),
            event_city: row.get("event_city"),
            event_venue: row.get("event_venue"),
            event_start: crate::models::to_display(row.get::<DateTime<Utc>, _>("event_start")),
            event_end: crate::models::to_display(row.get::<DateTime<Utc>, _>("event_end")),
        })
        .collect();

    Ok(Json(tickets))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(ticket_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let row = sqlx::query("SELECT * FROM tickets WHERE id = $1")
        .bind(&ticket_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::TicketNotFound)?;

    let ticket = Ticket::from_row(&row);
    if ticket.user_id != ctx.user_id && !ctx.is_admin() {
        return Err(AppError::Forbidden("can only view your own tickets".into()));
    }

    let event_row = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(&ticket.event_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::EventNotFound)?;
    let event = Event::from_row(&event_row);

    Ok(Json(json!({ "ticket": ticket, "event": event })))
}
