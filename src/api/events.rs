// Event registry: CRUD, derived active/expired state, featured slots.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;
use validator::Validate;

use super::AppState;
use crate::cache::CacheService;
use crate::config::EVENTS_CACHE_TTL_SECONDS;
use crate::error::{AppError, Result};
use crate::middleware::Identity;
use crate::models::event::Event;
use crate::models::new_id;

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 200))]
    pub venue: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub price_minor_units: i64,
    #[validate(url)]
    pub banner_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default = "default_true")]
    pub registration_open: bool,
    #[validate(length(max = 100))]
    pub organizer_name: Option<String>,
    #[validate(url)]
    pub organizer_logo: Option<String>,
    pub coordinate_lat: Option<String>,
    pub coordinate_long: Option<String>,
    #[validate(url)]
    pub address_url: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct PatchEventRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub venue: Option<String>,
    pub start_at: Option<DateTime<FixedOffset>>,
    pub end_at: Option<DateTime<FixedOffset>>,
    pub price_minor_units: Option<i64>,
    #[validate(url)]
    pub banner_url: Option<String>,
    pub is_active: Option<bool>,
    pub requires_approval: Option<bool>,
    pub registration_open: Option<bool>,
    #[validate(length(max = 100))]
    pub organizer_name: Option<String>,
    #[validate(url)]
    pub organizer_logo: Option<String>,
    pub coordinate_lat: Option<String>,
    pub coordinate_long: Option<String>,
    #[validate(url)]
    pub address_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_recent_limit")]
    pub limit: i64,
}

fn default_recent_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct FeaturedSlotInfo {
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_start: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Serialize)]
pub struct FeaturedSlotsResponse {
    pub featured_1: FeaturedSlotInfo,
    pub featured_2: FeaturedSlotInfo,
}

const FEATURED_SLOTS: [&str; 2] = ["featured_1", "featured_2"];

// ============================================
// Registry operations
// ============================================

pub async fn create_event(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<Event>> {
    if !matches!(ctx.role, crate::auth::Role::Organizer | crate::auth::Role::Admin) {
        return Err(AppError::Forbidden("organizer access required".into()));
    }

    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if req.end_at <= req.start_at {
        return Err(AppError::FieldValidation {
            field: "end_at".into(),
            message: "end must be after start".into(),
        });
    }
    if req.end_at.with_timezone(&Utc) <= Utc::now() {
        return Err(AppError::FieldValidation {
            field: "end_at".into(),
            message: "event must end in the future".into(),
        });
    }
    if req.price_minor_units < 0 {
        return Err(AppError::FieldValidation {
            field: "price_minor_units".into(),
            message: "price cannot be negative".into(),
        });
    }

    let row = sqlx::query(
        r#"
        INSERT INTO events (
            id, title, description, city, venue, start_at, end_at,
            price_minor_units, is_active, requires_approval, registration_open,
            banner_url, organizer_name, organizer_logo,
            coordinate_lat, coordinate_long, address_url
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(new_id("evt"))
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.city)
    .bind(&req.venue)
    .bind(req.start_at.with_timezone(&Utc))
    .bind(req.end_at.with_timezone(&Utc))
    .bind(req.price_minor_units)
    .bind(req.is_active)
    .bind(req.requires_approval)
    .bind(req.registration_open)
    .bind(&req.banner_url)
    .bind(&req.organizer_name)
    .bind(&req.organizer_logo)
    .bind(&req.coordinate_lat)
    .bind(&req.coordinate_long)
    .bind(&req.address_url)
    .fetch_one(&state.db)
    .await?;

    invalidate_active_list(&state).await;

    let event = Event::from_row(&row);
    tracing::info!(event_id = %event.id, "event created");
    Ok(Json(event))
}

/// Active upcoming events, cached for five minutes.
pub async fn list_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>> {
    let cache_key = CacheService::events_active_key();
    if let Some(cached) = state.cache.get::<Vec<Event>>(cache_key).await {
        return Ok(Json(cached));
    }

    let rows = sqlx::query(
        "SELECT * FROM events WHERE is_active = TRUE AND end_at > now() ORDER BY start_at",
    )
    .fetch_all(&state.db)
    .await?;

    let events: Vec<Event> = rows.iter().map(Event::from_row).collect();

    if let Err(e) = state
        .cache
        .set(cache_key, &events, EVENTS_CACHE_TTL_SECONDS)
        .await
    {
        tracing::warn!("failed to cache active events list: {}", e);
    }

    Ok(Json(events))
}

/// Every event regardless of state, for back-office use.
pub async fn get_all_events(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<Vec<Event>>> {
    ctx.require_admin()?;

    let rows = sqlx::query("SELECT * FROM events ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows.iter().map(Event::from_row).collect()))
}

pub async fn list_recent_events(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<Event>>> {
    let limit = params.limit.clamp(1, 100);
    let rows = sqlx::query("SELECT * FROM events ORDER BY created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows.iter().map(Event::from_row).collect()))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>> {
    let row = sqlx::query("SELECT * FROM events WHERE id = $1")
        .bind(&event_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::EventNotFound)?;

    let event = Event::from_row(&row);
    if event.has_ended(Utc::now()) {
        return Err(AppError::EventExpired);
    }

    Ok(Json(event))
}

pub async fn patch_event(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(event_id): Path<String>,
    Json(req): Json<PatchEventRequest>,
) -> Result<Json<Event>> {
    ctx.require_admin()?;
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if let (Some(start), Some(end)) = (&req.start_at, &req.end_at) {
        if end <= start {
            return Err(AppError::FieldValidation {
                field: "end_at".into(),
                message: "end must be after start".into(),
            });
        }
    }
    if matches!(req.price_minor_units, Some(p) if p < 0) {
        return Err(AppError::FieldValidation {
            field: "price_minor_units".into(),
            message: "price cannot be negative".into(),
        });
    }

    // Unspecified fields are retained; created_at is never touched.
    let row = sqlx::query(
        r#"
        UPDATE events SET
            title             = COALESCE($2, title),
            description       = COALESCE($3, description),
            city              = COALESCE($4, city),
            venue             = COALESCE($5, venue),
            start_at          = COALESCE($6, start_at),
            end_at            = COALESCE($7, end_at),
            price_minor_units = COALESCE($8, price_minor_units),
            banner_url        = COALESCE($9, banner_url),
            is_active         = COALESCE($10, is_active),
            requires_approval = COALESCE($11, requires_approval),
            registration_open = COALESCE($12, registration_open),
            organizer_name    = COALESCE($13, organizer_name),
            organizer_logo    = COALESCE($14, organizer_logo),
            coordinate_lat    = COALESCE($15, coordinate_lat),
            coordinate_long   = COALESCE($16, coordinate_long),
            address_url       = COALESCE($17, address_url)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(&event_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.city)
    .bind(&req.venue)
    .bind(req.start_at.map(|t| t.with_timezone(&Utc)))
    .bind(req.end_at.map(|t| t.with_timezone(&Utc)))
    .bind(req.price_minor_units)
    .bind(&req.banner_url)
    .bind(req.is_active)
    .bind(req.requires_approval)
    .bind(req.registration_open)
    .bind(&req.organizer_name)
    .bind(&req.organizer_logo)
    .bind(&req.coordinate_lat)
    .bind(&req.coordinate_long)
    .bind(&req.address_url)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::EventNotFound)?;

    invalidate_active_list(&state).await;

    Ok(Json(Event::from_row(&row)))
}

pub async fn toggle_activation(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(event_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let row = sqlx::query(
        "UPDATE events SET is_active = NOT is_active WHERE id = $1 RETURNING id, is_active",
    )
    .bind(&event_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::EventNotFound)?;

    invalidate_active_list(&state).await;

    let is_active: bool = row.get("is_active");
    Ok(Json(json!({ "event_id": event_id, "is_active": is_active })))
}

/// Delete an event and everything hanging off it in one transaction:
/// tickets, received QR tokens, join requests and featured-slot references.
pub async fn delete_event(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(event_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let mut tx = state.db.begin().await?;

    let tickets_deleted = sqlx::query("DELETE FROM tickets WHERE event_id = $1")
        .bind(&event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let tokens_deleted = sqlx::query("DELETE FROM received_qr_tokens WHERE event_id = $1")
        .bind(&event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM event_join_requests WHERE event_id = $1")
        .bind(&event_id)
        .execute(&mut *tx)
        .await?;

    let slots_cleared = sqlx::query(
        "UPDATE featured_slots SET event_id = NULL, updated_at = now() WHERE event_id = $1",
    )
    .bind(&event_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let deleted = sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(&event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Err(AppError::EventNotFound);
    }

    tx.commit().await?;
    invalidate_active_list(&state).await;

    tracing::info!(
        event_id = %event_id,
        tickets_deleted,
        tokens_deleted,
        slots_cleared,
        "event deleted"
    );

    Ok(Json(json!({
        "event_id": event_id,
        "tickets_deleted": tickets_deleted,
        "tokens_deleted": tokens_deleted,
        "featured_slots_cleared": slots_cleared,
    })))
}

/// Users holding a ticket for this event, with their validation status.
pub async fn registered_users(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(event_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let exists = sqlx::query("SELECT 1 FROM events WHERE id = $1")
        .bind(&event_id)
        .fetch_optional(&state.db)
        .await?
        .is_some();
    if !exists {
        return Err(AppError::EventNotFound);
    }

    let rows = sqlx::query(
        r#"
        SELECT u.id, u.name, u.phone, u.picture_url,
               bool_or(t.is_validated) AS is_validated
        FROM tickets t
        JOIN users u ON u.id = t.user_id
        WHERE t.event_id = $1
        GROUP BY u.id, u.name, u.phone, u.picture_url
        ORDER BY u.name
        "#,
    )
    .bind(&event_id)
    .fetch_all(&state.db)
    .await?;

    let users: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "id": r.get::<String, _>("id"),
                "name": r.get::<String, _>("name"),
                "phone": r.get::<Option<String>, _>("phone"),
                "picture_url": r.get::<Option<String>, _>("picture_url"),
                "is_validated": r.get::<bool, _>("is_validated"),
            })
        })
        .collect();

    Ok(Json(json!({ "count": users.len(), "users": users })))
}

// ============================================
// Expiry sweeper
// ============================================

/// Deactivate events that ended more than an hour ago. Idempotent; safe to
/// run from the scheduler and the admin endpoint concurrently. Transient
/// database faults are retried with the standard backoff.
pub async fn expire_sweep(state: &AppState) -> Result<u64> {
    let swept = crate::db::with_retry("expire_sweep", || async {
        sqlx::query(
            "UPDATE events SET is_active = FALSE
             WHERE is_active = TRUE AND end_at + interval '1 hour' <= now()",
        )
        .execute(&state.db)
        .await
    })
    .await?
    .rows_affected();

    if swept > 0 {
        invalidate_active_list(state).await;
        tracing::info!(swept, "expired events deactivated");
    }

    Ok(swept)
}

pub async fn expire_sweep_endpoint(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin()?;
    let swept = expire_sweep(&state).await?;
    Ok(Json(json!({ "deactivated": swept })))
}

// ============================================
// Featured slots
// ============================================

async fn load_slot(state: &AppState, slot: &str) -> Result<FeaturedSlotInfo> {
    let row = sqlx::query(
        r#"
        SELECT fs.event_id, e.id AS found_id, e.title, e.city, e.start_at
        FROM featured_slots fs
        LEFT JOIN events e ON e.id = fs.event_id
        WHERE fs.slot = $1
        "#,
    )
    .bind(slot)
    .fetch_one(&state.db)
    .await?;

    let event_id: Option<String> = row.get("event_id");
    let found_id: Option<String> = row.get("found_id");

    // A slot pointing at a deleted event is cleared on read.
    if event_id.is_some() && found_id.is_none() {
        sqlx::query("UPDATE featured_slots SET event_id = NULL, updated_at = now() WHERE slot = $1")
            .bind(slot)
            .execute(&state.db)
            .await?;
        return Ok(FeaturedSlotInfo {
            event_id: None,
            event_title: None,
            event_city: None,
            event_start: None,
        });
    }

    Ok(FeaturedSlotInfo {
        event_id,
        event_title: row.get("title"),
        event_city: row.get("city"),
        event_start: row
            .get::<Option<DateTime<Utc>>, _>("start_at")
            .map(crate::models::to_display),
    })
}

pub async fn get_featured_slots(State(state): State<AppState>) -> Result<Json<FeaturedSlotsResponse>> {
    let featured_1 = load_slot(&state, "featured_1").await?;
    let featured_2 = load_slot(&state, "featured_2").await?;
    Ok(Json(FeaturedSlotsResponse {
        featured_1,
        featured_2,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetSlotParams {
    pub event_id: Option<String>,
}

pub async fn set_featured_slot(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(slot): Path<String>,
    Query(params): Query<SetSlotParams>,
) -> Result<Json<FeaturedSlotsResponse>> {
    ctx.require_admin()?;

    if !FEATURED_SLOTS.contains(&slot.as_str()) {
        return Err(AppError::FieldValidation {
            field: "slot".into(),
            message: "slot must be 'featured_1' or 'featured_2'".into(),
        });
    }

    if let Some(event_id) = &params.event_id {
        let exists = sqlx::query("SELECT 1 FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&state.db)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::EventNotFound);
        }
    }

    sqlx::query("UPDATE featured_slots SET event_id = $2, updated_at = now() WHERE slot = $1")
        .bind(&slot)
        .bind(&params.event_id)
        .execute(&state.db)
        .await?;

    refresh_featured_mirror(&state).await;
    get_featured_slots(State(state)).await
}

pub async fn clear_featured_slot(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(slot): Path<String>,
) -> Result<Json<FeaturedSlotsResponse>> {
    ctx.require_admin()?;

    if !FEATURED_SLOTS.contains(&slot.as_str()) {
        return Err(AppError::FieldValidation {
            field: "slot".into(),
            message: "slot must be 'featured_1' or 'featured_2'".into(),
        });
    }

    sqlx::query("UPDATE featured_slots SET event_id = NULL, updated_at = now() WHERE slot = $1")
        .bind(&slot)
        .execute(&state.db)
        .await?;

    refresh_featured_mirror(&state).await;
    get_featured_slots(State(state)).await
}

/// Compatibility projection: the featured slots as a 0–2 element event list.
pub async fn list_featured_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>> {
    let rows = sqlx::query(
        r#"
        SELECT e.*
        FROM featured_slots fs
        JOIN events e ON e.id = fs.event_id
        WHERE fs.event_id IS NOT NULL
        ORDER BY fs.slot
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows.iter().map(Event::from_row).collect()))
}

async fn invalidate_active_list(state: &AppState) {
    if let Err(e) = state.cache.delete(CacheService::events_active_key()).await {
        tracing::warn!("failed to invalidate active events cache: {}", e);
    }
}

/// Opportunistic cache mirror of the slots; the table stays authoritative.
async fn refresh_featured_mirror(state: &AppState) {
    let slots = sqlx::query("SELECT slot, event_id FROM featured_slots ORDER BY slot")
        .fetch_all(&state.db)
        .await;

    if let Ok(rows) = slots {
        let mirror: serde_json::Map<String, serde_json::Value> = rows
            .iter()
            .map(|r| {
                (
                    r.get::<String, _>("slot"),
                    json!(r.get::<Option<String>, _>("event_id")),
                )
            })
            .collect();
        let _ = state
            .cache
            .set(CacheService::featured_slots_key(), &mirror, 3600)
            .await;
    }
}
