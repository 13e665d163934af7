// Connections graph and privacy-gated profiles.
//
// A connection request auto-accepts when the target is public and pends
// when the target is private. "Connected" is symmetric: an accepted edge in
// either direction. Phone and email never leave the profile endpoint.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;

use super::AppState;
use crate::error::{AppError, Result};
use crate::middleware::Identity;
use crate::models::connection::{Connection, ConnectionStatus};
use crate::models::new_id;
use crate::models::user::User;

// ============================================
// Profile projection
// ============================================

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: String,
    pub name: String,
    pub picture_url: Option<String>,
    pub is_private: bool,
    pub connections_count: i64,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strava_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed_events: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<FixedOffset>>,
}

/// Project a user into what the viewer is allowed to see. A private profile
/// shows only the public header unless the viewer is connected. Phone and
/// email are structurally absent from this type.
fn project_profile(
    user: &User,
    connections_count: i64,
    is_connected: bool,
    connection_status: Option<&str>,
) -> ProfileResponse {
    let full = !user.is_private || is_connected;

    ProfileResponse {
        id: user.id.clone(),
        name: user.name.clone(),
        picture_url: user.picture_url.clone(),
        is_private: user.is_private,
        connections_count,
        is_connected,
        connection_status: connection_status.map(str::to_string),
        bio: full.then(|| user.bio.clone()).flatten(),
        strava_link: full.then(|| user.strava_link.clone()).flatten(),
        instagram_id: full.then(|| user.instagram_id.clone()).flatten(),
        subscribed_events: full.then(|| user.subscribed_events.clone()),
        created_at: full.then_some(user.created_at),
    }
}

// ============================================
// Graph helpers
// ============================================

async fn is_connected(state: &AppState, a: &str, b: &str) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM connections
            WHERE status = 'accepted'
              AND ((requester_id = $1 AND target_id = $2)
                OR (requester_id = $2 AND target_id = $1))
        ) AS connected
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_one(&state.db)
    .await?;
    Ok(row.get("connected"))
}

async fn connections_count(state: &AppState, user_id: &str) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n FROM connections
        WHERE status = 'accepted' AND (requester_id = $1 OR target_id = $1)
        "#,
    )
    .bind(user_id)
    .fetch_one(&state.db)
    .await?;
    Ok(row.get("n"))
}

async fn edge_between(state: &AppState, a: &str, b: &str) -> Result<Option<Connection>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM connections
        WHERE (requester_id = $1 AND target_id = $2)
           OR (requester_id = $2 AND target_id = $1)
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_optional(&state.db)
    .await?;
    Ok(row.map(|r| Connection::from_row(&r)))
}

async fn load_user(state: &AppState, user_id: &str) -> Result<User> {
    let row = sqlx::query("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::UserNotFound)?;
    Ok(User::from_row(&row))
}

// ============================================
// Profiles
// ============================================

pub async fn get_profile(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>> {
    let user = load_user(&state, &user_id).await?;
    let count = connections_count(&state, &user.id).await?;

    if ctx.user_id == user.id {
        // Own profile is always fully visible.
        return Ok(Json(project_profile(&user, count, true, None)));
    }

    let edge = edge_between(&state, &ctx.user_id, &user.id).await?;
    let connected = matches!(
        &edge,
        Some(c) if c.status == ConnectionStatus::Accepted
    );
    let status = edge.as_ref().map(|c| c.status.as_str());

    Ok(Json(project_profile(&user, count, connected, status)))
}

#[derive(Debug, Deserialize)]
pub struct PrivacyRequest {
    pub is_private: bool,
}

pub async fn update_privacy(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(user_id): Path<String>,
    Json(req): Json<PrivacyRequest>,
) -> Result<Json<serde_json::Value>> {
    if ctx.user_id != user_id {
        return Err(AppError::Forbidden(
            "can only update your own privacy settings".into(),
        ));
    }

    let updated = sqlx::query("UPDATE users SET is_private = $2 WHERE id = $1")
        .bind(&user_id)
        .bind(req.is_private)
        .execute(&state.db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(AppError::UserNotFound);
    }

    Ok(Json(json!({ "is_private": req.is_private })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    10
}

pub async fn search_users(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>> {
    let query = params.q.trim();
    if query.len() < 2 {
        return Err(AppError::FieldValidation {
            field: "q".into(),
            message: "search query must be at least 2 characters".into(),
        });
    }

    let rows = sqlx::query(
        r#"
        SELECT * FROM users
        WHERE name ILIKE '%' || $1 || '%' AND id <> $2
        ORDER BY name
        LIMIT $3
        "#,
    )
    .bind(query)
    .bind(&ctx.user_id)
    .bind(params.limit.clamp(1, 50))
    .fetch_all(&state.db)
    .await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        let user = User::from_row(row);
        let count = connections_count(&state, &user.id).await?;
        let connected = is_connected(&state, &ctx.user_id, &user.id).await?;
        results.push(project_profile(&user, count, connected, None));
    }

    Ok(Json(json!({ "count": results.len(), "users": results })))
}

// ============================================
// Connection lifecycle
// ============================================

pub async fn request_connection(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if ctx.user_id == user_id {
        return Err(AppError::Validation("cannot connect to yourself".into()));
    }

    let target = load_user(&state, &user_id).await?;

    if let Some(existing) = edge_between(&state, &ctx.user_id, &user_id).await? {
        return Err(match existing.status {
            ConnectionStatus::Accepted => AppError::AlreadyConnected,
            ConnectionStatus::Pending => AppError::AlreadyPending,
            ConnectionStatus::Blocked => {
                AppError::Forbidden("connection not possible".into())
            }
        });
    }

    // Public targets auto-accept; private targets get a pending request.
    let status = if target.is_private {
        ConnectionStatus::Pending
    } else {
        ConnectionStatus::Accepted
    };

    let row = sqlx::query(
        r#"
        INSERT INTO connections (id, requester_id, target_id, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, now(), now())
        ON CONFLICT (requester_id, target_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(new_id("conn"))
    .bind(&ctx.user_id)
    .bind(&user_id)
    .bind(status.as_str())
    .fetch_optional(&state.db)
    .await?;

    let Some(row) = row else {
        // Lost a race with an identical request.
        return Err(AppError::AlreadyPending);
    };
    let connection = Connection::from_row(&row);

    tracing::info!(
        requester = %ctx.user_id,
        target = %user_id,
        status = connection.status.as_str(),
        "connection requested"
    );

    Ok(Json(json!({
        "status": connection.status,
        "connection_id": connection.id,
    })))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(request_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    // Only the target of a pending request may accept it; CAS keeps a
    // concurrent decline from racing this.
    let updated = sqlx::query(
        r#"
        UPDATE connections SET status = 'accepted', updated_at = now()
        WHERE id = $1 AND target_id = $2 AND status = 'pending'
        "#,
    )
    .bind(&request_id)
    .bind(&ctx.user_id)
    .execute(&state.db)
    .await?
    .rows_affected();

    if updated == 0 {
        let exists = sqlx::query("SELECT target_id, status FROM connections WHERE id = $1")
            .bind(&request_id)
            .fetch_optional(&state.db)
            .await?;
        return Err(match exists {
            None => AppError::UserNotFound,
            Some(row) if row.get::<String, _>("target_id") != ctx.user_id => {
                AppError::Forbidden("not the target of this request".into())
            }
            Some(_) => AppError::Conflict("request already processed".into()),
        });
    }

    Ok(Json(json!({ "status": "accepted" })))
}

pub async fn decline_request(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(request_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = sqlx::query(
        "DELETE FROM connections WHERE id = $1 AND target_id = $2 AND status = 'pending'",
    )
    .bind(&request_id)
    .bind(&ctx.user_id)
    .execute(&state.db)
    .await?
    .rows_affected();

    if deleted == 0 {
        return Err(AppError::Conflict(
            "no pending request to decline".into(),
        ));
    }

    Ok(Json(json!({ "status": "declined" })))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM connections
        WHERE (requester_id = $1 AND target_id = $2)
           OR (requester_id = $2 AND target_id = $1)
        "#,
    )
    .bind(&ctx.user_id)
    .bind(&user_id)
    .execute(&state.db)
    .await?
    .rows_affected();

    if deleted == 0 {
        return Err(AppError::Validation("not connected to this user".into()));
    }

    Ok(Json(json!({ "status": "disconnected" })))
}

/// Pending requests where the caller is the target.
pub async fn pending_requests(
    State(state): State<AppState>,
    Identity(ctx): Identity,
) -> Result<Json<serde_json::Value>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id AS request_id, c.created_at AS requested_at, u.*
        FROM connections c
        JOIN users u ON u.id = c.requester_id
        WHERE c.target_id = $1 AND c.status = 'pending'
        ORDER BY c.created_at
        "#,
    )
    .bind(&ctx.user_id)
    .fetch_all(&state.db)
    .await?;

    let mut requests = Vec::with_capacity(rows.len());
    for row in &rows {
        let requester = User::from_row(row);
        let count = connections_count(&state, &requester.id).await?;
        requests.push(json!({
            "id": row.get::<String, _>("request_id"),
            "requester": project_profile(&requester, count, false, Some("pending")),
        }));
    }

    Ok(Json(json!({ "count": requests.len(), "requests": requests })))
}

pub async fn list_connections(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let user = load_user(&state, &user_id).await?;

    let viewer_connected = is_connected(&state, &ctx.user_id, &user.id).await?;
    if user.is_private && ctx.user_id != user.id && !viewer_connected {
        return Err(AppError::Forbidden(
            "cannot view connections of a private account".into(),
        ));
    }

    let rows = sqlx::query(
        r#"
        SELECT u.* FROM connections c
        JOIN users u ON u.id = CASE
            WHEN c.requester_id = $1 THEN c.target_id
            ELSE c.requester_id
        END
        WHERE c.status = 'accepted' AND (c.requester_id = $1 OR c.target_id = $1)
        ORDER BY u.name
        "#,
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?;

    let mut connections = Vec::with_capacity(rows.len());
    for row in &rows {
        let peer = User::from_row(row);
        let count = connections_count(&state, &peer.id).await?;
        let connected = is_connected(&state, &ctx.user_id, &peer.id).await?;
        connections.push(project_profile(&peer, count, connected, None));
    }

    Ok(Json(json!({ "count": connections.len(), "connections": connections })))
}

// ============================================
// Activity feed
// ============================================

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    #[serde(default = "default_feed_limit")]
    pub limit: i64,
}

fn default_feed_limit() -> i64 {
    20
}

/// Events attended by the caller's connections, most recent first.
pub async fn activity_feed(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Query(params): Query<FeedParams>,
) -> Result<Json<serde_json::Value>> {
    let limit = params.limit.clamp(1, 100);

    let rows = sqlx::query(
        r#"
        SELECT t.user_id, t.issued_at, u.name AS user_name,
               e.id AS event_id, e.title, e.city, e.venue, e.start_at
        FROM connections c
        JOIN tickets t ON t.user_id = CASE
            WHEN c.requester_id = $1 THEN c.target_id
            ELSE c.requester_id
        END
        JOIN users u ON u.id = t.user_id
        JOIN events e ON e.id = t.event_id
        WHERE c.status = 'accepted' AND (c.requester_id = $1 OR c.target_id = $1)
        ORDER BY t.issued_at DESC
        LIMIT $2
        "#,
    )
    .bind(&ctx.user_id)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    let activities: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "user_id": r.get::<String, _>("user_id"),
                "user_name": r.get::<String, _>("user_name"),
                "attended_at": crate::models::to_display(
                    r.get::<chrono::DateTime<chrono::Utc>, _>("issued_at")
                ),
                "event": {
                    "id": r.get::<String, _>("event_id"),
                    "title": r.get::<String, _>("title"),
                    "city": r.get::<String, _>("city"),
                    "venue": r.get::<String, _>("venue"),
                    "start_at": crate::models::to_display(
                        r.get::<chrono::DateTime<chrono::Utc>, _>("start_at")
                    ),
                },
            })
        })
        .collect();

    Ok(Json(json!({ "count": activities.len(), "activities": activities })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::to_display;
    use chrono::Utc;

    fn private_user() -> User {
        User {
            id: "usr_2".into(),
            name: "Asha".into(),
            phone: Some("+919876543210".into()),
            email: Some("asha@example.com".into()),
            google_id: None,
            password_hash: None,
            role: Role::User,
            is_private: true,
            bio: Some("hello".into()),
            picture_url: Some("https://cdn.example.com/asha.jpg".into()),
            strava_link: Some("https://strava.com/athletes/asha".into()),
            instagram_id: Some("asha.runs".into()),
            subscribed_events: vec!["evt_1".into()],
            created_at: to_display(Utc::now()),
        }
    }

    #[test]
    fn private_profile_hides_details_from_strangers() {
        let user = private_user();
        let profile = project_profile(&user, 3, false, None);

        assert_eq!(profile.id, "usr_2");
        assert_eq!(profile.name, "Asha");
        assert!(profile.is_private);
        assert_eq!(profile.connections_count, 3);
        assert!(profile.bio.is_none());
        assert!(profile.strava_link.is_none());
        assert!(profile.instagram_id.is_none());
        assert!(profile.subscribed_events.is_none());
    }

    #[test]
    fn private_profile_opens_up_for_connections() {
        let user = private_user();
        let profile = project_profile(&user, 3, true, Some("accepted"));

        assert_eq!(profile.bio.as_deref(), Some("hello"));
        assert_eq!(profile.instagram_id.as_deref(), Some("asha.runs"));
        assert_eq!(
            profile.subscribed_events.as_deref(),
            Some(&["evt_1".to_string()][..])
        );
    }

    #[test]
    fn phone_and_email_are_never_serialized() {
        let user = private_user();
        let profile = project_profile(&user, 0, true, None);
        let v = serde_json::to_value(&profile).unwrap();
        assert!(v.get("phone").is_none());
        assert!(v.get("email").is_none());
    }

    #[test]
    fn public_profile_is_fully_visible() {
        let mut user = private_user();
        user.is_private = false;
        let profile = project_profile(&user, 0, false, None);
        assert_eq!(profile.bio.as_deref(), Some("hello"));
    }
}
