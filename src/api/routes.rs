use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use super::AppState;
use super::{auth, events, payments, points, registrations, social, validation};

/// V1 API routes
///
/// ## Auth
/// - POST /auth/register - Create a local account
/// - POST /auth/login - Phone + password login
/// - POST /auth/logout - Revoke the presented token
/// - POST /auth/verify - Echo the verified caller identity
/// - GET  /auth/me - Current user record
///
/// ## Events (public reads, admin writes)
/// - GET    /events - Active upcoming events (cached)
/// - GET    /events/all - Every event (admin)
/// - GET    /events/recent - Most recently created events
/// - GET    /events/{event_id} - One event (404 once expired)
/// - POST   /events - Create event (organizer/admin)
/// - PATCH  /events/{event_id} - Partial update (admin)
/// - DELETE /events/{event_id} - Delete with cascades (admin)
/// - PUT    /events/{event_id}/toggle-activation - Flip is_active (admin)
/// - GET    /events/{event_id}/registered-users - Ticket holders (admin)
/// - GET    /events/{event_id}/join-requests - Approval queue (admin)
/// - POST   /events/expire-sweep - Run the expiry sweeper now (admin)
///
/// ## Featured slots
/// - GET    /events/featured - 0-2 element list projection
/// - GET    /events/featured/slots - Named slots with event summaries
/// - PUT    /events/featured/slots/{slot} - Assign or clear via ?event_id=
/// - DELETE /events/featured/slots/{slot} - Clear a slot
///
/// ## Registration & tickets
/// - POST /register/free - Free registration (or join request)
/// - POST /join-requests/{request_id}/review - Accept/reject (admin)
/// - GET  /tickets/me - Caller's tickets with event details
/// - GET  /tickets/{ticket_id} - One ticket (owner or admin)
///
/// ## Payments
/// - POST /payments/order - Create a gateway order
/// - POST /payments/verify - Verify callback signature, issue ticket
/// - POST /payments/webhook - Gateway webhook (HMAC over raw body)
/// - GET  /payments/orders/{gateway_order_id} - Order + audit trail
///
/// ## Validation (scanner-facing)
/// - POST /validate - Single-use ticket validation
/// - POST /validate/receive - Store a raw scanner submission
/// - GET  /validate/received - All stored submissions (admin)
/// - GET  /validate/received/{event_id} - Submissions for one event (admin)
///
/// ## Points
/// - GET  /points/me - Caller's balance and history
/// - GET  /points/transactions - Ledger entries (admin)
/// - GET  /points/{user_id} - Any user's balance (admin)
/// - POST /points/award - Manual earn (admin)
/// - POST /points/deduct - Manual deduction (admin)
///
/// ## Social
/// - GET    /social/users/search - Search users by name
/// - GET    /social/users/{user_id} - Privacy-gated profile
/// - PUT    /social/users/{user_id}/privacy - Toggle own privacy
/// - POST   /social/users/{user_id}/connect - Request a connection
/// - DELETE /social/users/{user_id}/connect - Disconnect
/// - GET    /social/users/{user_id}/connections - Accepted connections
/// - GET    /social/connection-requests - Pending inbox
/// - POST   /social/connection-requests/{request_id}/accept - Accept
/// - POST   /social/connection-requests/{request_id}/decline - Decline
/// - GET    /social/feed - Events attended by connections
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        // ========================================
        // Auth
        // ========================================
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify", post(auth::verify))
        .route("/auth/me", get(auth::me))
        // ========================================
        // Events
        // ========================================
        .route("/events", get(events::list_events))
        .route("/events", post(events::create_event))
        .route("/events/all", get(events::get_all_events))
        .route("/events/recent", get(events::list_recent_events))
        .route("/events/expire-sweep", post(events::expire_sweep_endpoint))
        // ========================================
        // Featured slots (before /events/{event_id})
        // ========================================
        .route("/events/featured", get(events::list_featured_events))
        .route("/events/featured/slots", get(events::get_featured_slots))
        .route(
            "/events/featured/slots/{slot}",
            put(events::set_featured_slot),
        )
        .route(
            "/events/featured/slots/{slot}",
            delete(events::clear_featured_slot),
        )
        .route("/events/{event_id}", get(events::get_event))
        .route("/events/{event_id}", patch(events::patch_event))
        .route("/events/{event_id}", delete(events::delete_event))
        .route(
            "/events/{event_id}/toggle-activation",
            put(events::toggle_activation),
        )
        .route(
            "/events/{event_id}/registered-users",
            get(events::registered_users),
        )
        .route(
            "/events/{event_id}/join-requests",
            get(registrations::list_join_requests),
        )
        // ========================================
        // Registration & tickets
        // ========================================
        .route("/register/free", post(registrations::register_free))
        .route(
            "/join-requests/{request_id}/review",
            post(registrations::review_join_request),
        )
        .route("/tickets/me", get(registrations::my_tickets))
        .route("/tickets/{ticket_id}", get(registrations::get_ticket))
        // ========================================
        // Payments
        // ========================================
        .route("/payments/order", post(payments::create_order))
        .route("/payments/verify", post(payments::verify_payment))
        .route("/payments/webhook", post(payments::webhook))
        .route(
            "/payments/orders/{gateway_order_id}",
            get(payments::get_order),
        )
        // ========================================
        // Validation
        // ========================================
        .route("/validate", post(validation::validate))
        .route("/validate/receive", post(validation::receive_qr_token))
        .route("/validate/received", get(validation::list_received_tokens))
        .route(
            "/validate/received/{event_id}",
            get(validation::received_tokens_by_event),
        )
        // ========================================
        // Points
        // ========================================
        .route("/points/me", get(points::my_points))
        .route("/points/transactions", get(points::list_transactions))
        .route("/points/award", post(points::award_points))
        .route("/points/deduct", post(points::deduct_points))
        .route("/points/{user_id}", get(points::user_points))
        // ========================================
        // Social
        // ========================================
        .route("/social/users/search", get(social::search_users))
        .route("/social/users/{user_id}", get(social::get_profile))
        .route(
            "/social/users/{user_id}/privacy",
            put(social::update_privacy),
        )
        .route(
            "/social/users/{user_id}/connect",
            post(social::request_connection),
        )
        .route(
            "/social/users/{user_id}/connect",
            delete(social::disconnect),
        )
        .route(
            "/social/users/{user_id}/connections",
            get(social::list_connections),
        )
        .route(
            "/social/connection-requests",
            get(social::pending_requests),
        )
        .route(
            "/social/connection-requests/{request_id}/accept",
            post(social::accept_request),
        )
        .route(
            "/social/connection-requests/{request_id}/decline",
            post(social::decline_request),
        )
        .route("/social/feed", get(social::activity_feed))
}
