use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Every failure a core operation can surface, grouped by the categories
/// the frontend switches on (`validation`, `authentication`, `authorization`,
/// `business_logic`, `payment`, `rate_limit`, `database`, `system`).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // validation
    #[error("validation error: {0}")]
    Validation(String),
    #[error("validation error on {field}: {message}")]
    FieldValidation { field: String, message: String },

    // authentication
    #[error("authentication required")]
    Unauthenticated,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid phone or password")]
    InvalidCredentials,

    // authorization
    #[error("forbidden: {0}")]
    Forbidden(String),

    // business_logic
    #[error("user not found")]
    UserNotFound,
    #[error("event not found")]
    EventNotFound,
    #[error("ticket not found")]
    TicketNotFound,
    #[error("join request not found")]
    JoinRequestNotFound,
    #[error("event has already ended")]
    EventExpired,
    #[error("event is not active")]
    EventInactive,
    #[error("registration is closed for this event")]
    EventClosed,
    #[error("user is already registered for this event")]
    DuplicateRegistration,
    #[error("paid event requires payment")]
    PaidEventRequiresPayment,
    #[error("event is free, no payment expected")]
    FreeEventRejected,
    #[error("insufficient points")]
    InsufficientPoints,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connection request already pending")]
    AlreadyPending,
    #[error("conflict: {0}")]
    Conflict(String),

    // payment
    #[error("invalid payment signature")]
    InvalidSignature,
    #[error("invalid webhook signature")]
    InvalidWebhookSignature,
    #[error("payment order not found")]
    OrderNotFound,
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    // rate_limit
    #[error("rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },

    // database
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // system
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    code: String,
    message: String,
    #[serde(rename = "userMessage")]
    user_message: String,
    severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AppError {
    /// Stable machine code the transport serializes; frontends branch on these.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::FieldValidation { .. } => "VALIDATION_ERROR",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenRevoked => "TOKEN_REVOKED",
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::EventNotFound => "EVENT_NOT_FOUND",
            AppError::TicketNotFound => "TICKET_NOT_FOUND",
            AppError::JoinRequestNotFound => "JOIN_REQUEST_NOT_FOUND",
            AppError::EventExpired => "EVENT_EXPIRED",
            AppError::EventInactive => "EVENT_INACTIVE",
            AppError::EventClosed => "EVENT_CLOSED",
            AppError::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            AppError::PaidEventRequiresPayment => "PAID_EVENT_REQUIRES_PAYMENT",
            AppError::FreeEventRejected => "FREE_EVENT_REJECTED",
            AppError::InsufficientPoints => "INSUFFICIENT_POINTS",
            AppError::AlreadyConnected => "ALREADY_CONNECTED",
            AppError::AlreadyPending => "ALREADY_PENDING",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
            AppError::InvalidWebhookSignature => "INVALID_WEBHOOK_SIGNATURE",
            AppError::OrderNotFound => "ORDER_NOT_FOUND",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::FieldValidation { .. } => "validation_error",
            AppError::Unauthenticated
            | AppError::TokenExpired
            | AppError::TokenRevoked
            | AppError::InvalidToken
            | AppError::InvalidCredentials => "authentication_error",
            AppError::Forbidden(_) => "authorization_error",
            AppError::InvalidSignature
            | AppError::InvalidWebhookSignature
            | AppError::OrderNotFound
            | AppError::GatewayUnavailable(_) => "payment_error",
            AppError::RateLimited { .. } => "rate_limit_error",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "system_error",
            _ => "business_logic_error",
        }
    }

    fn severity(&self) -> &'static str {
        match self {
            AppError::InvalidSignature
            | AppError::InvalidWebhookSignature
            | AppError::Database(_) => "critical",
            AppError::GatewayUnavailable(_) | AppError::Internal(_) => "high",
            AppError::Validation(_) | AppError::FieldValidation { .. } => "low",
            _ => "medium",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::FieldValidation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated
            | AppError::TokenExpired
            | AppError::TokenRevoked
            | AppError::InvalidToken
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::UserNotFound
            | AppError::EventNotFound
            | AppError::TicketNotFound
            | AppError::JoinRequestNotFound
            | AppError::OrderNotFound => StatusCode::NOT_FOUND,
            AppError::EventExpired
            | AppError::EventInactive
            | AppError::EventClosed
            | AppError::DuplicateRegistration
            | AppError::PaidEventRequiresPayment
            | AppError::FreeEventRejected
            | AppError::InsufficientPoints
            | AppError::AlreadyConnected
            | AppError::AlreadyPending => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidSignature | AppError::InvalidWebhookSignature => {
                StatusCode::BAD_REQUEST
            }
            AppError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> String {
        match self {
            AppError::Unauthenticated => "Please log in to continue.".to_string(),
            AppError::TokenExpired | AppError::TokenRevoked | AppError::InvalidToken => {
                "Your session is no longer valid. Please log in again.".to_string()
            }
            AppError::InvalidCredentials => {
                "Phone number or password is incorrect.".to_string()
            }
            AppError::Forbidden(_) => "You are not allowed to perform this action.".to_string(),
            AppError::EventExpired => "This event has already ended.".to_string(),
            AppError::DuplicateRegistration => {
                "You are already registered for this event.".to_string()
            }
            AppError::InvalidSignature | AppError::InvalidWebhookSignature => {
                "Payment verification failed.".to_string()
            }
            AppError::GatewayUnavailable(_) => {
                "Payments are temporarily unavailable. Please try again.".to_string()
            }
            AppError::RateLimited { .. } => {
                "Too many requests. Please slow down and try again.".to_string()
            }
            AppError::Database(_) | AppError::Internal(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let severity = self.severity();

        // Critical severities are tagged for alerting.
        match severity {
            "critical" => tracing::error!(code = self.code(), alert = true, "{}", self),
            "high" => tracing::error!(code = self.code(), "{}", self),
            _ => tracing::warn!(code = self.code(), "{}", self),
        }

        let (field, retry_after) = match &self {
            AppError::FieldValidation { field, .. } => (Some(field.clone()), None),
            AppError::RateLimited {
                retry_after_seconds,
            } => (None, Some(*retry_after_seconds)),
            _ => (None, None),
        };

        // Internal detail stays in the logs; the body carries stable codes only.
        let message = match &self {
            AppError::Database(_) => "database error".to_string(),
            AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                kind: self.category().to_string(),
                code: self.code().to_string(),
                message,
                user_message: self.user_message(),
                severity: severity.to_string(),
                field,
                retry_after,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_map_to_400() {
        assert_eq!(AppError::DuplicateRegistration.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::EventExpired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InsufficientPoints.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn lookup_errors_map_to_404() {
        assert_eq!(AppError::EventNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::OrderNotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn signature_rejections_are_critical() {
        assert_eq!(AppError::InvalidSignature.severity(), "critical");
        assert_eq!(AppError::InvalidWebhookSignature.severity(), "critical");
        assert_eq!(AppError::InvalidSignature.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn auth_errors_map_to_401() {
        for e in [
            AppError::Unauthenticated,
            AppError::TokenExpired,
            AppError::TokenRevoked,
            AppError::InvalidToken,
        ] {
            assert_eq!(e.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(e.category(), "authentication_error");
        }
    }
}
