// Identity context middleware
//
// The transport authenticates here, once, and hands the core an
// `AuthContext` through request extensions. No core operation ever parses
// the Authorization header; operations that need a caller extract
// `Identity` and fail with Unauthenticated when the context is empty.

use axum::extract::{Request, State};
use axum::http::{header, request::Parts};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::AppState;
use crate::auth::AuthContext;
use crate::error::AppError;

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Verify a bearer token if one is present and stash the caller identity in
/// request extensions. A present-but-invalid token is rejected here with the
/// precise authentication error; an absent token just leaves the context
/// empty for public endpoints.
pub async fn identity_context(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = {
        let headers = req.headers();
        bearer_token(headers).map(str::to_string)
    };

    if let Some(token) = token {
        match state.tokens.verify(&token).await {
            Ok(ctx) => {
                req.extensions_mut().insert(ctx);
                // Logout needs the presented token to revoke it.
                req.extensions_mut().insert(BearerToken(token));
            }
            Err(err) => return err.into_response(),
        }
    }

    next.run(req).await
}

/// The raw bearer token the caller presented, for revocation.
#[derive(Clone)]
pub struct BearerToken(pub String);

/// Extractor for operations that require an authenticated caller.
pub struct Identity(pub AuthContext);

impl<S> axum::extract::FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Identity)
            .ok_or(AppError::Unauthenticated)
    }
}

