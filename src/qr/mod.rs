// QR ticket token codec
//
// A QR token is a signed claim set binding one ticket to its user and event.
// The validator only ever sees the token string; identity is re-derived from
// the claims and cross-checked against the persisted ticket row.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::QR_DEFAULT_TTL_SECONDS;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct QrClaims {
    pub ticket_id: String,
    pub user_id: String,
    pub event_id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum QrError {
    TokenExpired,
    InvalidToken,
}

impl QrError {
    /// Machine reason string used in validation responses.
    pub fn reason(&self) -> &'static str {
        match self {
            QrError::TokenExpired => "token_expired",
            QrError::InvalidToken => "invalid_token",
        }
    }
}

/// Encode a QR token for a ticket. The expiry is the event's end converted to
/// a UTC epoch; tickets for events without an end fall back to 24 hours.
pub fn create_qr_token(
    secret: &str,
    ticket_id: &str,
    user_id: &str,
    event_id: &str,
    event_end: Option<DateTime<Utc>>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let exp = match event_end {
        Some(end) => end.timestamp(),
        None => now + QR_DEFAULT_TTL_SECONDS,
    };

    let claims = QrClaims {
        ticket_id: ticket_id.to_string(),
        user_id: user_id.to_string(),
        event_id: event_id.to_string(),
        iat: now,
        exp,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Decode and verify a QR token. Expiry here is the signed claim; the
/// validation engine additionally checks the stored event end, which is
/// authoritative over anything the token carries.
pub fn decode_qr_token(secret: &str, token: &str) -> Result<QrClaims, QrError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = jsonwebtoken::decode::<QrClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => QrError::TokenExpired,
        _ => QrError::InvalidToken,
    })?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "qr-test-secret";

    #[test]
    fn roundtrip_with_event_end() {
        let end = Utc::now() + Duration::hours(4);
        let token =
            create_qr_token(SECRET, "t_1234", "usr_1", "evt_1", Some(end)).unwrap();

        let claims = decode_qr_token(SECRET, &token).unwrap();
        assert_eq!(claims.ticket_id, "t_1234");
        assert_eq!(claims.user_id, "usr_1");
        assert_eq!(claims.event_id, "evt_1");
        assert_eq!(claims.exp, end.timestamp());
    }

    #[test]
    fn fallback_expiry_without_event_end() {
        let token = create_qr_token(SECRET, "t_1234", "usr_1", "evt_1", None).unwrap();
        let claims = decode_qr_token(SECRET, &token).unwrap();
        assert_eq!(claims.exp - claims.iat, QR_DEFAULT_TTL_SECONDS);
    }

    #[test]
    fn past_event_end_is_expired() {
        let end = Utc::now() - Duration::hours(1);
        let token =
            create_qr_token(SECRET, "t_1234", "usr_1", "evt_1", Some(end)).unwrap();
        assert_eq!(decode_qr_token(SECRET, &token), Err(QrError::TokenExpired));
    }

    #[test]
    fn tampered_token_is_invalid() {
        let end = Utc::now() + Duration::hours(4);
        let token =
            create_qr_token(SECRET, "t_1234", "usr_1", "evt_1", Some(end)).unwrap();

        // Flip a character in the payload segment.
        let mut bytes = token.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] = if bytes[mid] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(
            decode_qr_token(SECRET, &tampered),
            Err(QrError::InvalidToken)
        );
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let end = Utc::now() + Duration::hours(4);
        let token =
            create_qr_token(SECRET, "t_1234", "usr_1", "evt_1", Some(end)).unwrap();
        assert_eq!(
            decode_qr_token("other", &token),
            Err(QrError::InvalidToken)
        );
    }
}
