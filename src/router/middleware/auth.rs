//! Authentication middleware
//!
//! API routes carry a Bearer JWT. WebSocket and proxy routes authenticate
//! from a query-string token instead: a browser cannot set the Authorization
//! header on a WebSocket or an iframe src.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{DaemonError, Result};
use crate::router::AppState;

/// JWT claims for API access
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Claims {
    /// User id (stringified, JWT convention)
    pub sub: String,

    /// Administrative access
    #[serde(default)]
    pub admin: bool,

    /// Expiration timestamp
    pub exp: usize,

    /// Issued at timestamp
    pub iat: usize,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Decode and validate a token against the signing key
pub fn decode_token(token: &str, jwt_secret: &str) -> Result<Claims> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(jwt_secret.as_bytes());

    let token_data = decode::<Claims>(token, &key, &validation)
        .map_err(|_| DaemonError::Unauthorized("Invalid or expired token".to_string()))?;

    Ok(token_data.claims)
}

/// Sign a token for a user
pub fn issue_token(user_id: i64, admin: bool, jwt_secret: &str, ttl_secs: i64) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        admin,
        exp: (now + ttl_secs) as usize,
        iat: now as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| DaemonError::Internal(format!("Token signing failed: {}", e)))
}

/// Ownership gate: the caller must own the enrollment or be an admin
pub fn require_owner(claims: &Claims, enrollment_user_id: i64) -> Result<()> {
    if claims.admin || claims.user_id() == Some(enrollment_user_id) {
        Ok(())
    } else {
        Err(DaemonError::Forbidden("Not authorized".to_string()))
    }
}

/// Admin gate for the infrastructure surface
pub fn require_admin(claims: &Claims) -> Result<()> {
    if claims.admin {
        Ok(())
    } else {
        Err(DaemonError::Forbidden("Admin access required".to_string()))
    }
}

/// Require Bearer authentication for API routes.
///
/// WebSocket upgrades pass through; their handler validates the query token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_websocket = request
        .headers()
        .get("Upgrade")
        .and_then(|h| h.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if is_websocket {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return unauthorized_response("Missing or invalid authorization header");
        }
    };

    let claims = match decode_token(token, &state.config.auth.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => return unauthorized_response("Invalid or expired token"),
    };

    request.extensions_mut().insert(claims);
    next.run(request).await
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": true,
            "message": message
        })),
    )
        .into_response()
}
