//! Authentication middleware and JWT verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::app::AppState;
use crate::util::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// Claims of an HS256 bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user id); tokens minted with an `id` claim are accepted too
    #[serde(alias = "id")]
    pub sub: String,
    /// Display name, preferred as the player identity when present
    #[serde(default)]
    pub username: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
}

impl JwtClaims {
    /// Name the server uses for room ownership
    pub fn identity(&self) -> &str {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.sub)
    }
}

/// Verify a JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    // Verify signature (HMAC-SHA256)
    let message = format!("{}.{}", header_b64, payload_b64);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(message.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_millis() / 1000 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingHeader => StatusCode::UNAUTHORIZED,
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
        };

        (status, self.to_string()).into_response()
    }
}

/// Authenticated user extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: String,
    pub claims: JwtClaims,
}

/// Middleware to require authentication
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;

    let claims = verify_jwt(token, &state.config.jwt_secret)?;

    let auth_user = AuthenticatedUser {
        identity: claims.identity().to_string(),
        claims,
    };

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Mint an HS256 token; used by tests across the crate
#[cfg(test)]
pub(crate) fn sign_token(claims: &serde_json::Value, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{header}.{payload}").as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{header}.{payload}.{signature}")
}
