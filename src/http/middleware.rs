//! Authentication middleware and JWT verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

/// Profile data some identity providers put in the token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub username: Option<String>,
}

/// Claims of a player session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<UserMetadata>,
}

impl SessionClaims {
    /// Name shown to other players
    pub fn display_name(&self) -> String {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.username.as_deref())
            .or(self.username.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_display_name(&self.sub))
    }
}

/// Fallback name derived from the user id
pub fn default_display_name(user_id: &Uuid) -> String {
    format!("Player_{}", &user_id.simple().to_string()[..8])
}

#[derive(Deserialize)]
struct TokenHeader {
    alg: String,
}

/// Verify an HS256 token and extract its claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<SessionClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let header: TokenHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or(AuthError::InvalidToken)?;
    if header.alg != "HS256" {
        return Err(AuthError::UnsupportedAlgorithm(header.alg));
    }

    // Verify signature (HMAC-SHA256)
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: SessionClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_secs() {
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

    #[error("Unsupported token algorithm {0}")]
    UnsupportedAlgorithm(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Authenticated user extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub display_name: String,
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

    let claims = verify_jwt(token, &state.config.auth_jwt_secret)?;

    let auth_user = AuthenticatedUser {
        user_id: claims.sub,
        display_name: claims.display_name(),
    };

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) const SECRET: &str = "test-secret";

    pub(crate) fn sign(claims: serde_json::Value, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{header}.{payload}").as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{payload}.{signature}")
    }

    pub(crate) fn token_for(user_id: Uuid) -> String {
        sign(json!({"sub": user_id, "exp": unix_secs() + 3600}), SECRET)
    }

    #[test]
    fn accepts_valid_token() {
        let user = Uuid::new_v4();
        let token = sign(
            json!({"sub": user, "exp": unix_secs() + 60, "user_metadata": {"username": "alice"}}),
            SECRET,
        );
        let claims = verify_jwt(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.display_name(), "alice");
    }

    #[test]
    fn rejects_wrong_secret_and_tampering() {
        let token = token_for(Uuid::new_v4());
        assert!(matches!(verify_jwt(&token, "other"), Err(AuthError::InvalidToken)));

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(json!({"sub": Uuid::new_v4(), "exp": u64::MAX}).to_string());
        parts[1] = &forged;
        assert!(matches!(verify_jwt(&parts.join("."), SECRET), Err(AuthError::InvalidToken)));

        assert!(matches!(verify_jwt("a.b", SECRET), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn rejects_expired_token() {
        let token = sign(json!({"sub": Uuid::new_v4(), "exp": 1}), SECRET);
        assert!(matches!(verify_jwt(&token, SECRET), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn rejects_other_algorithms() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({"sub": Uuid::new_v4(), "exp": u64::MAX}).to_string());
        let token = format!("{header}.{payload}.");
        assert!(matches!(
            verify_jwt(&token, SECRET),
            Err(AuthError::UnsupportedAlgorithm(alg)) if alg == "none"
        ));
    }

    #[test]
    fn display_name_falls_back() {
        let user = Uuid::parse_str("0a1b2c3d-0000-0000-0000-000000000000").unwrap();
        let claims = SessionClaims {
            sub: user,
            exp: 0,
            iat: 0,
            username: Some("bob".into()),
            user_metadata: Some(UserMetadata::default()),
        };
        assert_eq!(claims.display_name(), "bob");

        let claims = SessionClaims {
            username: None,
            ..claims
        };
        assert_eq!(claims.display_name(), "Player_0a1b2c3d");
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Token abc"), None);
    }
}
