//! Login with HTTP basic credentials and bearer token verification.
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::server::AppState;

/// Header protected routes read the token from.
pub const TOKEN_HEADER: &str = "x-access-tokens";

fn default_token_lifetime() -> i64 {
    30
}

fn default_protect_all_writes() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the operator identity and token settings.
pub struct AuthParameters {
    /// The only username accepted by the login route.
    pub username: String,
    /// Password of the operator.
    pub password: String,
    /// Secret the tokens are signed with.
    pub secret: String,
    /// Minutes a token stays valid after login.
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_minutes: i64,
    /// Require a token on the add and bulk write routes too.
    #[serde(default = "default_protect_all_writes")]
    pub protect_all_writes: bool,
    /// Answer token failures with status 200 instead of 401.
    #[serde(default)]
    pub legacy_token_rejection: bool,
}

impl AuthParameters {
    /// The configured token lifetime, `None` if it is not a positive duration chrono can hold.
    pub fn token_lifetime(&self) -> Option<Duration> {
        Duration::try_minutes(self.token_lifetime_minutes).filter(|lifetime| *lifetime > Duration::zero())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues tokens for the configured operator and checks them on protected routes.
pub struct AuthGate {
    username: String,
    password: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
    protect_all_writes: bool,
    legacy_token_rejection: bool,
}

impl AuthGate {
    pub fn new(params: &AuthParameters) -> AuthGate {
        AuthGate {
            username: params.username.clone(),
            password: params.password.clone(),
            encoding_key: EncodingKey::from_secret(params.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(params.secret.as_bytes()),
            lifetime: Duration::try_minutes(params.token_lifetime_minutes).unwrap_or_else(|| {
                log::warn!(target: "observd::auth", "Token lifetime of {} minutes is out of range, using {}",
                           params.token_lifetime_minutes, default_token_lifetime());
                Duration::minutes(default_token_lifetime())
            }),
            protect_all_writes: params.protect_all_writes,
            legacy_token_rejection: params.legacy_token_rejection,
        }
    }

    pub fn protects_all_writes(&self) -> bool {
        self.protect_all_writes
    }

    /// Checks the credentials and returns a signed token for the user.
    pub fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let username_matches = same_secret(username, &self.username);
        let password_matches = same_secret(password, &self.password);
        if !(username_matches && password_matches) {
            log::warn!(target: "observd::auth", "Rejected login attempt for user \'{}\'", username);
            return Err(ApiError::InvalidCredentials);
        }
        let token = self.issue_token(username)?;
        log::info!(target: "observd::auth", "Issued token for user \'{}\'", username);
        Ok(token)
    }

    pub fn issue_token(&self, subject: &str) -> Result<String, ApiError> {
        let now = Utc::now();
        let expiry = now
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| ApiError::Internal("Token expiry is out of range".to_string()))?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expiry.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| ApiError::Internal(format!("Failed to sign token: {}", err)))
    }

    /// Verifies signature and expiry of a token.
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                log::debug!(target: "observd::auth", "Token rejected: \'{}\'", err);
                ApiError::InvalidToken
            })
    }

    fn reject(&self, err: ApiError) -> Response {
        if self.legacy_token_rejection {
            (StatusCode::OK, Json(json!({ "message": err.to_string() }))).into_response()
        } else {
            err.into_response()
        }
    }
}

/// Compares in constant time for inputs of equal length.
fn same_secret(given: &str, expected: &str) -> bool {
    given.len() == expected.len() && openssl::memcmp::eq(given.as_bytes(), expected.as_bytes())
}

/// Splits a `Basic` authorization header into username and password.
pub fn decode_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credential = String::from_utf8(decoded).ok()?;
    let (username, password) = credential.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// GET /login
pub async fn login(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let (username, password) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic_auth)
        .ok_or(ApiError::MissingCredentials)?;

    let token = state.auth.login(&username, &password)?;
    Ok(Json(json!({ "token": token })))
}

/// Middleware guarding the routes it is layered on.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let verified = match request.headers().get(TOKEN_HEADER).and_then(|value| value.to_str().ok()) {
        Some(token) => state.auth.verify_token(token),
        None => Err(ApiError::MissingToken),
    };

    match verified {
        Ok(claims) => {
            log::trace!(target: "observd::auth", "Token of \'{}\' accepted", claims.sub);
            next.run(request).await
        }
        Err(err) => state.auth.reject(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AuthParameters {
        AuthParameters {
            username: "operator".to_string(),
            password: "secret-password".to_string(),
            secret: "signing-secret".to_string(),
            token_lifetime_minutes: 30,
            protect_all_writes: true,
            legacy_token_rejection: false,
        }
    }

    #[test]
    fn issued_tokens_verify() {
        let gate = AuthGate::new(&params());
        let token = gate.login("operator", "secret-password").unwrap();
        let claims = gate.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "operator");
        assert_eq!(claims.exp - claims.iat, 30 * 60);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let gate = AuthGate::new(&params());
        assert!(matches!(gate.login("operator", "nope"), Err(ApiError::InvalidCredentials)));
        assert!(matches!(gate.login("someone", "secret-password"), Err(ApiError::InvalidCredentials)));
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let mut expired = params();
        expired.token_lifetime_minutes = -5;
        let token = AuthGate::new(&expired).issue_token("operator").unwrap();
        assert!(matches!(AuthGate::new(&params()).verify_token(&token), Err(ApiError::InvalidToken)));

        let mut other = params();
        other.secret = "another-secret".to_string();
        let token = AuthGate::new(&other).issue_token("operator").unwrap();
        assert!(matches!(AuthGate::new(&params()).verify_token(&token), Err(ApiError::InvalidToken)));

        assert!(AuthGate::new(&params()).verify_token("not-a-token").is_err());
    }

    #[test]
    fn secrets_of_any_length_compare() {
        assert!(same_secret("secret-password", "secret-password"));
        assert!(!same_secret("secret-passwore", "secret-password"));
        assert!(!same_secret("secret", "secret-password"));
        assert!(!same_secret("", "secret-password"));
    }

    #[test]
    fn token_lifetime_range() {
        let mut parameters = params();
        assert_eq!(parameters.token_lifetime(), Some(Duration::minutes(30)));
        parameters.token_lifetime_minutes = 0;
        assert_eq!(parameters.token_lifetime(), None);
        parameters.token_lifetime_minutes = i64::MAX;
        assert_eq!(parameters.token_lifetime(), None);

        // Out of range lifetimes never panic when the gate is built directly.
        let token = AuthGate::new(&parameters).issue_token("operator").unwrap();
        assert!(AuthGate::new(&params()).verify_token(&token).is_ok());
    }

    #[test]
    fn basic_header_decoding() {
        // "Team5:APIPassword"
        assert_eq!(
            decode_basic_auth("Basic VGVhbTU6QVBJUGFzc3dvcmQ="),
            Some(("Team5".to_string(), "APIPassword".to_string()))
        );
        assert_eq!(decode_basic_auth("Bearer abc"), None);
        assert_eq!(decode_basic_auth("Basic !!!"), None);
        // "nocolon"
        assert_eq!(decode_basic_auth("Basic bm9jb2xvbg=="), None);
    }
}
