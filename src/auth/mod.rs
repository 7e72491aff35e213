/*!
 * # Authentication and Authorization Module
 *
 * Credentials come in three forms:
 *
 * - JWT bearer tokens (`Authorization: Bearer ...`) for API clients
 * - The `token` cookie set by signup/login for browser sessions
 * - Opaque guest tokens (`cartId` cookie or `X-Guest-Token` header) for
 *   anonymous shoppers
 *
 * `identity_middleware` resolves whichever is present into an [`Identity`]
 * stored in request extensions; the `AuthUser` / `AdminUser` /
 * `MaybeIdentity` extractors read it from there. Role checks go through
 * [`Role::satisfies`], the single authorization predicate.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::entities::user;
use crate::errors::ServiceError;

pub use crate::entities::user::Role;

/// Name of the session cookie carrying the JWT.
pub const AUTH_COOKIE: &str = "token";
/// Name of the cookie carrying the anonymous shopper's guest token.
pub const GUEST_COOKIE: &str = "cartId";
/// Header alternative to the guest cookie for non-browser clients.
pub const GUEST_HEADER: &str = "x-guest-token";

/// Guest identity survives 30 days; the auth cookie tracks the JWT lifetime.
const GUEST_COOKIE_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

const GUEST_PREFIX: &str = "guest_";
const GUEST_SUFFIX_LEN: usize = 22; // 16 random bytes, base64url without padding

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub email: String,
    pub role: Role,
    pub jti: String, // JWT ID (unique identifier for this token)
    pub iat: i64,    // Issued at time
    pub exp: i64,    // Expiration time
}

/// Authenticated registered user, reconstructed from validated claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.satisfies(Role::Admin)
    }
}

/// Opaque token identifying an anonymous shopper.
///
/// Shape: `guest_` followed by 22 base64url characters (16 random bytes).
/// The server never stores these; possession is the whole credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestToken(String);

impl GuestToken {
    pub fn mint() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let suffix = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        GuestToken(format!("{}{}", GUEST_PREFIX, suffix))
    }

    /// Accepts only well-formed tokens; everything else is treated as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let suffix = raw.strip_prefix(GUEST_PREFIX)?;
        if suffix.len() != GUEST_SUFFIX_LEN {
            return None;
        }
        if !suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return None;
        }
        Some(GuestToken(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Who is calling: a registered user or an anonymous guest.
#[derive(Debug, Clone)]
pub enum Identity {
    User(AuthUser),
    Guest(GuestToken),
}

impl Identity {
    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Guest(_) => None,
        }
    }

    pub fn guest_token(&self) -> Option<&GuestToken> {
        match self {
            Identity::User(_) => None,
            Identity::Guest(token) => Some(token),
        }
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("No authentication token provided")]
    MissingToken,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                ServiceError::Unauthorized("Invalid credentials".to_string())
            }
            AuthError::MissingToken => {
                ServiceError::Unauthorized("No authentication token provided".to_string())
            }
            AuthError::InvalidToken => {
                ServiceError::Unauthorized("Invalid authentication token".to_string())
            }
            AuthError::TokenExpired => ServiceError::Unauthorized("Token has expired".to_string()),
            AuthError::Forbidden => ServiceError::Forbidden("Insufficient permissions".to_string()),
            AuthError::TokenCreation(msg) | AuthError::InternalError(msg) => {
                ServiceError::InternalError(msg)
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Authentication service that handles password hashing and token issuance.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    jwt_expiration_secs: usize,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, jwt_expiration_secs: usize) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            jwt_expiration_secs,
        }
    }

    pub fn hash_password(&self, raw: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(raw.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::InternalError(format!("Password hashing failed: {}", e)))
    }

    pub fn verify_password(&self, raw: &str, stored: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(stored)
            .map_err(|e| AuthError::InternalError(format!("Stored password hash invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(raw.as_bytes(), &parsed)
            .is_ok())
    }

    /// Generate a JWT token for a user
    pub fn issue_token(&self, user: &user::Model) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.jwt_expiration_secs as i64,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Turns validated claims into the `AuthUser` handed to handlers.
    pub fn auth_user_from_claims(&self, claims: &Claims) -> Result<AuthUser, AuthError> {
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser {
            id,
            email: claims.email.clone(),
            role: claims.role,
        })
    }
}

/// Parses a `Cookie` request header into name/value pairs.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, val)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), val.trim().to_string());
            }
        }
    }
    cookies
}

fn build_cookie(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn auth_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    build_cookie(AUTH_COOKIE, token, max_age_secs, secure)
}

pub fn clear_auth_cookie(secure: bool) -> String {
    build_cookie(AUTH_COOKIE, "", 0, secure)
}

pub fn guest_cookie(token: &GuestToken, secure: bool) -> String {
    build_cookie(GUEST_COOKIE, token.as_str(), GUEST_COOKIE_MAX_AGE_SECS, secure)
}

pub fn clear_guest_cookie(secure: bool) -> String {
    build_cookie(GUEST_COOKIE, "", 0, secure)
}

/// Resolves the caller's identity and stores it in request extensions.
///
/// Resolution order: `Authorization: Bearer` first (an invalid bearer token
/// is rejected outright with 401), then the `token` cookie (a stale cookie
/// falls through to guest handling instead of failing the request), then the
/// guest cookie / header. Requests with no recognizable credential proceed
/// with no `Identity` at all; extractors decide whether that is acceptable.
pub async fn identity_middleware(
    State(state): State<crate::AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers().clone();
    let auth = &state.auth_service;

    if let Some(raw) = bearer_token(&headers) {
        match auth
            .validate_token(raw)
            .and_then(|claims| auth.auth_user_from_claims(&claims))
        {
            Ok(user) => {
                request.extensions_mut().insert(Identity::User(user));
                return next.run(request).await;
            }
            Err(e) => return e.into_response(),
        }
    }

    let cookies = parse_cookies(&headers);

    if let Some(raw) = cookies.get(AUTH_COOKIE).filter(|t| !t.is_empty()) {
        match auth
            .validate_token(raw)
            .and_then(|claims| auth.auth_user_from_claims(&claims))
        {
            Ok(user) => {
                request.extensions_mut().insert(Identity::User(user));
                return next.run(request).await;
            }
            Err(e) => {
                debug!("Ignoring stale session cookie: {}", e);
            }
        }
    }

    let guest = cookies
        .get(GUEST_COOKIE)
        .and_then(|raw| GuestToken::parse(raw))
        .or_else(|| {
            headers
                .get(GUEST_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(GuestToken::parse)
        });

    if let Some(token) = guest {
        request.extensions_mut().insert(Identity::Guest(token));
    }

    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .and_then(|identity| identity.user().cloned())
            .ok_or(AuthError::MissingToken)
    }
}

/// Extractor that additionally requires the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.satisfies(Role::Admin) {
            return Err(AuthError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

/// Extractor for endpoints serving both signed-in users and guests.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(parts.extensions.get::<Identity>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(
            "unit-test-secret-key-that-is-long-enough-to-exercise-hs256-paths",
            3600,
        )
    }

    fn sample_user() -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: None,
            role: Role::Admin,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trip_preserves_identity() {
        let svc = service();
        let user = sample_user();

        let token = svc.issue_token(&user).unwrap();
        let claims = svc.validate_token(&token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::Admin);

        let auth_user = svc.auth_user_from_claims(&claims).unwrap();
        assert_eq!(auth_user.id, user.id);
        assert!(auth_user.is_admin());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let svc = service();
        let token = svc.issue_token(&sample_user()).unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            svc.validate_token(&tampered),
            Err(AuthError::InvalidToken)
        ));

        let other = AuthService::new(
            "a-completely-different-secret-key-also-long-enough-for-hs256-use",
            3600,
        );
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service();
        let user = sample_user();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            jti: Uuid::new_v4().to_string(),
            iat: Utc::now().timestamp() - 7200,
            exp: Utc::now().timestamp() - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(
                "unit-test-secret-key-that-is-long-enough-to-exercise-hs256-paths".as_bytes(),
            ),
        )
        .unwrap();

        assert!(matches!(
            svc.validate_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn password_hash_and_verify() {
        let svc = service();
        let hash = svc.hash_password("s3cret-pass").unwrap();

        assert_ne!(hash, "s3cret-pass");
        assert!(svc.verify_password("s3cret-pass", &hash).unwrap());
        assert!(!svc.verify_password("wrong-pass", &hash).unwrap());
    }

    #[test]
    fn guest_token_shape() {
        let token = GuestToken::mint();
        assert!(token.as_str().starts_with("guest_"));
        assert_eq!(token.as_str().len(), "guest_".len() + 22);

        assert!(GuestToken::parse(token.as_str()).is_some());
        assert!(GuestToken::parse("guest_short").is_none());
        assert!(GuestToken::parse("visitor_AAAAAAAAAAAAAAAAAAAAAA").is_none());
        assert!(GuestToken::parse("guest_AAAAAAAAAAAAAAAAAAAA!!").is_none());
    }

    #[test]
    fn minted_guest_tokens_are_unique() {
        let a = GuestToken::mint();
        let b = GuestToken::mint();
        assert_ne!(a, b);
    }

    #[test]
    fn cookie_builders() {
        let cookie = auth_cookie("abc.def.ghi", 86_400, false);
        assert!(cookie.starts_with("token=abc.def.ghi;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(!cookie.contains("Secure"));

        let secure = guest_cookie(&GuestToken::mint(), true);
        assert!(secure.starts_with("cartId=guest_"));
        assert!(secure.contains("Max-Age=2592000"));
        assert!(secure.contains("Secure"));

        assert!(clear_auth_cookie(false).contains("Max-Age=0"));
        assert!(clear_guest_cookie(false).starts_with("cartId=;"));
    }

    #[test]
    fn cookie_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "token=abc; cartId=guest_AAAAAAAAAAAAAAAAAAAAAA".parse().unwrap(),
        );

        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("token").map(String::as_str), Some("abc"));
        assert_eq!(
            cookies.get("cartId").map(String::as_str),
            Some("guest_AAAAAAAAAAAAAAAAAAAAAA")
        );
    }
}
