use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{auth_cookie, clear_auth_cookie, clear_guest_cookie, AuthUser, Identity, MaybeIdentity},
    entities::user::{self, Entity as UserEntity, Role},
    errors::ServiceError,
    handlers::common::{created, ok, validate_input, with_cookie},
    ApiResponse, ApiResult, AppState,
};

/// Account endpoints. Signup and login both adopt any guest state the caller
/// accumulated before registering.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Issued session: the account profile plus the bearer token, which is also
/// set as an httpOnly cookie.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthSession {
    pub user: user::Model,
    pub token: String,
}

/// Looks up the account and checks the password. Every failure mode answers
/// the same way so the endpoint cannot be used to probe which emails exist.
pub(crate) async fn authenticate(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<user::Model, ServiceError> {
    let email = email.trim().to_lowercase();
    let account = UserEntity::find()
        .filter(user::Column::Email.eq(email))
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".to_string()))?;

    let stored = account
        .password_hash
        .as_deref()
        .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".to_string()))?;
    if !state.auth_service.verify_password(password, stored)? {
        return Err(ServiceError::Unauthorized(
            "Invalid credentials".to_string(),
        ));
    }
    if !account.is_active {
        return Err(ServiceError::Unauthorized(
            "Account is disabled".to_string(),
        ));
    }
    Ok(account)
}

/// Moves the caller's pre-registration guest state onto their account. Both
/// steps are best-effort: a failed merge never blocks the login itself.
/// Returns whether a guest token was present so the cookie can be cleared.
async fn adopt_guest_state(state: &AppState, user_id: Uuid, identity: &MaybeIdentity) -> bool {
    let Some(Identity::Guest(token)) = &identity.0 else {
        return false;
    };

    if let Err(e) = state
        .services
        .carts
        .merge_guest_cart(token.as_str(), user_id)
        .await
    {
        warn!(error = %e, user_id = %user_id, "Failed to merge guest cart");
    }
    if let Err(e) = state
        .services
        .orders
        .attach_guest_orders(user_id, token.as_str())
        .await
    {
        warn!(error = %e, user_id = %user_id, "Failed to attach guest orders");
    }
    true
}

fn session_response(
    state: &AppState,
    status_created: bool,
    session: AuthSession,
    had_guest: bool,
) -> Response {
    let cookie = auth_cookie(
        &session.token,
        state.config.jwt_expiration as i64,
        state.config.cookie_secure,
    );
    let mut response = if status_created {
        created(session)
    } else {
        ok(session)
    };
    response = with_cookie(response, &cookie);
    if had_guest {
        response = with_cookie(response, &clear_guest_cookie(state.config.cookie_secure));
    }
    response
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    summary = "Register an account",
    description = "Creates the account, issues a session and merges any guest cart and guest orders the caller accumulated",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<AuthSession>),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Json(request): Json<SignupRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;

    let email = request.email.trim().to_lowercase();
    let password_hash = state.auth_service.hash_password(&request.password)?;
    let now = Utc::now();

    let account = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(request.name.trim().to_string()),
        email: Set(email),
        password_hash: Set(Some(password_hash)),
        role: Set(Role::User),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let account = account
        .insert(&*state.db)
        .await
        .map_err(|e| ServiceError::from_insert_err(e, "Account with this email"))?;

    let token = state.auth_service.issue_token(&account)?;
    let had_guest = adopt_guest_state(&state, account.id, &identity).await;

    info!(user_id = %account.id, "Account created");
    Ok(session_response(
        &state,
        true,
        AuthSession {
            user: account,
            token,
        },
        had_guest,
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    summary = "Log in",
    description = "Verifies credentials, issues a session and merges any guest cart and guest orders",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = ApiResponse<AuthSession>),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;

    let account = authenticate(&state, &request.email, &request.password).await?;
    let token = state.auth_service.issue_token(&account)?;
    let had_guest = adopt_guest_state(&state, account.id, &identity).await;

    info!(user_id = %account.id, "User logged in");
    Ok(session_response(
        &state,
        false,
        AuthSession {
            user: account,
            token,
        },
        had_guest,
    ))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    summary = "Log out",
    description = "Clears the session cookie. Bearer tokens simply expire",
    responses(
        (status = 200, description = "Session cleared"),
    )
)]
pub async fn logout(State(state): State<AppState>) -> Response {
    let response = ok(json!({ "message": "Logged out" }));
    with_cookie(response, &clear_auth_cookie(state.config.cookie_secure))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    summary = "Current user profile",
    responses(
        (status = 200, description = "Profile retrieved", body = ApiResponse<user::Model>),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 404, description = "Account no longer exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<user::Model> {
    let account = UserEntity::find_by_id(user.id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
    Ok(Json(ApiResponse::success(account)))
}
