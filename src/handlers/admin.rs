use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use sea_orm::EntityTrait;
use serde_json::json;
use tracing::info;

use crate::{
    auth::{auth_cookie, clear_auth_cookie, AdminUser},
    entities::user::{self, Entity as UserEntity, Role},
    errors::ServiceError,
    handlers::{
        auth::{authenticate, AuthSession, LoginRequest},
        common::{ok, validate_input, with_cookie},
    },
    ApiResponse, ApiResult, AppState,
};

/// Back-office session endpoints, separate from the storefront's so the
/// admin panel can sit on its own origin.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/login", post(admin_login))
        .route("/admin/logout", post(admin_logout))
        .route("/admin/me", get(admin_me))
}

#[utoipa::path(
    post,
    path = "/api/admin/login",
    summary = "Admin login",
    description = "Verifies credentials and requires the admin role before any token is issued",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Admin session issued", body = ApiResponse<AuthSession>),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse),
        (status = 403, description = "Account is not an admin", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    )
)]
pub async fn admin_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;

    let account = authenticate(&state, &request.email, &request.password).await?;
    if !account.role.satisfies(Role::Admin) {
        return Err(ServiceError::Forbidden("Admin access only".to_string()));
    }

    let token = state.auth_service.issue_token(&account)?;
    let cookie = auth_cookie(
        &token,
        state.config.jwt_expiration as i64,
        state.config.cookie_secure,
    );

    info!(user_id = %account.id, "Admin logged in");
    let response = ok(AuthSession {
        user: account,
        token,
    });
    Ok(with_cookie(response, &cookie))
}

#[utoipa::path(
    post,
    path = "/api/admin/logout",
    summary = "Admin logout",
    responses(
        (status = 200, description = "Session cleared"),
    )
)]
pub async fn admin_logout(State(state): State<AppState>) -> Response {
    let response = ok(json!({ "message": "Logged out" }));
    with_cookie(response, &clear_auth_cookie(state.config.cookie_secure))
}

#[utoipa::path(
    get,
    path = "/api/admin/me",
    summary = "Admin profile",
    description = "Re-reads the account so a demotion after token issuance still locks the panel",
    responses(
        (status = 200, description = "Profile retrieved", body = ApiResponse<user::Model>),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Account no longer exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn admin_me(
    State(state): State<AppState>,
    admin: AdminUser,
) -> ApiResult<user::Model> {
    let account = UserEntity::find_by_id(admin.0.id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Admin not found".to_string()))?;

    if !account.role.satisfies(Role::Admin) {
        return Err(ServiceError::Forbidden(
            "Admin access required".to_string(),
        ));
    }
    Ok(Json(ApiResponse::success(account)))
}
