//! Storefront API Library
//!
//! Backend for a general-purpose storefront: catalog, carts, checkout,
//! orders, payments and the admin back office.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod rate_limiter;
pub mod services;
pub mod tracing;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub auth_service: Arc<auth::AuthService>,
    pub redis: Arc<redis::Client>,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Everything mounted under `/api`.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .merge(handlers::products::product_routes())
        .merge(handlers::shipping::shipping_routes())
        .merge(handlers::payments::payment_routes())
        .merge(handlers::webhooks::webhook_routes())
        .merge(handlers::admin::admin_routes())
        .nest("/cart", handlers::carts::cart_routes())
        .nest("/orders", handlers::orders::order_routes())
}

/// Assembles the full application router with the middleware stack.
///
/// Layer order matters: request-id propagation runs outermost so every
/// log line and error body can carry the id, the rate limiter sits in
/// front of identity resolution so throttled calls never touch the
/// database, and the identity middleware runs before the handlers that
/// read the `Identity` extension.
pub fn build_router(state: AppState) -> Router {
    let cfg = &state.config;

    let limiter = Arc::new(rate_limiter::RateLimiter::new(
        rate_limiter::RateLimitConfig {
            requests_per_window: cfg.rate_limit_requests_per_window,
            window_duration: Duration::from_secs(cfg.rate_limit_window_seconds),
            enable_headers: cfg.rate_limit_enable_headers,
        },
    ));

    let cors = cors_layer(cfg);
    let timeout = TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_secs));

    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .nest("/auth", handlers::auth::auth_routes())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(timeout)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::identity_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limiter::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(
            crate::tracing::propagate_request_id,
        ))
        .with_state(state)
}

/// CORS from config. `load_config` rejects production configs without
/// explicit origins, so by this point permissive means it was opted into.
fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::Any;

    let configured: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(cfg.cors_allow_credentials),
        None => CorsLayer::permissive(),
    }
}

async fn api_status() -> ApiResult<Value> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "storefront-api",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match crate::db::check_connection(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let redis_status = match state.redis.get_async_connection().await {
        Ok(mut conn) => match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => "healthy",
            Err(_) => "unhealthy",
        },
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": if db_status == "healthy" && redis_status == "healthy" { "healthy" } else { "unhealthy" },
        "checks": {
            "database": db_status,
            "cache": redis_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}


#[cfg(test)]
mod cors_tests {
    use super::*;

    fn test_config(environment: &str) -> config::AppConfig {
        config::AppConfig::new(
            "sqlite://storefront.db?mode=memory".into(),
            "redis://127.0.0.1:6379".into(),
            "a8De41Lqz3Vx9TkWb2YmPn7RsHc5FjGueK0oQwZiNvXrB6gyU1hCtSdJfMpEl4ax".into(),
            86_400,
            "127.0.0.1".into(),
            8080,
            environment.into(),
        )
    }

    #[test]
    fn explicit_origins_parse_and_skip_blanks() {
        let mut cfg = test_config("production");
        cfg.cors_allowed_origins =
            Some("https://shop.example.com, ,https://admin.example.com".into());
        // Builds the restrictive variant without panicking on the blank entry.
        let _ = cors_layer(&cfg);
        assert!(cfg.has_cors_allowed_origins());
    }

    #[test]
    fn missing_origins_fall_back_to_permissive() {
        let cfg = test_config("development");
        let _ = cors_layer(&cfg);
        assert!(cfg.should_allow_permissive_cors());
    }
}
