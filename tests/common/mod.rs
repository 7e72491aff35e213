//! Shared integration test harness.
//!
//! Boots the full application against a throwaway file-backed SQLite
//! database so every suite exercises the real router, middleware stack and
//! services. Redis points at a closed port on purpose: the crate treats an
//! unreachable Redis as a soft dependency and every code path that touches
//! it must keep working without one.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{product, shipping_option, user},
    events::{self, EventSender},
    handlers::AppServices,
    services::payments::{PaymentGateway, PaystackGateway},
    AppState,
};

/// Satisfies the config validator: 64+ characters, mixed, no weak fragments.
pub const TEST_JWT_SECRET: &str =
    "k2Vm9qLxW4pTz7RbN1cEj6uYh3GdAs8QfXoZi5wJnMrK0tSgOyTeHlPaUvFB41mx";

/// Webhook/gateway secret used by the payment suites.
pub const TEST_PAYMENT_SECRET: &str = "sk_test_9f81c2e7ab64d035";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Boots the app with the standard test configuration.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Boots the app, letting the caller tweak the configuration first
    /// (gateway base URL, rate limit ceilings and so on).
    pub async fn spawn_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("create sqlite temp dir");
        let db_file = db_dir.path().join("storefront-test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            // Nothing listens here; the app must degrade gracefully.
            "redis://127.0.0.1:6399".to_string(),
            TEST_JWT_SECRET.to_string(),
            3_600,
            "127.0.0.1".to_string(),
            0,
            "development".to_string(),
        );
        cfg.auto_migrate = true;
        // SQLite wants a single writer.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        // Generous ceiling so auth-heavy suites never trip the limiter.
        cfg.rate_limit_requests_per_window = 1_000;
        cfg.payment_secret_key = Some(TEST_PAYMENT_SECRET.to_string());
        tweak(&mut cfg);

        let db_pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect to test database");
        db::run_migrations(&db_pool).await.expect("run migrations");

        let db = Arc::new(db_pool);
        let config = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx, None));

        let redis_client = Arc::new(
            redis::Client::open(config.redis_url.clone()).expect("construct redis client"),
        );

        let gateway = PaystackGateway::from_config(&config)
            .map(|gw| Arc::new(gw) as Arc<dyn PaymentGateway>);

        let auth_service = Arc::new(AuthService::new(
            config.jwt_secret.clone(),
            config.jwt_expiration,
        ));

        let services = AppServices::new(
            db.clone(),
            config.clone(),
            Arc::new(event_sender.clone()),
            redis_client.clone(),
            gateway,
        );

        let state = AppState {
            db,
            config,
            event_sender,
            services,
            auth_service,
            redis: redis_client,
        };

        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    // ==================== Request helpers ====================

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response<Body> {
        self.request_with_headers(method, uri, body, token, &[])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json_body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json_body.to_string()))
                .expect("request builds"),
            None => builder.body(Body::empty()).expect("request builds"),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Sends raw bytes, for webhook payloads where the signature covers the
    /// exact body.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        extra_headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("request builds");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    // ==================== Seed helpers ====================

    pub async fn seed_product(&self, name: &str, price: &str, stock: i32) -> product::Model {
        let now = Utc::now();
        let slug = name.trim().to_lowercase().replace(' ', "-");
        let sku = format!(
            "SKU-{}",
            &Uuid::new_v4().simple().to_string()[..10].to_uppercase()
        );
        let row = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(slug),
            sku: Set(sku),
            description: Set(Some("Seeded for integration tests".to_string())),
            price: Set(price.parse::<Decimal>().expect("price literal")),
            stock_quantity: Set(stock),
            is_available: Set(true),
            category: Set(Some("general".to_string())),
            image_url: Set(None),
            gallery: Set(None),
            sizes: Set(None),
            colors: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        row.insert(&*self.state.db).await.expect("insert product")
    }

    pub async fn seed_shipping_option(
        &self,
        name: &str,
        region: &str,
        base_price: &str,
        price_per_item: &str,
        max_items_for_base: i32,
    ) -> shipping_option::Model {
        let now = Utc::now();
        let row = shipping_option::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            region: Set(region.trim().to_lowercase()),
            base_price: Set(base_price.parse::<Decimal>().expect("price literal")),
            price_per_item: Set(price_per_item.parse::<Decimal>().expect("price literal")),
            max_items_for_base: Set(max_items_for_base),
            discount_percentage: Set(Decimal::ZERO),
            discount_active: Set(false),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        row.insert(&*self.state.db)
            .await
            .expect("insert shipping option")
    }

    /// Registers a shopper through the real endpoint and returns the session
    /// token plus the new user id.
    pub async fn signup_user(&self, name: &str, email: &str, password: &str) -> (String, Uuid) {
        let response = self
            .request(
                Method::POST,
                "/auth/signup",
                Some(json!({ "name": name, "email": email, "password": password })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED, "signup should succeed");
        let body = read_json(response).await;
        let token = body["data"]["token"]
            .as_str()
            .expect("session token")
            .to_string();
        let user_id = body["data"]["user"]["id"]
            .as_str()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .expect("user id");
        (token, user_id)
    }

    /// Inserts an admin account directly; admin signup has no public route.
    pub async fn seed_admin(&self, email: &str, password: &str) -> (user::Model, String) {
        let hash = self
            .state
            .auth_service
            .hash_password(password)
            .expect("hash admin password");
        let now = Utc::now();
        let admin = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Back Office".to_string()),
            email: Set(email.to_string()),
            password_hash: Set(Some(hash)),
            role: Set(user::Role::Admin),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert admin");

        let token = self
            .state
            .auth_service
            .issue_token(&admin)
            .expect("issue admin token");
        (admin, token)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

// ==================== Response helpers ====================

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body should be JSON")
    }
}

/// Decimal fields serialize as JSON strings; parse them back for comparison.
pub fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal fields serialize as strings")
        .parse()
        .expect("decimal field should parse")
}

/// Pulls a named cookie's value out of the Set-Cookie headers.
pub fn extract_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| {
            let pair = raw.split(';').next()?.trim();
            let (key, value) = pair.split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

/// True when the response instructs the browser to drop the named cookie.
pub fn clears_cookie(response: &Response<Body>, name: &str) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|raw| raw.starts_with(&format!("{}=", name)) && raw.contains("Max-Age=0"))
}
