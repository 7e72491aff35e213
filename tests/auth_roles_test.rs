mod common;

use axum::http::{Method, StatusCode};
use common::{clears_cookie, extract_cookie, read_json, TestApp};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use storefront_api::entities::user;

// ==================== Signup Tests ====================

#[tokio::test]
async fn signup_issues_a_session_and_cookie() {
    let app = TestApp::spawn().await;

    let response = app
        .request(
            Method::POST,
            "/auth/signup",
            Some(json!({
                "name": "Ada Shopper",
                "email": "  Ada@Example.COM ",
                "password": "sturdy-passphrase"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = extract_cookie(&response, "token").expect("session cookie");
    assert!(cookie.contains("HttpOnly"));

    let body = read_json(response).await;
    assert!(body["data"]["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["data"]["user"]["email"], json!("ada@example.com"));
    assert_eq!(body["data"]["user"]["role"], json!("user"));
    assert!(
        body["data"]["user"].get("password_hash").is_none(),
        "password hash must never serialize"
    );
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = TestApp::spawn().await;
    app.signup_user("First", "dup@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(
            Method::POST,
            "/auth/signup",
            Some(json!({
                "name": "Second",
                "email": "dup@example.com",
                "password": "another-passphrase"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn signup_validates_email_and_password() {
    let app = TestApp::spawn().await;

    let response = app
        .request(
            Method::POST,
            "/auth/signup",
            Some(json!({ "name": "Ada", "email": "not-an-email", "password": "sturdy-passphrase" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/auth/signup",
            Some(json!({ "name": "Ada", "email": "ada@example.com", "password": "short" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .is_some_and(|m| m.contains("at least 8")));
}

// ==================== Login Tests ====================

#[tokio::test]
async fn login_round_trips_with_the_profile_endpoint() {
    let app = TestApp::spawn().await;
    app.signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "ada@example.com", "password": "sturdy-passphrase" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let token = body["data"]["token"].as_str().expect("token").to_string();

    let response = app.request(Method::GET, "/auth/me", None, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["email"], json!("ada@example.com"));
    assert_eq!(body["data"]["name"], json!("Ada"));
}

#[tokio::test]
async fn login_email_lookup_ignores_case_and_whitespace() {
    let app = TestApp::spawn().await;
    app.signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": " Ada@Example.COM ", "password": "sturdy-passphrase" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_answer_identically() {
    let app = TestApp::spawn().await;
    app.signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let wrong_password = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "ada@example.com", "password": "not-the-password" })),
            None,
        )
        .await;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    let wrong_password = read_json(wrong_password).await;

    let unknown_email = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "nobody@example.com", "password": "sturdy-passphrase" })),
            None,
        )
        .await;
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
    let unknown_email = read_json(unknown_email).await;

    assert_eq!(wrong_password["message"], json!("Invalid credentials"));
    assert_eq!(unknown_email["message"], wrong_password["message"]);
}

#[tokio::test]
async fn disabled_accounts_cannot_log_in() {
    let app = TestApp::spawn().await;
    let (_, user_id) = app
        .signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let account = user::Entity::find_by_id(user_id)
        .one(&*app.state.db)
        .await
        .expect("query user")
        .expect("user exists");
    let mut disabled: user::ActiveModel = account.into();
    disabled.is_active = Set(false);
    disabled.update(&*app.state.db).await.expect("disable");

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "ada@example.com", "password": "sturdy-passphrase" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await;
    assert_eq!(body["message"], json!("Account is disabled"));
}

// ==================== Session Tests ====================

#[tokio::test]
async fn profile_requires_authentication() {
    let app = TestApp::spawn().await;

    let response = app.request(Method::GET, "/auth/me", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_authenticates_without_a_bearer_header() {
    let app = TestApp::spawn().await;
    let (token, _) = app
        .signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let cookie = format!("token={}", token);
    let response = app
        .request_with_headers(Method::GET, "/auth/me", None, None, &[("cookie", &cookie)])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["email"], json!("ada@example.com"));
}

#[tokio::test]
async fn logout_clears_the_session_cookie() {
    let app = TestApp::spawn().await;

    let response = app.request(Method::POST, "/auth/logout", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_cookie(&response, "token"));
}

// ==================== Admin Session Tests ====================

#[tokio::test]
async fn admin_login_rejects_plain_accounts() {
    let app = TestApp::spawn().await;
    app.signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/admin/login",
            Some(json!({ "email": "ada@example.com", "password": "sturdy-passphrase" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = read_json(response).await;
    assert_eq!(body["message"], json!("Admin access only"));
}

#[tokio::test]
async fn admin_login_checks_the_password_before_the_role() {
    let app = TestApp::spawn().await;
    app.signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/admin/login",
            Some(json!({ "email": "ada@example.com", "password": "not-the-password" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_login_opens_the_back_office() {
    let app = TestApp::spawn().await;
    app.seed_admin("ops@example.com", "back-office-pass").await;

    let response = app
        .request(
            Method::POST,
            "/api/admin/login",
            Some(json!({ "email": "ops@example.com", "password": "back-office-pass" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(extract_cookie(&response, "token").is_some());
    let body = read_json(response).await;
    let token = body["data"]["token"].as_str().expect("token").to_string();

    let response = app
        .request(Method::GET, "/api/admin/me", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["role"], json!("admin"));
}

#[tokio::test]
async fn admin_profile_locks_out_plain_users() {
    let app = TestApp::spawn().await;
    let (token, _) = app
        .signup_user("Ada", "ada@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(Method::GET, "/api/admin/me", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn demotion_locks_the_panel_despite_a_live_token() {
    let app = TestApp::spawn().await;
    let (admin, token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    let mut demoted: user::ActiveModel = admin.into();
    demoted.role = Set(user::Role::User);
    demoted.update(&*app.state.db).await.expect("demote");

    let response = app
        .request(Method::GET, "/api/admin/me", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ==================== Rate Limit Tests ====================

#[tokio::test]
async fn credential_endpoints_are_rate_limited() {
    let app = TestApp::spawn_with(|config| {
        config.rate_limit_requests_per_window = 3;
    })
    .await;

    let attempt = json!({ "email": "nobody@example.com", "password": "guess-attempt" });
    for expected_remaining in ["2", "1", "0"] {
        let response = app
            .request(Method::POST, "/auth/login", Some(attempt.clone()), None)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected_remaining
        );
    }

    let response = app
        .request(Method::POST, "/auth/login", Some(attempt), None)
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    // Unguarded endpoints are untouched by the exhausted window.
    let response = app.request(Method::GET, "/api/product", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}
