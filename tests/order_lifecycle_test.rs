mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{read_json, TestApp};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use storefront_api::entities::{order, product};
use uuid::Uuid;

/// Seeds a product and shipping option, signs the shopper up and checks a
/// two-unit cart out. Returns the shopper token, order id and product id.
async fn place_order(app: &TestApp, email: &str) -> (String, Uuid, Uuid) {
    let item = app.seed_product(&format!("Crate {}", email), "100.00", 10).await;
    app.seed_shipping_option(&format!("Courier {}", email), "lagos", "500", "0", 10)
        .await;
    let (token, _) = app.signup_user("Shopper", email, "sturdy-passphrase").await;

    let response = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({ "product_id": item.id, "quantity": 2 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/cart/checkout",
            Some(json!({
                "shipping_address": { "address": "12 Marina Rd", "region": "lagos" }
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    let order_id = body["data"]["id"]
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .expect("order id");
    let product_id = body["data"]["items"][0]["product_id"]
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .expect("product id");
    (token, order_id, product_id)
}

async fn set_status(app: &TestApp, admin_token: &str, order_id: Uuid, status: &str) {
    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": status })),
            Some(admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK, "transition to {}", status);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], json!(status));
}

async fn mark_paid(app: &TestApp, order_id: Uuid) {
    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .expect("query order")
        .expect("order exists");
    let mut paid: order::ActiveModel = stored.into();
    paid.payment_status = Set(order::PaymentStatus::Paid);
    paid.paid_at = Set(Some(Utc::now()));
    paid.update(&*app.state.db).await.expect("mark paid");
}

async fn stock_of(app: &TestApp, product_id: Uuid) -> i32 {
    product::Entity::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .expect("query product")
        .expect("product exists")
        .stock_quantity
}

// ==================== Status Transition Tests ====================

#[tokio::test]
async fn admin_walks_order_through_fulfillment() {
    let app = TestApp::spawn().await;
    let (_, order_id, _) = place_order(&app, "walk@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    set_status(&app, &admin_token, order_id, "processing").await;
    set_status(&app, &admin_token, order_id, "shipped").await;
    set_status(&app, &admin_token, order_id, "delivered").await;
}

#[tokio::test]
async fn repeating_the_current_status_is_a_noop() {
    let app = TestApp::spawn().await;
    let (_, order_id, _) = place_order(&app, "noop@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    set_status(&app, &admin_token, order_id, "processing").await;
    // Replaying the same status answers 200 without touching the order.
    set_status(&app, &admin_token, order_id, "processing").await;
}

#[tokio::test]
async fn illegal_transition_is_rejected_with_the_edge_named() {
    let app = TestApp::spawn().await;
    let (_, order_id, _) = place_order(&app, "edge@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    set_status(&app, &admin_token, order_id, "processing").await;
    set_status(&app, &admin_token, order_id, "shipped").await;
    set_status(&app, &admin_token, order_id, "delivered").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": "processing" })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    let message = body["message"].as_str().unwrap_or_default();
    assert!(
        message.contains("delivered") && message.contains("processing"),
        "message should name both ends of the edge: {}",
        message
    );
}

#[tokio::test]
async fn pending_cannot_jump_straight_to_delivered() {
    let app = TestApp::spawn().await;
    let (_, order_id, _) = place_order(&app, "jump@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": "delivered" })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_update_requires_admin_role() {
    let app = TestApp::spawn().await;
    let (shopper_token, order_id, _) = place_order(&app, "lowpriv@example.com").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": "processing" })),
            Some(&shopper_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn status_update_on_unknown_order_is_404() {
    let app = TestApp::spawn().await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", Uuid::new_v4()),
            Some(json!({ "status": "processing" })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn owner_cancels_pending_order_and_stock_returns() {
    let app = TestApp::spawn().await;
    let (token, order_id, product_id) = place_order(&app, "cancel@example.com").await;
    assert_eq!(stock_of(&app, product_id).await, 8);

    let response = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], json!("cancelled"));

    assert_eq!(stock_of(&app, product_id).await, 10, "all units restocked");
}

#[tokio::test]
async fn cancelling_a_paid_order_flags_the_refund() {
    let app = TestApp::spawn().await;
    let (token, order_id, _) = place_order(&app, "refundme@example.com").await;
    mark_paid(&app, order_id).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], json!("cancelled"));
    assert_eq!(
        body["data"]["payment_status"],
        json!("refunded"),
        "paid orders flip to refunded on cancellation"
    );
}

#[tokio::test]
async fn refunding_a_delivered_order_settles_the_payment() {
    let app = TestApp::spawn().await;
    let (_, order_id, product_id) = place_order(&app, "delivered@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    mark_paid(&app, order_id).await;
    set_status(&app, &admin_token, order_id, "processing").await;
    set_status(&app, &admin_token, order_id, "shipped").await;
    set_status(&app, &admin_token, order_id, "delivered").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/orders/{}/status", order_id),
            Some(json!({ "status": "refunded" })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], json!("refunded"));
    assert_eq!(body["data"]["payment_status"], json!("refunded"));

    // Delivered goods are with the customer; refunding does not restock.
    assert_eq!(stock_of(&app, product_id).await, 8);
}

#[tokio::test]
async fn refunding_an_unpaid_cancellation_leaves_the_payment_alone() {
    let app = TestApp::spawn().await;
    let (token, order_id, _) = place_order(&app, "unpaid@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    set_status(&app, &admin_token, order_id, "refunded").await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", order_id),
            None,
            Some(&admin_token),
        )
        .await;
    let body = read_json(response).await;
    assert_eq!(
        body["data"]["payment_status"],
        json!("pending"),
        "nothing was captured, nothing to refund"
    );
}

#[tokio::test]
async fn owner_cannot_cancel_after_shipping() {
    let app = TestApp::spawn().await;
    let (token, order_id, _) = place_order(&app, "late@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    set_status(&app, &admin_token, order_id, "processing").await;
    set_status(&app, &admin_token, order_id, "shipped").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("no longer be cancelled"));
}

#[tokio::test]
async fn admin_cancels_shipped_order_through_status_update() {
    let app = TestApp::spawn().await;
    let (_, order_id, product_id) = place_order(&app, "recall@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    set_status(&app, &admin_token, order_id, "processing").await;
    set_status(&app, &admin_token, order_id, "shipped").await;
    set_status(&app, &admin_token, order_id, "cancelled").await;

    assert_eq!(stock_of(&app, product_id).await, 10, "recall restocks");
}

#[tokio::test]
async fn cancelling_twice_is_rejected() {
    let app = TestApp::spawn().await;
    let (token, order_id, _) = place_order(&app, "twice@example.com").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("already cancelled"));
}

// ==================== Visibility Tests ====================

#[tokio::test]
async fn owners_see_only_their_own_orders() {
    let app = TestApp::spawn().await;
    let (owner_token, order_id, _) = place_order(&app, "owner@example.com").await;
    let (stranger_token, _) = app
        .signup_user("Stranger", "stranger@example.com", "sturdy-passphrase")
        .await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", order_id),
            None,
            Some(&owner_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A stranger gets 404, not 403, so order ids cannot be probed.
    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", order_id),
            None,
            Some(&stranger_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, "/api/orders", None, Some(&stranger_token))
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn admin_sees_any_order_and_filters_the_back_office_list() {
    let app = TestApp::spawn().await;
    let (_, first_order, _) = place_order(&app, "first@example.com").await;
    let (_, second_order, _) = place_order(&app, "second@example.com").await;
    let (_, admin_token) = app.seed_admin("ops@example.com", "back-office-pass").await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{}", first_order),
            None,
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    set_status(&app, &admin_token, second_order, "processing").await;

    let response = app
        .request(Method::GET, "/api/orders/all", None, Some(&admin_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["total"], json!(2));

    let response = app
        .request(
            Method::GET,
            "/api/orders/all?status=processing",
            None,
            Some(&admin_token),
        )
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"]["total"], json!(1));
    assert_eq!(
        body["data"]["items"][0]["id"],
        json!(second_order.to_string())
    );
}

#[tokio::test]
async fn back_office_list_requires_admin() {
    let app = TestApp::spawn().await;
    let (shopper_token, _, _) = place_order(&app, "plain@example.com").await;

    let response = app
        .request(Method::GET, "/api/orders/all", None, Some(&shopper_token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.request(Method::GET, "/api/orders/all", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
