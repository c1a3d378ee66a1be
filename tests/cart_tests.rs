mod common;

use std::str::FromStr;

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{response_json, session_cookie, Caller, TestApp};

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("decimal number"),
    }
}

fn line_for<'a>(cart: &'a Value, product_id: Uuid) -> &'a Value {
    cart["items"]
        .as_array()
        .expect("items array")
        .iter()
        .find(|line| line["product_id"] == json!(product_id))
        .expect("line for product")
}

#[tokio::test]
async fn reading_cart_without_identity_returns_null_and_sets_no_cookie() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/cart", None, &Caller::anonymous())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_none());
    assert_eq!(response_json(response).await, Value::Null);
}

#[tokio::test]
async fn anonymous_add_issues_session_and_increments_existing_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tea Tin", dec!(499), None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "quantity": 1 })),
            &Caller::anonymous(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    assert!(cookie.is_some(), "first write should mint a session cookie");

    let caller = Caller::anonymous().with_cookie(cookie.clone());
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "quantity": 2 })),
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    // Re-issued to slide the expiry, same session
    assert_eq!(session_cookie(&response), cookie);

    let cart = response_json(response).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(line_for(&cart, product.id)["quantity"], json!(3));
    assert_eq!(decimal(&cart["subtotal"]), dec!(1497));
}

#[tokio::test]
async fn subtotal_uses_discounted_price_when_present() {
    let app = TestApp::new().await;
    let caller = Caller::bearer(app.user_token(Uuid::new_v4()));
    let kettle = app.seed_product("Kettle", dec!(599), Some(dec!(499))).await;
    let cups = app.seed_product("Cups", dec!(250), None).await;

    for (product_id, quantity) in [(kettle.id, 2), (cups.id, 1)] {
        let response = app
            .request(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product_id, "quantity": quantity })),
                &caller,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let cart = response_json(
        app.request(Method::GET, "/api/v1/cart", None, &caller)
            .await,
    )
    .await;

    assert_eq!(decimal(&cart["subtotal"]), dec!(1248));
    assert_eq!(cart["item_count"], json!(3));
    assert_eq!(decimal(&line_for(&cart, kettle.id)["unit_price"]), dec!(499));
}

#[tokio::test]
async fn signed_in_add_does_not_set_session_cookie() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), None).await;
    let caller = Caller::bearer(app.user_token(Uuid::new_v4()));

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id })),
            &caller,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_none());
    let cart = response_json(response).await;
    assert_eq!(line_for(&cart, product.id)["quantity"], json!(1));
}

#[tokio::test]
async fn add_rejects_zero_quantity_and_unknown_product() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), None).await;
    let caller = Caller::bearer(app.user_token(Uuid::new_v4()));

    let zero = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "quantity": 0 })),
            &caller,
        )
        .await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": Uuid::new_v4(), "quantity": 1 })),
            &caller,
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn setting_quantity_below_one_removes_the_line() {
    let app = TestApp::new().await;
    let caller = Caller::bearer(app.user_token(Uuid::new_v4()));
    let mug = app.seed_product("Mug", dec!(300), None).await;
    let plate = app.seed_product("Plate", dec!(150), None).await;

    for product_id in [mug.id, plate.id] {
        app.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": 2 })),
            &caller,
        )
        .await;
    }
    let cart = response_json(app.request(Method::GET, "/api/v1/cart", None, &caller).await).await;
    let mug_item = line_for(&cart, mug.id)["item_id"].as_str().unwrap().to_string();
    let plate_item = line_for(&cart, plate.id)["item_id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", mug_item),
            Some(json!({ "quantity": 5 })),
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert_eq!(line_for(&cart, mug.id)["quantity"], json!(5));

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", mug_item),
            Some(json!({ "quantity": 0 })),
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", plate_item),
            Some(json!({ "quantity": -1 })),
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
    assert_eq!(decimal(&cart["subtotal"]), Decimal::ZERO);
}

#[tokio::test]
async fn items_of_another_owner_are_not_found() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), None).await;
    let alice = Caller::bearer(app.user_token(Uuid::new_v4()));
    let bob = Caller::bearer(app.user_token(Uuid::new_v4()));

    let cart = response_json(
        app.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id })),
            &alice,
        )
        .await,
    )
    .await;
    let item_id = line_for(&cart, product.id)["item_id"].as_str().unwrap().to_string();

    // Bob needs a cart of his own for the lookup to get as far as the item
    app.request(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": product.id })),
        &bob,
    )
    .await;

    let update = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", item_id),
            Some(json!({ "quantity": 9 })),
            &bob,
        )
        .await;
    assert_eq!(update.status(), StatusCode::NOT_FOUND);

    let delete = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", item_id),
            None,
            &bob,
        )
        .await;
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);

    let cart = response_json(app.request(Method::GET, "/api/v1/cart", None, &alice).await).await;
    assert_eq!(line_for(&cart, product.id)["quantity"], json!(1));
}

#[tokio::test]
async fn editing_without_any_identity_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", Uuid::new_v4()),
            None,
            &Caller::anonymous(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn remove_item_returns_no_content() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), None).await;
    let caller = Caller::bearer(app.user_token(Uuid::new_v4()));

    let cart = response_json(
        app.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id })),
            &caller,
        )
        .await,
    )
    .await;
    let item_id = line_for(&cart, product.id)["item_id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", item_id),
            None,
            &caller,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let cart = response_json(app.request(Method::GET, "/api/v1/cart", None, &caller).await).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_adds_for_one_owner_keep_a_single_cart_and_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), None).await;
    let owner = storefront_api::session::CartOwner::User { id: Uuid::new_v4() };
    let cart = &app.state.services.cart;

    let (a, b, c) = tokio::join!(
        cart.add_item(&owner, product.id, 1),
        cart.add_item(&owner, product.id, 2),
        cart.add_item(&owner, product.id, 3),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.cart_id, b.cart_id);
    assert_eq!(b.cart_id, c.cart_id);

    let view = cart.get_cart(&owner).await.unwrap().expect("cart exists");
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 6);
}

#[tokio::test]
async fn tampered_session_cookie_is_ignored() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id })),
            &Caller::anonymous(),
        )
        .await;
    let cookie = session_cookie(&response).unwrap();
    let forged = format!("{}x", cookie);

    let response = app
        .request(
            Method::GET,
            "/api/v1/cart",
            None,
            &Caller::anonymous().with_cookie(Some(forged)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await, Value::Null);
}
