mod common;

use axum::http::{Method, StatusCode};
use common::{dec_field, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn cart_requires_a_bearer_token() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["details"], json!("unauthorized"));

    let (status, _) = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_cart_is_an_empty_shape() {
    let app = TestApp::new().await;
    let user = app.customer("Lee Seojun").await;

    let (status, body) = app.get("/api/v1/cart", &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["items"], json!([]));
    assert_eq!(body["data"]["total_items"], json!(0));
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(0));
    assert!(body["meta"]["timestamp"].is_string());

    let (status, body) = app.get("/api/v1/cart/summary", &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_empty"], json!(true));
    assert_eq!(dec_field(&body["data"]["shipping_cost"]), dec!(0));
}

#[tokio::test]
async fn adding_the_same_variant_accumulates_one_line() {
    let app = TestApp::new().await;
    let user = app.customer("Park Jisoo").await;
    let shirt = app.seed_product("Linen Shirt", dec!(20000), 10).await;

    let (status, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": shirt.id, "quantity": 1, "size": "M", "color": "white" }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], json!("Item added to cart"));

    let (_, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": shirt.id, "quantity": 2, "size": "M", "color": "white" }),
            &user,
        )
        .await;
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], json!(3));
    assert_eq!(body["data"]["total_items"], json!(3));
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(60000));

    // a different size is a separate line
    let (_, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": shirt.id, "quantity": 1, "size": "L", "color": "white" }),
            &user,
        )
        .await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["total_items"], json!(4));
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(80000));
}

#[tokio::test]
async fn default_price_is_the_list_price() {
    let app = TestApp::new().await;
    let user = app.customer("Choi Yuna").await;
    let coat = app
        .seed_product_with("Wool Coat", dec!(99900), 15, 5, true)
        .await;

    let (status, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": coat.id, "quantity": 1 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dec_field(&body["data"]["items"][0]["price"]), dec!(99900));
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(99900));

    // a client-supplied price is kept as given
    let scarf = app.seed_product("Cashmere Scarf", dec!(45000), 5).await;
    let (_, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": scarf.id, "quantity": 1, "price": "40000" }),
            &user,
        )
        .await;
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(139900));
}

#[tokio::test]
async fn add_rejections_leave_cart_untouched() {
    let app = TestApp::new().await;
    let user = app.customer("Jung Hoseok").await;
    let tee = app.seed_product("Basic Tee", dec!(9900), 2).await;
    let retired = app
        .seed_product_with("Retired Cap", dec!(15000), 0, 10, false)
        .await;

    let (status, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": tee.id, "quantity": 3 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("insufficient_stock"));

    let (status, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": retired.id, "quantity": 1 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("inactive_product"));

    let (status, _) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": uuid::Uuid::new_v4(), "quantity": 1 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": tee.id, "quantity": 0 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/api/v1/cart", &user).await;
    assert_eq!(body["data"]["items"], json!([]));
}

#[tokio::test]
async fn updating_quantity_recomputes_totals_and_zero_removes() {
    let app = TestApp::new().await;
    let user = app.customer("Han Sora").await;
    let skirt = app.seed_product("Pleated Skirt", dec!(30000), 5).await;

    let (_, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": skirt.id, "quantity": 1 }),
            &user,
        )
        .await;
    let item_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .put(
            &format!("/api/v1/cart/items/{}", item_id),
            json!({ "quantity": 2 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_items"], json!(2));
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(60000));

    let (status, body) = app
        .put(
            &format!("/api/v1/cart/items/{}", item_id),
            json!({ "quantity": 6 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("insufficient_stock"));

    let (status, body) = app
        .put(
            &format!("/api/v1/cart/items/{}", item_id),
            json!({ "quantity": 0 }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"], json!([]));
    assert_eq!(body["data"]["total_items"], json!(0));
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(0));
}

#[tokio::test]
async fn malformed_and_foreign_item_ids() {
    let app = TestApp::new().await;
    let owner = app.customer("Kang Daniel").await;
    let other = app.customer("Yoon Ara").await;
    let tee = app.seed_product("Basic Tee", dec!(9900), 10).await;

    let (_, body) = app
        .post(
            "/api/v1/cart/items",
            json!({ "product_id": tee.id, "quantity": 1 }),
            &owner,
        )
        .await;
    let item_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app.delete("/api/v1/cart/items/abc", &owner).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("invalid_input"));

    // another user's cart does not contain the line
    app.post(
        "/api/v1/cart/items",
        json!({ "product_id": tee.id, "quantity": 1 }),
        &other,
    )
    .await;
    let (status, _) = app
        .delete(&format!("/api/v1/cart/items/{}", item_id), &other)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .delete(&format!("/api/v1/cart/items/{}", item_id), &owner)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"], json!([]));
}

#[tokio::test]
async fn summary_reports_shipping_threshold() {
    let app = TestApp::new().await;
    let user = app.customer("Seo Jiwoo").await;
    let jeans = app.seed_product("Wide Jeans", dec!(49999), 5).await;
    let socks = app.seed_product("Socks", dec!(1), 5).await;

    app.post(
        "/api/v1/cart/items",
        json!({ "product_id": jeans.id, "quantity": 1 }),
        &user,
    )
    .await;

    let (_, body) = app.get("/api/v1/cart/summary", &user).await;
    assert_eq!(dec_field(&body["data"]["shipping_cost"]), dec!(3000));
    assert_eq!(dec_field(&body["data"]["free_shipping_remaining"]), dec!(1));

    app.post(
        "/api/v1/cart/items",
        json!({ "product_id": socks.id, "quantity": 1 }),
        &user,
    )
    .await;

    let (_, body) = app.get("/api/v1/cart/summary", &user).await;
    assert_eq!(dec_field(&body["data"]["total_price"]), dec!(50000));
    assert_eq!(dec_field(&body["data"]["shipping_cost"]), dec!(0));
    assert_eq!(body["data"]["item_count"], json!(2));
}

#[tokio::test]
async fn clearing_keeps_an_empty_cart() {
    let app = TestApp::new().await;
    let user = app.customer("Oh Minho").await;
    let tee = app.seed_product("Basic Tee", dec!(9900), 10).await;

    let (status, _) = app.delete("/api/v1/cart", &user).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.post(
        "/api/v1/cart/items",
        json!({ "product_id": tee.id, "quantity": 2 }),
        &user,
    )
    .await;

    let (status, body) = app.delete("/api/v1/cart", &user).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["id"].is_string());
    assert_eq!(body["data"]["items"], json!([]));
    assert_eq!(body["data"]["total_items"], json!(0));
}

#[tokio::test]
async fn guest_merge_skips_bad_lines_and_is_idempotent() {
    let app = TestApp::new().await;
    let user = app.customer("Bae Suzy").await;
    let tee = app.seed_product("Basic Tee", dec!(9900), 10).await;
    let hoodie = app.seed_product("Hoodie", dec!(45000), 1).await;
    let retired = app
        .seed_product_with("Retired Cap", dec!(15000), 0, 10, false)
        .await;

    let payload = json!({
        "merge_id": "guest-session-7",
        "guest_cart_items": [
            { "product_id": tee.id, "quantity": 2 },
            { "product_id": hoodie.id, "quantity": 3 },
            { "product_id": retired.id, "quantity": 1 },
            { "product_id": uuid::Uuid::new_v4(), "quantity": 1 }
        ]
    });

    let (status, body) = app.post("/api/v1/cart/merge", payload.clone(), &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["merged"], json!(1));
    assert_eq!(body["data"]["already_applied"], json!(false));

    let reasons: Vec<&str> = body["data"]["skipped"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["reason"].as_str().unwrap())
        .collect();
    assert_eq!(
        reasons,
        vec!["insufficient_stock", "inactive_product", "not_found"]
    );
    assert_eq!(body["data"]["cart"]["total_items"], json!(2));

    let (status, body) = app.post("/api/v1/cart/merge", payload, &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["already_applied"], json!(true));
    assert_eq!(body["data"]["cart"]["total_items"], json!(2));
}
