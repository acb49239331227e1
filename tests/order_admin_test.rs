mod common;

use axum::http::StatusCode;
use common::{card_payment, dec_field, paid_card_payment, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn order_numbers(body: &Value) -> Vec<String> {
    body["data"]["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["order_number"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn admin_routes_require_the_admin_role() {
    let app = TestApp::new().await;
    let user = app.customer("Kim Minji").await;
    let tee = app.seed_product("Graphic Tee", dec!(10000), 5).await;

    let (_, body) = app.place_order(&user, &[(tee.id, 1)], card_payment()).await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/v1/orders/admin/all", &user).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["details"], json!("forbidden"));

    let (status, _) = app
        .put(
            &format!("/api/v1/orders/{}/status", order_id),
            json!({ "status": "delivered" }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .put(
            &format!("/api/v1/orders/{}/shipping", order_id),
            json!({ "tracking_number": "1234" }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.get(&format!("/api/v1/orders/{}", order_id), &user).await;
    assert_eq!(body["data"]["status"], json!("pending"));
}

#[tokio::test]
async fn admin_search_matches_number_name_and_email() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let minji = app.customer("Kim Minji").await;
    let seojun = app.customer("Lee Seojun").await;
    let tee = app.seed_product("Graphic Tee", dec!(10000), 20).await;

    let (_, first) = app.place_order(&minji, &[(tee.id, 1)], card_payment()).await;
    app.place_order(&seojun, &[(tee.id, 2)], card_payment()).await;
    app.place_order(&seojun, &[(tee.id, 3)], card_payment()).await;

    let (status, body) = app.get("/api/v1/orders/admin/all", &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["total_orders"], json!(3));
    assert_eq!(body["data"]["pagination"]["per_page"], json!(50));

    let number = first["data"]["order_number"].as_str().unwrap().to_string();
    let (_, body) = app
        .get(&format!("/api/v1/orders/admin/all?search={}", number), &admin)
        .await;
    assert_eq!(order_numbers(&body), vec![number.clone()]);

    let (_, body) = app.get("/api/v1/orders/admin/all?search=SEOJUN", &admin).await;
    assert_eq!(body["data"]["pagination"]["total_orders"], json!(2));

    let (_, body) = app
        .get("/api/v1/orders/admin/all?search=kim.minji%40example", &admin)
        .await;
    assert_eq!(order_numbers(&body), vec![number]);

    let (_, body) = app.get("/api/v1/orders/admin/all?search=nobody", &admin).await;
    assert_eq!(body["data"]["orders"], json!([]));

    let (_, body) = app.get("/api/v1/orders/admin/all?limit=2", &admin).await;
    assert_eq!(body["data"]["orders"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["pagination"]["total_pages"], json!(2));
}

#[tokio::test]
async fn admin_filters_by_day_and_payment_status() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let user = app.customer("Park Jisoo").await;
    let tee = app.seed_product("Graphic Tee", dec!(10000), 20).await;

    app.place_order(&user, &[(tee.id, 1)], card_payment()).await;
    app.place_order(&user, &[(tee.id, 2)], paid_card_payment("imp_3001"))
        .await;

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let (_, body) = app
        .get(&format!("/api/v1/orders/admin/all?date={}", today), &admin)
        .await;
    assert_eq!(body["data"]["pagination"]["total_orders"], json!(2));

    let (_, body) = app
        .get("/api/v1/orders/admin/all?date=2001-01-01", &admin)
        .await;
    assert_eq!(body["data"]["pagination"]["total_orders"], json!(0));

    let (status, body) = app
        .get("/api/v1/orders/admin/all?date=yesterday", &admin)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"], json!("invalid_input"));

    let (_, body) = app
        .get("/api/v1/orders/admin/all?payment_status=paid", &admin)
        .await;
    let orders = body["data"]["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["payment"]["transaction_id"], json!("imp_3001"));

    let (_, body) = app
        .get("/api/v1/orders/admin/all?status=pending&payment_status=pending", &admin)
        .await;
    assert_eq!(body["data"]["pagination"]["total_orders"], json!(1));
}

#[tokio::test]
async fn statistics_are_global_for_admins() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let minji = app.customer("Kim Minji").await;
    let seojun = app.customer("Lee Seojun").await;
    let coat = app.seed_product("Wool Coat", dec!(60000), 20).await;

    app.place_order(&minji, &[(coat.id, 1)], card_payment()).await;
    let (_, body) = app.place_order(&seojun, &[(coat.id, 1)], card_payment()).await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();
    app.put(
        &format!("/api/v1/orders/{}/status", order_id),
        json!({ "status": "confirmed" }),
        &admin,
    )
    .await;

    let (_, body) = app.get("/api/v1/orders/stats", &admin).await;
    assert_eq!(body["data"]["total_orders"], json!(2));
    assert_eq!(body["data"]["by_status"]["pending"]["count"], json!(1));
    assert_eq!(body["data"]["by_status"]["confirmed"]["count"], json!(1));
    assert_eq!(
        dec_field(&body["data"]["by_status"]["confirmed"]["total_amount"]),
        dec!(60000)
    );

    let (_, body) = app.get("/api/v1/orders/stats", &minji).await;
    assert_eq!(body["data"]["total_orders"], json!(1));
    assert!(body["data"]["by_status"].get("confirmed").is_none());
}

#[tokio::test]
async fn status_override_records_history_and_timestamps() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let user = app.customer("Choi Yuna").await;
    let tee = app.seed_product("Graphic Tee", dec!(10000), 5).await;

    let (_, body) = app.place_order(&user, &[(tee.id, 1)], card_payment()).await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .put(
            &format!("/api/v1/orders/{}/status", order_id),
            json!({ "status": "shipped", "note": "Left the warehouse" }),
            &admin,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"]["status_history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["status"], json!("shipped"));
    assert_eq!(history[1]["note"], json!("Left the warehouse"));
    assert_eq!(history[1]["actor"], json!(admin.id.to_string()));
    assert!(body["data"]["shipping"]["delivered_at"].is_null());

    let (_, body) = app
        .put(
            &format!("/api/v1/orders/{}/status", order_id),
            json!({ "status": "delivered" }),
            &admin,
        )
        .await;
    assert_eq!(body["data"]["status"], json!("delivered"));
    assert!(body["data"]["shipping"]["delivered_at"].is_string());
    let history = body["data"]["status_history"].as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[2]["note"].as_str().unwrap().starts_with("Status changed to"));

    let (status, _) = app
        .put(
            &format!("/api/v1/orders/{}/status", uuid::Uuid::new_v4()),
            json!({ "status": "confirmed" }),
            &admin,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shipping_details_are_recorded() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let user = app.customer("Han Sora").await;
    let tee = app.seed_product("Graphic Tee", dec!(10000), 5).await;

    let (_, body) = app.place_order(&user, &[(tee.id, 1)], card_payment()).await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .put(
            &format!("/api/v1/orders/{}/shipping", order_id),
            json!({
                "tracking_number": "6892-1234-5678",
                "company": "CJ Logistics",
                "estimated_delivery": "2026-10-20T09:00:00Z"
            }),
            &admin,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let shipping = &body["data"]["shipping"];
    assert_eq!(shipping["tracking_number"], json!("6892-1234-5678"));
    assert_eq!(shipping["company"], json!("CJ Logistics"));
    assert!(shipping["estimated_delivery"].is_string());
    assert!(shipping["shipped_at"].is_string());
    // shipping details alone do not move the status
    assert_eq!(body["data"]["status"], json!("pending"));
}

#[tokio::test]
async fn admin_may_update_any_payment() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let user = app.customer("Jung Hoseok").await;
    let stranger = app.customer("Oh Minho").await;
    let tee = app.seed_product("Graphic Tee", dec!(10000), 5).await;

    let (_, body) = app.place_order(&user, &[(tee.id, 1)], card_payment()).await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .put(
            &format!("/api/v1/orders/{}/payment", order_id),
            json!({ "status": "paid" }),
            &stranger,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(
            &format!("/api/v1/orders/{}/payment", order_id),
            json!({ "status": "refunded" }),
            &admin,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment"]["status"], json!("refunded"));
    assert!(body["data"]["payment"]["paid_at"].is_null());
    assert_eq!(body["data"]["status_history"].as_array().unwrap().len(), 1);
}
