use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use ledger_backend::api::{configure_routes, AppState};
use ledger_backend::config::AppConfig;
use ledger_backend::db::MemoryStore;
use ledger_backend::services::LogNotifier;

const ADMIN: &str = "admin@example.com";

fn state() -> Arc<AppState<MemoryStore>> {
    let config = AppConfig {
        admin_identities: vec![ADMIN.to_string()],
        accrue_on_dashboard: false,
        ..AppConfig::default()
    };
    Arc::new(AppState::new(MemoryStore::new(), config, Arc::new(LogNotifier)))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(configure_routes::<MemoryStore>),
        )
        .await
    };
}

fn decimal(v: &Value) -> Decimal {
    v.as_str().expect("decimal as string").parse().expect("valid decimal")
}

fn register_body(email: &str, referral_code: Option<&str>) -> Value {
    json!({
        "email": email,
        "firstName": "Test",
        "lastName": "User",
        "username": email,
        "password": "correct horse",
        "referralCode": referral_code,
    })
}

#[actix_web::test]
async fn test_deposit_lifecycle_with_referral() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(register_body("referrer@example.com", None))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["success"], true);
    let code = resp["data"]["referralCode"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(register_body("ada@example.com", Some(&code)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/deposits")
        .set_json(json!({
            "email": "ada@example.com",
            "amount": "500.00",
            "currency": "USDT",
            "address": "TQn9Y2khEsLJW1ChVWFMSMeRDow5KcbLSE"
        }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let transaction_id = resp["data"]["transactionId"].as_str().unwrap().to_string();

    let approve = json!({
        "transactionId": transaction_id,
        "action": "approve",
        "adminEmail": ADMIN
    });
    let req = test::TestRequest::post()
        .uri("/deposits/approve")
        .set_json(&approve)
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["status"], "Completed");
    assert_eq!(resp["data"]["referralRewarded"], true);

    // A second decision is refused and changes nothing
    let req = test::TestRequest::post()
        .uri("/deposits/approve")
        .set_json(&approve)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "ALREADY_PROCESSED");

    let req = test::TestRequest::get().uri("/dashboard/ada@example.com").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let balances = &resp["data"]["balances"];
    assert_eq!(decimal(&balances["mainBalance"]), dec!(500));
    assert_eq!(decimal(&balances["totalDeposit"]), dec!(500));
    assert_eq!(resp["data"]["depositHistory"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get().uri("/rewards/referrer@example.com").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["rewardPoints"], 200);
}

#[actix_web::test]
async fn test_withdrawal_approval_requires_admin() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(register_body("bob@example.com", None))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/deposits")
        .set_json(json!({"email": "bob@example.com", "amount": 100, "currency": "USDT", "address": "x"}))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let deposit_id = resp["data"]["deposit"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/deposits/approve")
        .set_json(json!({"depositId": deposit_id, "action": "approve", "adminEmail": ADMIN}))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/withdrawals")
        .set_json(json!({"email": "bob@example.com", "amount": "40", "currency": "USDT", "address": "y"}))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let withdrawal_id = resp["data"]["withdrawal"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/withdrawals/approve")
        .set_json(json!({"withdrawalId": withdrawal_id, "action": "approve", "adminEmail": "bob@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/withdrawals/approve")
        .set_json(json!({"withdrawalId": withdrawal_id, "action": "approve", "adminEmail": ADMIN}))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(decimal(&resp["data"]["mainBalance"]), dec!(60));
}

#[actix_web::test]
async fn test_errors_use_envelope() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/users/ghost@example.com").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let req = test::TestRequest::post()
        .uri("/rewards/redeem")
        .set_json(json!({"email": "ghost@example.com", "points": 50}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "BELOW_MINIMUM");
}

#[actix_web::test]
async fn test_login_and_unknown_referral_code() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(register_body("carol@example.com", Some("NOPE1234")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["user"]["referredById"], Value::Null);
    assert!(body["data"]["user"].get("passwordHash").is_none());

    let req = test::TestRequest::post()
        .uri("/users/login")
        .set_json(json!({"email": "carol@example.com", "password": "correct horse"}))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["data"]["email"], "carol@example.com");

    let req = test::TestRequest::post()
        .uri("/users/login")
        .set_json(json!({"email": "carol@example.com", "password": "battery staple"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");
}

#[actix_web::test]
async fn test_health_and_plans() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["status"], "healthy");

    let req = test::TestRequest::get().uri("/plans").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    let names: Vec<&str> = resp["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Mining", "Premium", "Gold"]);
}
