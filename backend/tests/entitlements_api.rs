use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use backend::{
    auth::JwtAuthenticator,
    axum_http::http_serve,
    config::config_model::{Auth, BackendServer},
    usecases::entitlements::EntitlementUseCase,
};
use chrono::{TimeZone, Utc};
use crates::{
    domain::{repositories::entitlements::EntitlementRepository, value_objects::trials::TrialPolicy},
    infra::memory::entitlements::EntitlementInMemory,
    purchases::verifier::{MockPurchaseVerifier, VerificationOutcome, VerifierError},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "integration-test-secret-with-enough-bytes";
const FIRST_EXPIRY_MS: i64 = 1_999_999_999_000;
const RENEWED_EXPIRY_MS: i64 = 2_099_999_999_000;

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    aud: &'a str,
    exp: usize,
}

fn bearer(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id,
        aud: "authenticated",
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Verifier that knows two tokens for `p1` and rejects everything else.
fn store_verifier() -> MockPurchaseVerifier {
    let mut verifier = MockPurchaseVerifier::new();
    verifier.expect_verify().returning(|token, product_id| {
        let expiry_ms = match (token, product_id) {
            ("tok", "p1") => FIRST_EXPIRY_MS,
            ("tok-renewed", "p1") => RENEWED_EXPIRY_MS,
            ("tok-lapsed", "p1") => 1_000,
            _ => return Err(VerifierError::Rejected("purchase token not found".to_string())),
        };
        Ok(VerificationOutcome {
            is_active: expiry_ms > Utc::now().timestamp_millis(),
            expires_at: Utc.timestamp_millis_opt(expiry_ms).single(),
            order_id: Some("o1".to_string()),
            auto_renewing: true,
            payment_state: Some(1),
            raw: json!({ "expiryTimeMillis": expiry_ms.to_string(), "orderId": "o1" }),
        })
    });
    verifier
}

struct TestApp {
    router: Router,
    store: Arc<EntitlementInMemory>,
}

fn test_app(reset_enabled: bool) -> TestApp {
    let store = Arc::new(EntitlementInMemory::new());
    let usecase = EntitlementUseCase::new(
        Arc::clone(&store),
        Arc::new(store_verifier()),
        TrialPolicy::from_days(7),
        reset_enabled,
    );
    let authenticator = JwtAuthenticator::new(&Auth {
        jwt_secret: SECRET.to_string(),
        audiences: vec!["authenticated".to_string()],
    });
    let server = BackendServer {
        port: 0,
        body_limit: 1,
        timeout: 30,
    };

    TestApp {
        router: http_serve::app(&server, Arc::new(usecase), authenticator).unwrap(),
        store,
    }
}

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    user_id: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer(user_id)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn server_time_needs_no_token() {
    let app = test_app(false);

    let (status, body) = call(&app, Method::GET, "/api/v1/subscription/server-time", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["serverTime"].is_string());
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn trial_can_be_started_exactly_once() {
    let app = test_app(false);

    let (status, body) =
        call(&app, Method::GET, "/api/v1/subscription/trial-status/u1", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasUsedTrial"], false);
    assert!(body["serverTime"].is_string());

    let start = json!({ "userId": "u1", "deviceId": "d1" });
    let (status, first) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/trial-start",
        Some("u1"),
        Some(start.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(first["trialStartedAt"].is_string());

    let (status, second) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/trial-start",
        Some("u1"),
        Some(start),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["code"], "ALREADY_USED");
    assert_eq!(second["hasUsedTrial"], true);
    assert_eq!(second["trialStartedAt"], first["trialStartedAt"]);

    assert_eq!(app.store.trial_count("u1").await, 1);

    let (_, body) =
        call(&app, Method::GET, "/api/v1/subscription/trial-status/u1", Some("u1"), None).await;
    assert_eq!(body["hasUsedTrial"], true);
    assert_eq!(body["trialActive"], true);
}

#[tokio::test]
async fn concurrent_trial_starts_create_one_trial() {
    let app = test_app(false);
    let start = || {
        call(
            &app,
            Method::POST,
            "/api/v1/subscription/trial-start",
            Some("u1"),
            Some(json!({ "userId": "u1", "deviceId": "d1" })),
        )
    };

    let (a, b, c) = tokio::join!(start(), start(), start());
    let created = [a.0, b.0, c.0]
        .iter()
        .filter(|status| **status == StatusCode::CREATED)
        .count();

    assert_eq!(created, 1);
    assert_eq!(app.store.trial_count("u1").await, 1);
}

#[tokio::test]
async fn verified_purchase_grants_entitlement() {
    let app = test_app(false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify-purchase",
        Some("u1"),
        Some(json!({ "userId": "u1", "purchaseToken": "tok", "productId": "p1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], true);
    assert_eq!(body["orderId"], "o1");
    assert_eq!(body["autoRenewing"], true);

    let subscription = app.store.find_subscription("u1").await.unwrap().unwrap();
    assert_eq!(subscription.status, "subscribed");
    assert_eq!(subscription.order_id.as_deref(), Some("o1"));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify",
        Some("u1"),
        Some(json!({ "userId": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entitlementActive"], true);
    assert_eq!(body["status"], "subscribed");
    assert_eq!(body["productId"], "p1");
    assert_eq!(body["hasPurchaseHistory"], true);
    assert_eq!(body["source"], "server");
}

#[tokio::test]
async fn renewal_keeps_first_activation_and_moves_expiry() {
    let app = test_app(false);
    let verify = |token: &'static str| {
        call(
            &app,
            Method::POST,
            "/api/v1/subscription/verify-purchase",
            Some("u1"),
            Some(json!({ "userId": "u1", "purchaseToken": token, "productId": "p1" })),
        )
    };

    verify("tok").await;
    let first = app.store.find_subscription("u1").await.unwrap().unwrap();
    verify("tok-renewed").await;
    let renewed = app.store.find_subscription("u1").await.unwrap().unwrap();

    assert_eq!(renewed.subscription_started_at, first.subscription_started_at);
    assert_eq!(
        renewed.subscription_expires_at.map(|at| at.timestamp_millis()),
        Some(RENEWED_EXPIRY_MS)
    );
    assert_eq!(renewed.purchase_token.as_deref(), Some("tok-renewed"));
    assert_eq!(app.store.verification_log("u1").await.len(), 2);
}

#[tokio::test]
async fn lapsed_purchase_is_audited_but_not_activated() {
    let app = test_app(false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify-purchase",
        Some("u1"),
        Some(json!({ "userId": "u1", "purchaseToken": "tok-lapsed", "productId": "p1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], false);
    assert!(app.store.find_subscription("u1").await.unwrap().is_none());
    assert_eq!(app.store.verification_log("u1").await.len(), 1);
}

#[tokio::test]
async fn verifier_rejection_is_400_without_writes() {
    let app = test_app(false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify-purchase",
        Some("u1"),
        Some(json!({ "userId": "u1", "purchaseToken": "forged", "productId": "p1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VERIFICATION_FAILED");
    assert!(body["message"].as_str().unwrap().contains("purchase token not found"));
    assert!(app.store.find_subscription("u1").await.unwrap().is_none());
    assert!(app.store.verification_log("u1").await.is_empty());
}

#[tokio::test]
async fn sync_cannot_promote_to_subscribed() {
    let app = test_app(false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/sync",
        Some("u1"),
        Some(json!({
            "userId": "u1",
            "status": "subscribed",
            "productId": "p1",
            "expiresAt": "2033-05-18T03:33:19Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "blocked");

    let (_, verify) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify",
        Some("u1"),
        Some(json!({ "userId": "u1" })),
    )
    .await;
    assert_eq!(verify["entitlementActive"], false);
    assert_eq!(verify["productId"], "p1");
}

#[tokio::test]
async fn sync_can_report_an_expiry_to_blocked() {
    let app = test_app(false);
    call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify-purchase",
        Some("u1"),
        Some(json!({ "userId": "u1", "purchaseToken": "tok", "productId": "p1" })),
    )
    .await;

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/sync",
        Some("u1"),
        Some(json!({ "userId": "u1", "status": "blocked" })),
    )
    .await;

    assert_eq!(body["status"], "blocked");
    let subscription = app.store.find_subscription("u1").await.unwrap().unwrap();
    assert_eq!(subscription.order_id.as_deref(), Some("o1"));
    assert!(subscription.subscription_started_at.is_some());
}

#[tokio::test]
async fn unknown_user_snapshot_has_defaults() {
    let app = test_app(false);

    let (status, body) =
        call(&app, Method::GET, "/api/v1/subscription/status/u7", Some("u7"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "blocked");
    assert_eq!(body["hasUsedTrial"], false);
    assert_eq!(body["hasPurchaseHistory"], false);
    assert!(body["subscriptionStartedAt"].is_null());
    assert!(body["serverTime"].is_string());
}

#[tokio::test]
async fn foreign_user_id_is_forbidden() {
    let app = test_app(false);

    let (status, body) =
        call(&app, Method::GET, "/api/v1/subscription/status/u2", Some("u1"), None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = test_app(false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify",
        None,
        Some(json!({ "userId": "u1" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_body_and_blank_user_id_are_invalid() {
    let app = test_app(false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify",
        Some("u1"),
        Some(json!({ "user": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/subscription/trial-start",
        Some("u1"),
        Some(json!({ "userId": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn reset_is_hidden_unless_enabled() {
    let app = test_app(false);

    let (status, body) =
        call(&app, Method::DELETE, "/api/v1/subscription/reset/u1", Some("u1"), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn reset_wipes_state_but_keeps_audit() {
    let app = test_app(true);
    call(
        &app,
        Method::POST,
        "/api/v1/subscription/trial-start",
        Some("u1"),
        Some(json!({ "userId": "u1" })),
    )
    .await;
    call(
        &app,
        Method::POST,
        "/api/v1/subscription/verify-purchase",
        Some("u1"),
        Some(json!({ "userId": "u1", "purchaseToken": "tok", "productId": "p1" })),
    )
    .await;

    let (status, body) =
        call(&app, Method::DELETE, "/api/v1/subscription/reset/u1", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset"], true);

    let (_, trial) =
        call(&app, Method::GET, "/api/v1/subscription/trial-status/u1", Some("u1"), None).await;
    assert_eq!(trial["hasUsedTrial"], false);
    assert_eq!(app.store.verification_log("u1").await.len(), 1);
}

#[tokio::test]
async fn health_check_and_fallback() {
    let app = test_app(false);

    let (status, _) = call(&app, Method::GET, "/api/v1/health-check", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/api/v1/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
