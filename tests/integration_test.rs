use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

mod common;

use common::{create_test_app, delete, get, json_body, post_json, put_json, send};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_endpoints() {
    let app = create_test_app().await;

    for uri in ["/health", "/health/live", "/health/info", "/health/ready"] {
        let response = send(&app, get(uri)).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }

    let body = json_body(send(&app, get("/health/info")).await).await;
    assert_eq!(body["service"], "review-scheduler");
    assert_eq!(body["scannerEnabled"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_route_is_json_404() {
    let app = create_test_app().await;
    let response = send(&app, get("/api/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_record_outcome_then_recommend() {
    let app = create_test_app().await;

    let response = send(
        &app,
        post_json(
            "/api/reviews/outcomes",
            json!({ "userId": "u1", "itemId": "w1", "variantId": "v1", "correctness": 1, "responseTimeMs": 900 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["event"]["nReps"], 1);
    assert_eq!(body["data"]["event"]["correctness"], 1);
    assert_eq!(body["data"]["event"]["metadata"]["variantId"], "v1");
    assert_eq!(body["data"]["lambda"]["applied"], true);

    let response = send(&app, get("/api/reviews/u1/items/w1/recommendation")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let data = &body["data"];
    let candidates = data["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 7);
    let chosen = data["recommendedIntervalSec"].as_u64().unwrap();
    assert!(candidates
        .iter()
        .any(|c| c["intervalSec"].as_u64() == Some(chosen)));
    assert!(data["lambda"].as_f64().unwrap() > 0.0);

    let body = json_body(send(&app, get("/api/reviews/u1/events")).await).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blank_user_is_rejected() {
    let app = create_test_app().await;
    let response = send(
        &app,
        post_json(
            "/api/reviews/outcomes",
            json!({ "userId": " ", "itemId": "w1", "correctness": 0 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lambda_override_and_recalibration() {
    let app = create_test_app().await;

    let body = json_body(send(&app, get("/api/lambda/u2")).await).await;
    assert_eq!(body["data"]["lambda"], 0.15);
    assert_eq!(body["data"]["source"], "default");

    let response = send(&app, put_json("/api/lambda/u2", json!({ "lambda": 50.0 }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["lambda"], 1.0);
    assert_eq!(body["data"]["source"], "imported");

    let response = send(&app, put_json("/api/lambda/u2", json!({ "lambda": -1.0 }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, post_json("/api/lambda/u2/recalibrate", json!({}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    send(
        &app,
        post_json(
            "/api/reviews/outcomes",
            json!({ "userId": "u2", "itemId": "w1", "correctness": 1 }),
        ),
    )
    .await;
    let response = send(
        &app,
        post_json("/api/lambda/u2/recalibrate", json!({ "window": 10 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["eventsUsed"], 1);
    assert_eq!(body["data"]["avgCorrectness"], 1.0);

    let body = json_body(send(&app, get("/api/lambda/u2")).await).await;
    assert_eq!(body["data"]["source"], "auto-adjust");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_imported_history_shows_up_as_due() {
    let app = create_test_app().await;
    send(&app, put_json("/api/lambda/u3", json!({ "lambda": 1e-6 }))).await;

    let two_days_ago = (Utc::now() - Duration::days(2)).to_rfc3339();
    let response = send(
        &app,
        post_json(
            "/api/reviews/u3/events/import",
            json!({ "events": [
                { "userId": "u3", "itemId": "w1", "createdAt": two_days_ago, "correct": true, "timeSinceLastReview": 0 },
                { "userId": "u3", "itemId": "w2" }
            ]}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["data"]["imported"], 1);

    let body = json_body(send(&app, get("/api/reviews/u3/due")).await).await;
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["items"][0]["itemId"], "w1");
    assert_eq!(body["data"]["items"][0]["recommendedIntervalSec"], 3600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_lifecycle() {
    let app = create_test_app().await;
    send(&app, put_json("/api/lambda/u4", json!({ "lambda": 1e-6 }))).await;
    let old = (Utc::now() - Duration::days(1)).to_rfc3339();
    send(
        &app,
        post_json(
            "/api/reviews/outcomes",
            json!({ "userId": "u4", "itemId": "w9", "correctness": 0, "timestamp": old }),
        ),
    )
    .await;

    let response = send(&app, post_json("/api/sessions/u4", json!({}))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["state"], "item-due");
    assert_eq!(body["data"]["itemId"], "w9");

    let response = send(
        &app,
        post_json("/api/reviews/u4/items/w9/dismiss", json!({})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut state = String::new();
    for _ in 0..50 {
        let body = json_body(send(&app, get("/api/sessions/u4")).await).await;
        state = body["data"]["state"].as_str().unwrap_or_default().to_string();
        if state == "idle" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(state, "idle");

    let body = json_body(send(&app, get("/api/sessions")).await).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let body = json_body(send(&app, delete("/api/sessions/u4")).await).await;
    assert_eq!(body["data"]["stopped"], true);

    let response = send(&app, get("/api/sessions/u4")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
