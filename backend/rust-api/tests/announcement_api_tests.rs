mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{hex, TestApp};
use drose_api::models::user::UserRole;

async fn send(app: &Router, method: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let app = TestApp::new();
    let router = app.router();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/v1/announcements")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_list_read_like_and_comment_over_http() {
    let app = TestApp::new();
    let router = app.router();
    let teacher = app.actor(UserRole::Teacher);
    let student = app.actor(UserRole::Student);
    let teacher_token = app.token(&teacher);
    let student_token = app.token(&student);

    let (status, created) = send(
        &router,
        "POST",
        "/api/v1/announcements",
        &teacher_token,
        Some(json!({
            "title": "Sports day",
            "content": "Wear comfortable shoes",
            "audience": "students",
            "priority": "high",
            "pinned": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "published");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, feed) = send(&router, "GET", "/api/v1/announcements", &student_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed.as_array().map(Vec::len), Some(1));
    assert_eq!(feed[0]["is_read"], false);

    let (status, detail) = send(
        &router,
        "GET",
        &format!("/api/v1/announcements/{}", id),
        &student_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["is_read"], true);
    assert_eq!(detail["view_count"], 1);

    let (status, like) = send(
        &router,
        "POST",
        &format!("/api/v1/announcements/{}/like", id),
        &student_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(like, json!({ "liked": true, "like_count": 1 }));

    let (status, comment) = send(
        &router,
        "POST",
        &format!("/api/v1/announcements/{}/comment", id),
        &student_token,
        Some(json!({ "text": "Is it outdoors?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["text"], "Is it outdoors?");

    let (status, stats) = send(
        &router,
        "GET",
        &format!("/api/v1/announcements/{}/stats", id),
        &teacher_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["audience_size"], 1);
    assert_eq!(stats["read_percentage"], 100.0);

    let (status, count) = send(
        &router,
        "GET",
        "/api/v1/notifications/unread-count",
        &teacher_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // the comment notification
    assert_eq!(count["count"], 1);
}

#[tokio::test]
async fn error_taxonomy_maps_to_http_statuses() {
    let app = TestApp::new();
    let router = app.router();
    let teacher = app.actor(UserRole::Teacher);
    let colleague = app.actor(UserRole::Teacher);
    let student = app.actor(UserRole::Student);
    let teacher_token = app.token(&teacher);

    // missing content
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/announcements",
        &teacher_token,
        Some(json!({ "title": "No body", "audience": "all" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().is_some());

    let (status, _) = send(
        &router,
        "GET",
        "/api/v1/announcements/not-an-id",
        &teacher_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        "GET",
        &format!("/api/v1/announcements/{}", mongodb::bson::oid::ObjectId::new().to_hex()),
        &teacher_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, created) = send(
        &router,
        "POST",
        "/api/v1/announcements",
        &teacher_token,
        Some(json!({
            "title": "Quiet hours",
            "content": "No music after 22:00",
            "audience": "specific_users",
            "target_users": hex(&[student.id]),
            "allow_comments": false
        })),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/v1/announcements/{}", id),
        &app.token(&colleague),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/announcements/{}/comment", id),
        &app.token(&student),
        Some(json!({ "text": "ok" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Comments are disabled for this announcement");

    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/v1/announcements/{}", id),
        &teacher_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn notification_routes_serve_the_current_user() {
    let app = TestApp::new();
    let router = app.router();
    let teacher = app.actor(UserRole::Teacher);
    let student = app.actor(UserRole::Student);
    let student_token = app.token(&student);

    let (status, report) = send(
        &router,
        "POST",
        "/api/v1/notifications/send",
        &app.token(&teacher),
        Some(json!({
            "title": "Homework",
            "message": "Chapter 4 exercises",
            "notification_type": "assignment",
            "user_ids": hex(&[student.id])
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["inserted"], 1);

    let (status, inbox) = send(&router, "GET", "/api/v1/notifications", &student_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox[0]["notification_type"], "assignment");
    assert_eq!(inbox[0]["icon"], "assignment");
    let id = inbox[0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        "PATCH",
        &format!("/api/v1/notifications/{}/read", id),
        &student_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, count) = send(
        &router,
        "GET",
        "/api/v1/notifications/unread-count",
        &student_token,
        None,
    )
    .await;
    assert_eq!(count["count"], 0);

    let (status, updated) = send(
        &router,
        "PATCH",
        "/api/v1/notifications/read-all",
        &student_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["updated"], 0);
}

#[tokio::test]
async fn sweep_endpoint_is_admin_only() {
    let app = TestApp::new();
    let router = app.router();
    let teacher = app.actor(UserRole::Teacher);
    let admin = app.actor(UserRole::Admin);

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/admin/notifications/sweep",
        &app.token(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/admin/notifications/sweep",
        &app.token(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 0);
    assert_eq!(body["retention_days"], 30);
}

#[tokio::test]
async fn health_and_protected_metrics() {
    let app = TestApp::new();
    let router = app.router();

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let trace_id = response.headers().get("x-trace-id").cloned();
    assert!(trace_id.is_some());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["dependencies"]["redis"]["status"], "disabled");

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let credentials = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header(
                    "authorization",
                    format!("Basic {}", general_purpose::STANDARD.encode(credentials)),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
