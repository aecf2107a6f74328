//! Router tests over the in-memory store.
//!
//! These drive the full application router (envelope, extractors, status
//! mapping, bearer auth) without a database.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot()
use userdesk::{
    app::build_app,
    notify::{Notification, RecordingNotifier},
    state::AppState,
};

struct TestApp {
    router: Router,
    notifier: RecordingNotifier,
}

impl TestApp {
    fn new() -> Self {
        let notifier = RecordingNotifier::new();
        let state = AppState::fake_with_notifier(Arc::new(notifier.clone()));
        Self {
            router: build_app(state),
            notifier,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn create_user(&self, email: &str, name: &str, password: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/users",
                Some(json!({"email": email, "name": name, "password": password})),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/auth/login",
            Some(json!({"email": email, "password": password})),
            None,
        )
        .await
    }

    async fn token_for(&self, email: &str, password: &str) -> String {
        let (status, body) = self.login(email, password).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn create_login_then_fetch_with_and_without_token() {
    let app = TestApp::new();
    let user = app.create_user("a@x.com", "A", "p1").await;
    let id = user["id"].as_str().unwrap();
    assert!(user.get("password_hash").is_none());

    let token = app.token_for("a@x.com", "p1").await;

    let (status, body) = app
        .call(Method::GET, &format!("/api/users/{id}"), None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["email"], "a@x.com");
    assert_eq!(body["data"]["name"], "A");
    assert!(!body.to_string().contains("argon2"));

    let (status, body) = app
        .call(Method::GET, &format!("/api/users/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn login_response_carries_public_user() {
    let app = TestApp::new();
    app.create_user("a@x.com", "A", "p1").await;
    let (status, body) = app.login("a@x.com", "p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], "a@x.com");
    assert!(body["data"]["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = TestApp::new();
    app.create_user("a@x.com", "A", "p1").await;

    let (wrong_status, wrong_body) = app.login("a@x.com", "nope").await;
    let (ghost_status, ghost_body) = app.login("ghost@x.com", "p1").await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(ghost_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, ghost_body);
}

#[tokio::test]
async fn duplicate_email_is_conflict() {
    let app = TestApp::new();
    app.create_user("a@x.com", "A", "p1").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/users",
            Some(json!({"email": "A@x.com", "name": "B", "password": "p2"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests_in_the_envelope() {
    let app = TestApp::new();
    let (status, body) = app
        .call(Method::POST, "/api/users", Some(json!({"email": "a@x.com"})), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/users",
            Some(json!({"email": "not-an-email", "name": "A", "password": "p1"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_is_injection_safe_and_public() {
    let app = TestApp::new();
    app.create_user("ann@x.com", "Ann", "p1").await;
    app.create_user("bob@x.com", "Bob", "p1").await;

    let (status, body) = app
        .call(Method::GET, "/api/users/search?query=ANN", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .call(
            Method::GET,
            "/api/users/search?query=%27%3B%20DROP%20TABLE%20users%3B%20--",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = app
        .call(Method::GET, "/api/users/search?query=x.com&limit=1", None, None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn patch_rejects_fields_outside_allow_list() {
    let app = TestApp::new();
    let user = app.create_user("a@x.com", "A", "p1").await;
    let id = user["id"].as_str().unwrap();
    let token = app.token_for("a@x.com", "p1").await;

    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("/api/users/{id}"),
            Some(json!({"password": "x", "isAdmin": true})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    // password unchanged
    assert_eq!(app.login("a@x.com", "p1").await.0, StatusCode::OK);
}

#[tokio::test]
async fn patch_merges_supplied_fields() {
    let app = TestApp::new();
    let user = app.create_user("a@x.com", "A", "p1").await;
    let id = user["id"].as_str().unwrap();
    let token = app.token_for("a@x.com", "p1").await;

    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("/api/users/{id}"),
            Some(json!({"name": "Alice"})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Alice");
    assert_eq!(body["data"]["email"], "a@x.com");
}

#[tokio::test]
async fn patch_and_delete_require_a_token() {
    let app = TestApp::new();
    let user = app.create_user("a@x.com", "A", "p1").await;
    let id = user["id"].as_str().unwrap();

    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("/api/users/{id}"),
            Some(json!({"name": "Z"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/users/{id}"), None, Some("garbage"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let app = TestApp::new();
    let user = app.create_user("a@x.com", "A", "p1").await;
    let id = user["id"].as_str().unwrap();
    let token = app.token_for("a@x.com", "p1").await;
    let uri = format!("/api/users/{id}");

    for _ in 0..2 {
        let (status, body) = app.call(Method::DELETE, &uri, None, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    let (status, _) = app.call(Method::GET, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_user_id_is_bad_request() {
    let app = TestApp::new();
    app.create_user("a@x.com", "A", "p1").await;
    let token = app.token_for("a@x.com", "p1").await;
    let (status, body) = app
        .call(Method::GET, "/api/users/not-a-uuid", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn logout_acknowledges() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::POST, "/api/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn password_reset_round_trip() {
    let app = TestApp::new();
    app.create_user("a@x.com", "A", "p1").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/reset-password",
            Some(json!({"email": "a@x.com"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let mut token = None;
    for _ in 0..50 {
        if let Some(Notification::PasswordReset { token: t, .. }) =
            app.notifier.last_to("a@x.com").await
        {
            token = Some(t);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let token = token.expect("reset notification should be sent");

    let confirm = json!({"token": token, "password": "brand-new"});
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/reset-password/confirm",
            Some(confirm.clone()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.login("a@x.com", "brand-new").await.0, StatusCode::OK);

    let (status, _) = app
        .call(Method::POST, "/api/auth/reset-password/confirm", Some(confirm), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reset_for_unknown_email_still_succeeds() {
    let app = TestApp::new();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/reset-password",
            Some(json!({"email": "ghost@x.com"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(app.notifier.sent_count().await, 0);
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new();
    let res = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
