//! HTTP surface tests driven through the router with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use dueline_api::{create_api_router, AppState, CacheSettings, OWNER_HEADER};
use dueline_storage::{InMemoryCacheStore, InMemoryTodoStore};
use dueline_test_utils::fixtures::todo_due_in;
use serde_json::{json, Value};
use tower::ServiceExt;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct TestApp {
    router: Router,
    store: Arc<InMemoryTodoStore>,
}

fn app() -> TestApp {
    let store = Arc::new(InMemoryTodoStore::new());
    let state = AppState::with_stores(
        store.clone(),
        Arc::new(InMemoryCacheStore::new()),
        &CacheSettings::default(),
    );
    TestApp {
        router: create_api_router(state, Duration::from_secs(5)),
        store,
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    owner: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header(OWNER_HEADER, owner);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    Ok((status, value))
}

#[tokio::test]
async fn test_missing_or_bad_owner_header_is_unauthorized() -> TestResult {
    let app = app();
    for owner in [None, Some("abc"), Some("0")] {
        let (status, body) = send(&app.router, Method::GET, "/todos", owner, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
    Ok(())
}

#[tokio::test]
async fn test_create_then_list() -> TestResult {
    let app = app();
    let (status, created) = send(
        &app.router,
        Method::POST,
        "/todos",
        Some("42"),
        Some(json!({ "title": "  Buy milk  ", "due_at": "2999-01-01" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "Buy milk");
    assert_eq!(created["is_done"], false);
    assert_eq!(created["due_at"], "2999-01-01T00:00:00Z");

    let (status, list) = send(&app.router, Method::GET, "/todos", Some("42"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(list["items"][0]["id"], created["id"]);

    let (_, other) = send(&app.router, Method::GET, "/todos", Some("7"), None).await?;
    assert_eq!(other, json!({ "items": [] }));
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_bad_input() -> TestResult {
    let app = app();
    let cases = [
        json!({ "title": "x", "due_at": "next week" }),
        json!({ "title": "x", "due_at": "2001-01-01" }),
        json!({ "title": "   " }),
        json!({ "description": "no title" }),
    ];
    for body in cases {
        let (status, response) =
            send(&app.router, Method::POST, "/todos", Some("1"), Some(body.clone())).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(response["code"], "INVALID_INPUT", "body {}", body);
    }
    Ok(())
}

#[tokio::test]
async fn test_get_update_complete_delete() -> TestResult {
    let app = app();
    let (_, created) = send(
        &app.router,
        Method::POST,
        "/todos",
        Some("5"),
        Some(json!({ "title": "Call plumber" })),
    )
    .await?;
    let uri = format!("/todos/{}", created["id"]);

    let (status, fetched) = send(&app.router, Method::GET, &uri, Some("5"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Call plumber");

    let (status, updated) = send(
        &app.router,
        Method::PATCH,
        &uri,
        Some("5"),
        Some(json!({ "description": "leaky tap", "due_at": null })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "leaky tap");
    assert_eq!(updated["title"], "Call plumber");

    let (status, completed) = send(
        &app.router,
        Method::POST,
        &format!("{}/complete", uri),
        Some("5"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["is_done"], true);

    let (status, body) = send(&app.router, Method::DELETE, &uri, Some("5"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(&app.router, Method::GET, &uri, Some("5"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ENTITY_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn test_other_owner_gets_not_found() -> TestResult {
    let app = app();
    let (_, created) = send(
        &app.router,
        Method::POST,
        "/todos",
        Some("5"),
        Some(json!({ "title": "Private" })),
    )
    .await?;
    let uri = format!("/todos/{}", created["id"]);

    let (status, _) = send(&app.router, Method::GET, &uri, Some("6"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app.router, Method::DELETE, &uri, Some("6"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_invalid_path_id_is_bad_request() -> TestResult {
    let app = app();
    for uri in ["/todos/abc", "/todos/0", "/todos/-4/complete"] {
        let method = if uri.ends_with("complete") {
            Method::POST
        } else {
            Method::GET
        };
        let (status, body) = send(&app.router, method, uri, Some("1"), None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["message"], "invalid id", "{}", uri);
    }
    Ok(())
}

#[tokio::test]
async fn test_search_and_overdue() -> TestResult {
    let app = app();
    let owner = dueline_core::OwnerId::new(9);
    app.store
        .seed(todo_due_in(1, owner, "Renew passport", chrono::Duration::days(-1)))?;
    app.store
        .seed(todo_due_in(2, owner, "Buy milk", chrono::Duration::days(2)))?;

    let (status, found) =
        send(&app.router, Method::GET, "/todos/search?q=%20MILK%20", Some("9"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(found["items"][0]["title"], "Buy milk");

    let (status, overdue) = send(&app.router, Method::GET, "/todos/overdue", Some("9"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overdue["items"][0]["title"], "Renew passport");
    assert_eq!(overdue["items"].as_array().map(Vec::len), Some(1));

    let (status, all) = send(&app.router, Method::GET, "/todos/search", Some("9"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["items"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_health_metrics_and_unknown_route() -> TestResult {
    let app = app();

    let (status, body) = send(&app.router, Method::GET, "/health/ping", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("pong".to_string()));

    let (status, body) = send(&app.router, Method::GET, "/health/ready", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    send(&app.router, Method::GET, "/todos", Some("3"), None).await?;
    let (status, body) = send(&app.router, Method::GET, "/metrics", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap_or_default();
    assert!(text.contains("dueline_http_requests_total"));
    assert!(text.contains("dueline_read_cache_events"));

    let (status, body) = send(&app.router, Method::GET, "/nope", None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROUTE_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() -> TestResult {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/todos")
        .header(OWNER_HEADER, "1")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
