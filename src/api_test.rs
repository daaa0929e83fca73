use super::*;
use std::sync::Mutex;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};

type Recorded = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn client(base: &str) -> ApiClient {
    ApiClient::new(&ClientConfig::default().with_base_url(base)).expect("client")
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

fn record(recorded: &Recorded, path: &str, headers: &HeaderMap, body: Value) {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    recorded.lock().expect("lock").push((path.to_owned(), key, body));
}

fn recording_router(recorded: Recorded) -> Router {
    Router::new()
        .route(
            "/api/private-messages",
            post(|State(rec): State<Recorded>, headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                record(&rec, "/private-messages", &headers, body);
                (StatusCode::CREATED, axum::Json(json!({"id": 1})))
            }),
        )
        .route(
            "/api/private-messages/typing",
            post(|State(rec): State<Recorded>, headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                record(&rec, "/typing", &headers, body);
                axum::Json(json!({"status": "ok"}))
            }),
        )
        .route(
            "/api/chat/boards/{id}/messages",
            post(
                |State(rec): State<Recorded>,
                 Path(id): Path<u64>,
                 headers: HeaderMap,
                 axum::Json(body): axum::Json<Value>| async move {
                    record(&rec, &format!("/boards/{id}"), &headers, body);
                    (StatusCode::CREATED, axum::Json(json!({"id": 9})))
                },
            ),
        )
        .with_state(recorded)
}

#[tokio::test]
async fn login_decodes_token_and_user() {
    let router = Router::new().route(
        "/api/auth/login",
        post(|axum::Json(body): axum::Json<Value>| async move {
            assert_eq!(body["email"], "ann@example.com");
            axum::Json(json!({"token": "t-1", "user": {"id": 7, "email": "ann@example.com", "name": "Ann"}}))
        }),
    );
    let api = client(&serve(router).await);

    let auth = api.login("ann@example.com", "pw").await.expect("login");

    assert_eq!(auth.token, "t-1");
    let session = auth.into_session();
    assert_eq!(session.user_id(), 7);
}

#[tokio::test]
async fn status_error_prefers_error_field() {
    let router = Router::new().route(
        "/api/auth/login",
        post(|| async { (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "Invalid credentials"}))) }),
    );
    let api = client(&serve(router).await);

    let err = api.login("ann@example.com", "bad").await.expect_err("should fail");

    assert_eq!(err.status(), Some(401));
    assert!(matches!(err, ApiError::Status { ref message, .. } if message == "Invalid credentials"));
}

#[tokio::test]
async fn status_error_falls_back_to_plain_body() {
    let router = Router::new().route("/api/auth/profile", get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
    let api = client(&serve(router).await).with_token("t");

    let err = api.profile().await.expect_err("should fail");
    assert!(matches!(err, ApiError::Status { status: 502, ref message } if message == "upstream down"));
}

#[tokio::test]
async fn authenticated_calls_require_token() {
    let api = client("http://127.0.0.1:9");
    assert!(matches!(api.unread_counts().await, Err(ApiError::MissingToken)));
    assert!(matches!(api.search_users("an").await, Err(ApiError::MissingToken)));
}

#[tokio::test]
async fn unread_counts_sends_bearer_token() {
    let router = Router::new().route(
        "/api/private-messages/unread-counts",
        get(|headers: HeaderMap| async move {
            if bearer(&headers).as_deref() != Some("Bearer tok") {
                return (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "no"})));
            }
            (
                StatusCode::OK,
                axum::Json(json!({"totalUnread": 5, "conversations": [{"userId": 7, "unreadCount": 3}, {"userId": 9, "unreadCount": 2}]})),
            )
        }),
    );
    let api = client(&serve(router).await).with_token("tok");

    let snapshot = api.unread_counts().await.expect("snapshot");

    assert_eq!(snapshot.total_unread, Some(5));
    assert_eq!(snapshot.conversations.len(), 2);
}

#[tokio::test]
async fn mark_read_uses_put_on_user_path() {
    let router = Router::new().route(
        "/api/private-messages/users/{id}/read",
        put(|Path(id): Path<u64>| async move { axum::Json(json!({"message": format!("read {id}")})) }),
    );
    let api = client(&serve(router).await).with_token("tok");
    api.mark_read(7).await.expect("mark read");
}

#[tokio::test]
async fn board_lists_unwrap_envelopes() {
    let router = Router::new()
        .route(
            "/api/chat/boards/{id}/messages",
            get(|| async { axum::Json(json!({"messages": [{"id": "1", "content": "a"}, {"id": 2, "sender": "ai"}]})) }),
        )
        .route(
            "/api/chat/boards/{id}/members",
            get(|| async { axum::Json(json!({"members": [{"user_id": 3, "name": "Bo", "role": "owner"}], "total": 1})) }),
        );
    let api = client(&serve(router).await).with_token("tok");

    let messages = api.board_messages(4).await.expect("messages");
    let members = api.board_members(4).await.expect("members");

    assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(members[0].role, "owner");
}

#[tokio::test]
async fn search_passes_query_parameter() {
    let router = Router::new().route(
        "/api/chat/users/search",
        get(|Query(params): Query<std::collections::HashMap<String, String>>| async move {
            let q = params.get("q").cloned().unwrap_or_default();
            axum::Json(json!({"users": [{"id": 5, "name": q}], "total": 1, "query": q}))
        }),
    );
    let api = client(&serve(router).await).with_token("tok");

    let users = api.search_users("ann lee").await.expect("search");

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "ann lee");
}

#[tokio::test]
async fn fallback_delivery_carries_idempotency_key_and_body() {
    let recorded = Recorded::default();
    let api = client(&serve(recording_router(recorded.clone())).await).with_token("tok");

    api.deliver(&OutboundCommand::PrivateMessage { recipient_id: 3, content: "hi".into() }, "key-1")
        .await
        .expect("private");
    api.deliver(&OutboundCommand::ChatMessage { board_id: 4, content: "yo".into() }, "key-2")
        .await
        .expect("chat");
    api.deliver(&OutboundCommand::Typing { recipient_id: 3, is_typing: true }, "key-3")
        .await
        .expect("typing");

    let recorded = recorded.lock().expect("lock").clone();
    assert_eq!(
        recorded,
        vec![
            ("/private-messages".to_owned(), Some("key-1".to_owned()), json!({"recipient_id": 3, "content": "hi"})),
            (
                "/boards/4".to_owned(),
                Some("key-2".to_owned()),
                json!({"content": "yo", "sender": "user", "boardId": 4})
            ),
            ("/typing".to_owned(), Some("key-3".to_owned()), json!({"recipient_id": 3, "is_typing": true})),
        ]
    );
}
