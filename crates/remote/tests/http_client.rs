use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, Query as UrlQuery},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
};
use entities::models::notification::Notification;
use remote::{Query, RemoteCollection, RemoteError, SortKey, http::HttpEntityClient};
use serde_json::{Value, json};

fn notification_json(id: &str, read: bool) -> Value {
    json!({
        "id": id,
        "user_email": "ada@example.com",
        "title": "Project invite",
        "message": "Grace invited you",
        "type": "project_invite",
        "read": read,
        "created_date": "2025-03-01T10:00:00Z"
    })
}

async fn list(
    headers: HeaderMap,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer s3cret") {
        return Err((StatusCode::UNAUTHORIZED, "missing token".into()));
    }
    let filter: Value = serde_json::from_str(params.get("q").map(String::as_str).unwrap_or("{}"))
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    if filter["user_email"] != "ada@example.com"
        || params.get("sort").map(String::as_str) != Some("-created_date")
        || params.get("limit").map(String::as_str) != Some("50")
    {
        return Err((StatusCode::BAD_REQUEST, format!("unexpected params {params:?}")));
    }
    Ok(Json(json!([notification_json("n1", false)])))
}

async fn update(
    Path((_entity, id)): Path<(String, String)>,
    Json(fields): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    match id.as_str() {
        "n1" => Ok(Json(notification_json("n1", fields["read"] == true))),
        "busy" => Err((StatusCode::TOO_MANY_REQUESTS, "slow down".into())),
        "locked" => Err((StatusCode::FORBIDDEN, "not yours".into())),
        _ => Err((StatusCode::NOT_FOUND, format!("no notification {id}"))),
    }
}

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/api/entities/{entity}", get(list))
        .route("/api/entities/{entity}/{id}", put(update));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

#[tokio::test]
async fn fetch_sends_filter_sort_limit_and_token() {
    let base = spawn_server().await;
    let client = HttpEntityClient::new(&base, Some("s3cret".to_string().into())).unwrap();
    let query = Query::new()
        .filter(Notification::for_user("ada@example.com"))
        .sort(SortKey::desc("created_date"))
        .limit(50);

    let items = RemoteCollection::<Notification>::fetch(&client, &query)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "n1");
}

#[tokio::test]
async fn missing_token_is_a_permission_error() {
    let base = spawn_server().await;
    let client = HttpEntityClient::new(&base, None).unwrap();
    let result = RemoteCollection::<Notification>::fetch(&client, &Query::new()).await;
    assert!(matches!(result, Err(RemoteError::Permission(_))));
}

#[tokio::test]
async fn update_statuses_map_to_error_kinds() {
    let base = spawn_server().await;
    let client = HttpEntityClient::new(&base, None).unwrap();

    let updated: Notification =
        RemoteCollection::<Notification>::update(&client, "n1", Notification::mark_read_fields())
            .await
            .unwrap();
    assert!(updated.read);

    let busy = RemoteCollection::<Notification>::update(
        &client,
        "busy",
        Notification::mark_read_fields(),
    )
    .await;
    assert_eq!(busy.unwrap_err(), RemoteError::RateLimited);

    let locked = RemoteCollection::<Notification>::update(
        &client,
        "locked",
        Notification::mark_read_fields(),
    )
    .await;
    assert!(locked.unwrap_err().is_permanent());

    let missing = RemoteCollection::<Notification>::update(
        &client,
        "missing",
        Notification::mark_read_fields(),
    )
    .await;
    assert!(matches!(missing, Err(RemoteError::NotFound(_))));
}
