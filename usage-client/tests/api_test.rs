use std::{collections::HashMap, net::SocketAddr, time::Duration};

use axum::{
    extract::{Form, Path, Query},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use time::macros::datetime;
use usage_client::api::{decode_payload, ApiError, ApiSettings, SmartHubClient, TimeRange};

const TOKEN: &str = "tok-123";

async fn auth(Form(form): Form<HashMap<String, String>>) -> Result<Json<serde_json::Value>, StatusCode> {
    match (form.get("userId"), form.get("password")) {
        (Some(user), Some(pass)) if user == "user@example.com" && pass == "secret" => {
            Ok(Json(json!({ "authorizationToken": TOKEN })))
        }
        (Some(user), _) if user == "no-token@example.com" => Ok(Json(json!({ "status": "ok" }))),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn readings(
    Path((location, account)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bearer != format!("Bearer {TOKEN}") {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if headers.get("x-nisc-smarthub-username").is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if location != "2002" || account != "1001" {
        return Err(StatusCode::NOT_FOUND);
    }
    if query.get("timeFrame").map(String::as_str) != Some("HOURLY")
        || query.get("applicationName").map(String::as_str) != Some("CONSUMER")
        || query.get("graphUnitOfMeasure").map(String::as_str) != Some("KWH")
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    let start: i64 = query
        .get("startDateTime")
        .and_then(|s| s.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    Ok(Json(json!([
        {
            "meterLocation": "2002",
            "readings": [{
                "meterId": "M-1",
                "channel": "1",
                "reads": [{
                    "interval": { "start": start },
                    "metrics": { "total": 1.25, "minimum": 0.1, "maximum": 0.6 }
                }]
            }]
        }
    ])))
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/services/oauth/auth/v2", post(auth))
        .route("/services/secured/readings/graph/:location/:account", get(readings));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn settings(addr: SocketAddr, username: &str, password: &str) -> ApiSettings {
    ApiSettings {
        base_url: format!("http://{addr}"),
        username: username.to_string(),
        password: password.to_string(),
        account: "1001".to_string(),
        service_location: "2002".to_string(),
        interval: "HOURLY".to_string(),
        accept_invalid_certs: false,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn authenticates_and_fetches_readings() {
    let addr = spawn_upstream().await;
    let client = SmartHubClient::new(settings(addr, "user@example.com", "secret")).unwrap();

    let token = client.authenticate().await.unwrap();
    assert_eq!(token, TOKEN);

    let range = TimeRange::lookback(2, datetime!(2024-01-02 12:00:00 UTC));
    let body = client.fetch_readings(&range, &token).await.unwrap();
    let payload = decode_payload(&body).unwrap();

    assert_eq!(payload.len(), 1);
    let read = &payload[0].readings[0].reads[0];
    assert_eq!(read.start_millis(), Some(range.start_millis()));
    assert_eq!(read.metrics.as_ref().and_then(|m| m.total), Some(1.25));
}

#[tokio::test]
async fn rejected_credentials_are_auth_errors() {
    let addr = spawn_upstream().await;
    let client = SmartHubClient::new(settings(addr, "user@example.com", "wrong")).unwrap();

    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, ApiError::Auth(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn missing_token_in_auth_response_is_an_auth_error() {
    let addr = spawn_upstream().await;
    let client = SmartHubClient::new(settings(addr, "no-token@example.com", "x")).unwrap();

    let err = client.authenticate().await.unwrap_err();
    assert!(err.to_string().contains("did not include auth token"));
}

#[tokio::test]
async fn fetch_with_bad_token_is_a_fetch_error() {
    let addr = spawn_upstream().await;
    let client = SmartHubClient::new(settings(addr, "user@example.com", "secret")).unwrap();

    let range = TimeRange::lookback(1, datetime!(2024-01-02 12:00:00 UTC));
    let err = client.fetch_readings(&range, "stale").await.unwrap_err();
    assert!(matches!(err, ApiError::Fetch(_)));
}

#[tokio::test]
async fn unreachable_upstream_is_an_auth_error() {
    // Bind then drop so nothing listens on the port.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = SmartHubClient::new(settings(addr, "user@example.com", "secret")).unwrap();
    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, ApiError::Auth(_)));
}
