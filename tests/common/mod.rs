//! Shared fixtures: a local delivery endpoint and dashboard pages.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::sync::Mutex;

/// A request the endpoint received.
#[derive(Debug, Clone)]
pub struct Captured {
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub headers: HeaderMap,
    /// Body parsed as JSON, `Null` when it is not JSON.
    pub body: serde_json::Value,
    pub raw: String,
}

#[derive(Clone)]
struct EndpointState {
    received: Arc<Mutex<Vec<Captured>>>,
    status: StatusCode,
    reply: String,
    delay: Option<Duration>,
}

/// Local stand-in for the delivery endpoint.
pub struct Endpoint {
    pub url: String,
    received: Arc<Mutex<Vec<Captured>>>,
}

impl Endpoint {
    /// Serve `POST /ingest`, answering every request with `status` and `reply`.
    pub async fn start(status: StatusCode, reply: &str) -> Self {
        Self::serve(status, reply, None).await
    }

    /// Answer 200, but only after `delay`.
    pub async fn slow(delay: Duration) -> Self {
        Self::serve(StatusCode::OK, r#"{"accepted":true}"#, Some(delay)).await
    }

    async fn serve(status: StatusCode, reply: &str, delay: Option<Duration>) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = EndpointState {
            received: received.clone(),
            status,
            reply: reply.to_string(),
            delay,
        };
        let app = Router::new()
            .route("/ingest", post(ingest))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test endpoint");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            url: format!("http://{}/ingest", addr),
            received,
        }
    }

    pub async fn ok() -> Self {
        Self::start(StatusCode::OK, r#"{"accepted":true}"#).await
    }

    pub async fn received(&self) -> Vec<Captured> {
        self.received.lock().await.clone()
    }
}

async fn ingest(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let captured = Captured {
        content_type: header("content-type"),
        authorization: header("authorization"),
        body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        raw: body,
        headers: headers.clone(),
    };
    state.received.lock().await.push(captured);
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    (state.status, state.reply.clone())
}

pub const USERNAME_PAGE: &str = r#"<html><body><form>
    <input type="email" name="username">
    <button type="button">Cancel</button>
    <button type="submit">Next</button>
</form></body></html>"#;

pub const PASSWORD_PAGE: &str = r#"<html><body><form>
    <input type="password" name="password">
    <button type="submit">Sign in</button>
</form></body></html>"#;

/// A flattened dashboard row for reference id `id`.
pub fn row(id: u32) -> String {
    format!(
        "{id} Main St1234{d}|{id}|Under Review|BP-24-{id:03}|x|y|SYS-{id}|z|2024-03-{day:02}|Unit {id}",
        id = id,
        d = id % 10,
        day = id % 28 + 1,
    )
}

/// Dashboard page with the logged-in marker and one row per entry.
pub fn dashboard(rows: &[String]) -> String {
    let body: String = rows
        .iter()
        .map(|r| format!("  <div class=\"project-row\">{}</div>\n", r))
        .collect();
    format!(
        "<html><body><div class=\"dashboard\">\n{}</div></body></html>",
        body
    )
}
