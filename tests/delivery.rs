//! Delivery client against a local endpoint.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::Endpoint;
use permitsync::delivery::{DeliveryClient, DeliveryConfig, DeliveryError};
use permitsync::models::{RunBatch, RunMetadata};
use permitsync::scrapers::parse_record;

fn batch() -> RunBatch {
    RunBatch::from(vec![
        parse_record(
            "12 Oak Ave00042|301|Approved|BP-24-301|a|b|SYS-301|c|2024-02-14|Unit 4",
            "Active",
        )
        .unwrap(),
        parse_record(
            "9 Elm Rd00007|302|Issued| |a|b|SYS-302|c|2024-02-15|",
            "Active",
        )
        .unwrap(),
    ])
}

fn client(endpoint: &str, configure: impl FnOnce(&mut DeliveryConfig)) -> DeliveryClient {
    let mut config = DeliveryConfig::new(endpoint);
    config.timeout = Duration::from_secs(5);
    configure(&mut config);
    DeliveryClient::new(config).unwrap()
}

#[tokio::test]
async fn test_accepted_delivery_returns_body() {
    let endpoint = Endpoint::ok().await;
    let client = client(&endpoint.url, |_| {});

    let outcome = client.deliver(&batch(), &RunMetadata::default()).await;

    assert!(outcome.success);
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.body.as_deref(), Some(r#"{"accepted":true}"#));

    let received = endpoint.received().await;
    assert_eq!(received.len(), 1);
    let payload = &received[0].body;
    assert_eq!(payload["TotalProjects"], 2);
    assert!(payload["UserEmail"].is_null());
    assert!(payload["SourceUrl"].is_null());
    assert!(payload["Projects"][1]["ApplicationNumber"].is_null());
    assert_eq!(payload["Projects"][1]["Unit"], "");
}

#[tokio::test]
async fn test_delivery_user_agent() {
    let endpoint = Endpoint::ok().await;
    let user_agent = |captured: &common::Captured| {
        captured
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let default_client = client(&endpoint.url, |_| {});
    assert!(default_client.deliver(&batch(), &RunMetadata::default()).await.success);

    let custom_client = client(&endpoint.url, |config| {
        config.user_agent = Some("permit-relay/3".to_string());
    });
    assert!(custom_client.deliver(&batch(), &RunMetadata::default()).await.success);

    let received = endpoint.received().await;
    assert!(user_agent(&received[0]).unwrap().starts_with("permitsync/"));
    assert_eq!(user_agent(&received[1]).as_deref(), Some("permit-relay/3"));
}

#[tokio::test]
async fn test_server_error_body_is_returned_verbatim() {
    let reply = "upstream database unavailable\n";
    let endpoint = Endpoint::start(StatusCode::INTERNAL_SERVER_ERROR, reply).await;
    let client = client(&endpoint.url, |_| {});

    let outcome = client.deliver(&batch(), &RunMetadata::default()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, Some(500));
    assert_eq!(outcome.body.as_deref(), Some(reply));

    match client.try_deliver(&batch(), &RunMetadata::default()).await {
        Err(DeliveryError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, reply);
        }
        other => panic!("expected Status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_message() {
    let client = client("http://127.0.0.1:1/ingest", |_| {});

    let outcome = client.deliver(&batch(), &RunMetadata::default()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, None);
    let message = outcome.body.unwrap();
    assert!(!message.is_empty());

    assert!(matches!(
        client.try_deliver(&batch(), &RunMetadata::default()).await,
        Err(DeliveryError::Network(_))
    ));
}

#[tokio::test]
async fn test_slow_endpoint_times_out_as_failure() {
    let endpoint = Endpoint::slow(Duration::from_secs(3)).await;
    let client = client(&endpoint.url, |config| {
        config.timeout = Duration::from_millis(200);
    });

    let outcome = client.deliver(&batch(), &RunMetadata::default()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, None);
    let message = outcome.body.unwrap();
    assert!(message.contains("timed out"), "unexpected message {:?}", message);
}

#[tokio::test]
async fn test_bare_array_and_extra_headers() {
    let endpoint = Endpoint::ok().await;
    let client = client(&endpoint.url, |config| {
        config.include_metadata = false;
        config
            .headers
            .insert("X-Source".to_string(), "permit-sync".to_string());
    });

    let outcome = client.deliver(&batch(), &RunMetadata::default()).await;
    assert!(outcome.success);

    let received = endpoint.received().await;
    let request = &received[0];
    assert!(request.authorization.is_none());
    assert_eq!(
        request.headers.get("x-source").and_then(|v| v.to_str().ok()),
        Some("permit-sync")
    );
    let projects = request.body.as_array().unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0]["ReferenceId"], 301);
    assert_eq!(projects[0]["Address"], "12 Oak Ave");
}

#[tokio::test]
async fn test_metadata_is_carried_in_payload() {
    let endpoint = Endpoint::ok().await;
    let client = client(&endpoint.url, |_| {});
    let metadata = RunMetadata::new(
        Some("inspector@example.gov".to_string()),
        Some("https://permits.example.gov/dashboard".to_string()),
    );

    let outcome = client.deliver(&RunBatch::new(), &metadata).await;
    assert!(outcome.success);

    let payload = &endpoint.received().await[0].body;
    assert_eq!(payload["UserEmail"], "inspector@example.gov");
    assert_eq!(payload["SourceUrl"], "https://permits.example.gov/dashboard");
    assert_eq!(payload["TotalProjects"], 0);
}

#[tokio::test]
async fn test_http_client_form_and_multipart_bodies() {
    use permitsync::delivery::http::MultipartField;
    use permitsync::delivery::{HttpClient, HttpOptions, HttpRequest, RequestBody};

    let endpoint = Endpoint::ok().await;
    let http = HttpClient::new(&HttpOptions::default()).unwrap();

    let form = HttpRequest::post(&endpoint.url).with_body(RequestBody::Form(vec![
        ("status".to_string(), "Under Review".to_string()),
        ("id".to_string(), "301".to_string()),
    ]));
    let response = http.send(form).await.unwrap();
    assert!(response.is_success());

    let multipart = HttpRequest::post(&endpoint.url)
        .with_header("X-Batch", "7")
        .with_timeout(Duration::from_secs(5))
        .with_body(RequestBody::Multipart(vec![
            MultipartField::Text {
                name: "note".to_string(),
                value: "nightly".to_string(),
            },
            MultipartField::File {
                name: "batch".to_string(),
                filename: "batch.json".to_string(),
                mime: "application/json".to_string(),
                bytes: b"[]".to_vec(),
            },
        ]));
    let response = http.send(multipart).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body, r#"{"accepted":true}"#);

    let received = endpoint.received().await;
    assert_eq!(received.len(), 2);

    assert_eq!(
        received[0].content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(received[0].raw, "status=Under+Review&id=301");
    assert!(received[0].headers.get("user-agent").is_some());

    let multipart = &received[1];
    assert!(multipart
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));
    assert_eq!(
        multipart.headers.get("x-batch").and_then(|v| v.to_str().ok()),
        Some("7")
    );
    assert!(multipart.raw.contains("name=\"note\""));
    assert!(multipart.raw.contains("nightly"));
    assert!(multipart.raw.contains("filename=\"batch.json\""));
}
