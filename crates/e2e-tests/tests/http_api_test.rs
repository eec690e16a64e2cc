//! HTTP upload -> worker -> status E2E tests.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

use e2e_tests::{csv_of, csv_row, TestHarness};
use pharma_service::{router, ApiState};

const BOUNDARY: &str = "e2e-boundary";

fn upload_request(uri: &str, content: &str) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"stock.csv\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
    body.extend_from_slice(content.as_bytes());
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_upload_over_http_reaches_index() {
    let harness = TestHarness::new();
    let app = router(ApiState::new(
        harness.orchestrator.clone(),
        harness.backend.clone(),
    ));
    let csv = csv_of(&[
        csv_row("Аспирин ТАБЛ. 500мг", "AB-1", "31.12.2027"),
        csv_row("Нурофен капс. 200мг", "NF-2", "01.06.2027"),
    ]);

    let response = app
        .clone()
        .oneshot(upload_request("/api/upload/novamedika/12", &csv))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = json_body(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/status/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(json_body(status).await["status"], "pending");

    harness.worker.run_once().await.unwrap();
    harness.dispatcher.dispatch_pending().await.unwrap();

    let status = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/status/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let body = json_body(status).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["created"], 2);
    assert_eq!(body["result"]["errors"], 0);

    assert_eq!(harness.indexed_ids().await, harness.stored_ids("Новамедика", "12"));

    let health = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(health).await["search_backend"], true);
}
