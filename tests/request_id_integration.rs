use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    routing::get,
};
use tower::ServiceExt;

async fn ok_handler() -> &'static str {
    "ok"
}

async fn fail_handler() -> Result<&'static str, cutout_backend::AppError> {
    Err(cutout_backend::AppError::InvalidRequest(
        "Missing image parameter".into(),
    ))
}

async fn boom_handler() -> Result<&'static str, cutout_backend::AppError> {
    Err(cutout_backend::AppError::Internal(
        "disk full at /var/cache".into(),
    ))
}

fn build_app() -> Router {
    Router::new()
        .route("/ok", get(ok_handler))
        .route("/fail", get(fail_handler))
        .route("/boom", get(boom_handler))
        .layer(axum::middleware::from_fn(
            cutout_backend::request_id::request_id_middleware,
        ))
}

fn request_id_of(resp: &axum::response::Response) -> String {
    resp.headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[tokio::test]
async fn request_id_is_generated_when_missing() {
    let resp = build_app()
        .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
        .await
        .expect("request /ok");

    assert_eq!(resp.status(), StatusCode::OK);
    let request_id = request_id_of(&resp);
    assert!(request_id.starts_with("req_"), "got {request_id}");
}

#[tokio::test]
async fn request_id_uses_client_value_when_valid() {
    let resp = build_app()
        .oneshot(
            Request::builder()
                .uri("/ok")
                .header("x-request-id", "client.req-001")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request /ok");

    assert_eq!(request_id_of(&resp), "client.req-001");
}

#[tokio::test]
async fn invalid_client_request_id_is_replaced() {
    let resp = build_app()
        .oneshot(
            Request::builder()
                .uri("/ok")
                .header("x-request-id", "has spaces/and slashes")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request /ok");

    let request_id = request_id_of(&resp);
    assert!(request_id.starts_with("req_"), "got {request_id}");
}

#[tokio::test]
async fn error_body_contains_request_id() {
    let resp = build_app()
        .oneshot(
            Request::builder()
                .uri("/fail")
                .header("x-request-id", "err.req-001")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request /fail");

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let request_id_header = request_id_of(&resp);

    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("parse json");
    assert_eq!(json["requestId"].as_str(), Some(request_id_header.as_str()));
    assert_eq!(json["error"], "Missing image parameter");
}

#[tokio::test]
async fn internal_error_details_are_not_exposed() {
    let resp = build_app()
        .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
        .await
        .expect("request /boom");

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("parse json");
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert!(!json["error"].as_str().unwrap_or_default().contains("/var/cache"));
}
