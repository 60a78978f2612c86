use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{Request, StatusCode, header},
    routing,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use cutout_backend::config::{AppConfig, FetchConfig, RemoverConfig};
use cutout_backend::features::cutout::{
    CutoutService, DiskStore, HttpFetcher, KeyPolicy, RequestDefaults, ServiceOptions,
    build_remover,
};
use cutout_backend::state::AppState;

/// 白底 + 中间红色方块
fn studio_shot() -> Bytes {
    let img = RgbImage::from_fn(64, 48, |x, y| {
        if (16..48).contains(&x) && (12..36).contains(&y) {
            Rgb([220, 20, 20])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg)
        .expect("encode jpeg");
    Bytes::from(buf.into_inner())
}

async fn start_image_server() -> std::net::SocketAddr {
    let shot = studio_shot();
    let app = Router::new()
        .route(
            "/product.jpg",
            routing::get(move || {
                let shot = shot.clone();
                async move { ([(header::CONTENT_TYPE, "image/jpeg")], shot) }
            }),
        )
        .route(
            "/gone.jpg",
            routing::get(|| async { (StatusCode::NOT_FOUND, "not here") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind tcp listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn build_test_app(cache_dir: &std::path::Path) -> Router {
    let fetcher = HttpFetcher::new(&FetchConfig {
        timeout_secs: 5,
        ..FetchConfig::default()
    })
    .expect("build fetcher");
    let remover = build_remover(&RemoverConfig::default()).expect("border key remover");
    let service = CutoutService::new(
        KeyPolicy::ContentHash,
        DiskStore::new(cache_dir),
        Arc::new(fetcher),
        remover,
        ServiceOptions {
            max_parallel: 2,
            remover_timeout: Duration::from_secs(30),
            single_flight: None,
        },
    );
    let state = AppState::new(
        Arc::new(service),
        RequestDefaults {
            model: "border-key".to_string(),
            max_dimension: None,
        },
    );
    cutout_backend::build_app(state, &AppConfig::default())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("call app");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, headers, body)
}

#[tokio::test]
async fn studio_background_is_removed_over_real_http() {
    let addr = start_image_server().await;
    let cache_dir = std::env::temp_dir().join(format!("cutout-e2e-{}", uuid::Uuid::new_v4()));
    let app = build_test_app(&cache_dir);

    let uri = format!("/remove-background?image=http://{addr}/product.jpg");
    let (status, headers, body) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-cache").unwrap(), "MISS");

    let out = image::load_from_memory_with_format(&body, ImageFormat::Png)
        .expect("decode png")
        .to_rgba8();
    assert_eq!(out.dimensions(), (64, 48));
    assert_eq!(out.get_pixel(0, 0).0[3], 0, "corner should be transparent");
    assert_eq!(out.get_pixel(32, 24).0[3], 255, "subject should be opaque");

    let (status, headers, again) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-cache").unwrap(), "HIT");
    assert_eq!(body, again);

    let _ = std::fs::remove_dir_all(&cache_dir);
}

#[tokio::test]
async fn upstream_not_found_maps_to_400() {
    let addr = start_image_server().await;
    let cache_dir = std::env::temp_dir().join(format!("cutout-e2e-{}", uuid::Uuid::new_v4()));
    let app = build_test_app(&cache_dir);

    let (status, _, body) = get(
        &app,
        &format!("/remove-background?image=http://{addr}/gone.jpg"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: serde_json::Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(
        v["error"],
        "Failed to download image, status code: 404"
    );
    assert!(!cache_dir.exists());
}
