use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use super::service::CutoutOutcome;
use super::types::{RemoveBackgroundBody, RemoveBackgroundQuery};
use crate::error::{AppError, ErrorBody};
use crate::state::AppState;

/// 结果来源：HIT | MISS
pub const X_CACHE: &str = "x-cache";
/// 本次请求对应的缓存键
pub const X_CACHE_KEY: &str = "x-cache-key";

const RESULT_DISPOSITION: &str = "inline; filename=\"transparent-image.png\"";

#[utoipa::path(
    get,
    path = "/remove-background",
    summary = "去除图片背景",
    description = "下载 `image` 指向的图片并去除背景，返回透明 PNG。相同 URL + 参数的结果会缓存到磁盘，再次请求直接返回缓存（`X-Cache: HIT`）。",
    params(RemoveBackgroundQuery),
    responses(
        (status = 200, description = "透明背景 PNG", content_type = "image/png",
            headers(
                ("X-Cache" = String, description = "HIT | MISS"),
                ("X-Cache-Key" = String, description = "缓存键")
            )
        ),
        (status = 400, description = "缺少参数或源图下载失败", body = ErrorBody),
        (status = 500, description = "抠图或内部错误", body = ErrorBody)
    ),
    tag = "Cutout"
)]
pub async fn remove_background_get(
    State(state): State<AppState>,
    query: Result<Query<RemoveBackgroundQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(q) = query.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let req = q.into_request(&state.defaults)?;
    let outcome = state.cutout.remove_background(req).await?;
    Ok(png_response(outcome))
}

#[utoipa::path(
    post,
    path = "/remove-background",
    summary = "去除图片背景（JSON 请求体）",
    description = "与 GET 版本语义一致，参数改由 JSON 请求体传入；`image_url` 也接受别名 `image`。",
    request_body = RemoveBackgroundBody,
    responses(
        (status = 200, description = "透明背景 PNG", content_type = "image/png",
            headers(
                ("X-Cache" = String, description = "HIT | MISS"),
                ("X-Cache-Key" = String, description = "缓存键")
            )
        ),
        (status = 400, description = "请求体非法、缺少参数或源图下载失败", body = ErrorBody),
        (status = 500, description = "抠图或内部错误", body = ErrorBody)
    ),
    tag = "Cutout"
)]
pub async fn remove_background_post(
    State(state): State<AppState>,
    body: Result<Json<RemoveBackgroundBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let req = body.into_request(&state.defaults)?;
    let outcome = state.cutout.remove_background(req).await?;
    Ok(png_response(outcome))
}

fn png_response(outcome: CutoutOutcome) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(RESULT_DISPOSITION),
    );
    headers.insert(X_CACHE, HeaderValue::from_static(outcome.cache.as_str()));
    // 键只含 ASCII 字母数字与 `_-.`，理论上总能转换
    if let Ok(v) = HeaderValue::from_str(&outcome.key) {
        headers.insert(X_CACHE_KEY, v);
    }
    (StatusCode::OK, headers, outcome.bytes).into_response()
}

pub fn create_cutout_router() -> Router<AppState> {
    Router::new().route(
        "/remove-background",
        get(remove_background_get).post(remove_background_post),
    )
}
