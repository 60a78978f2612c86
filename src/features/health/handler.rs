use axum::{Router, http::StatusCode, response::Json, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    #[schema(example = "healthy")]
    pub status: String,
    /// 服务名称
    #[schema(example = "cutout-backend")]
    pub service: String,
    /// 当前版本（Cargo package version）
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// 存活探测响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiStatusResponse {
    #[schema(example = "API is running")]
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "用于探活的健康检查端点，返回服务状态与版本信息。",
    responses((status = 200, description = "服务健康", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/test",
    summary = "存活探测",
    description = "不触发任何下载或抠图，固定返回 `{\"status\":\"API is running\"}`。",
    responses((status = 200, description = "服务运行中", body = ApiStatusResponse)),
    tag = "Health"
)]
pub async fn api_test() -> Json<ApiStatusResponse> {
    Json(ApiStatusResponse {
        status: "API is running".to_string(),
    })
}

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/test", get(api_test))
}
