use utoipa::openapi::server::ServerBuilder;
use utoipa::{Modify, OpenApi};

/// 所有接口都挂在根路径下，Swagger UI 直接对当前 host 发请求。
struct RootServer;

impl Modify for RootServer {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let root = ServerBuilder::new()
            .url("/")
            .description(Some("当前服务实例"))
            .build();
        openapi.servers = Some(vec![root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::cutout::handler::remove_background_get,
        crate::features::cutout::handler::remove_background_post,
        crate::features::health::handler::health_check,
        crate::features::health::handler::api_test,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::features::cutout::types::RemoveBackgroundBody,
        crate::features::health::handler::HealthResponse,
        crate::features::health::handler::ApiStatusResponse,
    )),
    modifiers(&RootServer),
    tags(
        (
            name = "Cutout",
            description = "去背景：按 URL 下载图片、去除背景并返回透明 PNG，结果按 URL + 参数缓存到磁盘。"
        ),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "Cutout Backend API",
        version = env!("CARGO_PKG_VERSION"),
        description = "图片去背景服务 API（Axum + utoipa）。成功响应为 `image/png`，错误响应统一为 JSON `{error, code, status}`。"
    )
)]
pub struct ApiDoc;
