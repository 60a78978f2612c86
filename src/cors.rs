//! 浏览器直接调用 `/remove-background` 时的跨域设置。
//!
//! 方法与响应头固定为本服务实际用到的集合，配置只决定允许哪些来源。

use axum::http::{HeaderName, HeaderValue, Method, header};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::features::cutout::handler::{X_CACHE, X_CACHE_KEY};
use crate::request_id::REQUEST_ID_HEADER;

/// 根据配置构建 CORS 中间件；未启用或没有有效来源时返回 `None`
pub fn build_cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    if !cors.enabled {
        return None;
    }
    let Some(origin) = allow_origin(&cors.allowed_origins) else {
        tracing::warn!("CORS 已启用但 allowed_origins 中没有有效来源，已跳过启用");
        return None;
    };

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, request_id.clone()])
        .expose_headers([
            HeaderName::from_static(X_CACHE),
            HeaderName::from_static(X_CACHE_KEY),
            request_id,
        ]);
    if cors.max_age_secs > 0 {
        layer = layer.max_age(Duration::from_secs(cors.max_age_secs));
    }
    Some(layer)
}

/// `"*"` 表示任意来源；其余条目逐个解析，无效值告警后跳过
fn allow_origin(values: &[String]) -> Option<AllowOrigin> {
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if values.contains(&"*") {
        return Some(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = values
        .into_iter()
        .filter_map(|v| match HeaderValue::from_str(v) {
            Ok(h) => Some(h),
            Err(_) => {
                tracing::warn!("CORS allowed_origins 含无效值: {}", v);
                None
            }
        })
        .collect();
    (!origins.is_empty()).then(|| AllowOrigin::list(origins))
}
