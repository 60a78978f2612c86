use std::sync::Arc;

use crate::features::cutout::{CutoutService, RequestDefaults};

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 去背景编排服务（持有缓存、下载器与抠图后端）
    pub cutout: Arc<CutoutService>,
    /// 请求未指定参数时的默认值
    pub defaults: Arc<RequestDefaults>,
}

impl AppState {
    pub fn new(cutout: Arc<CutoutService>, defaults: RequestDefaults) -> Self {
        Self {
            cutout,
            defaults: Arc::new(defaults),
        }
    }
}
