use reqwest::Client;
use std::time::Duration;

use crate::config::FetchConfig;

/// 源图下载用的 HTTP Client（统一连接池/Keep-Alive），进程启动时创建一次后注入。
///
/// 说明：
/// - 超时覆盖 connect + 读取全过程，超时后映射为上游错误，不会挂起请求；
/// - 部分图床会拒绝非浏览器 UA，这里统一设置。
pub fn fetch_client(cfg: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(cfg.timeout_duration())
        .connect_timeout(cfg.timeout_duration())
        .user_agent(cfg.user_agent.clone())
        .build()
}

/// 调用外部分割模型服务的 HTTP Client（推理耗时较长，超时单独配置）。
pub fn remover_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}
