/// 去背景：缓存键、磁盘缓存、下载、抠图与后处理
pub mod cutout;
/// 健康检查与探活
pub mod health;
