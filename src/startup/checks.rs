use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::cutout::BackgroundRemover;
use std::path::Path;

/// 执行启动检查
///
/// 1. 检查缓存目录状态（不主动创建，首次写入时再建）
/// 2. 预热抠图后端（失败仅告警，不阻断启动）
pub async fn run_startup_checks(
    config: &AppConfig,
    remover: &dyn BackgroundRemover,
) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    check_cache_dir(&config.cache.dir_path()).await?;

    let t_warm = std::time::Instant::now();
    match remover.warm_up().await {
        Ok(()) => tracing::info!(
            "✅ 抠图后端就绪: {} ({}ms)",
            remover.name(),
            t_warm.elapsed().as_millis()
        ),
        Err(e) => tracing::warn!("⚠️ 抠图后端预热失败（将继续运行）: {}: {}", remover.name(), e),
    }

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 缓存路径若已存在必须是目录
async fn check_cache_dir(path: &Path) -> Result<(), AppError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            tracing::info!("✅ 缓存目录已存在: {:?}", path);
            Ok(())
        }
        Ok(_) => Err(AppError::Internal(format!(
            "缓存路径已存在但不是目录: {}",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("📁 缓存目录尚不存在，将在首次写入时创建: {:?}", path);
            Ok(())
        }
        Err(e) => Err(AppError::Internal(format!(
            "读取缓存目录状态失败 {}: {e}",
            path.display()
        ))),
    }
}
