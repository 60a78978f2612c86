use cutout_backend::config::{AppConfig, LoggingConfig};
use cutout_backend::features::cutout::{
    CutoutService, DiskStore, HttpFetcher, RequestDefaults, ServiceOptions, build_remover,
};
use cutout_backend::startup::run_startup_checks;
use cutout_backend::state::AppState;
use cutout_backend::{ShutdownManager, build_app};
use std::future::IntoFuture;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 初始化日志：`RUST_LOG` 优先，其次使用配置中的过滤表达式
fn init_tracing(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cfg.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    // 配置决定日志格式，因此先加载配置；失败时用默认日志输出错误
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            tracing::error!("Config init failed: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);
    tracing::info!("配置文件: {:?}（不存在时使用默认值）", AppConfig::config_path());
    tracing::debug!(
        "配置加载完成: cache.dir = {}, key_policy = {:?}, remover = {:?}",
        config.cache.dir,
        config.cache.key_policy,
        config.remover.kind
    );

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let fetcher = match HttpFetcher::new(&config.fetch) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            tracing::error!("HTTP client init failed: {}", e);
            std::process::exit(1);
        }
    };
    let remover = match build_remover(&config.remover) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Remover init failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_startup_checks(&config, remover.as_ref()).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let options = ServiceOptions::from_config(&config);
    tracing::info!(
        "去背景服务: key_policy={:?}, remover={}, max_parallel={}, single_flight={}",
        config.cache.key_policy,
        remover.name(),
        options.max_parallel,
        options.single_flight.is_some()
    );
    let service = CutoutService::new(
        config.cache.key_policy,
        DiskStore::new(config.cache.dir_path()),
        fetcher,
        remover,
        options,
    );
    let defaults = RequestDefaults {
        model: config.remover.model.clone(),
        max_dimension: config.processing.default_max_dimension,
    };
    let app = build_app(AppState::new(Arc::new(service), defaults), &config);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Cache dir: {:?}", config.cache.dir_path());

    let shutdown_timeout = config.shutdown.timeout_duration();
    let graceful_signal = {
        let manager = shutdown_manager.clone();
        async move {
            let reason = manager.wait_for_shutdown().await;
            tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
        }
    };
    // 进行中的请求在超时内排空；超时后直接退出，未完成的缓存写入只会留下临时文件
    let force_deadline = {
        let manager = shutdown_manager.clone();
        async move {
            manager.wait_for_shutdown().await;
            tokio::time::sleep(shutdown_timeout).await;
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(graceful_signal)
        .into_future();

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                tracing::error!("服务器运行错误: {}", e);
                std::process::exit(1);
            }
            tracing::info!("服务器已优雅关闭");
        }
        _ = force_deadline => {
            tracing::warn!("优雅退出超时（{}秒），强制退出", config.shutdown.timeout_secs);
        }
    }
}
