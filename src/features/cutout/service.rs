use axum::body::Bytes;
use moka::future::Cache;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::fetcher::Fetcher;
use super::key::KeyPolicy;
use super::postprocess;
use super::remover::{self, BackgroundRemover};
use super::store::DiskStore;
use super::types::CutoutRequest;
use crate::config::AppConfig;
use crate::error::{AppError, StoreError};

/// 本次响应的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// 直接使用了已有结果（磁盘条目或同键并发请求的结果）
    Hit,
    /// 本次请求完成了下载 + 抠图
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// 编排结果：响应字节（已后处理）+ 缓存状态 + 缓存键
#[derive(Debug, Clone)]
pub struct CutoutOutcome {
    pub bytes: Bytes,
    pub cache: CacheStatus,
    pub key: String,
}

/// 编排层可调参数
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// 并发处理许可数（CPU 密集阶段）
    pub max_parallel: usize,
    /// 单次抠图超时
    pub remover_timeout: Duration,
    /// 进程内同键合并 + 内存热缓存；`None` 表示关闭（与多进程部署时的默认行为一致）
    pub single_flight: Option<HotCacheOptions>,
}

#[derive(Debug, Clone)]
pub struct HotCacheOptions {
    pub max_bytes: u64,
    pub ttl: Duration,
}

impl ServiceOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_parallel: cfg.processing.effective_parallelism(),
            remover_timeout: cfg.remover.timeout_duration(),
            single_flight: cfg.cache.single_flight.then(|| HotCacheOptions {
                max_bytes: cfg.cache.memory_max_bytes,
                ttl: Duration::from_secs(cfg.cache.memory_ttl_secs.max(1)),
            }),
        }
    }
}

/// 去背景请求编排：键派生 → 磁盘缓存 → [下载 → 抠图 → 写缓存] → 后处理。
///
/// 默认不做同键合并：同一键的并发未命中会各自计算，后写者覆盖磁盘条目。
/// 开启 `single_flight` 后，同一进程内的并发未命中只计算一次；跨进程仍无协调。
pub struct CutoutService {
    policy: KeyPolicy,
    store: DiskStore,
    fetcher: Arc<dyn Fetcher>,
    remover: Arc<dyn BackgroundRemover>,
    permits: Arc<Semaphore>,
    remover_timeout: Duration,
    hot: Option<Cache<String, Bytes>>,
}

impl CutoutService {
    pub fn new(
        policy: KeyPolicy,
        store: DiskStore,
        fetcher: Arc<dyn Fetcher>,
        remover: Arc<dyn BackgroundRemover>,
        options: ServiceOptions,
    ) -> Self {
        let hot = options.single_flight.map(|h| {
            Cache::builder()
                .weigher(|_k, v: &Bytes| v.len().try_into().unwrap_or(u32::MAX))
                .max_capacity(h.max_bytes)
                .time_to_live(h.ttl)
                .build()
        });
        Self {
            policy,
            store,
            fetcher,
            remover,
            permits: Arc::new(Semaphore::new(options.max_parallel.max(1))),
            remover_timeout: options.remover_timeout,
            hot,
        }
    }

    /// 处理一次去背景请求
    pub async fn remove_background(&self, req: CutoutRequest) -> Result<CutoutOutcome, AppError> {
        let t_total = Instant::now();
        let key = self.policy.derive(&req.url, &req.params.cache_params());

        let result = self.canonical_bytes(&key, &req).await;
        let (canonical, cache) = match result {
            Ok(v) => v,
            Err(e) => {
                if e.status_code().is_server_error() {
                    tracing::error!(url = %req.url, key = %key, "去背景失败: {}", e);
                } else {
                    tracing::warn!(url = %req.url, key = %key, "去背景请求被拒绝: {}", e);
                }
                return Err(e);
            }
        };

        let bytes = match req.max_dimension {
            Some(max) => tokio::task::spawn_blocking(move || {
                postprocess::process_encoded(canonical, Some(max))
            })
            .await
            .map_err(|e| {
                tracing::error!(url = %req.url, "后处理任务执行失败: {}", e);
                AppError::from(e)
            })?,
            None => canonical,
        };

        tracing::info!(
            url = %req.url,
            key = %key,
            cache = cache.as_str(),
            bytes = bytes.len(),
            total_ms = t_total.elapsed().as_millis() as u64,
            "去背景完成"
        );
        Ok(CutoutOutcome { bytes, cache, key })
    }

    /// 未缩放的规范结果（磁盘缓存中存放的就是它）
    async fn canonical_bytes(
        &self,
        key: &str,
        req: &CutoutRequest,
    ) -> Result<(Bytes, CacheStatus), AppError> {
        let Some(hot) = self.hot.as_ref() else {
            return self.load_or_compute(key, req).await;
        };

        // 只有真正执行了初始化的那个请求会写入状态；合并等待者与内存命中均视为 HIT
        let status = OnceLock::new();
        let bytes = hot
            .try_get_with(key.to_string(), async {
                let (bytes, s) = self.load_or_compute(key, req).await?;
                let _ = status.set(s);
                Ok::<_, AppError>(bytes)
            })
            .await
            .map_err(|e| (*e).clone())?;
        Ok((bytes, status.get().copied().unwrap_or(CacheStatus::Hit)))
    }

    async fn load_or_compute(
        &self,
        key: &str,
        req: &CutoutRequest,
    ) -> Result<(Bytes, CacheStatus), AppError> {
        if self.store.exists(key).await? {
            match self.store.read(key).await {
                Ok(bytes) if postprocess::peek_dimensions(&bytes).is_some() => {
                    tracing::debug!(key, "磁盘缓存命中");
                    return Ok((bytes, CacheStatus::Hit));
                }
                Ok(_) => tracing::warn!(key, "缓存条目无法识别为图片，重新计算并覆盖"),
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!(key, "缓存条目在检查与读取之间消失，按未命中处理")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let bytes = self.compute(req).await?;
        // 写缓存失败不影响本次响应：结果本身有效，下次请求会重新计算
        if let Err(e) = self.store.write(key, bytes.clone()).await {
            tracing::warn!(key, "写入磁盘缓存失败: {}", e);
        }
        Ok((bytes, CacheStatus::Miss))
    }

    /// 下载 → 解码 → 抠图 → 合成 → PNG 编码
    async fn compute(&self, req: &CutoutRequest) -> Result<Bytes, AppError> {
        let t_fetch = Instant::now();
        let raw = self.fetcher.fetch(&req.url).await?;
        let fetch_ms = t_fetch.elapsed().as_millis() as u64;

        // 下载不占用许可，只限制 CPU 密集阶段的并发
        let t_wait = Instant::now();
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(format!("获取处理信号量失败: {e}")))?;
        let wait_ms = t_wait.elapsed().as_millis() as u64;

        let t_process = Instant::now();
        let rgb = tokio::task::spawn_blocking(move || image::load_from_memory(&raw))
            .await?
            .map_err(|e| AppError::UpstreamFetch {
                status: None,
                message: format!("Downloaded content is not a valid image: {e}"),
            })?
            .to_rgb8();
        let rgb = Arc::new(rgb);

        let output = tokio::time::timeout(
            self.remover_timeout,
            self.remover.remove(rgb.clone(), &req.params),
        )
        .await
        .map_err(|_| {
            AppError::Processing(format!(
                "抠图超时（{}ms，remover={}）",
                self.remover_timeout.as_millis(),
                self.remover.name()
            ))
        })??;

        let bytes = tokio::task::spawn_blocking(move || {
            let rgba = remover::compose(&rgb, output)?;
            postprocess::encode_png(&rgba)
        })
        .await??;

        tracing::info!(
            url = %req.url,
            remover = self.remover.name(),
            fetch_ms,
            wait_ms,
            process_ms = t_process.elapsed().as_millis() as u64,
            "抠图计算完成"
        );
        Ok(bytes)
    }
}
