use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::Client;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// 源图下载能力
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// 下载 `url` 的原始字节；非 2xx、超时、连接失败均为错误
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// 基于 reqwest 的下载实现
pub struct HttpFetcher {
    client: Client,
    /// 0 = 不限制
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: crate::http::fetch_client(cfg)?,
            max_bytes: cfg.max_bytes,
        })
    }

    fn over_limit(&self, len: u64) -> bool {
        self.max_bytes > 0 && len > self.max_bytes
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if let Some(len) = resp.content_length()
            && self.over_limit(len)
        {
            return Err(FetchError::TooLarge(self.max_bytes));
        }

        // 分块读取，边读边检查上限（content-length 可能缺失或不可信）
        let mut buf = Vec::with_capacity(resp.content_length().unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = resp.chunk().await? {
            buf.extend_from_slice(&chunk);
            if self.over_limit(buf.len() as u64) {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
        }
        tracing::debug!(url, bytes = buf.len(), "源图下载完成");
        Ok(Bytes::from(buf))
    }
}
