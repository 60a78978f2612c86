use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::features::cutout::key::KeyPolicy;

/// 配置文件路径的环境变量名（未设置时读取工作目录下的 config.toml）
pub const CONFIG_PATH_ENV: &str = "CUTOUT_CONFIG";

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口（可被 `PORT` 环境变量覆盖）
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        8080
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 默认日志过滤表达式（`RUST_LOG` 优先）
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// 日志格式：full|compact|json
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "cutout_backend=info,tower_http=info".to_string()
    }
    fn default_format() -> String {
        "full".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

/// 磁盘缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 缓存目录（相对路径以工作目录为基准）
    #[serde(default = "CacheConfig::default_dir")]
    pub dir: String,
    /// 缓存键派生策略：content_hash|filename
    #[serde(default)]
    pub key_policy: KeyPolicy,
    /// 是否启用进程内同键合并（single-flight），同时启用内存热缓存
    #[serde(default)]
    pub single_flight: bool,
    /// 内存热缓存容量（字节），按 PNG 字节大小加权
    #[serde(default = "CacheConfig::default_memory_max_bytes")]
    pub memory_max_bytes: u64,
    /// 内存热缓存 TTL（秒）；磁盘条目不受影响
    #[serde(default = "CacheConfig::default_memory_ttl")]
    pub memory_ttl_secs: u64,
}

impl CacheConfig {
    fn default_dir() -> String {
        "image_cache".to_string()
    }
    fn default_memory_max_bytes() -> u64 {
        64 * 1024 * 1024
    }
    fn default_memory_ttl() -> u64 {
        300
    }

    /// 缓存目录路径
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            key_policy: KeyPolicy::default(),
            single_flight: false,
            memory_max_bytes: Self::default_memory_max_bytes(),
            memory_ttl_secs: Self::default_memory_ttl(),
        }
    }
}

/// 源图下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// 下载超时（秒）
    #[serde(default = "FetchConfig::default_timeout")]
    pub timeout_secs: u64,
    /// 下载时使用的 User-Agent（部分图床会拒绝非浏览器 UA）
    #[serde(default = "FetchConfig::default_user_agent")]
    pub user_agent: String,
    /// 源图最大字节数（0=不限制）
    #[serde(default = "FetchConfig::default_max_bytes")]
    pub max_bytes: u64,
}

impl FetchConfig {
    fn default_timeout() -> u64 {
        15
    }
    fn default_user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
    }
    fn default_max_bytes() -> u64 {
        32 * 1024 * 1024
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
            user_agent: Self::default_user_agent(),
            max_bytes: Self::default_max_bytes(),
        }
    }
}

/// 抠图实现类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemoverKind {
    /// 调用外部分割模型服务
    Remote,
    /// 本地边框取色抠图（无需模型，适合纯色背景）
    #[default]
    BorderKey,
}

/// 抠图（背景移除）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoverConfig {
    /// 实现类型：remote|border_key
    #[serde(default)]
    pub kind: RemoverKind,
    /// 外部模型服务地址（kind=remote 时必填）
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 默认模型名（请求未指定 model 时使用，参与缓存键）
    #[serde(default = "RemoverConfig::default_model")]
    pub model: String,
    /// 单次抠图超时（秒）
    #[serde(default = "RemoverConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl RemoverConfig {
    fn default_model() -> String {
        "rmbg-1.4".to_string()
    }
    fn default_timeout() -> u64 {
        120
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for RemoverConfig {
    fn default() -> Self {
        Self {
            kind: RemoverKind::default(),
            endpoint: None,
            model: Self::default_model(),
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 图片处理配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessingConfig {
    /// 并发处理许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// 请求未指定 max_dimension 时的默认值（缺省不缩放）
    #[serde(default)]
    pub default_max_dimension: Option<u32>,
}

impl ProcessingConfig {
    /// 实际生效的并发许可数
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get()
        } else {
            self.max_parallel as usize
        }
    }
}

/// CORS 配置
///
/// 允许的方法（GET/POST）与暴露的响应头（`X-Cache`、`X-Cache-Key`、`X-Request-Id`）固定，
/// 这里只配置来源。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default)]
    pub enabled: bool,
    /// 允许的 Origin 列表（`"*"` 表示任意）
    #[serde(default = "CorsConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// 预检缓存时间（秒），0 表示不下发
    #[serde(default = "CorsConfig::default_max_age_secs")]
    pub max_age_secs: u64,
}

impl CorsConfig {
    fn default_allowed_origins() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn default_max_age_secs() -> u64 {
        600
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Self::default_allowed_origins(),
            max_age_secs: Self::default_max_age_secs(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 磁盘缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 源图下载配置
    #[serde(default)]
    pub fetch: FetchConfig,
    /// 抠图配置
    #[serde(default)]
    pub remover: RemoverConfig,
    /// 图片处理配置
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// CORS 配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置（文件可缺省），支持环境变量覆盖。
    ///
    /// 此时日志尚未初始化（日志格式本身来自配置），因此这里不输出日志，问题一律以错误返回。
    pub fn load() -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder()
            // 配置文件可选：缺省时全部使用默认值
            .add_source(File::from(Self::config_path()).required(false))
            // 支持环境变量覆盖，例如：APP_CACHE__KEY_POLICY=filename
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = builder.try_deserialize()?;
        config.apply_port_env(std::env::var("PORT").ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// 配置文件路径
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// `PORT` 环境变量覆盖监听端口；空值视为未设置
    fn apply_port_env(&mut self, raw: Option<&str>) -> Result<(), ConfigError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        self.server.port = raw
            .parse::<u16>()
            .map_err(|_| ConfigError::Message(format!("PORT 环境变量无效: {raw}")))?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.remover.kind == RemoverKind::Remote
            && self
                .remover
                .endpoint
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(ConfigError::Message(
                "remover.kind = remote 时必须配置 remover.endpoint".to_string(),
            ));
        }
        if self.cache.dir.trim().is_empty() {
            return Err(ConfigError::Message("cache.dir 不能为空".to_string()));
        }
        Ok(())
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
