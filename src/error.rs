use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用统一错误类型
#[derive(Error, Debug, Clone, utoipa::ToSchema)]
pub enum AppError {
    /// 请求缺少必需参数或参数非法
    #[error("{0}")]
    InvalidRequest(String),

    /// 源图下载失败（非 2xx、超时、连接失败或内容不是图片）
    #[error("{message}")]
    UpstreamFetch {
        /// 上游 HTTP 状态码（若有）
        status: Option<u16>,
        message: String,
    },

    /// 抠图或后处理失败
    #[error("图片处理失败: {0}")]
    Processing(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 磁盘缓存错误类型（仅内部使用，不直接暴露给调用方）
#[derive(Error, Debug)]
pub enum StoreError {
    /// 缓存条目不存在（调用方应先 exists 再 read）
    #[error("缓存条目不存在: {0}")]
    NotFound(String),

    /// 缓存键包含路径分隔符等非法字符
    #[error("非法缓存键: {0}")]
    InvalidKey(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 源图下载错误类型
#[derive(Error, Debug)]
pub enum FetchError {
    /// 上游返回非 2xx
    #[error("Failed to download image, status code: {0}")]
    Status(u16),

    /// 超时
    #[error("Failed to download image: request timed out")]
    Timeout,

    /// 源图超过大小上限
    #[error("Failed to download image: body exceeds {0} bytes")]
    TooLarge(u64),

    /// 连接/传输错误
    #[error("Failed to download image: {0}")]
    Transport(String),
}

/// 对外错误响应体。
///
/// `error` 为稳定的人类可读信息；`code` 用于程序化处理。
/// 5xx 场景下 `error` 只给出通用描述，细节只进服务端日志。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// 错误信息
    #[schema(example = "Missing image parameter")]
    pub error: String,

    /// 稳定的错误码
    #[schema(example = "INVALID_REQUEST")]
    pub code: String,

    /// HTTP 状态码（与响应 status 一致）
    #[schema(example = 400)]
    pub status: u16,

    /// 可选：上游状态码（仅 UPSTREAM_FETCH_FAILED）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,

    /// 可选：请求追踪 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamFetch { .. } => StatusCode::BAD_REQUEST,
            AppError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn stable_code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::UpstreamFetch { .. } => "UPSTREAM_FETCH_FAILED",
            AppError::Processing(_) => "PROCESSING_FAILED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 对外可见的错误信息
    fn public_message(&self) -> String {
        match self {
            AppError::InvalidRequest(_) | AppError::UpstreamFetch { .. } => self.to_string(),
            AppError::Processing(_) => "Failed to process image".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let upstream_status = match &self {
            AppError::UpstreamFetch { status, .. } => *status,
            _ => None,
        };

        let body = ErrorBody {
            error: self.public_message(),
            code: self.stable_code().to_string(),
            status: status.as_u16(),
            upstream_status,
            request_id: crate::request_id::current_request_id(),
        };

        let mut res = Json(body).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        res
    }
}

// =============== Error conversions for common external errors ===============

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        let status = match &err {
            FetchError::Status(code) => Some(*code),
            _ => None,
        };
        AppError::UpstreamFetch {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("阻塞任务执行失败: {err}"))
    }
}
