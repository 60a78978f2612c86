use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 默认前景阈值（alpha matting）
pub const DEFAULT_FOREGROUND_THRESHOLD: u8 = 240;
/// 默认背景阈值（alpha matting）
pub const DEFAULT_BACKGROUND_THRESHOLD: u8 = 10;
/// 默认腐蚀半径（alpha matting）
pub const DEFAULT_ERODE_SIZE: u32 = 10;
/// 腐蚀半径上限，避免超大核拖垮 CPU
pub const MAX_ERODE_SIZE: u32 = 255;

/// 抠图参数（全部参与缓存键）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoutParams {
    /// 模型名
    pub model: String,
    /// 是否启用 alpha matting（软边缘）
    pub alpha_matting: bool,
    /// 前景阈值：遮罩值 >= 该值视为确定前景
    pub foreground_threshold: u8,
    /// 背景阈值：遮罩值 <= 该值视为确定背景
    pub background_threshold: u8,
    /// 前景遮罩腐蚀半径（像素）
    pub erode_size: u32,
}

impl CutoutParams {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            alpha_matting: false,
            foreground_threshold: DEFAULT_FOREGROUND_THRESHOLD,
            background_threshold: DEFAULT_BACKGROUND_THRESHOLD,
            erode_size: DEFAULT_ERODE_SIZE,
        }
    }

    /// 参与缓存键的有序参数列表。
    ///
    /// 未启用 alpha matting 时阈值不影响结果，不写入键，避免无关 query 造成缓存碎片。
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("model", self.model.clone()),
            ("alpha_matting", self.alpha_matting.to_string()),
        ];
        if self.alpha_matting {
            out.push(("foreground_threshold", self.foreground_threshold.to_string()));
            out.push(("background_threshold", self.background_threshold.to_string()));
            out.push(("erode_size", self.erode_size.to_string()));
        }
        out
    }
}

/// 一次去背景请求（已校验）
#[derive(Debug, Clone)]
pub struct CutoutRequest {
    /// 源图 URL
    pub url: String,
    pub params: CutoutParams,
    /// 响应缩放：最长边上限（不参与缓存键）
    pub max_dimension: Option<u32>,
}

/// 请求未指定时使用的默认值（来自配置）
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub model: String,
    pub max_dimension: Option<u32>,
}

/// GET `/remove-background` 的 query 参数
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RemoveBackgroundQuery {
    /// 源图 URL（必填）
    pub image: Option<String>,
    /// 模型名（缺省使用服务端配置）
    pub model: Option<String>,
    /// 是否启用 alpha matting：true|false
    pub alpha_matting: Option<String>,
    /// 前景阈值 0-255（默认 240）
    pub foreground_threshold: Option<String>,
    /// 背景阈值 0-255（默认 10）
    pub background_threshold: Option<String>,
    /// 腐蚀半径（默认 10）
    pub erode_size: Option<String>,
    /// 响应图片最长边上限（可选）
    pub max_dimension: Option<String>,
}

/// POST `/remove-background` 的 JSON 请求体
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RemoveBackgroundBody {
    /// 源图 URL（必填）
    #[serde(default, alias = "image")]
    #[schema(example = "https://example.com/cat.jpg")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_matting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground_threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erode_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dimension: Option<u32>,
}

impl RemoveBackgroundQuery {
    pub fn into_request(self, defaults: &RequestDefaults) -> Result<CutoutRequest, AppError> {
        let url = require_url(self.image, "image")?;
        let body = RemoveBackgroundBody {
            image_url: Some(url),
            model: self.model,
            alpha_matting: self
                .alpha_matting
                .as_deref()
                .map(|v| parse_bool("alpha_matting", v))
                .transpose()?,
            foreground_threshold: parse_opt("foreground_threshold", self.foreground_threshold)?,
            background_threshold: parse_opt("background_threshold", self.background_threshold)?,
            erode_size: parse_opt("erode_size", self.erode_size)?,
            max_dimension: parse_opt("max_dimension", self.max_dimension)?,
        };
        body.into_request(defaults)
    }
}

impl RemoveBackgroundBody {
    pub fn into_request(self, defaults: &RequestDefaults) -> Result<CutoutRequest, AppError> {
        let url = require_url(self.image_url, "image_url")?;
        validate_source_url(&url)?;

        let erode_size = self.erode_size.unwrap_or(DEFAULT_ERODE_SIZE);
        if erode_size > MAX_ERODE_SIZE {
            return Err(AppError::InvalidRequest(format!(
                "erode_size must be <= {MAX_ERODE_SIZE}"
            )));
        }

        let model = self
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| defaults.model.clone());

        Ok(CutoutRequest {
            url,
            params: CutoutParams {
                model,
                alpha_matting: self.alpha_matting.unwrap_or(false),
                foreground_threshold: self
                    .foreground_threshold
                    .unwrap_or(DEFAULT_FOREGROUND_THRESHOLD),
                background_threshold: self
                    .background_threshold
                    .unwrap_or(DEFAULT_BACKGROUND_THRESHOLD),
                erode_size,
            },
            max_dimension: self
                .max_dimension
                .or(defaults.max_dimension)
                .filter(|v| *v > 0),
        })
    }
}

fn require_url(raw: Option<String>, field: &str) -> Result<String, AppError> {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidRequest(format!("Missing {field} parameter")))
}

fn validate_source_url(url: &str) -> Result<(), AppError> {
    match reqwest::Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        Ok(u) => Err(AppError::InvalidRequest(format!(
            "Unsupported URL scheme: {}",
            u.scheme()
        ))),
        Err(e) => Err(AppError::InvalidRequest(format!("Invalid image URL: {e}"))),
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(AppError::InvalidRequest(format!(
            "{field} must be true or false"
        ))),
    }
}

fn parse_opt<T: std::str::FromStr>(
    field: &str,
    raw: Option<String>,
) -> Result<Option<T>, AppError> {
    let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| AppError::InvalidRequest(format!("{field} is not a valid number: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RequestDefaults {
        RequestDefaults {
            model: "rmbg-1.4".to_string(),
            max_dimension: None,
        }
    }

    #[test]
    fn missing_or_blank_image_is_invalid() {
        let err = RemoveBackgroundQuery::default()
            .into_request(&defaults())
            .expect_err("missing image");
        assert_eq!(err.to_string(), "Missing image parameter");

        let q = RemoveBackgroundQuery {
            image: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(
            q.into_request(&defaults()),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn query_values_are_parsed_and_defaulted() {
        let q = RemoveBackgroundQuery {
            image: Some("https://example.com/a.png".into()),
            alpha_matting: Some("TRUE".into()),
            erode_size: Some("3".into()),
            max_dimension: Some("1024".into()),
            ..Default::default()
        };
        let req = q.into_request(&defaults()).expect("valid request");
        assert_eq!(req.params.model, "rmbg-1.4");
        assert!(req.params.alpha_matting);
        assert_eq!(req.params.erode_size, 3);
        assert_eq!(req.params.foreground_threshold, DEFAULT_FOREGROUND_THRESHOLD);
        assert_eq!(req.max_dimension, Some(1024));
    }

    #[test]
    fn bad_numbers_and_schemes_are_rejected() {
        let q = RemoveBackgroundQuery {
            image: Some("https://example.com/a.png".into()),
            foreground_threshold: Some("300".into()),
            ..Default::default()
        };
        assert!(q.into_request(&defaults()).is_err());

        let body = RemoveBackgroundBody {
            image_url: Some("ftp://example.com/a.png".into()),
            ..Default::default()
        };
        assert!(body.into_request(&defaults()).is_err());
    }

    #[test]
    fn thresholds_only_key_when_matting_enabled() {
        let mut p = CutoutParams::with_model("m");
        let plain = p.cache_params();
        p.foreground_threshold = 100;
        assert_eq!(p.cache_params(), plain);

        p.alpha_matting = true;
        let matted = p.cache_params();
        assert_eq!(matted.len(), 5);
        assert_eq!(matted[2], ("foreground_threshold", "100".to_string()));
    }

    #[test]
    fn body_accepts_image_alias() {
        let body: RemoveBackgroundBody =
            serde_json::from_str(r#"{"image": "https://example.com/a.png"}"#).expect("parse");
        assert_eq!(body.image_url.as_deref(), Some("https://example.com/a.png"));
    }
}
