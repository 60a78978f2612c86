//! 背景移除能力。
//!
//! 模型本身是外部依赖：进程启动时构造一次，经 `Arc<dyn BackgroundRemover>` 注入编排层。
//! 提供两种实现：
//! - [`RemoteRemover`]：把源图 POST 给外部分割模型服务，取回遮罩或透明图；
//! - [`BorderKeyRemover`]：本地按边框取色抠图，适合纯色/影棚背景，也便于离线部署与测试。

use async_trait::async_trait;
use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use reqwest::Client;
use std::io::Cursor;
use std::sync::Arc;

use crate::config::{RemoverConfig, RemoverKind};
use crate::error::AppError;
use crate::features::cutout::types::CutoutParams;

/// 抠图结果：遮罩（与原图同尺寸）或已合成的 RGBA 图
#[derive(Debug, Clone)]
pub enum RemovalOutput {
    Mask(GrayImage),
    Rgba(RgbaImage),
}

/// 背景移除能力
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// 实现名（用于日志）
    fn name(&self) -> &'static str;

    /// 启动期预热/探活；默认无操作
    async fn warm_up(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// 对 RGB 源图生成遮罩或透明图
    async fn remove(
        &self,
        image: Arc<RgbImage>,
        params: &CutoutParams,
    ) -> Result<RemovalOutput, AppError>;
}

/// 按配置构造抠图实现
pub fn build_remover(cfg: &RemoverConfig) -> Result<Arc<dyn BackgroundRemover>, AppError> {
    match cfg.kind {
        RemoverKind::Remote => {
            let endpoint = cfg
                .endpoint
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::Internal("remover.endpoint 未配置".to_string()))?;
            let client = crate::http::remover_client(cfg.timeout_duration())
                .map_err(|e| AppError::Internal(format!("构建模型服务 HTTP Client 失败: {e}")))?;
            Ok(Arc::new(RemoteRemover::new(client, endpoint)))
        }
        RemoverKind::BorderKey => Ok(Arc::new(BorderKeyRemover)),
    }
}

/// 把遮罩/透明图与原图合成为带 alpha 的图片；尺寸必须一致
pub fn compose(base: &RgbImage, output: RemovalOutput) -> Result<RgbaImage, AppError> {
    let (width, height) = base.dimensions();
    match output {
        RemovalOutput::Mask(mask) => {
            if mask.dimensions() != (width, height) {
                return Err(AppError::Processing(format!(
                    "遮罩尺寸 {}x{} 与原图 {}x{} 不一致",
                    mask.width(),
                    mask.height(),
                    width,
                    height
                )));
            }
            Ok(RgbaImage::from_fn(width, height, |x, y| {
                let Rgb([r, g, b]) = *base.get_pixel(x, y);
                let Luma([a]) = *mask.get_pixel(x, y);
                image::Rgba([r, g, b, a])
            }))
        }
        RemovalOutput::Rgba(rgba) => {
            if rgba.dimensions() != (width, height) {
                return Err(AppError::Processing(format!(
                    "抠图结果尺寸 {}x{} 与原图 {}x{} 不一致",
                    rgba.width(),
                    rgba.height(),
                    width,
                    height
                )));
            }
            Ok(rgba)
        }
    }
}

// ======================= 外部模型服务 =======================

/// 外部分割模型服务。
///
/// 协议：`POST {endpoint}?model=..&alpha_matting=..&...`，请求体为 PNG，
/// 响应体为 PNG：灰度图视为遮罩，带 alpha 的图视为已合成结果。
pub struct RemoteRemover {
    client: Client,
    endpoint: String,
}

impl RemoteRemover {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn query_pairs(params: &CutoutParams) -> Vec<(&'static str, String)> {
        vec![
            ("model", params.model.clone()),
            ("alpha_matting", params.alpha_matting.to_string()),
            ("foreground_threshold", params.foreground_threshold.to_string()),
            ("background_threshold", params.background_threshold.to_string()),
            ("erode_size", params.erode_size.to_string()),
        ]
    }
}

#[async_trait]
impl BackgroundRemover for RemoteRemover {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn warm_up(&self) -> Result<(), AppError> {
        // 任意 HTTP 响应都说明服务可达；只有连接层失败才算不可用
        self.client
            .get(&self.endpoint)
            .send()
            .await
            .map(|resp| {
                tracing::info!("模型服务可达: {} (status={})", self.endpoint, resp.status());
            })
            .map_err(|e| AppError::Processing(format!("模型服务不可达: {e}")))
    }

    async fn remove(
        &self,
        image: Arc<RgbImage>,
        params: &CutoutParams,
    ) -> Result<RemovalOutput, AppError> {
        let body = tokio::task::spawn_blocking(move || {
            let mut buf = Cursor::new(Vec::new());
            image
                .write_to(&mut buf, image::ImageFormat::Png)
                .map(|_| buf.into_inner())
        })
        .await?
        .map_err(|e| AppError::Processing(format!("源图编码失败: {e}")))?;

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&Self::query_pairs(params))
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Processing("模型服务超时".to_string())
                } else {
                    AppError::Processing(format!("模型服务请求失败: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Processing(format!("模型服务返回 {status}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AppError::Processing(format!("读取模型服务响应失败: {e}")))?;

        tokio::task::spawn_blocking(move || decode_model_output(&bytes)).await?
    }
}

fn decode_model_output(bytes: &[u8]) -> Result<RemovalOutput, AppError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AppError::Processing(format!("模型输出无法解码: {e}")))?;
    if decoded.color().has_alpha() && decoded.color().has_color() {
        Ok(RemovalOutput::Rgba(decoded.to_rgba8()))
    } else {
        Ok(RemovalOutput::Mask(decoded.to_luma8()))
    }
}

// ======================= 本地边框取色 =======================

/// 与背景色距离小于该值视为背景
const KEY_DISTANCE_LOW: f32 = 24.0;
/// 与背景色距离大于该值视为前景
const KEY_DISTANCE_HIGH: f32 = 96.0;
/// 未启用 alpha matting 时的二值化阈值
const HARD_EDGE_THRESHOLD: u8 = 128;

/// 本地边框取色抠图：以边框像素中位色作为背景色，按颜色距离生成遮罩。
///
/// - 未启用 alpha matting：遮罩二值化（硬边）；
/// - 启用时：>= 前景阈值为确定前景、<= 背景阈值为确定背景，两者各自腐蚀 `erode_size`
///   像素，剩余过渡带保留软 alpha。
pub struct BorderKeyRemover;

#[async_trait]
impl BackgroundRemover for BorderKeyRemover {
    fn name(&self) -> &'static str {
        "border_key"
    }

    async fn remove(
        &self,
        image: Arc<RgbImage>,
        params: &CutoutParams,
    ) -> Result<RemovalOutput, AppError> {
        let params = params.clone();
        let mask = tokio::task::spawn_blocking(move || border_key_mask(&image, &params)).await?;
        Ok(RemovalOutput::Mask(mask))
    }
}

pub fn border_key_mask(image: &RgbImage, params: &CutoutParams) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }
    let bg = estimate_background(image);

    let soft = GrayImage::from_fn(width, height, |x, y| {
        let d = color_distance(image.get_pixel(x, y), &bg);
        let t = ((d - KEY_DISTANCE_LOW) / (KEY_DISTANCE_HIGH - KEY_DISTANCE_LOW)).clamp(0.0, 1.0);
        Luma([(t * 255.0).round() as u8])
    });

    if params.alpha_matting {
        refine_alpha_matting(&soft, params)
    } else {
        GrayImage::from_fn(width, height, |x, y| {
            let Luma([v]) = *soft.get_pixel(x, y);
            Luma([if v >= HARD_EDGE_THRESHOLD { 255 } else { 0 }])
        })
    }
}

/// 按前景/背景阈值构造三分图并腐蚀，过渡带保留原始软值
pub fn refine_alpha_matting(mask: &GrayImage, params: &CutoutParams) -> GrayImage {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let raw = mask.as_raw();

    let fg: Vec<bool> = raw.iter().map(|v| *v >= params.foreground_threshold).collect();
    let bg: Vec<bool> = raw.iter().map(|v| *v <= params.background_threshold).collect();
    let radius = params.erode_size as usize;
    let fg = erode(&fg, w, h, radius);
    let bg = erode(&bg, w, h, radius);

    let out: Vec<u8> = raw
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if fg[i] {
                255
            } else if bg[i] {
                0
            } else {
                *v
            }
        })
        .collect();
    GrayImage::from_raw(width, height, out).unwrap_or_else(|| mask.clone())
}

/// 方形结构元素的二值腐蚀（可分离：先行后列），图像边界外视为 true
fn erode(mask: &[bool], w: usize, h: usize, radius: usize) -> Vec<bool> {
    if radius == 0 || w == 0 || h == 0 {
        return mask.to_vec();
    }
    let horizontal = erode_lines(mask, w, h, radius, |row, i| row * w + i);
    erode_lines(&horizontal, h, w, radius, |col, i| i * w + col)
}

/// 对每条线做一维腐蚀：窗口内存在 false 即为 false（前缀和计数，O(n)）
fn erode_lines(
    src: &[bool],
    line_len: usize,
    lines: usize,
    radius: usize,
    index: impl Fn(usize, usize) -> usize,
) -> Vec<bool> {
    let mut out = vec![false; src.len()];
    let mut prefix = vec![0usize; line_len + 1];
    for line in 0..lines {
        for i in 0..line_len {
            prefix[i + 1] = prefix[i] + usize::from(!src[index(line, i)]);
        }
        for i in 0..line_len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(line_len);
            out[index(line, i)] = prefix[hi] - prefix[lo] == 0;
        }
    }
    out
}

/// 边框像素逐通道中位数
fn estimate_background(image: &RgbImage) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut push = |x: u32, y: u32| {
        let Rgb(px) = *image.get_pixel(x, y);
        for (c, v) in channels.iter_mut().zip(px) {
            c.push(v);
        }
    };
    for x in 0..width {
        push(x, 0);
        if height > 1 {
            push(x, height - 1);
        }
    }
    for y in 1..height.saturating_sub(1) {
        push(0, y);
        if width > 1 {
            push(width - 1, y);
        }
    }
    let median = |v: &mut Vec<u8>| {
        v.sort_unstable();
        v[v.len() / 2]
    };
    Rgb([
        median(&mut channels[0]),
        median(&mut channels[1]),
        median(&mut channels[2]),
    ])
}

fn color_distance(a: &Rgb<u8>, b: &Rgb<u8>) -> f32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| {
            let d = f32::from(*x) - f32::from(*y);
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
