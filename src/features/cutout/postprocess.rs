//! 响应前的后处理：按最长边等比缩放 + PNG 编码。
//!
//! 缩放失败时一律回退到原图，后处理本身不会让请求失败。

use axum::body::Bytes;
use image::imageops::{self, FilterType};
use image::{ImageReader, RgbaImage};
use std::io::Cursor;
use std::panic::AssertUnwindSafe;

use crate::error::AppError;

/// 计算缩放目标尺寸；不需要缩放时返回 `None`
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if max_dimension == 0 || width == 0 || height == 0 {
        return None;
    }
    if width <= max_dimension && height <= max_dimension {
        return None;
    }
    let max = f64::from(max_dimension);
    if width > height {
        let h = (f64::from(height) * max / f64::from(width)).round() as u32;
        Some((max_dimension, h.max(1)))
    } else {
        let w = (f64::from(width) * max / f64::from(height)).round() as u32;
        Some((w.max(1), max_dimension))
    }
}

/// 按最长边不超过 `max_dimension` 等比缩放（Lanczos3）。
///
/// 无需缩放时原样返回；缩放过程出现任何异常也返回原图。
pub fn process(image: RgbaImage, max_dimension: Option<u32>) -> RgbaImage {
    let Some(max) = max_dimension else {
        return image;
    };
    let (width, height) = image.dimensions();
    let Some((dst_w, dst_h)) = target_dimensions(width, height, max) else {
        return image;
    };

    let scaled = std::panic::catch_unwind(AssertUnwindSafe(|| {
        imageops::resize(&image, dst_w, dst_h, FilterType::Lanczos3)
    }));
    match scaled {
        Ok(out) if out.dimensions() == (dst_w, dst_h) => {
            tracing::debug!("缩放完成: {}x{} -> {}x{}", width, height, dst_w, dst_h);
            out
        }
        _ => {
            tracing::warn!(
                "缩放失败，回退为原图: {}x{} -> {}x{}",
                width,
                height,
                dst_w,
                dst_h
            );
            image
        }
    }
}

/// 无损 PNG 编码（最高压缩 + 自适应滤波）；失败时退回默认参数再试一次
pub fn encode_png(image: &RgbaImage) -> Result<Bytes, AppError> {
    match encode_with(image, png::Compression::Best, true) {
        Ok(out) => Ok(out),
        Err(e) => {
            tracing::warn!("PNG 优化编码失败，使用默认参数重试: {}", e);
            encode_with(image, png::Compression::Default, false)
                .map_err(|e| AppError::Processing(format!("PNG 编码失败: {e}")))
        }
    }
}

fn encode_with(
    image: &RgbaImage,
    compression: png::Compression,
    adaptive: bool,
) -> Result<Bytes, png::EncodingError> {
    let (width, height) = image.dimensions();
    let mut out = Vec::with_capacity((width as usize) * (height as usize));
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(compression);
        if adaptive {
            encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);
        } else {
            encoder.set_filter(png::FilterType::Paeth);
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;
    }
    Ok(Bytes::from(out))
}

/// 只读图片头获取尺寸；无法识别时返回 `None`
pub fn peek_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// 对已编码的 PNG 做后处理。
///
/// 不需要缩放时直接返回原字节（不重新编码）；解码/缩放/编码任一步失败也返回原字节。
pub fn process_encoded(bytes: Bytes, max_dimension: Option<u32>) -> Bytes {
    let Some(max) = max_dimension else {
        return bytes;
    };
    let Some((width, height)) = peek_dimensions(&bytes) else {
        tracing::warn!("无法读取图片尺寸，跳过缩放");
        return bytes;
    };
    if target_dimensions(width, height, max).is_none() {
        return bytes;
    }

    let decoded = match image::load_from_memory(&bytes) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            tracing::warn!("解码失败，跳过缩放: {}", e);
            return bytes;
        }
    };
    let scaled = process(decoded, Some(max));
    if scaled.dimensions() == (width, height) {
        return bytes;
    }
    match encode_png(&scaled) {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!("缩放后编码失败，回退为原图: {}", e);
            bytes
        }
    }
}
