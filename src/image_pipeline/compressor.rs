//! # 压缩模块
//!
//! ## 设计思路
//!
//! 在体积预算内重新编码图片。已满足预算的输入原样返回；否则先把长边限制到
//! `compress_max_dimension`，再按“先降质量、后降尺寸”的阶梯逐轮编码。
//! 编码次数有硬上限，达不到预算时返回过程中体积最小的结果（尽力而为，不报错）。
//!
//! ## 实现思路
//!
//! - 含透明像素且开启 `preserve_transparency` 时改用无损 WebP，只能靠降采样缩小体积。
//! - 尺寸只会变小，不会放大。
//! - 原始输入本身也参与“最小结果”比较。

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use super::codec::{self, DecodeLimits, OutputFormat};
use super::source::{ImageAsset, SourceKind, with_extension};
use super::{ImageConfig, ImageError};

/// 单次压缩的结果与过程信息。
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub asset: ImageAsset,
    /// 实际编码次数（快速路径为 0）。
    pub attempts: u32,
    pub within_budget: bool,
    pub width: u32,
    pub height: u32,
}

pub struct Compressor {
    max_dimension: u32,
    initial_quality: u8,
    min_quality: u8,
    quality_step: u8,
    max_attempts: u32,
    downscale_factor: f32,
    preserve_transparency: bool,
    format: OutputFormat,
    filter: FilterType,
    limits: DecodeLimits,
}

struct Candidate {
    bytes: Vec<u8>,
    format: OutputFormat,
    width: u32,
    height: u32,
}

impl Compressor {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            max_dimension: config.compress_max_dimension,
            initial_quality: config.compress_initial_quality,
            min_quality: config.compress_min_quality,
            quality_step: config.compress_quality_step.max(1),
            max_attempts: config.compress_max_attempts.max(1),
            downscale_factor: config.compress_downscale_factor,
            preserve_transparency: config.preserve_transparency,
            format: config.compress_format,
            filter: config.resize_filter,
            limits: config.decode_limits(),
        }
    }

    /// 压缩到 `budget` 字节以内，或返回能达到的最小结果。
    pub fn compress(&self, asset: &ImageAsset, budget: u64) -> Result<ImageAsset, ImageError> {
        self.compress_with_report(asset, budget).map(|outcome| outcome.asset)
    }

    pub fn compress_with_report(&self, asset: &ImageAsset, budget: u64) -> Result<CompressionOutcome, ImageError> {
        if asset.len() <= budget {
            let (width, height) = codec::inspect_dimensions(asset.bytes())
                .map_err(|e| e.in_stage(ImageError::CompressionFailed))?;
            log::debug!("⏭️ 已在预算内，跳过压缩 - {} {}KB", asset.name(), asset.len() / 1024);
            return Ok(CompressionOutcome {
                asset: asset.clone(),
                attempts: 0,
                within_budget: true,
                width,
                height,
            });
        }

        let decoded = codec::decode_with_limits(asset.bytes(), &self.limits)
            .map_err(|e| e.in_stage(ImageError::CompressionFailed))?;
        let (source_width, source_height) = decoded.dimensions();

        let format = if self.preserve_transparency && !self.format.supports_alpha() && codec::has_transparency(&decoded) {
            OutputFormat::WebP
        } else {
            self.format
        };

        let (width, height) = codec::fit_within(source_width, source_height, self.max_dimension);
        let mut current: DynamicImage = codec::resize_exact(&decoded, width, height, self.filter);
        let mut quality = self.initial_quality;
        let mut best: Option<Candidate> = None;
        let mut attempts = 0;

        while attempts < self.max_attempts {
            attempts += 1;
            let (width, height) = current.dimensions();
            let encoded = codec::encode(&current, format, quality).map_err(|e| e.in_stage(ImageError::CompressionFailed))?;
            let size = encoded.len() as u64;

            log::debug!(
                "🗜️ 压缩尝试 #{} - {}x{} q={} {}KB（预算 {}KB）",
                attempts,
                width,
                height,
                quality,
                size / 1024,
                budget / 1024
            );

            if best.as_ref().is_none_or(|b| encoded.len() < b.bytes.len()) {
                best = Some(Candidate {
                    bytes: encoded,
                    format,
                    width,
                    height,
                });
            }

            if size <= budget {
                break;
            }

            if format.supports_quality() && quality > self.min_quality {
                quality = quality.saturating_sub(self.quality_step).max(self.min_quality);
                continue;
            }

            let (next_width, next_height) = codec::scale_down(width, height, self.downscale_factor);
            if (next_width, next_height) == (width, height) {
                break;
            }
            current = codec::resize_exact(&current, next_width, next_height, self.filter);
        }

        let Some(best) = best else {
            return Err(ImageError::CompressionFailed("未产生任何压缩结果".to_string()));
        };

        if best.bytes.len() as u64 >= asset.len() && (source_width, source_height) == (best.width, best.height) {
            log::warn!(
                "⚠️ 重新编码未能缩小体积，保留原图 - {} {}KB",
                asset.name(),
                asset.len() / 1024
            );
            return Ok(CompressionOutcome {
                asset: asset.clone(),
                attempts,
                within_budget: false,
                width: source_width,
                height: source_height,
            });
        }

        let within_budget = best.bytes.len() as u64 <= budget;
        if within_budget {
            log::info!(
                "✅ 压缩完成 - {}x{} -> {}x{} {}KB -> {}KB（{} 次）",
                source_width,
                source_height,
                best.width,
                best.height,
                asset.len() / 1024,
                best.bytes.len() / 1024,
                attempts
            );
        } else {
            log::warn!(
                "⚠️ {} 次尝试后仍超出预算，返回最小结果 - {}KB（预算 {}KB）",
                attempts,
                best.bytes.len() / 1024,
                budget / 1024
            );
        }

        Ok(CompressionOutcome {
            asset: ImageAsset::new(
                with_extension(asset.name(), best.format.extension()),
                best.format.media_type(),
                best.bytes,
                SourceKind::Compressed,
            ),
            attempts,
            within_budget,
            width: best.width,
            height: best.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::test_support::{create_noise_jpeg, create_png_bytes};
    use image::{ImageBuffer, ImageFormat, Rgba};
    use std::io::Cursor;

    #[test]
    fn within_budget_is_returned_unchanged() {
        let compressor = Compressor::new(&ImageConfig::default());
        let asset = ImageAsset::new("a.png", "image/png", create_png_bytes(64, 64), SourceKind::Normalized);

        let outcome = compressor.compress_with_report(&asset, 1024 * 1024).expect("compress should succeed");

        assert_eq!(outcome.asset.id(), asset.id());
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.within_budget);
    }

    #[test]
    fn oversized_jpeg_meets_budget_without_growing() {
        let mut config = ImageConfig::default();
        config.compress_max_attempts = 24;
        let compressor = Compressor::new(&config);
        let bytes = create_noise_jpeg(1600, 1200);
        let asset = ImageAsset::new("noise.jpg", "image/jpeg", bytes, SourceKind::Raw);
        let budget = 200 * 1024;
        assert!(asset.len() > budget);

        let outcome = compressor.compress_with_report(&asset, budget).expect("compress should succeed");

        assert!(outcome.within_budget);
        assert!(outcome.asset.len() <= budget);
        assert!(outcome.width <= 1600 && outcome.height <= 1200);
        assert_eq!(outcome.asset.media_type(), "image/jpeg");
        assert_eq!(outcome.asset.kind(), SourceKind::Compressed);
        assert_eq!(
            codec::inspect_dimensions(outcome.asset.bytes()).expect("inspect"),
            (outcome.width, outcome.height)
        );
    }

    #[test]
    fn unreachable_budget_terminates_with_smallest_result() {
        let mut config = ImageConfig::default();
        config.compress_max_attempts = 4;
        let compressor = Compressor::new(&config);
        let asset = ImageAsset::new("noise.jpg", "image/jpeg", create_noise_jpeg(400, 300), SourceKind::Raw);

        let outcome = compressor.compress_with_report(&asset, 1024).expect("compress should succeed");

        assert!(!outcome.within_budget);
        assert!(outcome.attempts <= 4);
        assert!(outcome.asset.len() <= asset.len());
        assert!(outcome.width <= 400 && outcome.height <= 300);
    }

    #[test]
    fn caps_longest_edge() {
        let mut config = ImageConfig::default();
        config.compress_max_dimension = 256;
        let compressor = Compressor::new(&config);
        let asset = ImageAsset::new("noise.jpg", "image/jpeg", create_noise_jpeg(1024, 512), SourceKind::Raw);

        let outcome = compressor.compress_with_report(&asset, 64 * 1024).expect("compress should succeed");

        assert!(outcome.width <= 256 && outcome.height <= 128);
    }

    #[test]
    fn transparent_input_keeps_alpha() {
        let img = ImageBuffer::from_fn(600, 600, |x, y| {
            let alpha = if (x / 50 + y / 50) % 2 == 0 { 0 } else { 255 };
            Rgba([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8, alpha])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode png");
        let asset = ImageAsset::new("cutout.png", "image/png", cursor.into_inner(), SourceKind::BackgroundRemoved);

        let compressor = Compressor::new(&ImageConfig::default());
        let outcome = compressor.compress_with_report(&asset, 1024).expect("compress should succeed");

        let decoded = image::load_from_memory(outcome.asset.bytes()).expect("result should decode");
        assert!(codec::has_transparency(&decoded));
        assert_ne!(outcome.asset.media_type(), "image/jpeg");
    }

    #[test]
    fn undecodable_input_is_compression_failure() {
        let compressor = Compressor::new(&ImageConfig::default());
        let asset = ImageAsset::new("bad.jpg", "image/jpeg", vec![0u8; 4096], SourceKind::Raw);

        let result = compressor.compress(&asset, 1024);
        assert!(matches!(result, Err(ImageError::CompressionFailed(_))));
    }
}
