//! # 格式识别与转换
//!
//! ## 设计思路
//!
//! `classify_format` 是纯函数：综合签名、声明类型与扩展名，判断图片能否被浏览器直接渲染。
//! 只要任一来源指向非 Web 格式（HEIC / HEIF / TIFF / BMP …）就需要转换，
//! 否则走无操作快速路径，原样返回输入资产。
//!
//! ## 实现思路
//!
//! - HEIC / HEIF 的解码交给可注入的 `HeifDecoder`（平台自带的解码能力各不相同）。
//! - 其余非 Web 格式由 `image` crate 直接解码。
//! - 转换结果统一编码为 JPEG，文件名扩展名改为 `.jpg`。
//! - 解码失败返回 `NormalizationFailed`，绝不把原始字节当作转换结果继续下发。

use std::sync::Arc;

use image::DynamicImage;

use super::codec::{self, DecodeLimits, OutputFormat};
use super::loader::{media_type_from_extension, sniff_media_type};
use super::source::{ImageAsset, SourceKind, file_extension, with_extension};
use super::{ImageConfig, ImageError};

const WEB_SAFE_MEDIA_TYPES: [&str; 5] = ["image/jpeg", "image/png", "image/gif", "image/webp", "image/avif"];
const HEIF_MEDIA_TYPES: [&str; 4] = ["image/heic", "image/heif", "image/heic-sequence", "image/heif-sequence"];

/// 格式分类结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    /// 浏览器可直接渲染。
    Native,
    /// 需要解码并重新编码。
    NeedsNormalization,
}

/// HEIC / HEIF 解码能力。
pub trait HeifDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ImageError>;
}

fn is_heif_hint(media_type: &str, name: &str) -> bool {
    HEIF_MEDIA_TYPES.contains(&media_type)
        || matches!(file_extension(name).as_deref(), Some("heic") | Some("heif"))
}

fn is_non_web(media_type: &str) -> bool {
    !media_type.is_empty() && !WEB_SAFE_MEDIA_TYPES.contains(&media_type)
}

/// 判断资产是否需要格式转换。
pub fn classify_format(bytes: &[u8], media_type: &str, name: &str) -> FormatClass {
    let declared = media_type.trim().to_ascii_lowercase();
    let by_extension = media_type_from_extension(name).unwrap_or_default();
    let sniffed = sniff_media_type(bytes).unwrap_or_default();

    if is_heif_hint(&declared, name) || is_non_web(&declared) || is_non_web(by_extension) || is_non_web(sniffed) {
        FormatClass::NeedsNormalization
    } else {
        FormatClass::Native
    }
}

/// 非 Web 格式 → JPEG 的转换器。
pub struct FormatNormalizer {
    heif_decoder: Option<Arc<dyn HeifDecoder>>,
    quality: u8,
    limits: DecodeLimits,
}

impl FormatNormalizer {
    pub fn new(config: &ImageConfig, heif_decoder: Option<Arc<dyn HeifDecoder>>) -> Self {
        Self {
            heif_decoder,
            quality: config.normalize_quality,
            limits: config.decode_limits(),
        }
    }

    pub fn normalize(&self, asset: &ImageAsset) -> Result<ImageAsset, ImageError> {
        if classify_format(asset.bytes(), asset.media_type(), asset.name()) == FormatClass::Native {
            log::debug!("⏭️ 格式无需转换 - {} ({})", asset.name(), asset.media_type());
            return Ok(asset.clone());
        }

        let decoded = self.decode(asset)?;
        let encoded = codec::encode(&decoded, OutputFormat::Jpeg, self.quality)
            .map_err(|e| e.in_stage(ImageError::NormalizationFailed))?;

        log::info!(
            "🔄 格式转换完成 - {} ({}) -> image/jpeg {}x{} {}KB",
            asset.name(),
            asset.media_type(),
            decoded.width(),
            decoded.height(),
            encoded.len() / 1024
        );

        Ok(ImageAsset::new(
            with_extension(asset.name(), OutputFormat::Jpeg.extension()),
            OutputFormat::Jpeg.media_type(),
            encoded,
            SourceKind::Normalized,
        ))
    }

    fn decode(&self, asset: &ImageAsset) -> Result<DynamicImage, ImageError> {
        let declared = asset.media_type().trim().to_ascii_lowercase();
        let sniffed_heif = matches!(sniff_media_type(asset.bytes()), Some("image/heif") | Some("image/heic"));

        if sniffed_heif || is_heif_hint(&declared, asset.name()) {
            let decoder = self
                .heif_decoder
                .as_ref()
                .ok_or_else(|| ImageError::NormalizationFailed("当前平台未提供 HEIC 解码能力".to_string()))?;

            let decoded = decoder
                .decode(asset.bytes())
                .map_err(|e| e.in_stage(ImageError::NormalizationFailed))?;
            codec::validate_pixel_limits(&self.limits, decoded.width(), decoded.height())?;
            codec::validate_decoded_memory_limits(&self.limits, decoded.width(), decoded.height())?;
            return Ok(decoded);
        }

        codec::decode_with_limits(asset.bytes(), &self.limits).map_err(|e| e.in_stage(ImageError::NormalizationFailed))
    }
}
