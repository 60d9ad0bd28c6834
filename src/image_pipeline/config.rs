//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到压缩阶段的参数组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置（1MB 预算、长边 1024、JPEG 输出）。
//! - `ImagePerformanceProfile` 负责档位字符串解析与反向输出。
//! - `apply_performance_profile` 将档位转换为具体阈值。
//! - `infer_performance_profile` 用于从当前配置反推档位（给前端展示状态）。
//! - `validate` 在协调器创建与切档前拒绝不一致的参数。

use image::imageops::FilterType;

use super::ImageError;
use super::codec::{DecodeLimits, OutputFormat};

/// 图片流水线配置。
///
/// 字段覆盖了上传校验、解码、格式转换、压缩、裁剪与背景去除六个阶段。
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// 选择文件时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// HEIC 等格式转换为 JPEG 时的质量（1~100）。
    pub normalize_quality: u8,
    /// 压缩后的目标体积（字节）。
    pub compress_budget_bytes: u64,
    /// 压缩输出的宽/高单边最大值。
    pub compress_max_dimension: u32,
    /// 压缩首轮编码质量。
    pub compress_initial_quality: u8,
    /// 质量阶梯的下限，低于此值改为降采样。
    pub compress_min_quality: u8,
    /// 每轮下调的质量步长。
    pub compress_quality_step: u8,
    /// 单次压缩允许的最大编码次数（保证终止）。
    pub compress_max_attempts: u32,
    /// 每次降采样的缩放系数（0~1）。
    pub compress_downscale_factor: f32,
    /// 含透明像素的图片是否保留透明通道（此时只降采样，不降质量）。
    pub preserve_transparency: bool,
    /// 压缩输出格式。
    pub compress_format: OutputFormat,
    /// 降采样滤镜策略。
    pub resize_filter: FilterType,
    /// 裁剪缩放下限。
    pub min_zoom: f64,
    /// 裁剪缩放上限。
    pub max_zoom: f64,
    /// 裁剪结果的编码格式。
    pub crop_format: OutputFormat,
    /// 背景去除服务地址。
    pub remove_bg_endpoint: String,
    /// 背景去除服务的访问令牌（可选）。
    pub remove_bg_auth_token: Option<String>,
    /// 建立连接（TCP/TLS）超时时间（秒）。请求本身不设总超时。
    pub remove_bg_connect_timeout: u64,
    /// 背景去除服务响应体上限（字节，含 Base64 与 JSON 包装）。
    pub remove_bg_max_response_bytes: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_decoded_pixels: 60_000_000,
            max_decoded_bytes: 256 * 1024 * 1024,
            normalize_quality: 80,
            compress_budget_bytes: 1024 * 1024,
            compress_max_dimension: 1024,
            compress_initial_quality: 85,
            compress_min_quality: 40,
            compress_quality_step: 10,
            compress_max_attempts: 10,
            compress_downscale_factor: 0.8,
            preserve_transparency: true,
            compress_format: OutputFormat::Jpeg,
            resize_filter: FilterType::Triangle,
            min_zoom: 1.0,
            max_zoom: 3.0,
            crop_format: OutputFormat::WebP,
            remove_bg_endpoint: "http://127.0.0.1:8000/api/image/remove-bg/".to_string(),
            remove_bg_auth_token: None,
            remove_bg_connect_timeout: 8,
            remove_bg_max_response_bytes: 32 * 1024 * 1024,
        }
    }
}

/// 图片性能档位（面向产品/用户语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与体积平衡
/// - `Speed`：优先处理速度与小体积
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl ImagePerformanceProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use photo_pipeline::image_pipeline::ImagePerformanceProfile;
    ///
    /// let p = ImagePerformanceProfile::from_str("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), photo_pipeline::image_pipeline::ImageError>(())
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(profile: &str) -> Result<Self, ImageError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ImageError::InvalidConfig(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    /// 将档位输出为稳定字符串，供前端展示与持久化。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl ImageConfig {
    /// 基于当前参数反推性能档位。
    pub fn infer_performance_profile(&self) -> ImagePerformanceProfile {
        if self.compress_max_dimension >= 2048 && self.compress_initial_quality >= 90 {
            return ImagePerformanceProfile::Quality;
        }

        if self.compress_max_dimension <= 768 || self.compress_initial_quality <= 75 {
            return ImagePerformanceProfile::Speed;
        }

        ImagePerformanceProfile::Balanced
    }

    /// 应用指定性能档位到实际参数。
    ///
    /// 档位只影响压缩阶段，上传与解码限制保持不变。
    pub fn apply_performance_profile(&mut self, profile: ImagePerformanceProfile) {
        match profile {
            ImagePerformanceProfile::Quality => {
                self.compress_max_dimension = 2048;
                self.compress_initial_quality = 92;
                self.compress_min_quality = 60;
                self.resize_filter = FilterType::CatmullRom;
            }
            ImagePerformanceProfile::Balanced => {
                self.compress_max_dimension = 1024;
                self.compress_initial_quality = 85;
                self.compress_min_quality = 40;
                self.resize_filter = FilterType::Triangle;
            }
            ImagePerformanceProfile::Speed => {
                self.compress_max_dimension = 768;
                self.compress_initial_quality = 75;
                self.compress_min_quality = 30;
                self.resize_filter = FilterType::Nearest;
            }
        }
    }

    /// 校验参数之间的一致性。
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size == 0 {
            return Err(ImageError::InvalidConfig("max_file_size 必须大于 0".to_string()));
        }
        if self.compress_budget_bytes < 1024 {
            return Err(ImageError::InvalidConfig("compress_budget_bytes 不能小于 1KB".to_string()));
        }
        if self.compress_max_dimension == 0 {
            return Err(ImageError::InvalidConfig("compress_max_dimension 必须大于 0".to_string()));
        }
        if !(1..=100).contains(&self.normalize_quality) {
            return Err(ImageError::InvalidConfig("normalize_quality 必须在 1~100 之间".to_string()));
        }
        if !(1..=100).contains(&self.compress_initial_quality)
            || !(1..=100).contains(&self.compress_min_quality)
        {
            return Err(ImageError::InvalidConfig("压缩质量必须在 1~100 之间".to_string()));
        }
        if self.compress_min_quality > self.compress_initial_quality {
            return Err(ImageError::InvalidConfig(
                "compress_min_quality 不能大于 compress_initial_quality".to_string(),
            ));
        }
        if self.compress_quality_step == 0 {
            return Err(ImageError::InvalidConfig("compress_quality_step 必须大于 0".to_string()));
        }
        if !(1..=64).contains(&self.compress_max_attempts) {
            return Err(ImageError::InvalidConfig("compress_max_attempts 必须在 1~64 之间".to_string()));
        }
        if !(self.compress_downscale_factor > 0.1 && self.compress_downscale_factor < 1.0) {
            return Err(ImageError::InvalidConfig(
                "compress_downscale_factor 必须在 0.1~1.0 之间（不含端点）".to_string(),
            ));
        }
        if !(self.min_zoom.is_finite() && self.max_zoom.is_finite())
            || self.min_zoom <= 0.0
            || self.min_zoom > self.max_zoom
        {
            return Err(ImageError::InvalidConfig("缩放范围无效".to_string()));
        }
        if !(1..=120).contains(&self.remove_bg_connect_timeout) {
            return Err(ImageError::InvalidConfig(
                "remove_bg_connect_timeout 必须在 1~120 秒之间".to_string(),
            ));
        }
        if self.remove_bg_max_response_bytes < 1024 {
            return Err(ImageError::InvalidConfig(
                "remove_bg_max_response_bytes 不能小于 1KB".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_decoded_pixels: self.max_decoded_pixels,
            max_decoded_bytes: self.max_decoded_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_balanced() {
        let config = ImageConfig::default();
        config.validate().expect("default config should be valid");
        assert_eq!(config.infer_performance_profile(), ImagePerformanceProfile::Balanced);
        assert_eq!(config.compress_budget_bytes, 1024 * 1024);
        assert_eq!(config.compress_max_dimension, 1024);
        assert_eq!(config.compress_format, OutputFormat::Jpeg);
    }

    #[test]
    fn profiles_roundtrip_through_inference() {
        for profile in [
            ImagePerformanceProfile::Quality,
            ImagePerformanceProfile::Balanced,
            ImagePerformanceProfile::Speed,
        ] {
            let mut config = ImageConfig::default();
            config.apply_performance_profile(profile);
            config.validate().expect("profile should produce a valid config");
            assert_eq!(config.infer_performance_profile(), profile);
            assert_eq!(ImagePerformanceProfile::from_str(profile.as_str()), Ok(profile));
        }
    }

    #[test]
    fn rejects_unknown_profile() {
        let result = ImagePerformanceProfile::from_str("ultra");
        assert!(matches!(result, Err(ImageError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_inverted_quality_ladder() {
        let mut config = ImageConfig::default();
        config.compress_min_quality = 90;
        config.compress_initial_quality = 80;
        assert!(matches!(config.validate(), Err(ImageError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_bad_zoom_range() {
        let mut config = ImageConfig::default();
        config.min_zoom = 3.0;
        config.max_zoom = 1.0;
        assert!(matches!(config.validate(), Err(ImageError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_tiny_response_cap() {
        let mut config = ImageConfig::default();
        config.remove_bg_max_response_bytes = 512;
        assert!(matches!(config.validate(), Err(ImageError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_downscale_factor_of_one() {
        let mut config = ImageConfig::default();
        config.compress_downscale_factor = 1.0;
        assert!(matches!(config.validate(), Err(ImageError::InvalidConfig(_))));
    }
}
