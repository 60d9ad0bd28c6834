//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载图片链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! ## 实现思路
//!
//! - `code()` 输出稳定错误码，便于前端做分支展示。
//! - `stage()` 标识出错阶段（validate / normalize / compress / crop / remove_background）。
//! - `ErrorReport` 是面向 UI 的可序列化快照，协调器只保留“最近一次”错误。

use serde::Serialize;

/// 图片处理统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// 任何阶段运行之前的输入校验失败（类型不符、体积超限、空文件等）。
    #[error("校验失败：{0}")]
    ValidationFailed(String),

    #[error("格式转换失败：{0}")]
    NormalizationFailed(String),

    /// 编码/解码本身失败。未达到体积预算不算错误，会返回最优结果。
    #[error("压缩失败：{0}")]
    CompressionFailed(String),

    #[error("尚未选择裁剪区域")]
    NoCropRegion,

    #[error("裁剪失败：{0}")]
    CropFailed(String),

    #[error("背景去除失败：{0}")]
    BackgroundRemovalFailed(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("配置无效：{0}")]
    InvalidConfig(String),

    #[error("文件错误：{0}")]
    FileSystem(String),
}

impl ImageError {
    /// 稳定错误码（前端按码分支，不依赖文案）。
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "E_VALIDATION",
            Self::NormalizationFailed(_) => "E_NORMALIZATION",
            Self::CompressionFailed(_) => "E_COMPRESSION",
            Self::NoCropRegion => "E_NO_CROP_REGION",
            Self::CropFailed(_) => "E_CROP",
            Self::BackgroundRemovalFailed(_) => "E_BACKGROUND_REMOVAL",
            Self::Decode(_) => "E_DECODE",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::InvalidConfig(_) => "E_INVALID_CONFIG",
            Self::FileSystem(_) => "E_FILE_SYSTEM",
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) | Self::FileSystem(_) | Self::InvalidConfig(_) => "validate",
            Self::NormalizationFailed(_) => "normalize",
            Self::CompressionFailed(_) => "compress",
            Self::NoCropRegion | Self::CropFailed(_) => "crop",
            Self::BackgroundRemovalFailed(_) => "remove_background",
            Self::Decode(_) | Self::ResourceLimit(_) => "decode",
        }
    }

    /// 将通用解码错误归入指定阶段；资源限制等其他错误保持原样。
    pub(crate) fn in_stage(self, stage: fn(String) -> ImageError) -> ImageError {
        match self {
            Self::Decode(message) => stage(message),
            other => other,
        }
    }
}

/// 面向 UI 的错误快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
}

impl From<&ImageError> for ErrorReport {
    fn from(error: &ImageError) -> Self {
        Self {
            code: error.code(),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_reclassified_into_stage() {
        let err = ImageError::Decode("bad header".to_string()).in_stage(ImageError::NormalizationFailed);
        assert_eq!(err, ImageError::NormalizationFailed("bad header".to_string()));

        let limit = ImageError::ResourceLimit("too big".to_string()).in_stage(ImageError::CompressionFailed);
        assert!(matches!(limit, ImageError::ResourceLimit(_)));
    }

    #[test]
    fn report_carries_code_and_stage() {
        let report = ErrorReport::from(&ImageError::NoCropRegion);
        assert_eq!(report.code, "E_NO_CROP_REGION");
        assert_eq!(report.stage, "crop");
        assert!(!report.message.is_empty());

        let json = serde_json::to_value(&report).expect("report should serialize");
        assert_eq!(json["code"], "E_NO_CROP_REGION");
    }
}
