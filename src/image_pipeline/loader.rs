//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 文件进入流水线前的最后一道关口。在“任何阶段运行之前”完成输入校验，
//! 目标是尽快失败，减少不必要的内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - 声明类型或扩展名必须在白名单内（部分相册给 HEIC 的声明类型为空，靠扩展名兜底）。
//! - 体积按配置上限拒绝。
//! - 通过文件签名（magic bytes）确认内容确实是图片，不信任声明类型。
//! - 本地文件：存在性 + metadata 体积限制 + 读取。

use std::path::Path;

use super::source::{SelectedFile, file_extension};
use super::{ImageConfig, ImageError};

pub(crate) const ACCEPTED_MEDIA_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "image/heif",
];

pub(crate) const ACCEPTED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "heic", "heif"];

/// 校验选择的文件是否可以进入流水线。
pub fn validate_selected_file(file: &SelectedFile, config: &ImageConfig) -> Result<(), ImageError> {
    if file.bytes.is_empty() {
        return Err(ImageError::ValidationFailed("图片内容为空".to_string()));
    }

    let size = file.bytes.len() as u64;
    if size > config.max_file_size {
        return Err(ImageError::ValidationFailed(format!(
            "图片过大：{:.2} MB（限制：{:.2} MB）",
            size as f64 / 1024.0 / 1024.0,
            config.max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    let declared = file.media_type.trim().to_ascii_lowercase();
    let declared_ok = ACCEPTED_MEDIA_TYPES.contains(&declared.as_str());
    let extension_ok = file_extension(&file.name)
        .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);

    if !declared_ok && !extension_ok {
        return Err(ImageError::ValidationFailed(format!(
            "未支持的文件格式：{}（可选：{}）",
            if declared.is_empty() { file.name.as_str() } else { declared.as_str() },
            ACCEPTED_EXTENSIONS.join(", ")
        )));
    }

    validate_image_signature(&file.bytes)
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
pub(crate) fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::ValidationFailed("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::ValidationFailed("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::ValidationFailed(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 按签名识别媒体类型，无法识别时返回 `None`。
pub(crate) fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

/// 扩展名到媒体类型的兜底映射。
pub(crate) fn media_type_from_extension(name: &str) -> Option<&'static str> {
    match file_extension(name)?.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "tif" | "tiff" => Some("image/tiff"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// 从本地路径读取文件，模拟文件选择器交给流水线的对象。
pub fn load_from_file(path: &Path, config: &ImageConfig) -> Result<SelectedFile, ImageError> {
    log::info!("📁 开始读取本地图片 - 路径: {}", path.display());

    if !path.exists() {
        return Err(ImageError::FileSystem(format!("文件不存在：{}", path.display())));
    }

    let metadata = std::fs::metadata(path).map_err(|e| ImageError::FileSystem(format!("无法读取文件信息：{}", e)))?;

    if metadata.len() > config.max_file_size {
        return Err(ImageError::ValidationFailed(format!(
            "文件过大：{:.2} MB（限制：{:.2} MB）",
            metadata.len() as f64 / 1024.0 / 1024.0,
            config.max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    let bytes = std::fs::read(path).map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let media_type = sniff_media_type(&bytes)
        .or_else(|| media_type_from_extension(&name))
        .unwrap_or_default();

    Ok(SelectedFile::new(name, media_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::test_support::{create_png_bytes, heic_container_bytes};

    #[test]
    fn accepts_png_with_declared_type() {
        let file = SelectedFile::new("a.png", "image/png", create_png_bytes(32, 32));
        validate_selected_file(&file, &ImageConfig::default()).expect("png should pass validation");
    }

    #[test]
    fn accepts_heic_by_extension_when_type_is_missing() {
        let file = SelectedFile::new("IMG_0001.HEIC", "", heic_container_bytes());
        validate_selected_file(&file, &ImageConfig::default()).expect("heic should pass validation");
    }

    #[test]
    fn rejects_unsupported_declared_type() {
        let file = SelectedFile::new("doc.pdf", "application/pdf", create_png_bytes(8, 8));
        let result = validate_selected_file(&file, &ImageConfig::default());
        assert!(matches!(result, Err(ImageError::ValidationFailed(_))));
    }

    #[test]
    fn rejects_oversized_file() {
        let mut config = ImageConfig::default();
        config.max_file_size = 64;
        let file = SelectedFile::new("a.png", "image/png", create_png_bytes(64, 64));

        let result = validate_selected_file(&file, &config);
        assert!(matches!(result, Err(ImageError::ValidationFailed(_))));
    }

    #[test]
    fn rejects_non_image_payload_even_with_image_type() {
        let file = SelectedFile::new("fake.png", "image/png", b"hello world".to_vec());
        let result = validate_selected_file(&file, &ImageConfig::default());
        assert!(matches!(result, Err(ImageError::ValidationFailed(_))));
    }

    #[test]
    fn rejects_empty_file() {
        let file = SelectedFile::new("a.png", "image/png", Vec::new());
        let result = validate_selected_file(&file, &ImageConfig::default());
        assert!(matches!(result, Err(ImageError::ValidationFailed(_))));
    }

    #[test]
    fn sniffs_heif_container() {
        assert_eq!(sniff_media_type(&heic_container_bytes()), Some("image/heif"));
        assert_eq!(sniff_media_type(&create_png_bytes(4, 4)), Some("image/png"));
        assert_eq!(sniff_media_type(b"plain text"), None);
    }

    #[test]
    fn load_from_file_reports_missing_path() {
        let result = load_from_file(Path::new("/definitely/not/here.png"), &ImageConfig::default());
        assert!(matches!(result, Err(ImageError::FileSystem(_))));
    }

    #[test]
    fn load_from_file_sniffs_media_type() {
        let path = std::env::temp_dir().join(format!("photo-pipeline-loader-{}.bin", std::process::id()));
        std::fs::write(&path, create_png_bytes(16, 16)).expect("write temp file failed");

        let file = load_from_file(&path, &ImageConfig::default()).expect("load should succeed");
        let _ = std::fs::remove_file(&path);

        assert_eq!(file.media_type, "image/png");
        assert!(file.name.starts_with("photo-pipeline-loader-"));
    }
}
