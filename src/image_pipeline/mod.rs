//! # 图片流水线模块（image_pipeline）
//!
//! ## 设计思路
//!
//! 该模块将“选择文件 → 格式转换 → 压缩 → 预览发布 → 裁剪 → 去背景切换”
//! 按职责拆分为多个子模块，由 `PipelineCoordinator` 统一编排。
//!
//! - `coordinator`：状态机、代号（generation）与过期结果丢弃
//! - `loader`：输入校验、签名识别、本地文件读取
//! - `format`：格式分类与非 Web 格式转换
//! - `compressor`：体积预算内的重新编码
//! - `preview`：预览句柄的唯一分配 / 回收者
//! - `cropper` / `canvas`：裁剪几何与离屏光栅绘制
//! - `variant` / `remover`：原图与去背景版本、外部去背景服务
//! - `codec`：解码限制、缩放、编码等底层工具
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 实现思路
//!
//! 对外只暴露必要类型，内部工具函数保持 `pub(crate)`。
//! 平台相关能力（HEIC 解码、预览句柄、去背景服务）都以 trait 注入。
//!
//! ## 新同事快速上手
//!
//! ```text
//! 文件选择器 / 相册
//!    ↓
//! coordinator.rs::select（校验 + 递增 generation）
//!    ├─ loader.rs（类型 / 体积 / 签名校验）
//!    ├─ format.rs（HEIC 等 → JPEG）
//!    ├─ compressor.rs（预算内重新编码）
//!    └─ preview.rs（发布预览句柄，回收旧句柄）
//!    ↓
//! coordinator.rs::crop → cropper.rs + canvas.rs → compressor.rs → preview.rs
//! coordinator.rs::toggle_background → variant.rs → remover.rs → preview.rs
//!    ↓
//! snapshot()（表单绑定 activeAsset / previewHandle / state / isBusy）
//! ```

mod canvas;
mod codec;
mod compressor;
mod config;
mod coordinator;
mod cropper;
mod error;
mod format;
mod loader;
mod preview;
mod remover;
mod source;
mod variant;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::OutputFormat;
pub use compressor::{CompressionOutcome, Compressor};
pub use config::{ImageConfig, ImagePerformanceProfile};
pub use coordinator::{OperationOutcome, PipelineCoordinator, PipelineSnapshot, PipelineState};
pub use cropper::{CropOffset, CropSession, CropShape, InteractiveCropper, PixelRegion, compute_pixel_region};
pub use error::{ErrorReport, ImageError};
pub use format::{FormatClass, FormatNormalizer, HeifDecoder, classify_format};
pub use loader::{load_from_file, validate_selected_file};
pub use preview::{CURRENT_SLOT, ObjectUrlRegistry, PreviewAllocator, PreviewHandle, PreviewResourceManager};
pub use remover::{BackgroundRemover, HttpBackgroundRemover};
pub use source::{ImageAsset, SelectedFile, SourceKind};
pub use variant::{VariantKind, VariantManager, VariantPair};
