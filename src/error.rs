//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 流水线内部只使用 `ImageError`；应用入口需要同时处理文件写出等 I/O，
//! 因此在最外层定义 `AppError` 汇总两类错误。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError` / `std::io::Error` 提供 `From` 转换，入口处直接 `?`。
//! - 实现 `Serialize` 将错误序列化为字符串，便于上层以 JSON 输出。

use serde::Serialize;

use crate::image_pipeline::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片流水线错误（校验 / 转换 / 压缩 / 裁剪 / 去背景）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 操作结果被更新的操作取代
    #[error("操作已被取代: {0}")]
    Superseded(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
