//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线中间结果”解耦：
//! - `SelectedFile` 表示文件选择器 / 相册交给流水线的原始文件
//! - `ImageAsset` 表示流水线中流转的不可变图片单元
//! - `SourceKind` 记录资产由哪个阶段产出
//!
//! 资产字节使用 `bytes::Bytes`，克隆只增加引用计数，任何变换都产出新资产。

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// 文件选择器 / 相册提供的单个文件。
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    /// 声明的媒体类型（可能为空或不可信）。
    pub media_type: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// 资产来源阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Raw,
    Normalized,
    Compressed,
    Cropped,
    BackgroundRemoved,
}

/// 流水线中的图片单元。创建后字节不再变化。
#[derive(Debug, Clone)]
pub struct ImageAsset {
    id: u64,
    name: String,
    media_type: String,
    bytes: Bytes,
    kind: SourceKind,
}

impl ImageAsset {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
        kind: SourceKind,
    ) -> Self {
        Self {
            id: NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
            kind,
        }
    }

    pub fn from_selected(file: SelectedFile) -> Self {
        Self::new(file.name, file.media_type, file.bytes, SourceKind::Raw)
    }

    /// 进程内唯一标识，用于判断两个资产是否为同一次产出。
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 文件名去掉扩展名后的部分。
    pub fn stem(&self) -> &str {
        file_stem(&self.name)
    }
}

/// 资产以摘要形式序列化，不携带字节本身。
impl Serialize for ImageAsset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ImageAsset", 5)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("mediaType", &self.media_type)?;
        state.serialize_field("byteLength", &self.bytes.len())?;
        state.serialize_field("kind", &self.kind)?;
        state.end()
    }
}

pub(crate) fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// 小写扩展名（不含点）。
pub(crate) fn file_extension(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => Some(name[idx + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

/// 把文件名的扩展名替换为 `extension`。
pub(crate) fn with_extension(name: &str, extension: &str) -> String {
    let stem = file_stem(name);
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{}.{}", stem, extension)
}
