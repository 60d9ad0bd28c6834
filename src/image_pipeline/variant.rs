//! # 图片变体管理
//!
//! 同一张照片维护两个版本：原图（normal）与去背景版本（background removed）。
//! 去背景版本按需懒计算，并针对当前原图缓存，原图一旦替换即作废。
//! 不变量：激活去背景版本时，该版本一定存在。

use serde::Serialize;

use super::codec::{self, DecodeLimits};
use super::loader::sniff_media_type;
use super::remover::BackgroundRemover;
use super::source::{ImageAsset, SourceKind};
use super::{ImageConfig, ImageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VariantKind {
    #[default]
    Normal,
    BackgroundRemoved,
}

/// 一张照片的两个变体。
#[derive(Debug, Clone, Default)]
pub struct VariantPair {
    normal: Option<ImageAsset>,
    background_removed: Option<ImageAsset>,
    active: VariantKind,
}

impl VariantPair {
    pub fn normal(&self) -> Option<&ImageAsset> {
        self.normal.as_ref()
    }

    pub fn background_removed(&self) -> Option<&ImageAsset> {
        self.background_removed.as_ref()
    }

    pub fn active_kind(&self) -> VariantKind {
        self.active
    }

    pub fn active_asset(&self) -> Option<&ImageAsset> {
        match self.active {
            VariantKind::Normal => self.normal.as_ref(),
            VariantKind::BackgroundRemoved => self.background_removed.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normal.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// 切换的第一步结果。
#[derive(Debug)]
pub(crate) enum ToggleStep {
    /// 两个变体都已存在，已直接翻转。
    Flipped(VariantKind),
    /// 需要先对该原图调用外部服务。
    NeedsRemoval(ImageAsset),
}

fn extension_for_media_type(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/jpeg" => "jpg",
        _ => "webp",
    }
}

fn as_removal_failure(err: ImageError) -> ImageError {
    match err {
        ImageError::Decode(message) | ImageError::ResourceLimit(message) => {
            ImageError::BackgroundRemovalFailed(message)
        }
        other => other,
    }
}

/// 维护 `VariantPair` 的规则，并持有外部去背景服务。
///
/// 切换分两步：`begin_toggle` 在持有状态时完成（命中缓存直接翻转），
/// `finish_removal` 在服务返回后写回结果。两步之间不持有 `VariantPair`，
/// 协调器在其中插入自己的过期检查；`toggle` / `request_background_removed` 直接串起两步。
pub struct VariantManager<R> {
    remover: R,
    limits: DecodeLimits,
}

impl<R: BackgroundRemover> VariantManager<R> {
    pub fn new(remover: R) -> Self {
        Self::with_config(remover, &ImageConfig::default())
    }

    /// 使用指定配置中的解码上限校验服务返回的图片。
    pub fn with_config(remover: R, config: &ImageConfig) -> Self {
        Self {
            remover,
            limits: config.decode_limits(),
        }
    }

    pub fn remover(&self) -> &R {
        &self.remover
    }

    /// 替换原图：旧的去背景结果作废，激活原图。
    pub fn set_original(&self, pair: &mut VariantPair, asset: ImageAsset) {
        pair.normal = Some(asset);
        pair.background_removed = None;
        pair.active = VariantKind::Normal;
    }

    /// 取得去背景版本。已缓存时直接返回，否则调用外部服务一次。
    pub async fn request_background_removed(&self, pair: &mut VariantPair) -> Result<ImageAsset, ImageError> {
        if let Some(cached) = &pair.background_removed {
            log::debug!("♻️ 命中去背景缓存 - {}", cached.name());
            return Ok(cached.clone());
        }

        let normal = pair
            .normal
            .clone()
            .ok_or_else(|| ImageError::ValidationFailed("尚未选择图片".to_string()))?;

        let result = self.remove_background(&normal, &self.limits).await;
        self.finish_removal(pair, normal.id(), result)
    }

    /// 在两个变体之间切换；去背景版本不存在时先请求。
    pub async fn toggle(&self, pair: &mut VariantPair) -> Result<VariantKind, ImageError> {
        match self.begin_toggle(pair)? {
            ToggleStep::Flipped(kind) => Ok(kind),
            ToggleStep::NeedsRemoval(normal) => {
                let result = self.remove_background(&normal, &self.limits).await;
                self.finish_removal(pair, normal.id(), result)?;
                Ok(pair.active)
            }
        }
    }

    /// 没有原图时拒绝；已缓存时翻转，否则交出需要处理的原图。
    pub(crate) fn begin_toggle(&self, pair: &mut VariantPair) -> Result<ToggleStep, ImageError> {
        let Some(normal) = pair.normal.clone() else {
            return Err(ImageError::ValidationFailed("尚未选择图片".to_string()));
        };

        if pair.background_removed.is_none() {
            return Ok(ToggleStep::NeedsRemoval(normal));
        }

        pair.active = match pair.active {
            VariantKind::Normal => VariantKind::BackgroundRemoved,
            VariantKind::BackgroundRemoved => VariantKind::Normal,
        };
        Ok(ToggleStep::Flipped(pair.active))
    }

    /// 写回服务结果：成功则缓存并激活，失败则回到原图并返回错误。
    pub(crate) fn finish_removal(
        &self,
        pair: &mut VariantPair,
        normal_id: u64,
        result: Result<ImageAsset, ImageError>,
    ) -> Result<ImageAsset, ImageError> {
        match result {
            Ok(asset) => {
                self.store_background_removed(pair, normal_id, asset.clone());
                Ok(asset)
            }
            Err(err) => {
                pair.active = VariantKind::Normal;
                Err(err)
            }
        }
    }

    /// 调用外部服务并包装结果，不修改任何变体状态。
    ///
    /// 返回的图片按 `limits` 检查尺寸，超限视为服务失败，不会成为可显示的版本。
    pub(crate) async fn remove_background(
        &self,
        normal: &ImageAsset,
        limits: &DecodeLimits,
    ) -> Result<ImageAsset, ImageError> {
        let bytes = self
            .remover
            .remove(normal.bytes().clone(), normal.media_type().to_string())
            .await?;

        let media_type = sniff_media_type(&bytes)
            .ok_or_else(|| ImageError::BackgroundRemovalFailed("返回内容不是图片".to_string()))?;
        let (width, height) = codec::inspect_dimensions(&bytes).map_err(as_removal_failure)?;
        codec::validate_pixel_limits(limits, width, height).map_err(as_removal_failure)?;
        codec::validate_decoded_memory_limits(limits, width, height).map_err(as_removal_failure)?;

        let name = format!("{}_removed_bg.{}", normal.stem(), extension_for_media_type(media_type));
        log::debug!("🪄 去背景结果 - {} {}x{} {}KB", name, width, height, bytes.len() / 1024);

        Ok(ImageAsset::new(name, media_type, bytes, SourceKind::BackgroundRemoved))
    }

    /// 仅当原图仍是 `normal_id` 时写入结果并激活；返回是否写入。
    pub(crate) fn store_background_removed(&self, pair: &mut VariantPair, normal_id: u64, asset: ImageAsset) -> bool {
        if pair.normal.as_ref().map(ImageAsset::id) != Some(normal_id) {
            log::debug!("⏭️ 原图已替换，丢弃去背景结果 - {}", asset.name());
            return false;
        }

        pair.background_removed = Some(asset);
        pair.active = VariantKind::BackgroundRemoved;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::test_support::{CountingRemover, create_png_bytes};
    use std::sync::Arc;

    fn original(name: &str) -> ImageAsset {
        ImageAsset::new(name, "image/png", create_png_bytes(16, 16), SourceKind::Compressed)
    }

    #[tokio::test]
    async fn toggle_calls_collaborator_once_then_hits_cache() {
        let remover = Arc::new(CountingRemover::default());
        let manager = VariantManager::new(remover.clone());
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("shirt.png"));

        assert_eq!(manager.toggle(&mut pair).await.expect("toggle"), VariantKind::BackgroundRemoved);
        assert_eq!(manager.toggle(&mut pair).await.expect("toggle"), VariantKind::Normal);
        assert_eq!(manager.toggle(&mut pair).await.expect("toggle"), VariantKind::BackgroundRemoved);

        assert_eq!(remover.calls(), 1);
        let removed = pair.active_asset().expect("active asset");
        assert_eq!(removed.name(), "shirt_removed_bg.png");
        assert_eq!(removed.kind(), SourceKind::BackgroundRemoved);
    }

    #[tokio::test]
    async fn request_returns_cached_variant() {
        let remover = Arc::new(CountingRemover::default());
        let manager = VariantManager::new(remover.clone());
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("a.png"));

        let first = manager.request_background_removed(&mut pair).await.expect("first");
        let second = manager.request_background_removed(&mut pair).await.expect("second");

        assert_eq!(first.id(), second.id());
        assert_eq!(remover.calls(), 1);
    }

    #[tokio::test]
    async fn set_original_invalidates_previous_result() {
        let remover = Arc::new(CountingRemover::default());
        let manager = VariantManager::new(remover.clone());
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("a.png"));
        manager.toggle(&mut pair).await.expect("toggle");

        manager.set_original(&mut pair, original("b.png"));
        assert!(pair.background_removed().is_none());
        assert_eq!(pair.active_kind(), VariantKind::Normal);

        manager.toggle(&mut pair).await.expect("toggle");
        assert_eq!(remover.calls(), 2);
    }

    #[tokio::test]
    async fn failure_keeps_normal_active_and_surfaces_error() {
        let manager = VariantManager::new(CountingRemover::failing("service unavailable"));
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("a.png"));

        let result = manager.toggle(&mut pair).await;

        assert_eq!(
            result.err(),
            Some(ImageError::BackgroundRemovalFailed("service unavailable".to_string()))
        );
        assert!(pair.background_removed().is_none());
        assert_eq!(pair.active_kind(), VariantKind::Normal);
    }

    #[tokio::test]
    async fn toggle_without_original_is_rejected() {
        let manager = VariantManager::new(CountingRemover::default());
        let mut pair = VariantPair::default();

        assert!(matches!(manager.toggle(&mut pair).await, Err(ImageError::ValidationFailed(_))));
        assert_eq!(manager.remover().calls(), 0);
    }

    #[tokio::test]
    async fn result_over_decode_limit_is_rejected() {
        let mut config = ImageConfig::default();
        config.max_decoded_pixels = 100;
        let manager = VariantManager::with_config(CountingRemover::default(), &config);
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("a.png"));

        let result = manager.toggle(&mut pair).await;

        assert!(matches!(result, Err(ImageError::BackgroundRemovalFailed(_))));
        assert!(pair.background_removed().is_none());
        assert_eq!(pair.active_kind(), VariantKind::Normal);
        assert_eq!(manager.remover().calls(), 1);
    }

    #[tokio::test]
    async fn non_image_result_is_rejected() {
        struct TextRemover;

        impl BackgroundRemover for TextRemover {
            async fn remove(&self, _bytes: bytes::Bytes, _media_type: String) -> Result<bytes::Bytes, ImageError> {
                Ok(bytes::Bytes::from_static(b"{\"status\":\"ok\"}"))
            }
        }

        let manager = VariantManager::new(TextRemover);
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("a.png"));

        let result = manager.request_background_removed(&mut pair).await;
        assert!(matches!(result, Err(ImageError::BackgroundRemovalFailed(_))));
        assert_eq!(pair.active_kind(), VariantKind::Normal);
    }

    #[test]
    fn stale_result_is_not_stored() {
        let manager = VariantManager::new(CountingRemover::default());
        let mut pair = VariantPair::default();
        manager.set_original(&mut pair, original("a.png"));
        let removed = ImageAsset::new("x.png", "image/png", create_png_bytes(4, 4), SourceKind::BackgroundRemoved);

        assert!(!manager.store_background_removed(&mut pair, u64::MAX, removed));
        assert_eq!(pair.active_kind(), VariantKind::Normal);
    }
}
