//! # 流水线协调器
//!
//! ## 设计思路
//!
//! `PipelineCoordinator` 是整条图片链路的唯一入口，由持有照片的表单 / 编辑器显式创建并注入，
//! 生命周期为 `new` → 若干操作 → `teardown`。对外只暴露四个操作与一个只读快照：
//! `select` / `crop` / `toggle_background` / `clear` / `snapshot`。
//!
//! 状态机：
//! ```text
//! idle ──select──▶ normalizing ──▶ compressing ──▶ ready
//! ready ──crop──▶ cropping ──▶ ready
//! ready ──toggle_background──▶ removing_background ──▶ ready
//! * ──clear──▶ idle
//! ```
//!
//! ## 实现思路
//!
//! - 每个操作开始时递增 `generation` 并记下自己的代号；进行中的旧操作不会被取消，
//!   但完成时代号已过期，结果（包括错误）一律丢弃，不触碰预览槽位与变体。
//! - 输入校验在递增代号之前完成：被拒绝的输入不会让进行中的操作失效。
//! - 解码 / 编码等 CPU 密集阶段放到 `spawn_blocking`，外部服务调用是普通的 await 点。
//! - 任何阶段失败都回到稳定状态（有图 → ready，无图 → idle），并记录最近一次错误；
//!   后续成功的操作会清除该错误。
//! - 配置通过 `Arc<RwLock<ImageConfig>>` 支持运行时切档，单次操作使用同一配置快照。
//! - 内部锁从不跨越 await 点。

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::Serialize;

use super::compressor::Compressor;
use super::cropper::{CropSession, CropShape, InteractiveCropper};
use super::format::{FormatNormalizer, HeifDecoder};
use super::loader::validate_selected_file;
use super::preview::{CURRENT_SLOT, ObjectUrlRegistry, PreviewAllocator, PreviewHandle, PreviewResourceManager, lock_recover};
use super::remover::BackgroundRemover;
use super::source::{ImageAsset, SelectedFile};
use super::variant::{ToggleStep, VariantKind, VariantManager, VariantPair};
use super::{ErrorReport, ImageConfig, ImageError, ImagePerformanceProfile};

/// 协调器状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineState {
    Idle,
    Normalizing,
    Compressing,
    Ready,
    Cropping,
    RemovingBackground,
}

impl PipelineState {
    /// 是否处于某个阶段之中。
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Idle | Self::Ready)
    }
}

/// 操作结果：被采纳，或因更新的操作开始而被丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Applied,
    Superseded,
}

/// 供 UI / 表单绑定的只读快照。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub active_asset: Option<ImageAsset>,
    pub active_kind: VariantKind,
    pub preview_handle: Option<PreviewHandle>,
    pub state: PipelineState,
    pub is_busy: bool,
    pub generation: u64,
    pub last_error: Option<ErrorReport>,
}

struct Inner {
    generation: u64,
    state: PipelineState,
    pair: VariantPair,
    last_error: Option<ErrorReport>,
}

impl Inner {
    fn stable_state(&self) -> PipelineState {
        if self.pair.is_empty() {
            PipelineState::Idle
        } else {
            PipelineState::Ready
        }
    }
}

async fn run_blocking<T, F>(stage: &'static str, task: F) -> Result<T, ImageError>
where
    F: FnOnce() -> Result<T, ImageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ImageError::ResourceLimit(format!("{} 阶段线程执行失败：{}", stage, e)))?
}

pub struct PipelineCoordinator<R> {
    config: Arc<RwLock<ImageConfig>>,
    heif_decoder: Option<Arc<dyn HeifDecoder>>,
    previews: PreviewResourceManager,
    variants: VariantManager<R>,
    slot: String,
    inner: Mutex<Inner>,
}

impl<R: BackgroundRemover> PipelineCoordinator<R> {
    /// 使用进程内 object URL 注册表作为预览句柄实现。
    ///
    /// # 示例
    /// ```rust,ignore
    /// use photo_pipeline::image_pipeline::{HttpBackgroundRemover, ImageConfig, PipelineCoordinator};
    ///
    /// let config = ImageConfig::default();
    /// let remover = HttpBackgroundRemover::new(&config)?;
    /// let coordinator = PipelineCoordinator::new(config, remover)?;
    /// # Ok::<(), photo_pipeline::image_pipeline::ImageError>(())
    /// ```
    pub fn new(config: ImageConfig, remover: R) -> Result<Self, ImageError> {
        Self::with_preview_allocator(config, remover, Arc::new(ObjectUrlRegistry::new()))
    }

    pub fn with_preview_allocator(
        config: ImageConfig,
        remover: R,
        allocator: Arc<dyn PreviewAllocator>,
    ) -> Result<Self, ImageError> {
        config.validate()?;
        let variants = VariantManager::with_config(remover, &config);

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            heif_decoder: None,
            previews: PreviewResourceManager::new(allocator),
            variants,
            slot: CURRENT_SLOT.to_string(),
            inner: Mutex::new(Inner {
                generation: 0,
                state: PipelineState::Idle,
                pair: VariantPair::default(),
                last_error: None,
            }),
        })
    }

    pub fn with_heif_decoder(mut self, decoder: Arc<dyn HeifDecoder>) -> Self {
        self.heif_decoder = Some(decoder);
        self
    }

    /// 绑定到其他预览槽位（如 "profile"）。
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    pub fn remover(&self) -> &R {
        self.variants.remover()
    }

    /// 获取配置快照，保证单次操作使用一致参数。
    pub fn config_snapshot(&self) -> Result<ImageConfig, ImageError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    pub fn set_config(&self, config: ImageConfig) -> Result<(), ImageError> {
        config.validate()?;
        let mut current = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        *current = config;
        Ok(())
    }

    pub fn set_performance_profile(&self, profile: ImagePerformanceProfile) -> Result<(), ImageError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        config.apply_performance_profile(profile);

        log::info!(
            "⚙️ 已切换图片性能档位：{:?}（max_dim={}, quality={}..{}, filter={:?}）",
            profile,
            config.compress_max_dimension,
            config.compress_initial_quality,
            config.compress_min_quality,
            config.resize_filter
        );

        Ok(())
    }

    pub fn get_performance_profile(&self) -> Result<ImagePerformanceProfile, ImageError> {
        let config = self
            .config
            .read()
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))?;
        Ok(config.infer_performance_profile())
    }

    /// 选择新图片：校验 → 格式转换 → 压缩 → 发布预览。
    pub async fn select(&self, file: SelectedFile) -> Result<OperationOutcome, ImageError> {
        let config = self.config_snapshot()?;
        if let Err(err) = validate_selected_file(&file, &config) {
            self.record_rejection(&err);
            return Err(err);
        }

        let generation = self.begin(PipelineState::Normalizing);
        let total_start = Instant::now();
        log::info!(
            "📥 选择图片 #{} - {} ({}) {}KB",
            generation,
            file.name,
            file.media_type,
            file.bytes.len() / 1024
        );

        let raw = ImageAsset::from_selected(file);
        let normalizer = FormatNormalizer::new(&config, self.heif_decoder.clone());
        let normalize_start = Instant::now();
        let normalized = match run_blocking("normalize", move || normalizer.normalize(&raw)).await {
            Ok(asset) => asset,
            Err(err) => return self.fail(generation, err),
        };
        let normalize_elapsed = normalize_start.elapsed();

        self.enter_stage(generation, PipelineState::Compressing);
        let compressor = Compressor::new(&config);
        let budget = config.compress_budget_bytes;
        let compress_start = Instant::now();
        let compressed = match run_blocking("compress", move || compressor.compress(&normalized, budget)).await {
            Ok(asset) => asset,
            Err(err) => return self.fail(generation, err),
        };
        let compress_elapsed = compress_start.elapsed();

        let outcome = self.commit_original(generation, compressed);
        log::info!(
            "✅ 选择处理完成 #{} - normalize={}ms compress={}ms total={}ms ({:?})",
            generation,
            normalize_elapsed.as_millis(),
            compress_elapsed.as_millis(),
            total_start.elapsed().as_millis(),
            outcome
        );
        Ok(outcome)
    }

    /// 以当前配置创建裁剪器（交互阶段的区域计算在调用方完成）。
    pub fn cropper(&self) -> Result<InteractiveCropper, ImageError> {
        Ok(InteractiveCropper::new(&self.config_snapshot()?))
    }

    /// 针对当前显示的图片打开裁剪会话。
    pub fn begin_crop(&self, shape: CropShape, aspect: f64) -> Result<CropSession, ImageError> {
        let cropper = self.cropper()?;
        let active = lock_recover(&self.inner).pair.active_asset().cloned();
        let Some(active) = active else {
            let err = ImageError::ValidationFailed("尚未选择图片".to_string());
            self.record_rejection(&err);
            return Err(err);
        };

        cropper.begin_session(&active, shape, aspect)
    }

    pub fn cancel_crop(&self, session: CropSession) {
        match self.cropper() {
            Ok(cropper) => cropper.cancel(session),
            Err(_) => drop(session),
        }
    }

    /// 提交裁剪：渲染区域 → 压缩 → 作为新原图发布。
    pub async fn crop(&self, session: CropSession) -> Result<OperationOutcome, ImageError> {
        let config = self.config_snapshot()?;
        if session.pixel_region().is_none() {
            let err = ImageError::NoCropRegion;
            self.record_rejection(&err);
            return Err(err);
        }

        let generation = self.begin(PipelineState::Cropping);
        let total_start = Instant::now();

        let cropper = InteractiveCropper::new(&config);
        let crop_start = Instant::now();
        let cropped = match run_blocking("crop", move || cropper.commit(&session)).await {
            Ok(asset) => asset,
            Err(err) => return self.fail(generation, err),
        };
        let crop_elapsed = crop_start.elapsed();

        let compressor = Compressor::new(&config);
        let budget = config.compress_budget_bytes;
        let compress_start = Instant::now();
        let compressed = match run_blocking("compress", move || compressor.compress(&cropped, budget)).await {
            Ok(asset) => asset,
            Err(err) => return self.fail(generation, err),
        };
        let compress_elapsed = compress_start.elapsed();

        let outcome = self.commit_original(generation, compressed);
        log::info!(
            "✅ 裁剪处理完成 #{} - crop={}ms compress={}ms total={}ms ({:?})",
            generation,
            crop_elapsed.as_millis(),
            compress_elapsed.as_millis(),
            total_start.elapsed().as_millis(),
            outcome
        );
        Ok(outcome)
    }

    /// 在原图与去背景版本之间切换，必要时调用外部服务。
    ///
    /// 切换规则由 `VariantManager` 的两步流程决定；服务调用期间不持有内部锁，
    /// 写回前检查代号，过期结果直接丢弃。
    pub async fn toggle_background(&self) -> Result<OperationOutcome, ImageError> {
        let config = self.config_snapshot()?;
        let (generation, normal) = {
            let mut inner = lock_recover(&self.inner);
            let step = match self.variants.begin_toggle(&mut inner.pair) {
                Ok(step) => step,
                Err(err) => {
                    log::warn!("⚠️ 操作被拒绝：{}", err);
                    inner.last_error = Some(ErrorReport::from(&err));
                    return Err(err);
                }
            };

            inner.generation += 1;
            let generation = inner.generation;

            match step {
                ToggleStep::Flipped(kind) => {
                    self.publish_active(&inner);
                    inner.state = PipelineState::Ready;
                    inner.last_error = None;
                    log::info!("🔁 切换图片变体 #{} -> {:?}（缓存）", generation, kind);
                    return Ok(OperationOutcome::Applied);
                }
                ToggleStep::NeedsRemoval(normal) => {
                    inner.state = PipelineState::RemovingBackground;
                    (generation, normal)
                }
            }
        };

        let remove_start = Instant::now();
        let result = self
            .variants
            .remove_background(&normal, &config.decode_limits())
            .await;

        let mut inner = lock_recover(&self.inner);
        if inner.generation != generation {
            log::debug!("⏭️ 背景去除结果已过期 #{}（当前 #{}）", generation, inner.generation);
            return Ok(OperationOutcome::Superseded);
        }

        match self.variants.finish_removal(&mut inner.pair, normal.id(), result) {
            Ok(_) => {
                self.publish_active(&inner);
                inner.state = PipelineState::Ready;
                inner.last_error = None;
                log::info!(
                    "🔁 切换图片变体 #{} -> BackgroundRemoved（remove_bg={}ms）",
                    generation,
                    remove_start.elapsed().as_millis()
                );
                Ok(OperationOutcome::Applied)
            }
            Err(err) => {
                inner.state = inner.stable_state();
                inner.last_error = Some(ErrorReport::from(&err));
                log::warn!("❌ 背景去除失败 #{}：{}", generation, err);
                Err(err)
            }
        }
    }

    /// 清空当前图片：回收预览、重置变体、回到 idle。进行中的操作随之失效。
    pub fn clear(&self) {
        let mut inner = lock_recover(&self.inner);
        inner.generation += 1;
        inner.pair.clear();
        inner.state = PipelineState::Idle;
        inner.last_error = None;
        self.previews.release(&self.slot);
        log::info!("🧹 已清空当前图片 #{}", inner.generation);
    }

    /// 所属表单 / 页面卸载时调用，回收全部预览句柄。
    pub fn teardown(&self) {
        self.clear();
        self.previews.release_all();
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let inner = lock_recover(&self.inner);
        PipelineSnapshot {
            active_asset: inner.pair.active_asset().cloned(),
            active_kind: inner.pair.active_kind(),
            preview_handle: self.previews.handle(&self.slot),
            state: inner.state,
            is_busy: inner.state.is_transient(),
            generation: inner.generation,
            last_error: inner.last_error.clone(),
        }
    }

    fn begin(&self, state: PipelineState) -> u64 {
        let mut inner = lock_recover(&self.inner);
        inner.generation += 1;
        inner.state = state;
        inner.generation
    }

    fn enter_stage(&self, generation: u64, state: PipelineState) {
        let mut inner = lock_recover(&self.inner);
        if inner.generation == generation {
            inner.state = state;
        }
    }

    /// 阶段开始前的拒绝：只记录错误，不影响状态与进行中的操作。
    fn record_rejection(&self, err: &ImageError) {
        log::warn!("⚠️ 操作被拒绝：{}", err);
        lock_recover(&self.inner).last_error = Some(ErrorReport::from(err));
    }

    fn fail(&self, generation: u64, err: ImageError) -> Result<OperationOutcome, ImageError> {
        let mut inner = lock_recover(&self.inner);
        if inner.generation != generation {
            log::debug!("⏭️ 过期操作失败，忽略 #{}：{}", generation, err);
            return Ok(OperationOutcome::Superseded);
        }

        inner.state = inner.stable_state();
        inner.last_error = Some(ErrorReport::from(&err));
        log::warn!("❌ {} 阶段失败 #{}：{}", err.stage(), generation, err);
        Err(err)
    }

    fn commit_original(&self, generation: u64, asset: ImageAsset) -> OperationOutcome {
        let mut inner = lock_recover(&self.inner);
        if inner.generation != generation {
            log::debug!("⏭️ 结果已过期，丢弃 #{}（当前 #{}）- {}", generation, inner.generation, asset.name());
            return OperationOutcome::Superseded;
        }

        self.variants.set_original(&mut inner.pair, asset);
        self.publish_active(&inner);
        inner.state = PipelineState::Ready;
        inner.last_error = None;
        OperationOutcome::Applied
    }

    fn publish_active(&self, inner: &Inner) {
        match inner.pair.active_asset() {
            Some(asset) => {
                self.previews.publish(&self.slot, asset);
            }
            None => self.previews.release(&self.slot),
        }
    }
}
