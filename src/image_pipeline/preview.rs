//! # 预览句柄管理
//!
//! ## 设计思路
//!
//! 渲染层通过“预览句柄”（浏览器里是 object URL）展示内存中的图片。
//! 句柄的分配与回收只允许经过 `PreviewResourceManager`，其他组件不得直接调用底层能力，
//! 从而杜绝重复回收、提前回收与泄漏。
//!
//! ## 实现思路
//!
//! - `PreviewAllocator` 抽象“分配 / 回收”两项能力，各平台替换自己的句柄实现。
//! - 默认实现 `ObjectUrlRegistry` 发放 `blob:photo-pipeline/<n>` 句柄，并可反查资产。
//! - `publish` 先分配新句柄、写入槽位，再回收旧句柄，使用方不会观察到空档。
//! - 该组件不会失败：锁中毒时直接取回内部数据继续工作。
//! - `Drop` 时回收所有仍存活的句柄。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::source::ImageAsset;

/// 默认槽位：当前编辑中的图片。
pub const CURRENT_SLOT: &str = "current";

/// 不透明、可回收的预览句柄。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PreviewHandle(String);

impl PreviewHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 平台提供的句柄分配 / 回收能力。
pub trait PreviewAllocator: Send + Sync {
    fn allocate(&self, asset: &ImageAsset) -> PreviewHandle;
    fn revoke(&self, handle: &PreviewHandle);
}

pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 进程内的 object URL 注册表。
#[derive(Default)]
pub struct ObjectUrlRegistry {
    next_id: AtomicU64,
    revoked: AtomicU64,
    live: Mutex<HashMap<PreviewHandle, ImageAsset>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析存活句柄对应的资产；已回收的句柄返回 `None`。
    pub fn resolve(&self, handle: &PreviewHandle) -> Option<ImageAsset> {
        lock_recover(&self.live).get(handle).cloned()
    }

    pub fn live_count(&self) -> usize {
        lock_recover(&self.live).len()
    }

    pub fn allocated_count(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn revoked_count(&self) -> u64 {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl PreviewAllocator for ObjectUrlRegistry {
    fn allocate(&self, asset: &ImageAsset) -> PreviewHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = PreviewHandle(format!("blob:photo-pipeline/{}", id));
        lock_recover(&self.live).insert(handle.clone(), asset.clone());
        handle
    }

    fn revoke(&self, handle: &PreviewHandle) {
        if lock_recover(&self.live).remove(handle).is_some() {
            self.revoked.fetch_add(1, Ordering::SeqCst);
        } else {
            log::warn!("⚠️ 回收未知或已回收的预览句柄：{}", handle.as_str());
        }
    }
}

/// 槽位 → 预览句柄的唯一持有者。
pub struct PreviewResourceManager {
    allocator: Arc<dyn PreviewAllocator>,
    slots: Mutex<HashMap<String, PreviewHandle>>,
}

impl PreviewResourceManager {
    pub fn new(allocator: Arc<dyn PreviewAllocator>) -> Self {
        Self {
            allocator,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 为 `asset` 分配新句柄并放入 `slot`，随后回收该槽位的旧句柄。
    pub fn publish(&self, slot: &str, asset: &ImageAsset) -> PreviewHandle {
        let handle = self.allocator.allocate(asset);
        let previous = lock_recover(&self.slots).insert(slot.to_string(), handle.clone());

        if let Some(previous) = previous {
            self.allocator.revoke(&previous);
        }

        log::debug!("🖼️ 发布预览 - slot={} handle={} asset={}", slot, handle.as_str(), asset.name());
        handle
    }

    /// 回收槽位句柄。空槽位或重复调用均为无操作。
    pub fn release(&self, slot: &str) {
        let previous = lock_recover(&self.slots).remove(slot);
        if let Some(previous) = previous {
            self.allocator.revoke(&previous);
        }
    }

    /// 回收所有槽位。之后仍可继续 `publish`。
    pub fn release_all(&self) {
        let drained: Vec<PreviewHandle> = lock_recover(&self.slots).drain().map(|(_, handle)| handle).collect();
        for handle in &drained {
            self.allocator.revoke(handle);
        }
        if !drained.is_empty() {
            log::debug!("🧹 已回收 {} 个预览句柄", drained.len());
        }
    }

    pub fn handle(&self, slot: &str) -> Option<PreviewHandle> {
        lock_recover(&self.slots).get(slot).cloned()
    }
}

impl Drop for PreviewResourceManager {
    fn drop(&mut self) {
        self.release_all();
    }
}
