//! # 照片采集与编辑流水线 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │        表单 / 个人资料编辑器（持有并注入协调器）          │
//! │  select · crop · toggle_background · clear · snapshot     │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<OperationOutcome, ImageError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            image_pipeline                         │
//! │                                                          │
//! │  ┌─ coordinator ── 状态机 + generation 过期丢弃            │
//! │  ├─ loader ─────── 输入校验 / 签名识别                     │
//! │  ├─ format ─────── HEIC 等非 Web 格式 → JPEG               │
//! │  ├─ compressor ─── 体积预算内重新编码                      │
//! │  ├─ preview ────── 预览句柄分配 / 回收（唯一持有者）        │
//! │  ├─ cropper ────── 缩放平移 → 像素区域 → 离屏绘制           │
//! │  └─ variant ────── 原图 / 去背景版本（外部服务）            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 应用级错误 `AppError`，命令行入口的返回类型 |
//! | [`image_pipeline`] | 图片选择、转换、压缩、裁剪、去背景与预览管理 |

pub mod error;
pub mod image_pipeline;
