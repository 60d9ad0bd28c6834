//! # 交互式裁剪
//!
//! ## 设计思路
//!
//! 裁剪分两步：交互阶段只做几何计算（缩放 + 平移 → 源图像素区域），
//! 提交阶段才解码源图、在离屏画布上绘制并导出。
//! 几何计算是纯函数，同样的 `(zoom, offset)` 总得到同样的区域，且区域永远落在源图内。
//!
//! ## 实现思路
//!
//! - 基准区域：源图内能放下的、符合目标宽高比的最大矩形；缩放倍数越大区域越小。
//! - 平移量以源图像素为单位，区域中心 = 源图中心 - 平移量，随后整体夹回源图范围。
//! - 圆形裁剪强制 1:1，输出为区域内居中的正方形（边长取宽高较小者），绘制前先设置圆形裁剪路径。
//! - 未产生过区域就提交 → `NoCropRegion`，不会默认裁整张图。

use chrono::Local;
use image::imageops::FilterType;
use serde::Serialize;

use super::canvas::RasterCanvas;
use super::codec::{self, DecodeLimits, OutputFormat};
use super::source::{ImageAsset, SourceKind};
use super::{ImageConfig, ImageError};

/// 裁剪形状。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CropShape {
    Rect,
    Circle,
}

/// 源图像素坐标系下的区域。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// 夹回 `source_width x source_height` 范围内，宽高至少为 1。
    pub fn clamped(self, source_width: u32, source_height: u32) -> Self {
        let width = self.width.clamp(1, source_width.max(1));
        let height = self.height.clamp(1, source_height.max(1));
        Self {
            x: self.x.min(source_width.saturating_sub(width)),
            y: self.y.min(source_height.saturating_sub(height)),
            width,
            height,
        }
    }
}

/// 平移量（源图像素）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CropOffset {
    pub x: f64,
    pub y: f64,
}

impl CropOffset {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 一次裁剪交互的临时状态。提交或取消后即被消费。
#[derive(Debug, Clone)]
pub struct CropSession {
    source: ImageAsset,
    source_width: u32,
    source_height: u32,
    shape: CropShape,
    aspect: f64,
    zoom: f64,
    offset: CropOffset,
    pixel_region: Option<PixelRegion>,
}

impl CropSession {
    pub fn source(&self) -> &ImageAsset {
        &self.source
    }

    pub fn source_dimensions(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    pub fn shape(&self) -> CropShape {
        self.shape
    }

    pub fn aspect(&self) -> f64 {
        self.aspect
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn offset(&self) -> CropOffset {
        self.offset
    }

    pub fn pixel_region(&self) -> Option<PixelRegion> {
        self.pixel_region
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// 由缩放与平移计算源图上的像素区域。
pub fn compute_pixel_region(
    source_width: u32,
    source_height: u32,
    aspect: f64,
    zoom: f64,
    offset: CropOffset,
    zoom_range: (f64, f64),
) -> PixelRegion {
    let (min_zoom, max_zoom) = zoom_range;
    let zoom = finite_or(zoom, min_zoom).clamp(min_zoom, max_zoom);
    let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };

    let src_w = source_width.max(1) as f64;
    let src_h = source_height.max(1) as f64;

    let (base_w, base_h) = if src_w / src_h > aspect {
        (src_h * aspect, src_h)
    } else {
        (src_w, src_w / aspect)
    };

    let width = (base_w / zoom).round().clamp(1.0, src_w);
    let height = (base_h / zoom).round().clamp(1.0, src_h);

    let center_x = src_w / 2.0 - finite_or(offset.x, 0.0);
    let center_y = src_h / 2.0 - finite_or(offset.y, 0.0);

    let x = (center_x - width / 2.0).round().clamp(0.0, src_w - width);
    let y = (center_y - height / 2.0).round().clamp(0.0, src_h - height);

    PixelRegion::new(x as u32, y as u32, width as u32, height as u32)
}

pub struct InteractiveCropper {
    zoom_range: (f64, f64),
    format: OutputFormat,
    filter: FilterType,
    limits: DecodeLimits,
}

impl InteractiveCropper {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            zoom_range: (config.min_zoom, config.max_zoom),
            format: config.crop_format,
            filter: config.resize_filter,
            limits: config.decode_limits(),
        }
    }

    /// 打开裁剪会话。只读取源图头部尺寸，不做完整解码。
    pub fn begin_session(&self, asset: &ImageAsset, shape: CropShape, aspect: f64) -> Result<CropSession, ImageError> {
        let aspect = match shape {
            CropShape::Circle => 1.0,
            CropShape::Rect if aspect.is_finite() && aspect > 0.0 => aspect,
            CropShape::Rect => return Err(ImageError::CropFailed(format!("宽高比无效：{}", aspect))),
        };

        let (source_width, source_height) =
            codec::inspect_dimensions(asset.bytes()).map_err(|e| e.in_stage(ImageError::CropFailed))?;

        log::debug!(
            "✂️ 打开裁剪会话 - {} {}x{} shape={:?} aspect={:.3}",
            asset.name(),
            source_width,
            source_height,
            shape,
            aspect
        );

        Ok(CropSession {
            source: asset.clone(),
            source_width,
            source_height,
            shape,
            aspect,
            zoom: self.zoom_range.0,
            offset: CropOffset::default(),
            pixel_region: None,
        })
    }

    pub fn update_region(&self, session: &mut CropSession, zoom: f64, offset: CropOffset) -> PixelRegion {
        let region = compute_pixel_region(
            session.source_width,
            session.source_height,
            session.aspect,
            zoom,
            offset,
            self.zoom_range,
        );
        session.zoom = finite_or(zoom, self.zoom_range.0).clamp(self.zoom_range.0, self.zoom_range.1);
        session.offset = offset;
        session.pixel_region = Some(region);
        region
    }

    /// 交互界面直接上报其计算出的区域。
    pub fn report_region(&self, session: &mut CropSession, region: PixelRegion) -> PixelRegion {
        let region = region.clamped(session.source_width, session.source_height);
        session.pixel_region = Some(region);
        region
    }

    pub fn commit(&self, session: &CropSession) -> Result<ImageAsset, ImageError> {
        let region = session.pixel_region.ok_or(ImageError::NoCropRegion)?;
        let decoded = codec::decode_with_limits(session.source.bytes(), &self.limits)
            .map_err(|e| e.in_stage(ImageError::CropFailed))?;
        let region = region.clamped(decoded.width(), decoded.height());

        let canvas = match session.shape {
            CropShape::Rect => {
                let mut canvas = RasterCanvas::new(region.width, region.height, self.filter)?;
                canvas.draw_image(
                    &decoded,
                    region.x,
                    region.y,
                    region.width,
                    region.height,
                    0,
                    0,
                    region.width,
                    region.height,
                )?;
                canvas
            }
            CropShape::Circle => {
                let side = region.width.min(region.height);
                let sx = region.x + (region.width - side) / 2;
                let sy = region.y + (region.height - side) / 2;
                let radius = side as f64 / 2.0;

                let mut canvas = RasterCanvas::new(side, side, self.filter)?;
                canvas.clip_circle(radius, radius, radius);
                canvas.draw_image(&decoded, sx, sy, side, side, 0, 0, side, side)?;
                canvas
            }
        };

        let encoded = canvas.export(self.format)?;
        let name = format!("cropped-image-{}.{}", Local::now().timestamp_millis(), self.format.extension());

        log::info!(
            "✂️ 裁剪完成 - {} -> {} {}x{} {}KB",
            session.source.name(),
            name,
            canvas.width(),
            canvas.height(),
            encoded.len() / 1024
        );

        Ok(ImageAsset::new(name, self.format.media_type(), encoded, SourceKind::Cropped))
    }

    pub fn cancel(&self, session: CropSession) {
        log::debug!("↩️ 取消裁剪 - {}", session.source.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::test_support::create_png_bytes;
    use proptest::prelude::*;

    fn cropper() -> InteractiveCropper {
        InteractiveCropper::new(&ImageConfig::default())
    }

    fn source(width: u32, height: u32) -> ImageAsset {
        ImageAsset::new("photo.png", "image/png", create_png_bytes(width, height), SourceKind::Compressed)
    }

    #[test]
    fn circle_crop_is_square_of_shorter_side() {
        let cropper = cropper();
        let mut session = cropper.begin_session(&source(640, 480), CropShape::Circle, 4.0 / 3.0).expect("session");
        assert_eq!(session.aspect(), 1.0);
        assert_eq!(session.source_dimensions(), (640, 480));

        cropper.report_region(&mut session, PixelRegion::new(100, 50, 300, 200));
        let asset = cropper.commit(&session).expect("commit");

        assert_eq!(codec::inspect_dimensions(asset.bytes()).expect("inspect"), (200, 200));
        assert_eq!(asset.kind(), SourceKind::Cropped);
        assert_eq!(asset.media_type(), "image/webp");
        assert!(asset.name().starts_with("cropped-image-"));
        assert!(asset.name().ends_with(".webp"));

        let decoded = image::load_from_memory(asset.bytes()).expect("decode").to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0[3], 0);
        assert_eq!(decoded.get_pixel(100, 100).0[3], 255);
    }

    #[test]
    fn rect_crop_matches_region() {
        let cropper = cropper();
        let mut session = cropper.begin_session(&source(400, 300), CropShape::Rect, 16.0 / 9.0).expect("session");

        let region = cropper.update_region(&mut session, 2.0, CropOffset::default());
        let asset = cropper.commit(&session).expect("commit");

        assert_eq!(
            codec::inspect_dimensions(asset.bytes()).expect("inspect"),
            (region.width, region.height)
        );
    }

    #[test]
    fn commit_without_region_fails() {
        let cropper = cropper();
        let session = cropper.begin_session(&source(64, 64), CropShape::Rect, 1.0).expect("session");

        assert_eq!(cropper.commit(&session).err(), Some(ImageError::NoCropRegion));
    }

    #[test]
    fn invalid_aspect_is_rejected_for_rect_only() {
        let cropper = cropper();
        let asset = source(64, 64);
        assert!(matches!(
            cropper.begin_session(&asset, CropShape::Rect, 0.0),
            Err(ImageError::CropFailed(_))
        ));
        assert!(cropper.begin_session(&asset, CropShape::Circle, f64::NAN).is_ok());
    }

    #[test]
    fn zoom_one_centered_covers_full_width() {
        let region = compute_pixel_region(1000, 500, 1.0, 1.0, CropOffset::default(), (1.0, 3.0));
        assert_eq!(region, PixelRegion::new(250, 0, 500, 500));
    }

    #[test]
    fn offset_is_clamped_to_source_edges() {
        let region = compute_pixel_region(1000, 500, 1.0, 2.0, CropOffset::new(10_000.0, -10_000.0), (1.0, 3.0));
        assert_eq!(region, PixelRegion::new(0, 250, 250, 250));
    }

    #[test]
    fn zoom_outside_range_is_clamped() {
        let low = compute_pixel_region(600, 600, 1.0, 0.1, CropOffset::default(), (1.0, 3.0));
        let high = compute_pixel_region(600, 600, 1.0, 99.0, CropOffset::default(), (1.0, 3.0));
        assert_eq!(low.width, 600);
        assert_eq!(high.width, 200);
    }

    #[test]
    fn reported_region_is_clamped() {
        let cropper = cropper();
        let mut session = cropper.begin_session(&source(100, 80), CropShape::Rect, 1.0).expect("session");

        let region = cropper.report_region(&mut session, PixelRegion::new(90, 70, 50, 50));
        assert_eq!(region, PixelRegion::new(50, 30, 50, 50));
    }

    #[test]
    fn corrupt_source_is_rejected_on_begin() {
        let asset = ImageAsset::new("bad.png", "image/png", vec![0u8; 32], SourceKind::Compressed);
        assert!(matches!(
            cropper().begin_session(&asset, CropShape::Rect, 1.0),
            Err(ImageError::CropFailed(_))
        ));
    }

    proptest! {
        #[test]
        fn region_is_deterministic_and_inside_source(
            width in 1u32..5000,
            height in 1u32..5000,
            aspect in 0.2f64..5.0,
            zoom in -1.0f64..6.0,
            dx in -10_000.0f64..10_000.0,
            dy in -10_000.0f64..10_000.0,
        ) {
            let offset = CropOffset::new(dx, dy);
            let a = compute_pixel_region(width, height, aspect, zoom, offset, (1.0, 3.0));
            let b = compute_pixel_region(width, height, aspect, zoom, offset, (1.0, 3.0));

            prop_assert_eq!(a, b);
            prop_assert!(a.width >= 1 && a.height >= 1);
            prop_assert!(a.x + a.width <= width);
            prop_assert!(a.y + a.height <= height);
        }

        #[test]
        fn clamped_region_stays_inside_source(
            width in 1u32..4000,
            height in 1u32..4000,
            x in 0u32..8000,
            y in 0u32..8000,
            w in 0u32..8000,
            h in 0u32..8000,
        ) {
            let region = PixelRegion::new(x, y, w, h).clamped(width, height);
            prop_assert!(region.width >= 1 && region.height >= 1);
            prop_assert!(region.x + region.width <= width);
            prop_assert!(region.y + region.height <= height);
        }
    }
}
