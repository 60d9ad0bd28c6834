//! # 离屏光栅画布
//!
//! 裁剪阶段使用的软件 2D 画布，提供渲染面所需的最小原语：
//! 圆形路径裁剪、`drawImage(src, sx, sy, sw, sh, dx, dy, dw, dh)` 与导出为编码字节。
//! 画布初始完全透明，绘制采用 source-over 合成；圆形裁剪边缘按 4x4 超采样做抗锯齿。

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use super::ImageError;
use super::codec::{self, OutputFormat};

const SUBSAMPLES: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct CircleClip {
    cx: f64,
    cy: f64,
    radius: f64,
}

impl CircleClip {
    /// 像素 (x, y) 被裁剪区域覆盖的比例。
    fn coverage(&self, x: u32, y: u32) -> f32 {
        let px = x as f64 + 0.5 - self.cx;
        let py = y as f64 + 0.5 - self.cy;
        let distance = (px * px + py * py).sqrt();

        if distance <= self.radius - std::f64::consts::FRAC_1_SQRT_2 {
            return 1.0;
        }
        if distance >= self.radius + std::f64::consts::FRAC_1_SQRT_2 {
            return 0.0;
        }

        let step = 1.0 / SUBSAMPLES as f64;
        let r2 = self.radius * self.radius;
        let mut inside = 0u32;
        for sy in 0..SUBSAMPLES {
            for sx in 0..SUBSAMPLES {
                let ox = x as f64 + (sx as f64 + 0.5) * step - self.cx;
                let oy = y as f64 + (sy as f64 + 0.5) * step - self.cy;
                if ox * ox + oy * oy <= r2 {
                    inside += 1;
                }
            }
        }
        inside as f32 / (SUBSAMPLES * SUBSAMPLES) as f32
    }
}

pub struct RasterCanvas {
    pixels: RgbaImage,
    clip: Option<CircleClip>,
    filter: FilterType,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32, filter: FilterType) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::CropFailed(format!("画布尺寸无效：{}x{}", width, height)));
        }

        Ok(Self {
            pixels: RgbaImage::new(width, height),
            clip: None,
            filter,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// 以 (cx, cy) 为圆心、`radius` 为半径的圆作为后续绘制的裁剪区域。
    pub fn clip_circle(&mut self, cx: f64, cy: f64, radius: f64) {
        self.clip = Some(CircleClip { cx, cy, radius: radius.max(0.0) });
    }

    /// 将 `src` 的 (sx, sy, sw, sh) 区域缩放绘制到画布的 (dx, dy, dw, dh)。
    #[allow(clippy::too_many_arguments)]
    pub fn draw_image(
        &mut self,
        src: &DynamicImage,
        sx: u32,
        sy: u32,
        sw: u32,
        sh: u32,
        dx: u32,
        dy: u32,
        dw: u32,
        dh: u32,
    ) -> Result<(), ImageError> {
        let (src_width, src_height) = src.dimensions();
        if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
            return Err(ImageError::CropFailed("绘制区域为空".to_string()));
        }
        if sx.saturating_add(sw) > src_width || sy.saturating_add(sh) > src_height {
            return Err(ImageError::CropFailed(format!(
                "源区域超出图片范围：({}, {}, {}x{}) / {}x{}",
                sx, sy, sw, sh, src_width, src_height
            )));
        }

        let region = DynamicImage::ImageRgba8(src.crop_imm(sx, sy, sw, sh).to_rgba8());
        let scaled = codec::resize_exact(&region, dw, dh, self.filter).to_rgba8();

        let canvas_width = self.pixels.width();
        let canvas_height = self.pixels.height();

        for (x, y, pixel) in scaled.enumerate_pixels() {
            let tx = dx.saturating_add(x);
            let ty = dy.saturating_add(y);
            if tx >= canvas_width || ty >= canvas_height {
                continue;
            }

            let coverage = self.clip.map_or(1.0, |clip| clip.coverage(tx, ty));
            if coverage <= 0.0 {
                continue;
            }

            let dst = self.pixels.get_pixel_mut(tx, ty);
            *dst = source_over(*pixel, *dst, coverage);
        }

        Ok(())
    }

    pub fn export(&self, format: OutputFormat) -> Result<Vec<u8>, ImageError> {
        codec::encode(&DynamicImage::ImageRgba8(self.pixels.clone()), format, 100)
            .map_err(|e| e.in_stage(ImageError::CropFailed))
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

fn source_over(src: Rgba<u8>, dst: Rgba<u8>, coverage: f32) -> Rgba<u8> {
    let sa = src.0[3] as f32 / 255.0 * coverage;
    let da = dst.0[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for channel in 0..3 {
        let sc = src.0[channel] as f32;
        let dc = dst.0[channel] as f32;
        out[channel] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}
