//! 单元测试共用的样例数据与替身实现。

use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, Rgba};

use super::{BackgroundRemover, HeifDecoder, ImageError};

/// 带渐变纹理的 PNG。
pub(crate) fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x % 255) as u8;
        let g = (y % 255) as u8;
        let b = ((x + y) % 255) as u8;
        Rgba([r, g, b, 255])
    });

    let dyn_img = DynamicImage::ImageRgba8(img);
    let mut cursor = Cursor::new(Vec::new());
    dyn_img
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode test image");
    cursor.into_inner()
}

/// 伪随机噪声 JPEG，几乎不可压缩，用来制造“超预算”的输入。
pub(crate) fn create_noise_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    let img = ImageBuffer::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .expect("failed to encode noise jpeg");
    cursor.into_inner()
}

/// 只有 `ftyp` 头的 HEIC 容器，足以让签名识别为 `image/heif`。
pub(crate) fn heic_container_bytes() -> Vec<u8> {
    let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
    bytes.extend_from_slice(b"ftyp");
    bytes.extend_from_slice(b"heic");
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    bytes.extend_from_slice(b"mif1heic");
    bytes.extend_from_slice(&[0u8; 32]);
    bytes
}

/// 忽略输入、固定产出纯色图片的 HEIC 解码器。
pub(crate) struct SolidHeifDecoder {
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl HeifDecoder for SolidHeifDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<DynamicImage, ImageError> {
        Ok(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
            self.width,
            self.height,
            Rgb([200, 120, 40]),
        )))
    }
}

pub(crate) struct FailingHeifDecoder;

impl HeifDecoder for FailingHeifDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<DynamicImage, ImageError> {
        Err(ImageError::Decode("corrupt heif payload".to_string()))
    }
}

/// 记录调用次数的背景去除替身：成功时返回透明背景的 PNG。
#[derive(Default)]
pub(crate) struct CountingRemover {
    pub(crate) calls: AtomicUsize,
    pub(crate) fail_with: Mutex<Option<String>>,
}

impl CountingRemover {
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Mutex::new(Some(message.to_string())),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackgroundRemover for CountingRemover {
    async fn remove(&self, _bytes: Bytes, _media_type: String) -> Result<Bytes, ImageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let failure = self.fail_with.lock().expect("lock poisoned").clone();
        if let Some(message) = failure {
            return Err(ImageError::BackgroundRemovalFailed(message));
        }

        let img = ImageBuffer::from_fn(16, 16, |x, _| {
            if x < 8 { Rgba([0, 0, 0, 0]) } else { Rgba([255, 0, 0, 255]) }
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode removal result");
        Ok(Bytes::from(cursor.into_inner()))
    }
}
