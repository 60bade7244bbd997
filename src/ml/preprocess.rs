//! 入力画像の前処理
//!
//! 任意の形式・サイズの画像を、学習時と同じ数値分布を持つ
//! `[1, size, size, 3]` (NHWC) のテンソルに変換します。
//!
//! MobileNetV2の前処理（"tf"モード）に合わせ、各チャネルを
//! `x / 127.5 - 1.0` で [-1, 1] に写像します。

use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use tracing::debug;

use crate::error::{InspectionError, Result};

/// 入力チャネル数（RGB）
pub const CHANNELS: usize = 3;

/// MobileNetV2 の前処理スケール
const SCALE: f32 = 127.5;
const OFFSET: f32 = 1.0;

/// 前処理済みテンソル
///
/// 形状は常に `[1, size, size, 3]`、データは行優先 (NHWC) で平坦化されている。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl ImageTensor {
    /// 形状とデータからテンソルを作成（要素数が一致しない場合はエラー）
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(InspectionError::Inference(format!(
                "tensor shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// 単一画像・正方形・3チャネルであることを確認し、一辺の長さを返す
    pub fn square_side(&self) -> Result<usize> {
        match self.shape {
            [1, h, w, CHANNELS] if h == w && h > 0 => Ok(h),
            shape => Err(InspectionError::Inference(format!(
                "expected tensor shape [1, S, S, 3], got {:?}",
                shape
            ))),
        }
    }
}

/// 画像をモデル入力テンソルに変換する
///
/// 1. RGBへ変換（グレースケール・パレット・アルファ付きも受け付ける。アルファは破棄）
/// 2. アスペクト比を保たずに `img_size × img_size` へバイキュービック補間でリサイズ
/// 3. `x / 127.5 - 1.0` で正規化
/// 4. 先頭にバッチ次元を追加
pub fn preprocess(image: &DynamicImage, img_size: u32) -> Result<ImageTensor> {
    if img_size == 0 {
        return Err(InspectionError::Config("img_size must be positive".to_string()));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(InspectionError::Image("image has no pixels".to_string()));
    }

    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let resized = if width == img_size && height == img_size {
        rgb
    } else {
        image::imageops::resize(&rgb, img_size, img_size, FilterType::CatmullRom)
    };
    debug!("Preprocessed {}x{} image to {}x{}", width, height, img_size, img_size);

    let data: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|value| value as f32 / SCALE - OFFSET)
        .collect();

    let side = img_size as usize;
    ImageTensor::new([1, side, side, CHANNELS], data)
}

/// 画像ファイルを読み込む
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path)
        .map_err(|e| InspectionError::Image(format!("Failed to load image {}: {}", path.display(), e)))
}

/// アップロードされたバイト列から画像をデコードする
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| {
        InspectionError::Image(format!("Failed to decode image: {}. Ensure it's a valid JPEG/PNG.", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_shape_for_various_inputs() {
        let inputs = vec![
            DynamicImage::ImageRgb8(RgbImage::new(640, 480)),
            DynamicImage::ImageRgb8(RgbImage::new(7, 3)),
            DynamicImage::ImageLuma8(GrayImage::new(300, 300)),
            DynamicImage::ImageRgba8(RgbaImage::new(50, 120)),
        ];

        for image in inputs {
            let tensor = preprocess(&image, 32).unwrap();
            assert_eq!(tensor.shape(), [1, 32, 32, 3]);
            assert_eq!(tensor.data().len(), 32 * 32 * 3);
            assert_eq!(tensor.square_side().unwrap(), 32);
        }
    }

    #[test]
    fn test_small_image_is_upscaled() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([255, 255, 255])));
        let tensor = preprocess(&image, 224).unwrap();
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        assert!(tensor.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_mobilenet_scaling() {
        // 0 -> -1.0, 255 -> 1.0, 値はNHWC順に並ぶ
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, Rgb([0, 255, 51]));
        image.put_pixel(1, 0, Rgb([255, 0, 204]));
        let tensor = preprocess(&DynamicImage::ImageRgb8(image), 2).unwrap();
        let data = tensor.data();
        assert!((data[0] + 1.0).abs() < 1e-6);
        assert!((data[1] - 1.0).abs() < 1e-6);
        assert!((data[2] - (51.0 / 127.5 - 1.0)).abs() < 1e-6);
        assert!((data[3] - 1.0).abs() < 1e-6);
        assert!((data[5] - (204.0 / 127.5 - 1.0)).abs() < 1e-6);
        // 2行目は黒
        assert!((data[6] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_replicated_to_rgb() {
        let image = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(4, 4, Luma([127u8])));
        let tensor = preprocess(&image, 4).unwrap();
        for pixel in tensor.data().chunks(3) {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    #[test]
    fn test_alpha_is_dropped() {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(3, 3, Rgba([255u8, 0, 0, 0])));
        let tensor = preprocess(&image, 3).unwrap();
        assert!((tensor.data()[0] - 1.0).abs() < 1e-6);
        assert!((tensor.data()[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic() {
        let mut image = RgbImage::new(37, 21);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8]);
        }
        let image = DynamicImage::ImageRgb8(image);
        assert_eq!(preprocess(&image, 16).unwrap(), preprocess(&image, 16).unwrap());
    }

    #[test]
    fn test_zero_size_rejected() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        assert!(preprocess(&image, 0).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_image(b"not an image").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Image);
    }
}
