// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/frame.rs - 解码图像与模型输入张量定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{GrayImage, Luma, RgbImage};
use ndarray::Array3;

/// 模型输入边长
pub const MODEL_INPUT_SIZE: usize = 224;
const RGB_CHANNELS: usize = 3;

/// 已解码、已按 EXIF 校正方向的 RGB 图像
#[derive(Debug, Clone)]
pub struct DecodedImage {
  rgb: RgbImage,
}

impl From<RgbImage> for DecodedImage {
  fn from(rgb: RgbImage) -> Self {
    Self { rgb }
  }
}

impl DecodedImage {
  pub fn width(&self) -> u32 {
    self.rgb.width()
  }

  pub fn height(&self) -> u32 {
    self.rgb.height()
  }

  pub fn rgb(&self) -> &RgbImage {
    &self.rgb
  }

  /// ITU-R BT.601 灰度转换（与常见 X 光处理流程保持一致）
  pub fn to_gray(&self) -> GrayImage {
    let (w, h) = self.rgb.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (x, y, p) in self.rgb.enumerate_pixels() {
      let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
      gray.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }
    gray
  }
}

/// 模型输入张量，形状固定为 224x224x3（HWC），取值范围 [0, 255]。
///
/// 约定：缩放到 [0, 1] 由模型自身完成，这里绝不能除以 255，
/// 否则会被重复缩放，预测结果会被静默破坏。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTensor {
  data: Array3<f32>,
}

#[derive(Debug, thiserror::Error)]
#[error("张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
pub struct TensorShapeError {
  pub expected: [usize; 3],
  pub actual: Vec<usize>,
}

impl TryFrom<Array3<f32>> for ModelTensor {
  type Error = TensorShapeError;

  fn try_from(data: Array3<f32>) -> Result<Self, Self::Error> {
    let expected = [MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, RGB_CHANNELS];
    if data.shape() != expected {
      return Err(TensorShapeError {
        expected,
        actual: data.shape().to_vec(),
      });
    }
    Ok(Self { data })
  }
}

impl ModelTensor {
  /// 按 (y, x, c) 坐标逐元素构造，形状恒为 224x224x3
  pub fn from_fn(f: impl FnMut((usize, usize, usize)) -> f32) -> Self {
    Self {
      data: Array3::from_shape_fn((MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, RGB_CHANNELS), f),
    }
  }

  pub fn as_array(&self) -> &Array3<f32> {
    &self.data
  }
}

impl AsRef<Array3<f32>> for ModelTensor {
  fn as_ref(&self) -> &Array3<f32> {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn gray_uses_bt601_weights() {
    let image = DecodedImage::from(RgbImage::from_pixel(2, 2, Rgb([255, 0, 0])));
    let gray = image.to_gray();
    assert_eq!(gray.get_pixel(0, 0)[0], 76);
  }

  #[test]
  fn tensor_rejects_wrong_shape() {
    let err = ModelTensor::try_from(Array3::<f32>::zeros((10, 10, 3))).unwrap_err();
    assert_eq!(err.actual, vec![10, 10, 3]);
    assert!(ModelTensor::try_from(Array3::<f32>::zeros((224, 224, 3))).is_ok());
  }
}
