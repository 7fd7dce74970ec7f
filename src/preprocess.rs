// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/preprocess.rs - 特征增强预处理
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

use image::{ImageBuffer, Rgb, imageops::FilterType};
use tracing::debug;

use crate::{
  config::PreprocessConfig,
  frame::{DecodedImage, MODEL_INPUT_SIZE, ModelTensor},
};

mod clahe;
pub use self::clahe::clahe;

type Rgb32F = ImageBuffer<Rgb<f32>, Vec<f32>>;

/// 固定顺序：灰度 → CLAHE → gamma → 复制为三通道 → 拉伸缩放到 224x224。
///
/// 输出保持 [0, 255] 浮点，不做 1/255 缩放。
pub fn preprocess(image: &DecodedImage, config: &PreprocessConfig) -> ModelTensor {
  let gray = image.to_gray();
  let equalized = clahe(&gray, config.clahe_clip_limit, config.clahe_tile_grid);

  let inv_gamma = 1.0 / config.gamma;
  let mut lut = [0.0f32; 256];
  for (i, v) in lut.iter_mut().enumerate() {
    *v = 255.0 * (i as f32 / 255.0).powf(inv_gamma);
  }

  let (w, h) = equalized.dimensions();
  let replicated = Rgb32F::from_fn(w, h, |x, y| {
    let v = lut[equalized.get_pixel(x, y)[0] as usize];
    Rgb([v, v, v])
  });

  let size = MODEL_INPUT_SIZE as u32;
  let resized = image::imageops::resize(&replicated, size, size, FilterType::Triangle);
  debug!("预处理: {}x{} -> {}x{}", w, h, size, size);

  ModelTensor::from_fn(|(y, x, c)| resized.get_pixel(x as u32, y as u32)[c].clamp(0.0, 255.0))
}
