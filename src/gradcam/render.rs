// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/gradcam/render.rs - 热力图着色、叠加与编码
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

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Luma, Rgb, RgbImage, imageops::FilterType};
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("编码器错误: {0}")]
  Other(String),
}

/// 图像编码接缝，便于替换与测试
pub trait ImageEncoder: Send + Sync {
  fn encode_png(&self, image: &RgbImage) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PngEncoder;

impl ImageEncoder for PngEncoder {
  fn encode_png(&self, image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
  }
}

/// 双线性缩放到 `size x size`，结果截断到 [0, 1]
pub fn resize_map(map: &Array2<f32>, size: u32) -> Array2<f32> {
  let (h, w) = map.dim();
  let source: ImageBuffer<Luma<f32>, Vec<f32>> =
    ImageBuffer::from_fn(w as u32, h as u32, |x, y| Luma([map[[y as usize, x as usize]]]));
  let resized = image::imageops::resize(&source, size, size, FilterType::Triangle);
  Array2::from_shape_fn((size as usize, size as usize), |(y, x)| {
    resized.get_pixel(x as u32, y as u32)[0].clamp(0.0, 1.0)
  })
}

/// JET 色标：0 为深蓝，1 为深红
pub fn jet(v: f32) -> Rgb<u8> {
  let v = v.clamp(0.0, 1.0);
  let channel = |center: f32| {
    let c = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
    (c * 255.0).round() as u8
  };
  Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

pub fn colorize(map: &Array2<f32>) -> RgbImage {
  let (h, w) = map.dim();
  RgbImage::from_fn(w as u32, h as u32, |x, y| jet(map[[y as usize, x as usize]]))
}

/// `alpha * heat + (1 - alpha) * base`，两图尺寸必须一致
pub fn blend(base: &RgbImage, heat: &RgbImage, alpha: f32) -> RgbImage {
  let alpha = alpha.clamp(0.0, 1.0);
  RgbImage::from_fn(base.width(), base.height(), |x, y| {
    let b = base.get_pixel(x, y);
    let h = heat.get_pixel(x, y);
    Rgb(std::array::from_fn(|c| {
      (alpha * h[c] as f32 + (1.0 - alpha) * b[c] as f32)
        .round()
        .clamp(0.0, 255.0) as u8
    }))
  })
}
