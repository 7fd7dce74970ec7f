// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/validation/signals.rs - 图像质量与内容信号
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

use image::{GrayImage, RgbImage};
use imageproc::{edges::canny, filter::laplacian_filter};

/// 灰度均值与标准差
pub fn intensity_stats(gray: &GrayImage) -> (f64, f64) {
  let n = gray.len() as f64;
  if n == 0.0 {
    return (0.0, 0.0);
  }
  let mut sum = 0.0f64;
  let mut sum_sq = 0.0f64;
  for v in gray.as_raw() {
    let v = *v as f64;
    sum += v;
    sum_sq += v * v;
  }
  let mean = sum / n;
  let variance = (sum_sq / n - mean * mean).max(0.0);
  (mean, variance.sqrt())
}

/// 3x3 拉普拉斯响应的方差，越低越模糊
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
  if gray.width() < 3 || gray.height() < 3 {
    return 0.0;
  }
  let response = laplacian_filter(gray);
  let n = response.len() as f64;
  let mut sum = 0.0f64;
  let mut sum_sq = 0.0f64;
  for v in response.as_raw() {
    let v = *v as f64;
    sum += v;
    sum_sq += v * v;
  }
  let mean = sum / n;
  (sum_sq / n - mean * mean).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStats {
  /// HSV 饱和度均值（0-255 标度）
  pub saturation_mean: f64,
  /// 三通道两两差值绝对值的均值
  pub channel_diff_mean: f64,
  /// Hasler–Süsstrunk 色彩度
  pub colorfulness: f64,
}

pub fn color_stats(rgb: &RgbImage) -> ColorStats {
  let n = (rgb.width() as f64) * (rgb.height() as f64);
  if n == 0.0 {
    return ColorStats {
      saturation_mean: 0.0,
      channel_diff_mean: 0.0,
      colorfulness: 0.0,
    };
  }

  let mut sat_sum = 0.0f64;
  let mut diff_sum = 0.0f64;
  let (mut rg_sum, mut rg_sq) = (0.0f64, 0.0f64);
  let (mut yb_sum, mut yb_sq) = (0.0f64, 0.0f64);

  for p in rgb.pixels() {
    let (r, g, b) = (p[0] as f64, p[1] as f64, p[2] as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max > 0.0 {
      sat_sum += 255.0 * (max - min) / max;
    }
    diff_sum += ((r - g).abs() + (g - b).abs() + (r - b).abs()) / 3.0;

    let rg = r - g;
    let yb = 0.5 * (r + g) - b;
    rg_sum += rg;
    rg_sq += rg * rg;
    yb_sum += yb;
    yb_sq += yb * yb;
  }

  let rg_mean = rg_sum / n;
  let yb_mean = yb_sum / n;
  let rg_var = (rg_sq / n - rg_mean * rg_mean).max(0.0);
  let yb_var = (yb_sq / n - yb_mean * yb_mean).max(0.0);
  let colorfulness =
    (rg_var + yb_var).sqrt() + 0.3 * (rg_mean * rg_mean + yb_mean * yb_mean).sqrt();

  ColorStats {
    saturation_mean: sat_sum / n,
    channel_diff_mean: diff_sum / n,
    colorfulness,
  }
}

/// Canny 边缘像素占比
pub fn edge_density(gray: &GrayImage, low: f32, high: f32) -> f64 {
  if gray.width() < 3 || gray.height() < 3 {
    return 0.0;
  }
  let edges = canny(gray, low, high);
  let count = edges.as_raw().iter().filter(|v| **v > 0).count();
  count as f64 / edges.len() as f64
}

pub fn bright_ratio(gray: &GrayImage, threshold: u8) -> f64 {
  if gray.is_empty() {
    return 0.0;
  }
  let count = gray.as_raw().iter().filter(|v| **v > threshold).count();
  count as f64 / gray.len() as f64
}
