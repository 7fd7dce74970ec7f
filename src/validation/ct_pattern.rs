// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/validation/ct_pattern.rs - CT 断层圆形轮廓检测
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


use image::{GrayImage, imageops::FilterType};
use imageproc::{edges::canny, filter::gaussian_blur_f32};
use tracing::debug;

use crate::config::CtPatternConfig;

/// 圆形轮廓检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleMatch {
  pub center: (f64, f64),
  pub radius: f64,
  /// 圆周上落在边缘像素附近的采样比例
  pub coverage: f64,
  /// 同等边缘密度下随机命中的期望比例
  pub chance: f64,
  /// 扣除随机命中后的覆盖率，`(coverage - chance) / (1 - chance)`
  pub excess: f64,
  /// 圆内与圆外环带的平均灰度差
  pub contrast: f64,
}

impl CircleMatch {
  /// 圆周证据超过随机水平，且圆内外存在明显的灰度台阶
  pub fn looks_like_ct(&self, config: &CtPatternConfig) -> bool {
    self.excess > config.min_coverage && self.contrast >= config.min_contrast
  }
}

/// 在图像中心附近搜索大圆轮廓，返回超出随机水平最多的候选。
///
/// 在缩小后的边缘图上枚举圆心偏移与半径，沿圆周采样并统计
/// 邻域（3x3，相当于 3 像素线宽）内存在边缘像素的比例。
/// 纹理密集的图像仅凭随机也能命中很多采样点，所以按边缘密度扣除期望命中。
pub fn strongest_central_circle(gray: &GrayImage, config: &CtPatternConfig) -> Option<CircleMatch> {
  let (w, h) = gray.dimensions();
  if w < 16 || h < 16 {
    return None;
  }

  let scale = config.working_side as f64 / w.max(h) as f64;
  let small = if scale < 1.0 {
    let sw = ((w as f64 * scale) as u32).max(1);
    let sh = ((h as f64 * scale) as u32).max(1);
    image::imageops::resize(gray, sw, sh, FilterType::Triangle)
  } else {
    gray.clone()
  };

  let blurred = gaussian_blur_f32(&small, config.blur_sigma);
  let edges = canny(&blurred, config.canny_low, config.canny_high);
  let (sw, sh) = edges.dimensions();
  let min_side = sw.min(sh) as f64;

  let min_r = (min_side * config.min_radius).ceil().max(2.0) as u32;
  let max_r = (min_side * config.max_radius).floor() as u32;
  if max_r <= min_r {
    return None;
  }

  let density = edges.pixels().filter(|p| p[0] > 0).count() as f64 / (sw as f64 * sh as f64);
  let chance = 1.0 - (1.0 - density).powi(9);

  let tolerance = min_side * config.center_tolerance;
  let steps = config.center_steps.max(1);
  let (cx0, cy0) = (sw as f64 / 2.0, sh as f64 / 2.0);

  let mut best: Option<(f64, f64, f64, f64)> = None;
  for iy in 0..steps {
    for ix in 0..steps {
      let cx = cx0 + offset(ix, steps, tolerance);
      let cy = cy0 + offset(iy, steps, tolerance);
      for r in min_r..=max_r {
        let coverage = circle_coverage(&edges, cx, cy, r as f64);
        if best.is_none_or(|(_, _, _, c)| coverage > c) {
          best = Some((cx, cy, r as f64, coverage));
        }
      }
    }
  }

  let found = best.map(|(cx, cy, radius, coverage)| CircleMatch {
    center: (cx, cy),
    radius,
    coverage,
    chance,
    excess: excess_coverage(coverage, chance),
    contrast: ring_contrast(&blurred, cx, cy, radius),
  });
  debug!("最强中心圆: {:?}，边缘密度 {:.4}", found, density);
  found
}

fn excess_coverage(coverage: f64, chance: f64) -> f64 {
  if chance >= 1.0 {
    return 0.0;
  }
  ((coverage - chance) / (1.0 - chance)).max(0.0)
}

fn offset(i: u32, steps: u32, tolerance: f64) -> f64 {
  if steps == 1 {
    return 0.0;
  }
  // 偏移严格小于容差
  let span = tolerance * 0.99;
  -span + 2.0 * span * i as f64 / (steps - 1) as f64
}

fn has_edge_near(edges: &GrayImage, x: i64, y: i64) -> bool {
  let (w, h) = (edges.width() as i64, edges.height() as i64);
  for dy in -1..=1 {
    for dx in -1..=1 {
      let (nx, ny) = (x + dx, y + dy);
      let inside = nx >= 0 && ny >= 0 && nx < w && ny < h;
      if inside && edges.get_pixel(nx as u32, ny as u32)[0] > 0 {
        return true;
      }
    }
  }
  false
}

fn circle_coverage(edges: &GrayImage, cx: f64, cy: f64, r: f64) -> f64 {
  let (w, h) = (edges.width() as i64, edges.height() as i64);
  let samples = (2.0 * std::f64::consts::PI * r).ceil().max(8.0) as usize;
  let mut hits = 0usize;

  for k in 0..samples {
    let theta = 2.0 * std::f64::consts::PI * k as f64 / samples as f64;
    let x = (cx + r * theta.cos()).round() as i64;
    let y = (cy + r * theta.sin()).round() as i64;
    if x < 0 || y < 0 || x >= w || y >= h {
      continue;
    }
    if has_edge_near(edges, x, y) {
      hits += 1;
    }
  }

  // 圆周超出图像的部分按未命中计
  hits as f64 / samples as f64
}

/// 半径 0.8r 以内与 1.2r..1.4r 环带的平均灰度差；任一侧没有像素时为 0
fn ring_contrast(gray: &GrayImage, cx: f64, cy: f64, r: f64) -> f64 {
  let (mut inner, mut inner_n) = (0.0, 0usize);
  let (mut outer, mut outer_n) = (0.0, 0usize);
  for (x, y, p) in gray.enumerate_pixels() {
    let d = (x as f64 - cx).hypot(y as f64 - cy);
    let v = p[0] as f64;
    if d <= 0.8 * r {
      inner += v;
      inner_n += 1;
    } else if (1.2 * r..=1.4 * r).contains(&d) {
      outer += v;
      outer_n += 1;
    }
  }
  if inner_n == 0 || outer_n == 0 {
    return 0.0;
  }
  (inner / inner_n as f64 - outer / outer_n as f64).abs()
}
