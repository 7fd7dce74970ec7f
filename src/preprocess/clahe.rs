// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/preprocess/clahe.rs - 限制对比度自适应直方图均衡
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

use image::{GrayImage, Luma};

const BINS: usize = 256;

/// CLAHE：按网格分块统计直方图，裁剪后重新分配，
/// 再在相邻四块的映射表之间双线性插值。
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
  let (w, h) = gray.dimensions();
  if w == 0 || h == 0 {
    return gray.clone();
  }
  let grid_x = grid.clamp(1, w);
  let grid_y = grid.clamp(1, h);
  let tile_w = w.div_ceil(grid_x);
  let tile_h = h.div_ceil(grid_y);

  let mut luts = Vec::with_capacity((grid_x * grid_y) as usize);
  for ty in 0..grid_y {
    for tx in 0..grid_x {
      let x0 = (tx * tile_w).min(w);
      let y0 = (ty * tile_h).min(h);
      let x1 = ((tx + 1) * tile_w).min(w);
      let y1 = ((ty + 1) * tile_h).min(h);
      luts.push(tile_lut(gray, (x0, y0, x1, y1), clip_limit));
    }
  }

  let lut_at = |tx: u32, ty: u32| &luts[(ty * grid_x + tx) as usize];
  let inv_tw = 1.0 / tile_w as f32;
  let inv_th = 1.0 / tile_h as f32;

  GrayImage::from_fn(w, h, |x, y| {
    let v = gray.get_pixel(x, y)[0] as usize;

    let txf = x as f32 * inv_tw - 0.5;
    let tx1 = txf.floor();
    let px = txf - tx1;
    let tx2 = ((tx1 as i64 + 1).min(grid_x as i64 - 1)) as u32;
    let tx1 = tx1.max(0.0) as u32;

    let tyf = y as f32 * inv_th - 0.5;
    let ty1 = tyf.floor();
    let py = tyf - ty1;
    let ty2 = ((ty1 as i64 + 1).min(grid_y as i64 - 1)) as u32;
    let ty1 = ty1.max(0.0) as u32;

    let top = lut_at(tx1, ty1)[v] * (1.0 - px) + lut_at(tx2, ty1)[v] * px;
    let bottom = lut_at(tx1, ty2)[v] * (1.0 - px) + lut_at(tx2, ty2)[v] * px;
    let out = top * (1.0 - py) + bottom * py;
    Luma([out.round().clamp(0.0, 255.0) as u8])
  })
}

fn tile_lut(
  gray: &GrayImage,
  (x0, y0, x1, y1): (u32, u32, u32, u32),
  clip_limit: f32,
) -> [f32; BINS] {
  let mut lut = [0.0f32; BINS];
  let area = ((x1 - x0) * (y1 - y0)) as usize;
  if area == 0 {
    for (i, v) in lut.iter_mut().enumerate() {
      *v = i as f32;
    }
    return lut;
  }

  let mut hist = [0usize; BINS];
  for y in y0..y1 {
    for x in x0..x1 {
      hist[gray.get_pixel(x, y)[0] as usize] += 1;
    }
  }

  if clip_limit > 0.0 {
    let clip = ((clip_limit * area as f32 / BINS as f32) as usize).max(1);
    let mut excess = 0usize;
    for bin in hist.iter_mut() {
      if *bin > clip {
        excess += *bin - clip;
        *bin = clip;
      }
    }

    // 均匀回填，余数按步长散布
    let batch = excess / BINS;
    let residual = excess - batch * BINS;
    for bin in hist.iter_mut() {
      *bin += batch;
    }
    if residual > 0 {
      let step = (BINS / residual).max(1);
      for bin in hist.iter_mut().step_by(step).take(residual) {
        *bin += 1;
      }
    }
  }

  let scale = 255.0 / area as f32;
  let mut cdf = 0usize;
  for (i, bin) in hist.iter().enumerate() {
    cdf += bin;
    lut[i] = (cdf as f32 * scale).min(255.0);
  }
  lut
}
