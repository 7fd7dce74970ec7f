// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/validation.rs - X 光图像启发式校验门
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

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::{config::ValidationConfig, frame::DecodedImage};

mod ct_pattern;
mod signals;

pub use self::ct_pattern::{CircleMatch, strongest_central_circle};

pub const MESSAGE_VALID: &str = "Valid bone X-ray detected.";
pub const MESSAGE_INVALID: &str =
  "This image does not appear to be a valid bone X-ray. Please upload a clear X-ray image.";

pub const REASON_TOO_SMALL: &str = "Image is too small to be assessed";
pub const REASON_FLAT: &str = "Image is blank or flat (contrast is near zero)";
pub const REASON_NATURAL_PHOTO: &str =
  "Image appears to be a natural/color photograph (high colorfulness) rather than an X-ray";
pub const REASON_CT_LIKE: &str = "Image resembles a CT/MRI slice rather than a projection X-ray";
pub const REASON_LOW_RESOLUTION: &str = "Image resolution is too low for reliable assessment";
pub const REASON_LOW_CONTRAST: &str = "Image contrast is extremely low";
pub const REASON_BLURRY: &str = "Image appears blurry or out of focus";
pub const REASON_SPARSE_EDGES: &str = "Image contains too little structural detail";
pub const REASON_DENSE_EDGES: &str = "Image contains excessive texture/detail and may be non-X-ray";

/// 校验结论，生成后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
  pub valid: bool,
  pub message: String,
  pub reasons: Vec<String>,
  pub metrics: BTreeMap<String, f64>,
}

impl ValidationVerdict {
  /// 图像通过校验时，被触发的软信号转为警告
  pub fn soft_warnings(&self) -> Vec<String> {
    if !self.valid {
      return Vec::new();
    }
    self.reasons.iter().map(|r| format!("⚠ {}", r)).collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
  Hard,
  Soft,
}

#[derive(Default)]
struct Findings {
  reasons: Vec<(Severity, &'static str)>,
  metrics: BTreeMap<String, f64>,
}

impl Findings {
  fn flag(&mut self, severity: Severity, reason: &'static str) {
    self.reasons.push((severity, reason));
  }

  fn metric(&mut self, name: &str, value: f64) {
    self.metrics.insert(name.to_string(), value);
  }

  fn count(&self, severity: Severity) -> usize {
    self.reasons.iter().filter(|(s, _)| *s == severity).count()
  }
}

/// 纯函数：相同像素输入总得到相同结论
pub fn validate(image: &DecodedImage, config: &ValidationConfig) -> ValidationVerdict {
  let mut findings = Findings::default();
  let (w, h) = (image.width(), image.height());
  findings.metric("width", w as f64);
  findings.metric("height", h as f64);

  if w.min(h) < config.min_side {
    findings.flag(Severity::Hard, REASON_TOO_SMALL);
    return conclude(findings, config);
  }
  if w.min(h) < config.recommended_side {
    findings.flag(Severity::Soft, REASON_LOW_RESOLUTION);
  }

  let gray = image.to_gray();

  let (mean, std) = signals::intensity_stats(&gray);
  findings.metric("mean_intensity", mean);
  findings.metric("std_intensity", std);
  if std < config.flat_std_max {
    findings.flag(Severity::Hard, REASON_FLAT);
  }
  if std < config.low_contrast_std {
    findings.flag(Severity::Soft, REASON_LOW_CONTRAST);
  }

  let lap_var = signals::laplacian_variance(&gray);
  findings.metric("laplacian_variance", lap_var);
  if lap_var < config.min_laplacian_variance {
    findings.flag(Severity::Soft, REASON_BLURRY);
  }

  let color = signals::color_stats(image.rgb());
  findings.metric("saturation_mean", color.saturation_mean);
  findings.metric("channel_diff_mean", color.channel_diff_mean);
  findings.metric("colorfulness", color.colorfulness);
  let tinted = color.saturation_mean > config.max_saturation_mean
    && color.channel_diff_mean > config.max_channel_diff_mean;
  if tinted || color.colorfulness > config.max_colorfulness {
    findings.flag(Severity::Hard, REASON_NATURAL_PHOTO);
  }

  let circle = strongest_central_circle(&gray, &config.ct);
  let ct_like = circle.is_some_and(|c| c.looks_like_ct(&config.ct));
  findings.metric("ct_circle_coverage", circle.map(|c| c.excess).unwrap_or(0.0));
  findings.metric("ct_circle_contrast", circle.map(|c| c.contrast).unwrap_or(0.0));
  findings.metric("ct_like", if ct_like { 1.0 } else { 0.0 });
  if ct_like {
    findings.flag(Severity::Hard, REASON_CT_LIKE);
  }

  let density = signals::edge_density(&gray, config.canny_low, config.canny_high);
  let threshold = edge_density_threshold(w, h, lap_var, std, &color, config);
  findings.metric("edge_density", density);
  findings.metric("edge_density_threshold", threshold);
  if density < threshold {
    findings.flag(Severity::Soft, REASON_SPARSE_EDGES);
  }
  if density > config.max_edge_density {
    findings.flag(Severity::Soft, REASON_DENSE_EDGES);
  }

  findings.metric(
    "bright_ratio",
    signals::bright_ratio(&gray, config.bright_intensity),
  );

  conclude(findings, config)
}

/// 自适应的最低边缘密度：灰度图、高锐度图与低分辨率图的阈值更低
fn edge_density_threshold(
  w: u32,
  h: u32,
  lap_var: f64,
  std: f64,
  color: &signals::ColorStats,
  config: &ValidationConfig,
) -> f64 {
  let grayscale_like = color.saturation_mean < config.grayscale_saturation_max
    && color.channel_diff_mean < config.grayscale_channel_diff_max;
  let mut threshold = if grayscale_like {
    config.min_edge_density_grayscale
  } else {
    config.min_edge_density
  };
  if lap_var > config.sharp_laplacian_variance || std > config.sharp_std {
    threshold *= config.sharp_relief_factor;
  }
  let side = ((w as f64) * (h as f64)).sqrt();
  let scale = (side / config.reference_side).clamp(config.min_resolution_scale, 1.0);
  threshold * scale
}

fn conclude(mut findings: Findings, config: &ValidationConfig) -> ValidationVerdict {
  let hard = findings.count(Severity::Hard);
  let soft = findings.count(Severity::Soft);
  findings.metric("soft_signal_count", soft as f64);

  let valid = hard == 0 && soft < config.soft_reject_count;
  if valid {
    debug!("图像通过校验，软信号数量: {}", soft);
  } else {
    info!("图像未通过校验: 硬信号 {}, 软信号 {}", hard, soft);
  }

  ValidationVerdict {
    valid,
    message: if valid { MESSAGE_VALID } else { MESSAGE_INVALID }.to_string(),
    reasons: findings
      .reasons
      .into_iter()
      .map(|(_, r)| r.to_string())
      .collect(),
    metrics: findings.metrics,
  }
}
