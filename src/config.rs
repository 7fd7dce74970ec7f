// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DISCLAIMER: &str = "This system is a research-based decision support tool and \
                                      not a replacement for professional medical diagnosis.";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 整条流水线的配置，所有字段均有默认值，JSON 中可只写需要覆盖的部分
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub validation: ValidationConfig,
  pub preprocess: PreprocessConfig,
  pub classifier: ClassifierConfig,
  pub gradcam: GradCamConfig,
  pub disclaimer: Disclaimer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Disclaimer(pub String);

impl Default for Disclaimer {
  fn default() -> Self {
    Disclaimer(DEFAULT_DISCLAIMER.to_string())
  }
}

impl PipelineConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }
}

/// 校验门限。这些阈值是经验值，需要按实际数据校准。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
  /// 最短边低于该值直接拒绝
  pub min_side: u32,
  /// 最短边低于该值记为软信号
  pub recommended_side: u32,
  /// 灰度标准差低于该值视为空白图像（硬拒绝）
  pub flat_std_max: f64,
  pub low_contrast_std: f64,
  pub min_laplacian_variance: f64,
  pub max_saturation_mean: f64,
  pub max_channel_diff_mean: f64,
  pub max_colorfulness: f64,
  pub canny_low: f32,
  pub canny_high: f32,
  pub min_edge_density: f64,
  pub min_edge_density_grayscale: f64,
  pub grayscale_saturation_max: f64,
  pub grayscale_channel_diff_max: f64,
  pub sharp_laplacian_variance: f64,
  pub sharp_std: f64,
  pub sharp_relief_factor: f64,
  /// 边缘密度阈值按分辨率缩放的参考边长
  pub reference_side: f64,
  pub min_resolution_scale: f64,
  pub max_edge_density: f64,
  pub bright_intensity: u8,
  pub ct: CtPatternConfig,
  /// 同时越界的软信号数达到该值即拒绝
  pub soft_reject_count: usize,
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self {
      min_side: 32,
      recommended_side: 160,
      flat_std_max: 2.0,
      low_contrast_std: 7.0,
      min_laplacian_variance: 18.0,
      max_saturation_mean: 24.0,
      max_channel_diff_mean: 8.0,
      max_colorfulness: 40.0,
      canny_low: 60.0,
      canny_high: 180.0,
      min_edge_density: 0.004,
      min_edge_density_grayscale: 0.0025,
      grayscale_saturation_max: 20.0,
      grayscale_channel_diff_max: 7.5,
      sharp_laplacian_variance: 45.0,
      sharp_std: 30.0,
      sharp_relief_factor: 0.6,
      reference_side: 512.0,
      min_resolution_scale: 0.5,
      max_edge_density: 0.26,
      bright_intensity: 185,
      ct: CtPatternConfig::default(),
      soft_reject_count: 2,
    }
  }
}

/// CT 断层圆形轮廓检测参数（相对最短边的比例）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CtPatternConfig {
  pub working_side: u32,
  pub blur_sigma: f32,
  pub canny_low: f32,
  pub canny_high: f32,
  pub min_radius: f64,
  pub max_radius: f64,
  pub center_tolerance: f64,
  pub center_steps: u32,
  /// 扣除随机命中后的最低圆周覆盖率
  pub min_coverage: f64,
  /// 圆内外平均灰度差的下限
  pub min_contrast: f64,
}

impl Default for CtPatternConfig {
  fn default() -> Self {
    Self {
      working_side: 256,
      blur_sigma: 1.0,
      canny_low: 60.0,
      canny_high: 160.0,
      min_radius: 0.25,
      max_radius: 0.49,
      center_tolerance: 0.12,
      center_steps: 5,
      min_coverage: 0.5,
      min_contrast: 20.0,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
  pub clahe_clip_limit: f32,
  pub clahe_tile_grid: u32,
  pub gamma: f32,
}

impl Default for PreprocessConfig {
  fn default() -> Self {
    Self {
      clahe_clip_limit: 2.0,
      clahe_tile_grid: 8,
      gamma: 1.2,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
  pub low_confidence_threshold: f32,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      low_confidence_threshold: 0.60,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradCamConfig {
  /// 优先尝试的层路径，例如 `backbone/conv5`
  pub layer_override: Option<String>,
  pub max_candidates: usize,
  pub max_depth: usize,
  pub display_size: u32,
  pub alpha: f32,
}

impl Default for GradCamConfig {
  fn default() -> Self {
    Self {
      layer_override: None,
      max_candidates: 4,
      max_depth: 8,
      display_size: 224,
      alpha: 0.35,
    }
  }
}
