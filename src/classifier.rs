// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/classifier.rs - 分类适配器
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

use std::{fmt, sync::Arc, time::Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
  config::ClassifierConfig,
  frame::ModelTensor,
  model::{LoadedModel, ModelError, OutputConvention},
};

pub const LOW_CONFIDENCE_WARNING: &str =
  "⚠ The model confidence is low. The prediction may be unreliable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Label {
  #[serde(rename = "Fracture")]
  Fracture,
  #[serde(rename = "Non-Fracture")]
  NonFracture,
}

impl Label {
  pub fn from_probability(fracture_probability: f32) -> Self {
    if fracture_probability >= 0.5 {
      Label::Fracture
    } else {
      Label::NonFracture
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Label::Fracture => write!(f, "Fracture"),
      Label::NonFracture => write!(f, "Non-Fracture"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
  pub fracture_probability: f32,
  pub label: Label,
  /// `max(p, 1 - p)`
  pub confidence: f32,
  pub warnings: Vec<String>,
}

/// 将模型原始输出翻译为骨折概率。输出约定在构造时确定，之后不再按形状猜测。
pub struct ClassifierAdapter {
  model: Arc<LoadedModel>,
  convention: OutputConvention,
  low_confidence_threshold: f32,
}

impl ClassifierAdapter {
  pub fn new(model: Arc<LoadedModel>, config: &ClassifierConfig) -> Self {
    let convention = model.convention();
    debug!("分类适配器: 模型 {}, 输出约定 {:?}", model.name(), convention);
    Self {
      model,
      convention,
      low_confidence_threshold: config.low_confidence_threshold,
    }
  }

  /// `soft_warnings` 为校验门的软信号警告，排在低置信度警告之前
  pub fn classify(
    &self,
    tensor: &ModelTensor,
    soft_warnings: Vec<String>,
  ) -> Result<PredictionResult, ModelError> {
    let now = Instant::now();
    let raw = self.model.forward(tensor)?;
    let fracture_probability = self.convention.fracture_probability(&raw)?;
    info!(
      "模型 {} 推理完成，耗时: {:.2?}",
      self.model.name(),
      now.elapsed()
    );

    let label = Label::from_probability(fracture_probability);
    let confidence = fracture_probability.max(1.0 - fracture_probability);
    let mut warnings = soft_warnings;
    if confidence < self.low_confidence_threshold {
      warnings.push(LOW_CONFIDENCE_WARNING.to_string());
    }
    debug!(
      "骨折概率 {:.4}, 标签 {}, 置信度 {:.4}",
      fracture_probability, label, confidence
    );

    Ok(PredictionResult {
      fracture_probability,
      label,
      confidence,
      warnings,
    })
  }
}
