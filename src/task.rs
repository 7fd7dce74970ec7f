// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/task.rs - 评估流程与任务执行
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

use std::{sync::Arc, time::Instant};

use base64::Engine;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
  classifier::{ClassifierAdapter, Label, PredictionResult},
  config::PipelineConfig,
  error::PipelineError,
  gradcam::{ExplanationArtifact, ExplanationStatus, GradCam, ImageEncoder},
  input::{ImageFileInput, decode},
  model::ModelRegistry,
  output::{ConsentStore, PersistMetadata, Render},
  preprocess::preprocess,
  validation::{ValidationVerdict, validate},
};

/// 一次评估的完整结果。
///
/// `prediction` 与 `explanation` 当且仅当图像通过校验时存在。
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
  pub model: String,
  pub valid: bool,
  pub validation: ValidationVerdict,
  pub prediction: Option<PredictionResult>,
  pub explanation: Option<ExplanationArtifact>,
  pub warnings: Vec<String>,
  pub disclaimer: String,
}

/// 精简摘要，不含图像数据
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary<'a> {
  pub model: &'a str,
  pub valid: bool,
  pub message: &'a str,
  pub label: Option<Label>,
  pub confidence: Option<f32>,
  pub warnings: &'a [String],
  pub gradcam_status: Option<ExplanationStatus>,
  pub gradcam_message: Option<&'a str>,
  pub heatmap_b64_len: usize,
  pub overlay_b64_len: usize,
}

fn b64_len(bytes: Option<&Vec<u8>>) -> usize {
  bytes
    .map(|b| base64::engine::general_purpose::STANDARD.encode(b).len())
    .unwrap_or(0)
}

impl Evaluation {
  pub fn summary(&self) -> EvaluationSummary<'_> {
    let explanation = self.explanation.as_ref();
    EvaluationSummary {
      model: &self.model,
      valid: self.valid,
      message: &self.validation.message,
      label: self.prediction.as_ref().map(|p| p.label),
      confidence: self.prediction.as_ref().map(|p| p.confidence),
      warnings: &self.warnings,
      gradcam_status: explanation.map(|e| e.status),
      gradcam_message: explanation.and_then(|e| e.message.as_deref()),
      heatmap_b64_len: b64_len(explanation.and_then(|e| e.heatmap_image.as_ref())),
      overlay_b64_len: b64_len(explanation.and_then(|e| e.overlay_image.as_ref())),
    }
  }
}

/// 解码、校验、预处理、分类、解释，并在同意时留存图像
pub struct Evaluator {
  registry: Arc<ModelRegistry>,
  config: PipelineConfig,
  gradcam: GradCam,
  store: Option<Arc<dyn ConsentStore>>,
}

impl Evaluator {
  pub fn new(registry: Arc<ModelRegistry>, config: PipelineConfig) -> Self {
    let gradcam = GradCam::new(&config.gradcam);
    Self {
      registry,
      config,
      gradcam,
      store: None,
    }
  }

  pub fn with_store(mut self, store: Arc<dyn ConsentStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn with_encoder(mut self, encoder: Arc<dyn ImageEncoder>) -> Self {
    self.gradcam = GradCam::with_encoder(&self.config.gradcam, encoder);
    self
  }

  pub fn registry(&self) -> &Arc<ModelRegistry> {
    &self.registry
  }

  pub fn list_models(&self) -> Vec<String> {
    self.registry.list_available()
  }

  pub fn evaluate(
    &self,
    image_bytes: &[u8],
    model_name: &str,
    consent: bool,
  ) -> Result<Evaluation, PipelineError> {
    let started = Instant::now();
    if !self.registry.contains(model_name) {
      warn!("请求了未登记的模型: {}", model_name);
      return Err(PipelineError::ModelNotFound(model_name.to_string()));
    }

    let now = Instant::now();
    let image = decode(image_bytes)?;
    debug!(
      "解码完成 {}x{}，耗时: {:.2?}",
      image.width(),
      image.height(),
      now.elapsed()
    );

    let now = Instant::now();
    let validation = validate(&image, &self.config.validation);
    info!(
      "校验完成: valid={}，触发信号 {} 个，耗时: {:.2?}",
      validation.valid,
      validation.reasons.len(),
      now.elapsed()
    );
    if !validation.valid {
      return Ok(Evaluation {
        model: model_name.to_string(),
        valid: false,
        validation,
        prediction: None,
        explanation: None,
        warnings: Vec::new(),
        disclaimer: self.config.disclaimer.0.clone(),
      });
    }

    let model = self.registry.resolve(model_name)?;
    let tensor = preprocess(&image, &self.config.preprocess);

    let classifier = ClassifierAdapter::new(model.clone(), &self.config.classifier);
    let prediction = classifier
      .classify(&tensor, validation.soft_warnings())
      .map_err(|e| {
        error!("模型 {} 推理失败: {}", model_name, e);
        PipelineError::Inference(e)
      })?;

    let explanation = self.gradcam.explain(&model, &tensor, &image);

    let mut warnings = prediction.warnings.clone();
    if let Some(warning) = explanation.warning() {
      warnings.push(warning.to_string());
    }

    if consent {
      self.persist(image_bytes, model_name, &prediction);
    }

    info!(
      "评估完成: 模型 {}，标签 {}，置信度 {:.4}，Grad-CAM {:?}，总耗时: {:.2?}",
      model_name,
      prediction.label,
      prediction.confidence,
      explanation.status,
      started.elapsed()
    );

    Ok(Evaluation {
      model: model_name.to_string(),
      valid: true,
      validation,
      prediction: Some(prediction),
      explanation: Some(explanation),
      warnings,
      disclaimer: self.config.disclaimer.0.clone(),
    })
  }

  fn persist(&self, image_bytes: &[u8], model_name: &str, prediction: &PredictionResult) {
    let Some(store) = self.store.as_ref() else {
      debug!("未配置留存目录，跳过留存");
      return;
    };
    let metadata = PersistMetadata {
      model: model_name.to_string(),
      label: prediction.label,
      confidence: prediction.confidence,
      fracture_probability: prediction.fracture_probability,
    };
    if let Err(e) = store.persist(image_bytes, &metadata) {
      warn!("留存图像失败，忽略: {}", e);
    }
  }
}

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, evaluator: E, output: O) -> Result<(), Self::Error>;
}

/// 对单个输入文件执行一次评估并渲染结果
pub struct OneShotTask {
  model: String,
  consent: bool,
}

impl OneShotTask {
  pub fn new(model: impl Into<String>, consent: bool) -> Self {
    Self {
      model: model.into(),
      consent,
    }
  }
}

impl<'a, RE, O> Task<ImageFileInput, &'a Evaluator, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<ImageFileInput, Evaluation, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: ImageFileInput,
    evaluator: &'a Evaluator,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务: {}", input.path().display());
    let now = Instant::now();
    let evaluation = evaluator
      .evaluate(input.bytes(), &self.model, self.consent)
      .inspect_err(|e| error!("评估失败: {}", e.public_message()))?;
    let elapsed = now.elapsed();
    info!("评估完成，耗时: {:.2?}", elapsed);
    output.render_result(&input, &evaluation)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}
