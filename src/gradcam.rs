// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/gradcam.rs - Grad-CAM 解释引擎
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
use image::imageops::FilterType;
use ndarray::{Array2, Axis};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::{
  config::GradCamConfig,
  frame::{DecodedImage, ModelTensor},
  model::{LayerGradient, LayerPath, LoadedModel, ModelError},
};

mod discovery;
mod render;

pub use self::discovery::discover_candidates;
pub use self::render::{EncodeError, ImageEncoder, PngEncoder, blend, colorize, jet, resize_map};

pub const EXPLANATION_SUMMARY: &str = "The model focused primarily on high-contrast fracture \
                                       regions and cortical discontinuities, which influenced the \
                                       final prediction.";
pub const UNAVAILABLE_WARNING: &str =
  "⚠ Explainability (Grad-CAM) is unavailable for this prediction.";
pub const PARTIAL_WARNING: &str =
  "⚠ Explainability (Grad-CAM) is only partially available for this prediction.";

const CAM_EPSILON: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationStatus {
  Ok,
  Partial,
  Unavailable,
}

fn as_base64<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
  match bytes {
    Some(b) => serializer.serialize_some(&base64::engine::general_purpose::STANDARD.encode(b)),
    None => serializer.serialize_none(),
  }
}

/// 解释结果，即使不可用也总会出现在评估结果中
#[derive(Debug, Clone, Serialize)]
pub struct ExplanationArtifact {
  pub status: ExplanationStatus,
  /// 显示尺寸下的归一化热力图，取值 [0, 1]
  #[serde(skip)]
  pub heatmap: Option<Array2<f32>>,
  #[serde(rename = "heatmap_png_b64", serialize_with = "as_base64")]
  pub heatmap_image: Option<Vec<u8>>,
  #[serde(rename = "overlay_png_b64", serialize_with = "as_base64")]
  pub overlay_image: Option<Vec<u8>>,
  /// 实际使用的层
  pub layer: Option<String>,
  pub message: Option<String>,
  pub summary: Option<String>,
}

impl ExplanationArtifact {
  pub fn unavailable(message: impl Into<String>) -> Self {
    Self {
      status: ExplanationStatus::Unavailable,
      heatmap: None,
      heatmap_image: None,
      overlay_image: None,
      layer: None,
      message: Some(message.into()),
      summary: None,
    }
  }

  /// 需要附加到评估结果中的用户警告
  pub fn warning(&self) -> Option<&'static str> {
    match self.status {
      ExplanationStatus::Ok => None,
      ExplanationStatus::Partial => Some(PARTIAL_WARNING),
      ExplanationStatus::Unavailable => Some(UNAVAILABLE_WARNING),
    }
  }
}

/// 通道权重取梯度的空间均值，加权求和后 ReLU 并按最大值归一化
pub fn class_activation_map(grads: &LayerGradient) -> Result<Array2<f32>, ModelError> {
  let (h, w, c) = grads.activation.dim();
  if grads.gradient.dim() != (h, w, c) || h == 0 || w == 0 || c == 0 {
    return Err(ModelError::ShapeMismatch(format!(
      "激活 {:?} 与梯度 {:?} 不一致",
      grads.activation.dim(),
      grads.gradient.dim()
    )));
  }
  if grads.gradient.iter().any(|v| !v.is_finite())
    || grads.activation.iter().any(|v| !v.is_finite())
  {
    return Err(ModelError::Backend(String::from("梯度或激活包含非有限值")));
  }

  let weights = grads.gradient.sum_axis(Axis(0)).sum_axis(Axis(0)) / (h * w) as f32;
  let mut cam = grads
    .activation
    .map_axis(Axis(2), |lane| lane.dot(&weights).max(0.0));
  let max = cam.iter().cloned().fold(0.0f32, f32::max);
  if max <= CAM_EPSILON {
    cam.fill(0.0);
  } else {
    cam.mapv_inplace(|v| v / max);
  }
  Ok(cam)
}

/// Grad-CAM 引擎。任何失败都降级为状态字段，不会中断请求。
pub struct GradCam {
  config: GradCamConfig,
  encoder: Arc<dyn ImageEncoder>,
}

impl GradCam {
  pub fn new(config: &GradCamConfig) -> Self {
    Self::with_encoder(config, Arc::new(PngEncoder))
  }

  pub fn with_encoder(config: &GradCamConfig, encoder: Arc<dyn ImageEncoder>) -> Self {
    Self {
      config: config.clone(),
      encoder,
    }
  }

  /// 候选层：配置的覆盖层优先，其余按发现顺序，最多 `max_candidates` 个
  pub fn candidates(&self, model: &LoadedModel) -> Vec<LayerPath> {
    let mut candidates = Vec::new();
    if let Some(layer) = self.config.layer_override.as_deref() {
      candidates.push(LayerPath::from(layer));
    }
    for path in discover_candidates(model.layers(), self.config.max_depth) {
      if !candidates.contains(&path) {
        candidates.push(path);
      }
    }
    candidates.truncate(self.config.max_candidates);
    candidates
  }

  pub fn explain(
    &self,
    model: &LoadedModel,
    tensor: &ModelTensor,
    original: &DecodedImage,
  ) -> ExplanationArtifact {
    let now = Instant::now();
    let candidates = self.candidates(model);
    if candidates.is_empty() {
      warn!("模型 {} 中没有可用于 Grad-CAM 的空间层", model.name());
      return ExplanationArtifact::unavailable(
        "Grad-CAM could not be generated: the model has no spatial feature layer.",
      );
    }

    for layer in &candidates {
      let cam = model
        .gradient_of(tensor, layer)
        .and_then(|grads| class_activation_map(&grads));
      match cam {
        Ok(cam) => {
          let artifact = self.render(layer, &cam, original);
          info!(
            "Grad-CAM 完成，层 {}，状态 {:?}，耗时: {:.2?}",
            layer,
            artifact.status,
            now.elapsed()
          );
          return artifact;
        }
        Err(e) => warn!("候选层 {} 梯度提取失败，尝试下一个: {}", layer, e),
      }
    }

    ExplanationArtifact::unavailable(format!(
      "Grad-CAM could not be generated: gradient extraction failed for all {} candidate layers.",
      candidates.len()
    ))
  }

  fn render(
    &self,
    layer: &LayerPath,
    cam: &Array2<f32>,
    original: &DecodedImage,
  ) -> ExplanationArtifact {
    let size = self.config.display_size;
    let heatmap = resize_map(cam, size);
    let heat_rgb = colorize(&heatmap);
    let base = image::imageops::resize(original.rgb(), size, size, FilterType::Triangle);
    let overlay = blend(&base, &heat_rgb, self.config.alpha);

    let heatmap_image = self
      .encoder
      .encode_png(&heat_rgb)
      .inspect_err(|e| warn!("热力图编码失败: {}", e))
      .ok();
    let overlay_image = self
      .encoder
      .encode_png(&overlay)
      .inspect_err(|e| warn!("叠加图编码失败: {}", e))
      .ok();

    let failed: Vec<&str> = [
      ("heatmap", heatmap_image.is_none()),
      ("overlay", overlay_image.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, failed)| failed.then_some(name))
    .collect();

    let (status, message) = if failed.is_empty() {
      (
        ExplanationStatus::Ok,
        format!("Grad-CAM computed using layer '{}'.", layer),
      )
    } else {
      debug!("Grad-CAM 部分可用，编码失败: {:?}", failed);
      (
        ExplanationStatus::Partial,
        format!(
          "Grad-CAM computed using layer '{}', but the {} image could not be encoded.",
          layer,
          failed.join(" and ")
        ),
      )
    };

    ExplanationArtifact {
      status,
      heatmap: Some(heatmap),
      heatmap_image,
      overlay_image,
      layer: Some(layer.to_string()),
      message: Some(message),
      summary: Some(EXPLANATION_SUMMARY.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  };

  use image::{Rgb, RgbImage};
  use ndarray::Array3;

  use super::*;
  use crate::model::{LayerInfo, LayerKind, ModelHandle, OutputConvention, RawModelOutput};

  /// 指定层名的梯度调用失败，其余层返回固定的激活/梯度
  struct ScriptedHandle {
    layers: Vec<LayerInfo>,
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
  }

  impl ModelHandle for ScriptedHandle {
    fn name(&self) -> &str {
      "scripted"
    }

    fn layers(&self) -> &[LayerInfo] {
      &self.layers
    }

    fn forward(&self, _input: &ModelTensor) -> Result<RawModelOutput, ModelError> {
      Ok(RawModelOutput::Scalar(0.3))
    }

    fn gradient_of(
      &self,
      _input: &ModelTensor,
      layer: &LayerPath,
      _convention: &OutputConvention,
    ) -> Result<LayerGradient, ModelError> {
      let name = layer.to_string();
      self.calls.lock().unwrap().push(name.clone());
      if self.failing.contains(&name) {
        return Err(ModelError::Backend(format!("disconnected {}", name)));
      }
      let activation = Array3::from_shape_fn((7, 7, 2), |(y, x, c)| {
        if c == 0 && y == 2 && x == 5 { 3.0 } else { 0.1 }
      });
      Ok(LayerGradient {
        activation,
        gradient: Array3::from_elem((7, 7, 2), 0.5),
      })
    }
  }

  fn spatial(name: &str, c: usize) -> LayerInfo {
    LayerInfo {
      name: name.to_string(),
      kind: LayerKind::Conv2d,
      output_shape: vec![7, 7, c],
      children: Vec::new(),
    }
  }

  fn model(layers: Vec<LayerInfo>, failing: &[&str]) -> LoadedModel {
    LoadedModel::new(
      "scripted",
      OutputConvention::NonFractureSigmoid,
      Box::new(ScriptedHandle {
        layers,
        failing: failing.iter().map(|s| s.to_string()).collect(),
        calls: Mutex::new(Vec::new()),
      }),
    )
  }

  fn original() -> DecodedImage {
    DecodedImage::from(RgbImage::from_pixel(300, 200, Rgb([90, 90, 90])))
  }

  fn tensor() -> ModelTensor {
    ModelTensor::from_fn(|_| 0.0)
  }

  /// 热力图先于叠加图编码，第二次调用失败
  #[derive(Default)]
  struct FailingOverlay {
    calls: AtomicUsize,
  }

  impl ImageEncoder for FailingOverlay {
    fn encode_png(&self, image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
      if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
        return Err(EncodeError::Other(String::from("disk full")));
      }
      PngEncoder.encode_png(image)
    }
  }

  struct AlwaysFails;

  impl ImageEncoder for AlwaysFails {
    fn encode_png(&self, _image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
      Err(EncodeError::Other(String::from("no encoder")))
    }
  }

  #[test]
  fn cam_is_normalized_and_peaks_at_hot_cell() {
    let grads = LayerGradient {
      activation: Array3::from_shape_fn((4, 4, 2), |(y, x, c)| (y + x + c) as f32),
      gradient: Array3::from_elem((4, 4, 2), 1.0),
    };
    let cam = class_activation_map(&grads).unwrap();
    let max = cam.iter().cloned().fold(0.0, f32::max);
    assert!((max - 1.0).abs() < 1e-6);
    assert_eq!(cam[[3, 3]], max);
  }

  #[test]
  fn negative_evidence_yields_all_zero_map() {
    let grads = LayerGradient {
      activation: Array3::from_elem((3, 3, 1), 2.0),
      gradient: Array3::from_elem((3, 3, 1), -1.0),
    };
    let cam = class_activation_map(&grads).unwrap();
    assert!(cam.iter().all(|v| *v == 0.0));
  }

  #[test]
  fn inconsistent_gradient_is_rejected() {
    let grads = LayerGradient {
      activation: Array3::zeros((3, 3, 2)),
      gradient: Array3::zeros((3, 2, 2)),
    };
    assert!(class_activation_map(&grads).is_err());
    let grads = LayerGradient {
      activation: Array3::zeros((3, 3, 2)),
      gradient: Array3::from_elem((3, 3, 2), f32::NAN),
    };
    assert!(class_activation_map(&grads).is_err());
  }

  #[test]
  fn falls_back_to_next_candidate() {
    let model = model(vec![spatial("early", 2), spatial("late", 2)], &["late"]);
    let artifact = GradCam::new(&GradCamConfig::default()).explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Ok);
    assert_eq!(artifact.layer.as_deref(), Some("early"));
    assert_eq!(
      artifact.message.as_deref(),
      Some("Grad-CAM computed using layer 'early'.")
    );
    assert_eq!(artifact.heatmap.as_ref().unwrap().dim(), (224, 224));
    assert!(artifact.heatmap_image.is_some() && artifact.overlay_image.is_some());
    assert!(artifact.warning().is_none());
  }

  #[test]
  fn all_candidates_failing_is_unavailable() {
    let model = model(vec![spatial("a", 2), spatial("b", 2)], &["a", "b"]);
    let artifact = GradCam::new(&GradCamConfig::default()).explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Unavailable);
    assert!(artifact.message.unwrap().contains("all 2 candidate layers"));
    assert!(artifact.heatmap.is_none());
  }

  #[test]
  fn no_spatial_layer_is_unavailable() {
    let flat = LayerInfo {
      name: String::from("head"),
      kind: LayerKind::Dense,
      output_shape: vec![1],
      children: Vec::new(),
    };
    let model = model(vec![flat], &[]);
    let artifact = GradCam::new(&GradCamConfig::default()).explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Unavailable);
    assert!(artifact.message.as_ref().unwrap().contains("no spatial feature layer"));
    assert_eq!(artifact.warning(), Some(UNAVAILABLE_WARNING));
  }

  #[test]
  fn override_is_tried_first_and_candidates_are_capped() {
    let config = GradCamConfig {
      layer_override: Some(String::from("custom")),
      max_candidates: 2,
      ..GradCamConfig::default()
    };
    let model = model(
      vec![spatial("a", 2), spatial("b", 2), spatial("c", 2)],
      &["custom", "c"],
    );
    let engine = GradCam::new(&config);
    assert_eq!(
      engine.candidates(&model),
      vec![LayerPath::from("custom"), LayerPath::from("c")]
    );
    let artifact = engine.explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Unavailable);
  }

  #[test]
  fn backbone_output_is_tried_within_default_cap() {
    let inner: Vec<LayerInfo> = (1..=6).map(|i| spatial(&format!("conv{}", i), 2)).collect();
    let failing: Vec<String> = inner.iter().map(|l| format!("backbone/{}", l.name)).collect();
    let backbone = LayerInfo {
      name: String::from("backbone"),
      kind: LayerKind::Submodel,
      output_shape: vec![7, 7, 2],
      children: inner,
    };
    let failing: Vec<&str> = failing.iter().map(String::as_str).collect();
    let model = model(vec![backbone], &failing);
    let artifact = GradCam::new(&GradCamConfig::default()).explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Ok);
    assert_eq!(artifact.layer.as_deref(), Some("backbone"));
  }

  #[test]
  fn one_failed_encoding_is_partial() {
    let model = model(vec![spatial("conv", 2)], &[]);
    let engine = GradCam::with_encoder(
      &GradCamConfig::default(),
      Arc::new(FailingOverlay::default()),
    );
    let artifact = engine.explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Partial);
    assert!(artifact.heatmap_image.is_some());
    assert!(artifact.overlay_image.is_none());
    assert!(artifact.message.as_ref().unwrap().contains("overlay image could not be encoded"));
    assert_eq!(artifact.warning(), Some(PARTIAL_WARNING));
  }

  #[test]
  fn both_failed_encodings_keep_heatmap_array() {
    let model = model(vec![spatial("conv", 2)], &[]);
    let engine = GradCam::with_encoder(&GradCamConfig::default(), Arc::new(AlwaysFails));
    let artifact = engine.explain(&model, &tensor(), &original());
    assert_eq!(artifact.status, ExplanationStatus::Partial);
    assert!(artifact.heatmap.is_some());
    assert!(artifact.message.unwrap().contains("heatmap and overlay"));
  }

  #[test]
  fn images_serialize_as_base64() {
    let model = model(vec![spatial("conv", 2)], &[]);
    let artifact = GradCam::new(&GradCamConfig::default()).explain(&model, &tensor(), &original());
    let json = serde_json::to_value(&artifact).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["heatmap_png_b64"].as_str().unwrap().starts_with("iVBORw0KGgo"));
    assert!(json.get("heatmap").is_none());
  }
}
