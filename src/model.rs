// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/model.rs - 模型接口定义
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

use std::fmt;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::ModelTensor;

mod graph;
mod registry;

pub use self::graph::{GraphBuilder, GraphModel, LayerOp, LayerSpec, ModelGraph};
pub use self::registry::{
  CatalogEntry, GraphModelLoader, LoadedModel, ModelCatalog, ModelLoader, ModelRegistry,
  RegistryError,
};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("模型结构无效: {0}")]
  InvalidGraph(String),
  #[error("找不到层: {0}")]
  LayerNotFound(String),
  #[error("层 {0} 的输出不是空间特征图")]
  NotSpatial(String),
  #[error("形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("模型输出不符合约定 {convention:?}: {detail}")]
  UnexpectedOutput {
    convention: OutputConvention,
    detail: String,
  },
  #[error("后端错误: {0}")]
  Backend(String),
}

/// 模型单批次前向输出：单个标量或定长类别分数
#[derive(Debug, Clone, PartialEq)]
pub enum RawModelOutput {
  Scalar(f32),
  Vector(Vec<f32>),
}

impl RawModelOutput {
  pub fn len(&self) -> usize {
    match self {
      RawModelOutput::Scalar(_) => 1,
      RawModelOutput::Vector(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 每个模型声明的输出约定，在目录中登记一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "convention", rename_all = "snake_case")]
pub enum OutputConvention {
  /// 单个 sigmoid 标量，表示“非骨折”的概率
  #[default]
  NonFractureSigmoid,
  /// 类别分数向量，`fracture_index` 处为骨折概率
  ClassScores { fracture_index: usize },
}

impl OutputConvention {
  /// 将原始输出解释为骨折概率，结果截断到 [0, 1]
  pub fn fracture_probability(&self, output: &RawModelOutput) -> Result<f32, ModelError> {
    let p = match (self, output) {
      (OutputConvention::NonFractureSigmoid, RawModelOutput::Scalar(s)) => 1.0 - s,
      (OutputConvention::NonFractureSigmoid, RawModelOutput::Vector(v)) if v.len() == 1 => {
        1.0 - v[0]
      }
      (OutputConvention::ClassScores { fracture_index }, RawModelOutput::Vector(v))
        if *fracture_index < v.len() =>
      {
        v[*fracture_index]
      }
      _ => {
        return Err(ModelError::UnexpectedOutput {
          convention: *self,
          detail: format!("输出长度 {}", output.len()),
        });
      }
    };

    if !p.is_finite() {
      return Err(ModelError::UnexpectedOutput {
        convention: *self,
        detail: format!("非有限值 {}", p),
      });
    }
    Ok(p.clamp(0.0, 1.0))
  }

  /// 骨折分数对模型输出的梯度（反向传播的种子）
  ///
  /// sigmoid 约定下骨折分数为 `1 - s`，所以种子为 `-1`。
  pub fn fracture_seed(&self, output_len: usize) -> Result<Vec<f32>, ModelError> {
    match self {
      OutputConvention::NonFractureSigmoid if output_len == 1 => Ok(vec![-1.0]),
      OutputConvention::ClassScores { fracture_index } if *fracture_index < output_len => {
        let mut seed = vec![0.0; output_len];
        seed[*fracture_index] = 1.0;
        Ok(seed)
      }
      _ => Err(ModelError::UnexpectedOutput {
        convention: *self,
        detail: format!("输出长度 {}", output_len),
      }),
    }
  }
}

/// 层在（可能嵌套的）图中的路径，例如 `backbone/conv5`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LayerPath(Vec<String>);

impl LayerPath {
  pub fn root() -> Self {
    LayerPath(Vec::new())
  }

  pub fn child(&self, name: &str) -> Self {
    let mut segments = self.0.clone();
    segments.push(name.to_string());
    LayerPath(segments)
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn starts_with(&self, prefix: &LayerPath) -> bool {
    self.0.starts_with(&prefix.0)
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for LayerPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.join("/"))
  }
}

impl From<&str> for LayerPath {
  fn from(s: &str) -> Self {
    LayerPath(
      s.split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect(),
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
  Rescale,
  Conv2d,
  Relu,
  MaxPool2d,
  GlobalAveragePool,
  Flatten,
  Dense,
  Sigmoid,
  Softmax,
  Submodel,
}

impl LayerKind {
  /// 输入阶段的层（缩放等）即使是空间输出也不适合做热力图
  pub fn is_input_stage(&self) -> bool {
    matches!(self, LayerKind::Rescale)
  }
}

/// 层图的只读描述，供层发现使用
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
  pub name: String,
  pub kind: LayerKind,
  /// 单样本输出形状：空间层为 `[h, w, c]`，向量层为 `[n]`
  pub output_shape: Vec<usize>,
  /// 嵌套子模型的内部层
  pub children: Vec<LayerInfo>,
}

impl LayerInfo {
  pub fn is_spatial(&self) -> bool {
    self.output_shape.len() == 3 && self.output_shape[2] > 1
  }
}

/// 某层激活及骨折分数对其的梯度，形状均为 `[h, w, c]`
#[derive(Debug, Clone)]
pub struct LayerGradient {
  pub activation: Array3<f32>,
  pub gradient: Array3<f32>,
}

/// 已加载的可微模型。流水线只调用 `forward` 与 `gradient_of`。
pub trait ModelHandle: Send + Sync {
  fn name(&self) -> &str;

  fn layers(&self) -> &[LayerInfo];

  fn forward(&self, input: &ModelTensor) -> Result<RawModelOutput, ModelError>;

  /// 记录 `layer` 的激活，并计算骨折分数对该激活的梯度
  fn gradient_of(
    &self,
    input: &ModelTensor,
    layer: &LayerPath,
    convention: &OutputConvention,
  ) -> Result<LayerGradient, ModelError>;

  /// 执行上下文能否被并发调用；否则注册表按模型串行化调用
  fn supports_concurrent_calls(&self) -> bool {
    false
  }
}
