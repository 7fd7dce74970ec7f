// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/error.rs - 流水线错误分类
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

use thiserror::Error;

use crate::{
  input::DecodeError,
  model::{ModelError, RegistryError},
};

pub const MODEL_LOAD_MESSAGE: &str = "The selected model could not be loaded.";
pub const INFERENCE_MESSAGE: &str = "Model inference failed.";

/// 终止请求的错误。校验不通过与解释失败都不属于这里。
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error(transparent)]
  Decode(#[from] DecodeError),
  #[error("Model not found: {0}")]
  ModelNotFound(String),
  #[error("模型加载失败: {0}")]
  ModelLoad(#[source] RegistryError),
  #[error("模型推理失败: {0}")]
  Inference(#[source] ModelError),
}

impl From<RegistryError> for PipelineError {
  fn from(e: RegistryError) -> Self {
    match e {
      RegistryError::ModelNotFound(name) => PipelineError::ModelNotFound(name),
      other => PipelineError::ModelLoad(other),
    }
  }
}

impl PipelineError {
  /// 面向调用方的消息，加载与推理的内部细节只出现在日志里
  pub fn public_message(&self) -> String {
    match self {
      PipelineError::Decode(e) => e.to_string(),
      PipelineError::ModelNotFound(name) => format!(
        "Unsupported model '{}'. Choose one of the available models.",
        name
      ),
      PipelineError::ModelLoad(_) => MODEL_LOAD_MESSAGE.to_string(),
      PipelineError::Inference(_) => INFERENCE_MESSAGE.to_string(),
    }
  }

  /// 由调用方输入引起（坏图像、未知模型），而非服务端故障
  pub fn is_caller_error(&self) -> bool {
    matches!(
      self,
      PipelineError::Decode(_) | PipelineError::ModelNotFound(_)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registry_not_found_becomes_caller_error() {
    let e = PipelineError::from(RegistryError::ModelNotFound(String::from("VGG")));
    assert!(matches!(e, PipelineError::ModelNotFound(ref n) if n == "VGG"));
    assert!(e.is_caller_error());
    assert!(e.public_message().contains("VGG"));
  }

  #[test]
  fn load_and_inference_details_stay_internal() {
    let e = PipelineError::from(RegistryError::LoadFailed {
      name: String::from("ResNet50"),
      source: ModelError::IoError(std::io::Error::other("/secret/path/ResNet50.json")),
    });
    assert!(matches!(e, PipelineError::ModelLoad(_)));
    assert!(!e.is_caller_error());
    assert_eq!(e.public_message(), MODEL_LOAD_MESSAGE);

    let e = PipelineError::Inference(ModelError::ShapeMismatch(String::from("[1, 7]")));
    assert_eq!(e.public_message(), INFERENCE_MESSAGE);
  }

  #[test]
  fn decode_message_is_public() {
    let e = PipelineError::from(DecodeError::Empty);
    assert!(e.is_caller_error());
    assert_eq!(e.public_message(), "Empty upload.");
  }
}
