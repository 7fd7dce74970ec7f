// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/output/consent_store.rs - 经同意的图像留存接口
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

use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::classifier::Label;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("元数据序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 与图像一同保存的分类信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistMetadata {
  pub model: String,
  pub label: Label,
  pub confidence: f32,
  pub fracture_probability: f32,
}

/// 仅在用户同意、且图像有效并已分类时调用。
///
/// 以内容的 SHA-256 作为键，重复上传同一图像写入同一位置。
pub trait ConsentStore: Send + Sync {
  fn persist(
    &self,
    image_bytes: &[u8],
    metadata: &PersistMetadata,
  ) -> Result<PathBuf, StorageError>;
}

/// 内容键：SHA-256 的小写十六进制
pub fn content_key(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn content_key_is_sha256_hex() {
    assert_eq!(
      content_key(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }
}
