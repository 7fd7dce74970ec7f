// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/output/directory_record.rs - 按内容哈希留存图像的目录存储
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

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::consent_store::{ConsentStore, PersistMetadata, StorageError, content_key},
};

/// 目录布局：`<root>/<key[0..2]>/<key>.<ext>` 与同名 `.json` 元数据
#[derive(Debug, Clone)]
pub struct DirectoryConsentStore {
  directory: PathBuf,
}

#[derive(Serialize)]
struct Sidecar<'a> {
  sha256: &'a str,
  stored_at: String,
  #[serde(flatten)]
  metadata: &'a PersistMetadata,
}

impl FromUrlWithScheme for DirectoryConsentStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryConsentStore {
  type Error = StorageError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        uri.scheme()
      );
      return Err(StorageError::SchemeMismatch);
    }
    Ok(Self::new(uri.path()))
  }
}

impl DirectoryConsentStore {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
      .ok()
      .and_then(|f| f.extensions_str().first().copied())
      .unwrap_or("bin")
  }
}

impl ConsentStore for DirectoryConsentStore {
  fn persist(
    &self,
    image_bytes: &[u8],
    metadata: &PersistMetadata,
  ) -> Result<PathBuf, StorageError> {
    let key = content_key(image_bytes);
    let directory = self.directory.join(&key[..2]);
    std::fs::create_dir_all(&directory)?;

    let image_path = directory.join(format!("{}.{}", key, Self::extension(image_bytes)));
    std::fs::write(&image_path, image_bytes)?;

    let sidecar = Sidecar {
      sha256: &key,
      stored_at: Utc::now().to_rfc3339(),
      metadata,
    };
    let file = std::fs::File::create(directory.join(format!("{}.json", key)))?;
    serde_json::to_writer_pretty(file, &sidecar)?;

    info!("已留存经同意的图像: {}", image_path.display());
    Ok(image_path)
  }
}
