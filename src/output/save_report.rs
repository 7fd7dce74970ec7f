// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/output/save_report.rs - 评估报告目录输出
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::ImageFileInput,
  output::{Render, Report},
  task::Evaluation,
};

pub const REPORT_FILE: &str = "report.json";
pub const HEATMAP_FILE: &str = "heatmap.png";
pub const OVERLAY_FILE: &str = "overlay.png";

/// 将报告写入目录：`report.json`，以及可用时的 `heatmap.png` / `overlay.png`
pub struct ReportDirectoryOutput {
  directory: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("报告序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for ReportDirectoryOutput {
  const SCHEME: &'static str = "report";
}

impl FromUrl for ReportDirectoryOutput {
  type Error = SaveReportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveReportError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(uri.path()))
  }
}

impl ReportDirectoryOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  fn write_png(&self, name: &str, bytes: Option<&Vec<u8>>) -> Result<(), SaveReportError> {
    if let Some(bytes) = bytes {
      std::fs::write(self.directory.join(name), bytes)?;
    }
    Ok(())
  }
}

impl Render<ImageFileInput, Evaluation> for ReportDirectoryOutput {
  type Error = SaveReportError;

  fn render_result(
    &self,
    input: &ImageFileInput,
    evaluation: &Evaluation,
  ) -> Result<(), Self::Error> {
    std::fs::create_dir_all(&self.directory)?;

    let report = Report::new(input, evaluation);
    let file = std::fs::File::create(self.directory.join(REPORT_FILE))?;
    serde_json::to_writer_pretty(file, &report)?;

    if let Some(explanation) = &evaluation.explanation {
      self.write_png(HEATMAP_FILE, explanation.heatmap_image.as_ref())?;
      self.write_png(OVERLAY_FILE, explanation.overlay_image.as_ref())?;
    }

    info!("报告已保存到目录: {}", self.directory.display());
    Ok(())
  }
}
