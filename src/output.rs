// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/output.rs - 输出定义
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

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::ImageFileInput, task::Evaluation};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod consent_store;
pub use self::consent_store::{ConsentStore, PersistMetadata, StorageError, content_key};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryConsentStore;

#[cfg(feature = "save_report")]
mod save_report;
#[cfg(feature = "save_report")]
pub use self::save_report::{
  HEATMAP_FILE, OVERLAY_FILE, REPORT_FILE, ReportDirectoryOutput, SaveReportError,
};

mod print_report;
pub use self::print_report::{PrintReportError, PrintReportOutput};

/// 报告：输入来源加上完整的评估结果
#[derive(Serialize)]
pub struct Report<'a> {
  pub source: String,
  #[serde(flatten)]
  pub evaluation: &'a Evaluation,
}

impl<'a> Report<'a> {
  pub fn new(input: &ImageFileInput, evaluation: &'a Evaluation) -> Self {
    Self {
      source: input.path().display().to_string(),
      evaluation,
    }
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_report")]
  #[error("保存报告错误: {0}")]
  SaveReportError(#[from] SaveReportError),
  #[error("打印报告错误: {0}")]
  PrintReportError(#[from] PrintReportError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_report")]
  ReportDirectoryOutput(ReportDirectoryOutput),
  PrintReportOutput(PrintReportOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_report")]
      ReportDirectoryOutput::SCHEME => {
        let output = ReportDirectoryOutput::from_url(url)?;
        Ok(OutputWrapper::ReportDirectoryOutput(output))
      }
      PrintReportOutput::SCHEME => {
        let output = PrintReportOutput::from_url(url)?;
        Ok(OutputWrapper::PrintReportOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<ImageFileInput, Evaluation> for OutputWrapper {
  type Error = OutputError;

  fn render_result(
    &self,
    input: &ImageFileInput,
    evaluation: &Evaluation,
  ) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_report")]
      OutputWrapper::ReportDirectoryOutput(output) => output
        .render_result(input, evaluation)
        .map_err(OutputError::from),
      OutputWrapper::PrintReportOutput(output) => output
        .render_result(input, evaluation)
        .map_err(OutputError::from),
    }
  }
}
