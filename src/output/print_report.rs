// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/output/print_report.rs - 标准输出报告
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
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::ImageFileInput,
  output::{Render, Report},
  task::Evaluation,
};

#[derive(Error, Debug)]
pub enum PrintReportError {
  #[error("报告序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把完整报告或精简摘要（`stdout:///?summary`）打印到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintReportOutput {
  summary: bool,
}

impl FromUrlWithScheme for PrintReportOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for PrintReportOutput {
  type Error = PrintReportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(PrintReportError::SchemeMismatch);
    }
    let summary = uri.query_pairs().any(|(k, _)| k == "summary");
    Ok(Self { summary })
  }
}

impl PrintReportOutput {
  pub fn summary() -> Self {
    Self { summary: true }
  }

  pub fn format(
    &self,
    input: &ImageFileInput,
    evaluation: &Evaluation,
  ) -> Result<String, PrintReportError> {
    let text = if self.summary {
      serde_json::to_string_pretty(&evaluation.summary())?
    } else {
      serde_json::to_string_pretty(&Report::new(input, evaluation))?
    };
    Ok(text)
  }
}

impl Render<ImageFileInput, Evaluation> for PrintReportOutput {
  type Error = PrintReportError;

  fn render_result(
    &self,
    input: &ImageFileInput,
    evaluation: &Evaluation,
  ) -> Result<(), Self::Error> {
    println!("{}", self.format(input, evaluation)?);
    Ok(())
  }
}
