// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use gujian::{
  FromUrl,
  config::PipelineConfig,
  input::ImageFileInput,
  model::ModelRegistry,
  output::{DirectoryConsentStore, OutputWrapper, PrintReportOutput},
  task::{Evaluator, OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型目录: {}", args.models);
  let registry = Arc::new(ModelRegistry::from_url(&args.models)?);

  if args.list_models {
    for name in registry.list_available() {
      println!("{}", name);
    }
    return Ok(());
  }

  let mut config = match &args.config {
    Some(path) => {
      info!("配置文件: {}", path.display());
      PipelineConfig::from_json_file(path)?
    }
    None => PipelineConfig::default(),
  };
  if let Some(threshold) = args.low_confidence_threshold {
    config.classifier.low_confidence_threshold = threshold;
  }

  let mut evaluator = Evaluator::new(registry, config);
  if let Some(store) = &args.store {
    info!("留存目录: {}", store);
    evaluator = evaluator.with_store(Arc::new(DirectoryConsentStore::from_url(store)?));
  }

  let input = args
    .input
    .as_ref()
    .ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
  info!("输入来源: {}", input);
  info!("输出位置: {}", args.output);
  info!("模型: {}，同意留存: {}", args.model, args.consent_store);

  let input = ImageFileInput::from_url(input)?;
  let output = match OutputWrapper::from_url(&args.output)? {
    OutputWrapper::PrintReportOutput(_) if args.summary => {
      OutputWrapper::PrintReportOutput(PrintReportOutput::summary())
    }
    output => output,
  };

  OneShotTask::new(args.model, args.consent_store).run_task(input, &evaluator, output)
}
