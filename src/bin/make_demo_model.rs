// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/bin/make_demo_model.rs - 生成演示用的层图模型与模型清单
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use gujian::model::{
  CatalogEntry, GraphBuilder, ModelCatalog, ModelError, ModelGraph, OutputConvention,
};

/// 生成随机初始化（固定种子）的演示模型，仅用于打通流水线
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输出目录
  #[arg(long, value_name = "DIR")]
  pub out: PathBuf,
  /// 随机种子
  #[arg(long, default_value = "2026", value_name = "SEED")]
  pub seed: u64,
}

/// 带嵌套主干的单 sigmoid 输出模型
fn sigmoid_model(name: &str, seed: u64) -> Result<ModelGraph, ModelError> {
  GraphBuilder::new(name, seed)
    .rescale("rescale", 1.0 / 255.0, 0.0)
    .submodel("backbone", |b| {
      b.conv2d("stem", 3, 4)
        .relu("stem_relu")
        .max_pool("stem_pool", 4)
        .submodel("block", |b| {
          b.conv2d("conv_a", 3, 8)
            .relu("relu_a")
            .max_pool("pool_a", 2)
            .conv2d("conv_b", 3, 8)
            .relu("relu_b")
        })
    })
    .global_average_pool("gap")
    .dense("head", 1)
    .sigmoid("prob")
    .build()
}

/// 两类 softmax 输出模型，第 0 类为骨折
fn softmax_model(name: &str, seed: u64) -> Result<ModelGraph, ModelError> {
  GraphBuilder::new(name, seed)
    .rescale("rescale", 1.0 / 127.5, -1.0)
    .conv2d("conv1", 3, 6)
    .relu("relu1")
    .max_pool("pool1", 4)
    .conv2d("conv2", 3, 8)
    .relu("relu2")
    .global_average_pool("gap")
    .dense("logits", 2)
    .softmax("probs")
    .build()
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  std::fs::create_dir_all(&args.out)?;

  let mut catalog = ModelCatalog::default();
  for (i, name) in ModelCatalog::builtin().names().iter().enumerate() {
    let seed = args.seed.wrapping_add(i as u64);
    let (graph, output) = if name == "MobileNetV2" {
      (
        softmax_model(name, seed)?,
        OutputConvention::ClassScores { fracture_index: 0 },
      )
    } else {
      (sigmoid_model(name, seed)?, OutputConvention::NonFractureSigmoid)
    };

    let file = format!("{}.json", name);
    graph.to_json_file(args.out.join(&file))?;
    info!("已写出模型 {} -> {}", name, file);
    catalog.models.push(CatalogEntry {
      name: name.clone(),
      file,
      output,
    });
  }

  catalog.save(&args.out)?;
  info!("模型清单已写出: {}", args.out.display());
  Ok(())
}
