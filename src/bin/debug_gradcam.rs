// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/bin/debug_gradcam.rs - Grad-CAM 调试工具
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
use tracing::{info, warn};
use url::Url;

use gujian::{
  FromUrl,
  config::GradCamConfig,
  gradcam::GradCam,
  input::{ImageFileInput, decode},
  model::{LayerInfo, ModelRegistry},
  output::{HEATMAP_FILE, OVERLAY_FILE},
  preprocess::preprocess,
};

/// 打印层结构与候选层顺序，并用指定层运行 Grad-CAM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录
  #[arg(long, env = "XRAY_MODEL_DIR", value_name = "MODELS")]
  pub models: Url,
  /// 模型名称
  #[arg(long, default_value = "ResNet50", value_name = "NAME")]
  pub model: String,
  /// 输入图像；不指定时只打印层信息
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,
  /// 优先尝试的层，例如 backbone/block/conv_b
  #[arg(long, value_name = "LAYER")]
  pub layer: Option<String>,
  /// 热力图与叠加图的输出目录
  #[arg(long, value_name = "DIR")]
  pub out: Option<PathBuf>,
}

fn print_tree(layers: &[LayerInfo], depth: usize) {
  for layer in layers {
    println!(
      "{}{} {:?} {:?}{}",
      "  ".repeat(depth),
      layer.name,
      layer.kind,
      layer.output_shape,
      if layer.is_spatial() { " *" } else { "" }
    );
    print_tree(&layer.children, depth + 1);
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let registry = ModelRegistry::from_url(&args.models)?;
  let model = registry.resolve(&args.model)?;

  println!("模型 {} 的层结构（* 为空间层）:", model.name());
  print_tree(model.layers(), 1);

  let config = GradCamConfig {
    layer_override: args.layer.clone(),
    ..GradCamConfig::default()
  };
  let gradcam = GradCam::new(&config);
  println!("候选层顺序:");
  for (i, layer) in gradcam.candidates(&model).iter().enumerate() {
    println!("  {}. {}", i + 1, layer);
  }

  let Some(input) = &args.input else {
    return Ok(());
  };
  let input = ImageFileInput::from_url(input)?;
  let image = decode(input.bytes())?;
  let tensor = preprocess(&image, &Default::default());

  let now = std::time::Instant::now();
  let artifact = gradcam.explain(&model, &tensor, &image);
  info!("Grad-CAM 完成，耗时: {:.2?}", now.elapsed());
  println!("状态: {:?}", artifact.status);
  println!("层: {}", artifact.layer.as_deref().unwrap_or("-"));
  println!("消息: {}", artifact.message.as_deref().unwrap_or("-"));

  if let Some(out) = &args.out {
    std::fs::create_dir_all(out)?;
    for (name, bytes) in [
      (HEATMAP_FILE, &artifact.heatmap_image),
      (OVERLAY_FILE, &artifact.overlay_image),
    ] {
      match bytes {
        Some(bytes) => std::fs::write(out.join(name), bytes)?,
        None => warn!("{} 不可用，未写出", name),
      }
    }
    info!("图像已写出到: {}", out.display());
  }

  Ok(())
}
