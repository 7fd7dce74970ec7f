// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

/// Gujian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录，例如 models:///opt/gujian/models
  #[arg(long, env = "XRAY_MODEL_DIR", value_name = "MODELS")]
  pub models: Url,

  /// 使用的模型名称
  #[arg(long, default_value = "ResNet50", value_name = "NAME")]
  pub model: String,

  /// 输入图像，例如 image:///tmp/wrist.png
  #[arg(long, value_name = "SOURCE", required_unless_present = "list_models")]
  pub input: Option<Url>,

  /// 输出位置:
  /// - stdout:/// 打印完整报告（stdout:///?summary 打印摘要）
  /// - report:///dir 写入 report.json、heatmap.png 与 overlay.png
  #[arg(long, default_value = "stdout:///", value_name = "OUTPUT")]
  pub output: Url,

  /// 留存目录，例如 folder:///var/lib/gujian/consented
  #[arg(long, env = "XRAY_CONSENT_STORE_DIR", value_name = "STORE")]
  pub store: Option<Url>,

  /// 用户同意留存上传的图像
  #[arg(long)]
  pub consent_store: bool,

  /// 流水线配置文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 低置信度警告阈值，覆盖配置文件中的值
  #[arg(long, env = "XRAY_CONFIDENCE_LOW_THRESHOLD", value_name = "THRESHOLD")]
  pub low_confidence_threshold: Option<f32>,

  /// 列出可用模型后退出
  #[arg(long)]
  pub list_models: bool,

  /// 只打印摘要（仅对 stdout 输出有效）
  #[arg(long)]
  pub summary: bool,
}
