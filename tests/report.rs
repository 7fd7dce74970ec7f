// 该文件是 Gujian （骨鉴） 项目的一部分。
// tests/report.rs - 报告输出测试
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

mod common;

use common::*;
use url::Url;

use gujian::{
  FromUrl,
  config::PipelineConfig,
  input::ImageFileInput,
  output::{
    HEATMAP_FILE, OVERLAY_FILE, OutputError, OutputWrapper, PrintReportOutput, REPORT_FILE,
    Render, ReportDirectoryOutput,
  },
  task::{Evaluator, OneShotTask, Task},
};

fn write_upload(dir: &std::path::Path, bytes: &[u8]) -> ImageFileInput {
  let path = dir.join("upload.png");
  std::fs::write(&path, bytes).unwrap();
  ImageFileInput::open(&path).unwrap()
}

#[test]
fn report_directory_contains_json_and_images() {
  let models = tempfile::tempdir().unwrap();
  let work = tempfile::tempdir().unwrap();
  let (registry, _) = counting_registry(models.path());
  let evaluator = Evaluator::new(registry, PipelineConfig::default());

  let input = write_upload(work.path(), &radiograph_png());
  let evaluation = evaluator
    .evaluate(input.bytes(), NESTED_MODEL, false)
    .unwrap();

  let out = work.path().join("report");
  ReportDirectoryOutput::new(&out)
    .render_result(&input, &evaluation)
    .unwrap();

  let report: serde_json::Value =
    serde_json::from_slice(&std::fs::read(out.join(REPORT_FILE)).unwrap()).unwrap();
  assert!(report["source"].as_str().unwrap().ends_with("upload.png"));
  assert_eq!(report["model"], NESTED_MODEL);
  assert!(report["prediction"]["label"].is_string());

  for name in [HEATMAP_FILE, OVERLAY_FILE] {
    let bytes = std::fs::read(out.join(name)).unwrap();
    let image = image::load_from_memory(&bytes).unwrap();
    assert_eq!((image.width(), image.height()), (224, 224));
  }
}

#[test]
fn rejected_image_report_has_no_images() {
  let models = tempfile::tempdir().unwrap();
  let work = tempfile::tempdir().unwrap();
  let (registry, _) = counting_registry(models.path());
  let evaluator = Evaluator::new(registry, PipelineConfig::default());

  let input = write_upload(work.path(), &colorful_png());
  let evaluation = evaluator
    .evaluate(input.bytes(), NESTED_MODEL, false)
    .unwrap();

  let out = work.path().join("report");
  ReportDirectoryOutput::new(&out)
    .render_result(&input, &evaluation)
    .unwrap();
  assert!(out.join(REPORT_FILE).exists());
  assert!(!out.join(HEATMAP_FILE).exists());

  let report: serde_json::Value =
    serde_json::from_slice(&std::fs::read(out.join(REPORT_FILE)).unwrap()).unwrap();
  assert_eq!(report["valid"], false);
  assert!(report["prediction"].is_null());
}

#[test]
fn summary_output_omits_images() {
  let models = tempfile::tempdir().unwrap();
  let work = tempfile::tempdir().unwrap();
  let (registry, _) = counting_registry(models.path());
  let evaluator = Evaluator::new(registry, PipelineConfig::default());
  let input = write_upload(work.path(), &radiograph_png());
  let evaluation = evaluator
    .evaluate(input.bytes(), NESTED_MODEL, false)
    .unwrap();

  let url = Url::parse("stdout:///?summary").unwrap();
  let text = PrintReportOutput::from_url(&url)
    .unwrap()
    .format(&input, &evaluation)
    .unwrap();
  assert!(text.contains("gradcam_status"));
  assert!(!text.contains("heatmap_png_b64"));

  let full = PrintReportOutput::default()
    .format(&input, &evaluation)
    .unwrap();
  assert!(full.contains("heatmap_png_b64"));
  assert!(full.contains("\"source\""));
}

#[test]
fn output_wrapper_dispatches_on_scheme() {
  let url = Url::parse("report:///tmp/gujian-report").unwrap();
  assert!(matches!(
    OutputWrapper::from_url(&url),
    Ok(OutputWrapper::ReportDirectoryOutput(_))
  ));
  let url = Url::parse("stdout:///").unwrap();
  assert!(matches!(
    OutputWrapper::from_url(&url),
    Ok(OutputWrapper::PrintReportOutput(_))
  ));
  let url = Url::parse("rtsp://localhost/live").unwrap();
  assert!(matches!(
    OutputWrapper::from_url(&url),
    Err(OutputError::SchemeMismatch)
  ));
}

#[test]
fn one_shot_task_writes_report() {
  let models = tempfile::tempdir().unwrap();
  let work = tempfile::tempdir().unwrap();
  let (registry, _) = counting_registry(models.path());
  let evaluator = Evaluator::new(registry, PipelineConfig::default());
  let input = write_upload(work.path(), &radiograph_png());

  let out = work.path().join("task");
  OneShotTask::new(NESTED_MODEL, false)
    .run_task(input, &evaluator, ReportDirectoryOutput::new(&out))
    .unwrap();
  assert!(out.join(REPORT_FILE).exists());

  let input = write_upload(work.path(), &radiograph_png());
  let err = OneShotTask::new("VGG16", false)
    .run_task(input, &evaluator, ReportDirectoryOutput::new(&out))
    .unwrap_err();
  assert!(err.to_string().contains("VGG16"));
}
