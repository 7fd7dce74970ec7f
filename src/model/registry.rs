// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/model/registry.rs - 模型目录与按需加载的注册表
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

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Instant,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use super::{
  GraphModel, LayerGradient, LayerInfo, LayerPath, ModelError, ModelHandle, OutputConvention,
  RawModelOutput,
};
use crate::{FromUrl, FromUrlWithScheme, frame::ModelTensor};

/// 模型目录下的清单文件
pub const MANIFEST_FILE: &str = "models.json";

const BUILTIN_MODELS: [&str; 7] = [
  "DenseNet121",
  "DenseNet201",
  "ResNet50",
  "ResNet101",
  "MobileNetV2",
  "InceptionV3",
  "Xception",
];

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("Model not found: {0}")]
  ModelNotFound(String),
  #[error("模型 {name} 加载失败: {source}")]
  LoadFailed {
    name: String,
    #[source]
    source: ModelError,
  },
  #[error("模型清单错误: {0}")]
  Catalog(#[from] ModelError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 清单中的一项：模型名、模型文件与输出约定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub name: String,
  pub file: String,
  #[serde(default)]
  pub output: OutputConvention,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
  pub models: Vec<CatalogEntry>,
}

impl ModelCatalog {
  /// 读取 `dir/models.json`；没有清单时使用内置的七个模型名
  pub fn load(dir: &Path) -> Result<Self, ModelError> {
    let manifest = dir.join(MANIFEST_FILE);
    if !manifest.exists() {
      debug!("未找到 {}，使用内置模型目录", manifest.display());
      return Ok(Self::builtin());
    }
    let text = std::fs::read_to_string(&manifest)?;
    let catalog: Self = serde_json::from_str(&text)?;
    info!("模型清单 {} 共 {} 个模型", manifest.display(), catalog.models.len());
    Ok(catalog)
  }

  /// 写出 `dir/models.json`
  pub fn save(&self, dir: &Path) -> Result<(), ModelError> {
    let file = std::fs::File::create(dir.join(MANIFEST_FILE))?;
    serde_json::to_writer_pretty(file, self)?;
    Ok(())
  }

  pub fn builtin() -> Self {
    Self {
      models: BUILTIN_MODELS
        .iter()
        .map(|name| CatalogEntry {
          name: name.to_string(),
          file: format!("{}.json", name),
          output: OutputConvention::NonFractureSigmoid,
        })
        .collect(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
    self.models.iter().find(|e| e.name == name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.models.iter().map(|e| e.name.clone()).collect();
    names.sort();
    names.dedup();
    names
  }
}

/// 从文件构造模型句柄；其它推理后端在这里接入
pub trait ModelLoader: Send + Sync {
  fn load(&self, path: &Path, entry: &CatalogEntry) -> Result<Box<dyn ModelHandle>, ModelError>;
}

/// 加载 JSON 层图模型
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphModelLoader;

impl ModelLoader for GraphModelLoader {
  fn load(&self, path: &Path, _entry: &CatalogEntry) -> Result<Box<dyn ModelHandle>, ModelError> {
    Ok(Box::new(GraphModel::from_json_file(path)?))
  }
}

/// 已加载的模型，附带输出约定与执行锁
pub struct LoadedModel {
  name: String,
  convention: OutputConvention,
  handle: Box<dyn ModelHandle>,
  exec_lock: Mutex<()>,
}

impl LoadedModel {
  pub fn new(name: &str, convention: OutputConvention, handle: Box<dyn ModelHandle>) -> Self {
    Self {
      name: name.to_string(),
      convention,
      handle,
      exec_lock: Mutex::new(()),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn convention(&self) -> OutputConvention {
    self.convention
  }

  pub fn layers(&self) -> &[LayerInfo] {
    self.handle.layers()
  }

  /// 句柄不支持并发调用时，同一模型的调用串行执行
  fn exec_guard(&self) -> Option<MutexGuard<'_, ()>> {
    if self.handle.supports_concurrent_calls() {
      None
    } else {
      Some(self.exec_lock.lock().unwrap_or_else(PoisonError::into_inner))
    }
  }

  pub fn forward(&self, input: &ModelTensor) -> Result<RawModelOutput, ModelError> {
    let _guard = self.exec_guard();
    self.handle.forward(input)
  }

  pub fn gradient_of(
    &self,
    input: &ModelTensor,
    layer: &LayerPath,
  ) -> Result<LayerGradient, ModelError> {
    let _guard = self.exec_guard();
    self.handle.gradient_of(input, layer, &self.convention)
  }
}

impl std::fmt::Debug for LoadedModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoadedModel")
      .field("name", &self.name)
      .field("convention", &self.convention)
      .finish()
  }
}

type Slot = Arc<Mutex<Option<Arc<LoadedModel>>>>;

/// 按模型名懒加载的注册表。
///
/// 每个模型名对应一个槽位：第一个调用者负责加载，
/// 并发的首次调用者在同一槽位上等待，不会重复加载。
pub struct ModelRegistry {
  model_dir: PathBuf,
  catalog: ModelCatalog,
  loader: Box<dyn ModelLoader>,
  slots: Mutex<HashMap<String, Slot>>,
}

impl FromUrlWithScheme for ModelRegistry {
  const SCHEME: &'static str = "models";
}

impl FromUrl for ModelRegistry {
  type Error = RegistryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RegistryError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl ModelRegistry {
  /// 打开模型目录，读取清单（若有）
  pub fn open(model_dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
    let model_dir = model_dir.into();
    let catalog = ModelCatalog::load(&model_dir)?;
    Ok(Self::with_loader(model_dir, catalog, GraphModelLoader))
  }

  pub fn with_loader(
    model_dir: impl Into<PathBuf>,
    catalog: ModelCatalog,
    loader: impl ModelLoader + 'static,
  ) -> Self {
    Self {
      model_dir: model_dir.into(),
      catalog,
      loader: Box::new(loader),
      slots: Mutex::new(HashMap::new()),
    }
  }

  pub fn list_available(&self) -> Vec<String> {
    self.catalog.names()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.catalog.contains(name)
  }

  pub fn is_loaded(&self, name: &str) -> bool {
    let slot = self
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .cloned();
    let Some(slot) = slot else {
      return false;
    };
    let loaded = slot.lock().unwrap_or_else(PoisonError::into_inner);
    loaded.is_some()
  }

  pub fn resolve(&self, name: &str) -> Result<Arc<LoadedModel>, RegistryError> {
    let entry = self
      .catalog
      .get(name)
      .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;

    let slot = self
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(name.to_string())
      .or_default()
      .clone();

    let mut loaded = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(model) = loaded.as_ref() {
      return Ok(model.clone());
    }

    let path = self.model_dir.join(&entry.file);
    info!("加载模型 {}: {}", name, path.display());
    let now = Instant::now();
    let handle = self.loader.load(&path, entry).map_err(|source| {
      error!("模型 {} 加载失败: {}", name, source);
      RegistryError::LoadFailed {
        name: name.to_string(),
        source,
      }
    })?;
    let model = Arc::new(LoadedModel::new(&entry.name, entry.output, handle));
    *loaded = Some(model.clone());
    info!("模型 {} 加载完成，耗时: {:.2?}", name, now.elapsed());
    Ok(model)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
  };

  use ndarray::Array3;

  use super::*;
  use crate::model::{GraphBuilder, LayerKind};

  struct SlowHandle {
    layers: Vec<LayerInfo>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
  }

  impl ModelHandle for SlowHandle {
    fn name(&self) -> &str {
      "slow"
    }

    fn layers(&self) -> &[LayerInfo] {
      &self.layers
    }

    fn forward(&self, _input: &ModelTensor) -> Result<RawModelOutput, ModelError> {
      let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(10));
      self.active.fetch_sub(1, Ordering::SeqCst);
      Ok(RawModelOutput::Scalar(0.5))
    }

    fn gradient_of(
      &self,
      _input: &ModelTensor,
      _layer: &LayerPath,
      _convention: &OutputConvention,
    ) -> Result<LayerGradient, ModelError> {
      Ok(LayerGradient {
        activation: Array3::zeros((2, 2, 2)),
        gradient: Array3::zeros((2, 2, 2)),
      })
    }
  }

  fn slow_handle(peak: &Arc<AtomicUsize>) -> SlowHandle {
    SlowHandle {
      layers: vec![LayerInfo {
        name: String::from("conv"),
        kind: LayerKind::Conv2d,
        output_shape: vec![2, 2, 2],
        children: Vec::new(),
      }],
      active: Arc::new(AtomicUsize::new(0)),
      peak: peak.clone(),
    }
  }

  #[derive(Clone, Default)]
  struct CountingLoader {
    loads: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    fail: bool,
  }

  impl ModelLoader for CountingLoader {
    fn load(
      &self,
      _path: &Path,
      _entry: &CatalogEntry,
    ) -> Result<Box<dyn ModelHandle>, ModelError> {
      self.loads.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(30));
      if self.fail {
        return Err(ModelError::Backend(String::from("broken weights")));
      }
      Ok(Box::new(slow_handle(&self.peak)))
    }
  }

  #[test]
  fn builtin_catalog_lists_sorted_names() {
    let registry = ModelRegistry::with_loader(
      "/nonexistent",
      ModelCatalog::builtin(),
      CountingLoader::default(),
    );
    assert_eq!(
      registry.list_available(),
      vec![
        "DenseNet121",
        "DenseNet201",
        "InceptionV3",
        "MobileNetV2",
        "ResNet101",
        "ResNet50",
        "Xception"
      ]
    );
  }

  #[test]
  fn unknown_model_never_touches_loader() {
    let loader = CountingLoader::default();
    let registry =
      ModelRegistry::with_loader("/nonexistent", ModelCatalog::builtin(), loader.clone());
    assert!(matches!(
      registry.resolve("VGG16"),
      Err(RegistryError::ModelNotFound(name)) if name == "VGG16"
    ));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn concurrent_first_callers_share_one_load() {
    let loader = CountingLoader::default();
    let registry = ModelRegistry::with_loader("/models", ModelCatalog::builtin(), loader.clone());
    let models: Vec<Arc<LoadedModel>> = thread::scope(|scope| {
      let handles: Vec<_> = (0..8)
        .map(|_| scope.spawn(|| registry.resolve("ResNet50").unwrap()))
        .collect();
      handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
    assert!(registry.is_loaded("ResNet50"));
    assert!(!registry.is_loaded("Xception"));
  }

  #[test]
  fn failed_load_is_retried_later() {
    let loader = CountingLoader {
      fail: true,
      ..CountingLoader::default()
    };
    let registry = ModelRegistry::with_loader("/models", ModelCatalog::builtin(), loader.clone());
    assert!(matches!(
      registry.resolve("Xception"),
      Err(RegistryError::LoadFailed { .. })
    ));
    assert!(registry.resolve("Xception").is_err());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    assert!(!registry.is_loaded("Xception"));
  }

  #[test]
  fn non_concurrent_handle_is_serialized() {
    let peak = Arc::new(AtomicUsize::new(0));
    let model = LoadedModel::new(
      "slow",
      OutputConvention::NonFractureSigmoid,
      Box::new(slow_handle(&peak)),
    );
    let tensor = ModelTensor::from_fn(|_| 0.0);
    thread::scope(|scope| {
      for _ in 0..4 {
        scope.spawn(|| model.forward(&tensor).unwrap());
      }
    });
    assert_eq!(peak.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn manifest_declares_files_and_conventions() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join(MANIFEST_FILE),
      r#"{ "models": [
        { "name": "Tiny", "file": "tiny.json" },
        {
          "name": "Pair", "file": "pair.json",
          "output": { "convention": "class_scores", "fracture_index": 1 }
        }
      ] }"#,
    )
    .unwrap();
    GraphBuilder::new("Tiny", 5)
      .rescale("rescale", 1.0 / 255.0, 0.0)
      .conv2d("conv", 3, 2)
      .global_average_pool("gap")
      .dense("head", 1)
      .sigmoid("prob")
      .build()
      .unwrap()
      .to_json_file(dir.path().join("tiny.json"))
      .unwrap();

    let url = Url::parse(&format!("models://{}", dir.path().display())).unwrap();
    let registry = ModelRegistry::from_url(&url).unwrap();
    assert_eq!(registry.list_available(), vec!["Pair", "Tiny"]);
    assert_eq!(
      registry.catalog.get("Pair").unwrap().output,
      OutputConvention::ClassScores { fracture_index: 1 }
    );

    let tiny = registry.resolve("Tiny").unwrap();
    assert_eq!(tiny.convention(), OutputConvention::NonFractureSigmoid);
    assert!(matches!(
      tiny.forward(&ModelTensor::from_fn(|_| 128.0)).unwrap(),
      RawModelOutput::Scalar(_)
    ));
    // 清单中登记但文件缺失
    assert!(matches!(
      registry.resolve("Pair"),
      Err(RegistryError::LoadFailed { .. })
    ));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("file:///tmp/models").unwrap();
    assert!(matches!(
      ModelRegistry::from_url(&url),
      Err(RegistryError::SchemeMismatch)
    ));
  }
}
