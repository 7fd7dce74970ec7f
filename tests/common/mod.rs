// 该文件是 Gujian （骨鉴） 项目的一部分。
// tests/common/mod.rs - 集成测试公共工具
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

#![allow(dead_code)]

use std::{
  io::Cursor,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use image::{ImageFormat, Luma, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_filled_rect_mut},
  rect::Rect,
};

use gujian::{
  model::{
    CatalogEntry, GraphBuilder, GraphModelLoader, ModelCatalog, ModelError, ModelGraph,
    ModelHandle, ModelLoader, ModelRegistry, OutputConvention,
  },
  output::{ConsentStore, PersistMetadata, StorageError, content_key},
};

pub const NESTED_MODEL: &str = "ResNet50";
pub const NO_SPATIAL_MODEL: &str = "FlatNet";

pub fn png(image: &RgbImage) -> Vec<u8> {
  let mut cursor = Cursor::new(Vec::new());
  image.write_to(&mut cursor, ImageFormat::Png).unwrap();
  cursor.into_inner()
}

/// 低噪声暗背景上的两根亮“骨骼”
pub fn radiograph_png() -> Vec<u8> {
  let side = 256;
  let mut rgb = RgbImage::from_fn(side, side, |x, y| {
    let v = 30 + ((x * 37 + y * 91) % 23) as u8;
    Rgb([v, v, v])
  });
  let bar = side / 6;
  draw_filled_rect_mut(
    &mut rgb,
    Rect::at((side / 4) as i32, 0).of_size(bar, side),
    Rgb([200, 200, 200]),
  );
  draw_filled_rect_mut(
    &mut rgb,
    Rect::at((side * 3 / 5) as i32, 0).of_size(bar, side),
    Rgb([210, 210, 210]),
  );
  png(&rgb)
}

pub fn colorful_png() -> Vec<u8> {
  png(&RgbImage::from_fn(256, 256, |x, y| match (x < 128, y < 128) {
    (true, true) => Rgb([230, 30, 30]),
    (false, true) => Rgb([30, 200, 40]),
    (true, false) => Rgb([20, 40, 220]),
    (false, false) => Rgb([240, 220, 20]),
  }))
}

pub fn flat_png() -> Vec<u8> {
  png(&RgbImage::from_pixel(128, 128, Rgb([128, 128, 128])))
}

/// 黑底上居中的圆盘，类似 CT 断层
pub fn ct_slice_png() -> Vec<u8> {
  let mut gray = image::GrayImage::from_pixel(256, 256, Luma([0]));
  draw_filled_circle_mut(&mut gray, (128, 128), 100, Luma([170]));
  png(&image::DynamicImage::ImageLuma8(gray).to_rgb8())
}

pub fn nested_graph(name: &str) -> ModelGraph {
  GraphBuilder::new(name, 11)
    .rescale("rescale", 1.0 / 255.0, 0.0)
    .submodel("backbone", |b| {
      b.conv2d("stem", 3, 4)
        .relu("stem_relu")
        .max_pool("stem_pool", 4)
        .submodel("block", |b| {
          b.conv2d("conv_a", 3, 6)
            .relu("relu_a")
            .max_pool("pool_a", 2)
            .conv2d("conv_b", 3, 6)
            .relu("relu_b")
        })
    })
    .global_average_pool("gap")
    .dense("head", 1)
    .sigmoid("prob")
    .build()
    .unwrap()
}

/// 没有任何可用于热力图的空间层
pub fn no_spatial_graph(name: &str) -> ModelGraph {
  GraphBuilder::new(name, 5)
    .rescale("rescale", 1.0 / 255.0, 0.0)
    .flatten("flatten")
    .dense("head", 1)
    .sigmoid("prob")
    .build()
    .unwrap()
}

/// 写出两个测试模型与清单，返回模型目录
pub fn write_models(dir: &Path) -> PathBuf {
  let mut catalog = ModelCatalog::default();
  for (name, graph) in [
    (NESTED_MODEL, nested_graph(NESTED_MODEL)),
    (NO_SPATIAL_MODEL, no_spatial_graph(NO_SPATIAL_MODEL)),
  ] {
    let file = format!("{}.json", name);
    graph.to_json_file(dir.join(&file)).unwrap();
    catalog.models.push(CatalogEntry {
      name: name.to_string(),
      file,
      output: OutputConvention::NonFractureSigmoid,
    });
  }
  catalog.save(dir).unwrap();
  dir.to_path_buf()
}

/// 统计实际加载次数的加载器
#[derive(Clone, Default)]
pub struct CountingLoader {
  pub loads: Arc<AtomicUsize>,
}

impl CountingLoader {
  pub fn count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl ModelLoader for CountingLoader {
  fn load(&self, path: &Path, entry: &CatalogEntry) -> Result<Box<dyn ModelHandle>, ModelError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    GraphModelLoader.load(path, entry)
  }
}

pub fn counting_registry(dir: &Path) -> (Arc<ModelRegistry>, CountingLoader) {
  let dir = write_models(dir);
  let catalog = ModelCatalog::load(&dir).unwrap();
  let loader = CountingLoader::default();
  let registry = ModelRegistry::with_loader(dir, catalog, loader.clone());
  (Arc::new(registry), loader)
}

/// 内存中的留存记录，按内容键去重
#[derive(Default)]
pub struct MemoryStore {
  pub records: Mutex<Vec<(String, PersistMetadata)>>,
}

impl MemoryStore {
  pub fn len(&self) -> usize {
    self.records.lock().unwrap().len()
  }
}

impl ConsentStore for MemoryStore {
  fn persist(
    &self,
    image_bytes: &[u8],
    metadata: &PersistMetadata,
  ) -> Result<PathBuf, StorageError> {
    let key = content_key(image_bytes);
    let mut records = self.records.lock().unwrap();
    records.retain(|(k, _)| *k != key);
    records.push((key.clone(), metadata.clone()));
    Ok(PathBuf::from(key))
  }
}

/// 总是失败的留存
pub struct BrokenStore;

impl ConsentStore for BrokenStore {
  fn persist(&self, _: &[u8], _: &PersistMetadata) -> Result<PathBuf, StorageError> {
    Err(StorageError::IoError(std::io::Error::other("disk full")))
  }
}
