// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/gradcam/discovery.rs - 可解释空间层发现
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

use std::collections::HashSet;

use tracing::debug;

use crate::model::{LayerInfo, LayerPath};

fn eligible(layer: &LayerInfo) -> bool {
  layer.is_spatial() && !layer.kind.is_input_stage()
}

/// 从输出端向输入端逆序遍历层树，返回按优先级排序的候选层。
///
/// 嵌套子模型先展开其内部层，子模型整体紧跟在其最靠近输出的内部候选之后。
/// 超过 `max_depth` 的子模型不再展开。
pub fn discover_candidates(layers: &[LayerInfo], max_depth: usize) -> Vec<LayerPath> {
  let mut visited = HashSet::new();
  let mut candidates = Vec::new();
  walk(
    layers,
    &LayerPath::root(),
    0,
    max_depth,
    &mut visited,
    &mut candidates,
  );
  debug!("发现 {} 个候选层", candidates.len());
  candidates
}

fn walk(
  layers: &[LayerInfo],
  prefix: &LayerPath,
  depth: usize,
  max_depth: usize,
  visited: &mut HashSet<LayerPath>,
  candidates: &mut Vec<LayerPath>,
) {
  for layer in layers.iter().rev() {
    let path = prefix.child(&layer.name);
    if !visited.insert(path.clone()) {
      continue;
    }
    let start = candidates.len();
    if !layer.children.is_empty() {
      if depth < max_depth {
        walk(&layer.children, &path, depth + 1, max_depth, visited, candidates);
      } else {
        debug!("子模型 {} 超过最大深度 {}，不再展开", path, max_depth);
      }
    }
    if eligible(layer) {
      let slot = if candidates.len() > start { start + 1 } else { start };
      candidates.insert(slot, path);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::LayerKind;

  fn layer(name: &str, kind: LayerKind, shape: &[usize]) -> LayerInfo {
    LayerInfo {
      name: name.to_string(),
      kind,
      output_shape: shape.to_vec(),
      children: Vec::new(),
    }
  }

  fn names(paths: &[LayerPath]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
  }

  #[test]
  fn flat_graph_is_walked_from_output() {
    let layers = vec![
      layer("rescale", LayerKind::Rescale, &[224, 224, 3]),
      layer("conv1", LayerKind::Conv2d, &[224, 224, 8]),
      layer("pool", LayerKind::MaxPool2d, &[56, 56, 8]),
      layer("conv2", LayerKind::Conv2d, &[56, 56, 16]),
      layer("gap", LayerKind::GlobalAveragePool, &[16]),
      layer("head", LayerKind::Dense, &[1]),
    ];
    assert_eq!(
      names(&discover_candidates(&layers, 8)),
      vec!["conv2", "pool", "conv1"]
    );
  }

  #[test]
  fn nested_backbone_inner_layers_come_first() {
    let mut backbone = layer("backbone", LayerKind::Submodel, &[28, 28, 32]);
    let mut block = layer("block", LayerKind::Submodel, &[28, 28, 32]);
    block.children = vec![
      layer("conv_a", LayerKind::Conv2d, &[28, 28, 16]),
      layer("conv_b", LayerKind::Conv2d, &[28, 28, 32]),
    ];
    backbone.children = vec![layer("stem", LayerKind::Conv2d, &[56, 56, 16]), block];
    let layers = vec![
      layer("rescale", LayerKind::Rescale, &[224, 224, 3]),
      backbone,
      layer("gap", LayerKind::GlobalAveragePool, &[32]),
      layer("head", LayerKind::Dense, &[1]),
    ];
    assert_eq!(
      names(&discover_candidates(&layers, 8)),
      vec![
        "backbone/block/conv_b",
        "backbone",
        "backbone/block",
        "backbone/block/conv_a",
        "backbone/stem",
      ]
    );
  }

  #[test]
  fn submodel_unit_survives_truncation() {
    let mut backbone = layer("backbone", LayerKind::Submodel, &[7, 7, 32]);
    backbone.children = (1..=6)
      .map(|i| layer(&format!("conv{}", i), LayerKind::Conv2d, &[7, 7, 32]))
      .collect();
    let layers = vec![backbone, layer("head", LayerKind::Dense, &[1])];
    let mut found = names(&discover_candidates(&layers, 8));
    assert_eq!(found.len(), 7);
    found.truncate(4);
    assert_eq!(
      found,
      vec!["backbone/conv6", "backbone", "backbone/conv5", "backbone/conv4"]
    );
  }

  #[test]
  fn depth_bound_stops_expansion() {
    let mut outer = layer("outer", LayerKind::Submodel, &[14, 14, 4]);
    let mut inner = layer("inner", LayerKind::Submodel, &[14, 14, 4]);
    inner.children = vec![layer("conv", LayerKind::Conv2d, &[14, 14, 4])];
    outer.children = vec![inner];
    assert_eq!(
      names(&discover_candidates(std::slice::from_ref(&outer), 1)),
      vec!["outer/inner", "outer"]
    );
  }

  #[test]
  fn no_spatial_layer_means_no_candidates() {
    let layers = vec![
      layer("rescale", LayerKind::Rescale, &[224, 224, 3]),
      layer("gap", LayerKind::GlobalAveragePool, &[3]),
      layer("single", LayerKind::Conv2d, &[7, 7, 1]),
      layer("head", LayerKind::Dense, &[1]),
    ];
    assert!(discover_candidates(&layers, 8).is_empty());
  }
}
