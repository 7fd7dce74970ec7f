// 该文件是 Gujian （骨鉴） 项目的一部分。
// src/model/graph.rs - 可微层图解释器
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
  collections::HashSet,
  fs::File,
  io::{BufReader, BufWriter},
  path::Path,
};

use ndarray::{Array1, Array2, Array3, Array4, Axis, Zip, s};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
  LayerGradient, LayerInfo, LayerKind, LayerPath, ModelError, ModelHandle, OutputConvention,
  RawModelOutput,
};
use crate::frame::{MODEL_INPUT_SIZE, ModelTensor};

/// 子模型最大嵌套层数
const MAX_NESTING: usize = 8;

fn default_input_shape() -> [usize; 3] {
  [MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, 3]
}

/// 模型文件（JSON）的结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGraph {
  pub name: String,
  #[serde(default = "default_input_shape")]
  pub input_shape: [usize; 3],
  pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
  pub name: String,
  #[serde(flatten)]
  pub op: LayerOp,
}

/// 层算子。卷积为 same 填充、步长 1，权重布局 `[kh][kw][cin][cout]`；
/// 全连接权重布局 `[in][units]`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerOp {
  Rescale {
    scale: f32,
    #[serde(default)]
    offset: f32,
  },
  Conv2d {
    kernel: usize,
    filters: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
  },
  Relu,
  MaxPool2d {
    size: usize,
  },
  GlobalAveragePool,
  Flatten,
  Dense {
    units: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
  },
  Sigmoid,
  Softmax,
  Submodel {
    layers: Vec<LayerSpec>,
  },
}

impl LayerOp {
  fn kind(&self) -> LayerKind {
    match self {
      LayerOp::Rescale { .. } => LayerKind::Rescale,
      LayerOp::Conv2d { .. } => LayerKind::Conv2d,
      LayerOp::Relu => LayerKind::Relu,
      LayerOp::MaxPool2d { .. } => LayerKind::MaxPool2d,
      LayerOp::GlobalAveragePool => LayerKind::GlobalAveragePool,
      LayerOp::Flatten => LayerKind::Flatten,
      LayerOp::Dense { .. } => LayerKind::Dense,
      LayerOp::Sigmoid => LayerKind::Sigmoid,
      LayerOp::Softmax => LayerKind::Softmax,
      LayerOp::Submodel { .. } => LayerKind::Submodel,
    }
  }
}

impl ModelGraph {
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
  }

  pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, self)?;
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
  Spatial(usize, usize, usize),
  Flat(usize),
}

impl Shape {
  fn dims(&self) -> Vec<usize> {
    match *self {
      Shape::Spatial(h, w, c) => vec![h, w, c],
      Shape::Flat(n) => vec![n],
    }
  }
}

fn invalid(name: &str, detail: impl std::fmt::Display) -> ModelError {
  ModelError::InvalidGraph(format!("{}: {}", name, detail))
}

/// 推导叶子层的输出形状，同时检查权重长度
fn infer_shape(name: &str, op: &LayerOp, input: Shape) -> Result<Shape, ModelError> {
  match (op, input) {
    (LayerOp::Rescale { .. } | LayerOp::Relu, shape) => Ok(shape),
    (
      LayerOp::Conv2d {
        kernel,
        filters,
        weights,
        bias,
      },
      Shape::Spatial(h, w, c),
    ) => {
      if *kernel == 0 || kernel % 2 == 0 {
        return Err(invalid(name, "卷积核边长必须为正奇数"));
      }
      if weights.len() != kernel * kernel * c * filters || bias.len() != *filters {
        return Err(invalid(name, "卷积权重长度不匹配"));
      }
      Ok(Shape::Spatial(h, w, *filters))
    }
    (LayerOp::MaxPool2d { size }, Shape::Spatial(h, w, c)) => {
      if *size == 0 || h < *size || w < *size {
        return Err(invalid(name, "池化窗口无效"));
      }
      Ok(Shape::Spatial(h / size, w / size, c))
    }
    (LayerOp::GlobalAveragePool, Shape::Spatial(_, _, c)) => Ok(Shape::Flat(c)),
    (LayerOp::Flatten, Shape::Spatial(h, w, c)) => Ok(Shape::Flat(h * w * c)),
    (LayerOp::Flatten, shape @ Shape::Flat(_)) => Ok(shape),
    (
      LayerOp::Dense {
        units,
        weights,
        bias,
      },
      Shape::Flat(n),
    ) => {
      if weights.len() != n * units || bias.len() != *units {
        return Err(invalid(name, "全连接权重长度不匹配"));
      }
      Ok(Shape::Flat(*units))
    }
    (LayerOp::Sigmoid | LayerOp::Softmax, shape @ Shape::Flat(_)) => Ok(shape),
    (LayerOp::Submodel { layers }, shape) => layers
      .iter()
      .try_fold(shape, |s, l| infer_shape(&l.name, &l.op, s)),
    (op, shape) => Err(invalid(
      name,
      format!("{:?} 不接受形状 {:?}", op.kind(), shape.dims()),
    )),
  }
}

#[derive(Debug, Clone)]
enum Value {
  Spatial(Array3<f32>),
  Flat(Array1<f32>),
}

impl Value {
  fn mapv(&self, f: impl Fn(f32) -> f32) -> Value {
    match self {
      Value::Spatial(a) => Value::Spatial(a.mapv(f)),
      Value::Flat(a) => Value::Flat(a.mapv(f)),
    }
  }

  fn zip_with(&self, other: &Value, f: impl Fn(f32, f32) -> f32) -> Result<Value, ModelError> {
    match (self, other) {
      (Value::Spatial(a), Value::Spatial(b)) if a.dim() == b.dim() => Ok(Value::Spatial(
        Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)),
      )),
      (Value::Flat(a), Value::Flat(b)) if a.len() == b.len() => Ok(Value::Flat(
        Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)),
      )),
      _ => Err(mismatch("逐元素运算")),
    }
  }
}

fn mismatch(stage: &str) -> ModelError {
  ModelError::ShapeMismatch(format!("{} 的输入形状与编译时不一致", stage))
}

/// 编译后的叶子算子
#[derive(Debug)]
enum Op {
  Rescale { scale: f32, offset: f32 },
  Conv2d { kernel: Array4<f32>, bias: Array1<f32> },
  Relu,
  MaxPool2d { size: usize },
  GlobalAveragePool,
  Flatten,
  Dense { weights: Array2<f32>, bias: Array1<f32> },
  Sigmoid,
  Softmax,
}

#[derive(Debug)]
struct Step {
  path: LayerPath,
  op: Op,
}

/// 输出下标 `o` 平移 `d` 后仍落在 `[0, n)` 内的范围
fn valid_range(d: isize, n: usize) -> (usize, usize) {
  let lo = (-d).max(0) as usize;
  let hi = (n as isize - d).clamp(0, n as isize) as usize;
  (lo.min(hi), hi)
}

fn conv_forward(x: &Array3<f32>, kernel: &Array4<f32>, bias: &Array1<f32>) -> Array3<f32> {
  let (h, w, _) = x.dim();
  let (k, _, _, cout) = kernel.dim();
  let pad = (k / 2) as isize;
  let mut y = Array3::zeros((h, w, cout));
  for ky in 0..k {
    for kx in 0..k {
      let (dy, dx) = (ky as isize - pad, kx as isize - pad);
      let (oy0, oy1) = valid_range(dy, h);
      let (ox0, ox1) = valid_range(dx, w);
      if ox0 >= ox1 {
        continue;
      }
      let wk = kernel.slice(s![ky, kx, .., ..]);
      let (ix0, ix1) = ((ox0 as isize + dx) as usize, (ox1 as isize + dx) as usize);
      for oy in oy0..oy1 {
        let iy = (oy as isize + dy) as usize;
        let prod = x.slice(s![iy, ix0..ix1, ..]).dot(&wk);
        let mut out = y.slice_mut(s![oy, ox0..ox1, ..]);
        out += &prod;
      }
    }
  }
  y += bias;
  y
}

fn conv_backward(gy: &Array3<f32>, kernel: &Array4<f32>) -> Array3<f32> {
  let (h, w, _) = gy.dim();
  let (k, _, cin, _) = kernel.dim();
  let pad = (k / 2) as isize;
  let mut gx = Array3::zeros((h, w, cin));
  for ky in 0..k {
    for kx in 0..k {
      let (dy, dx) = (ky as isize - pad, kx as isize - pad);
      let (oy0, oy1) = valid_range(dy, h);
      let (ox0, ox1) = valid_range(dx, w);
      if ox0 >= ox1 {
        continue;
      }
      let wk = kernel.slice(s![ky, kx, .., ..]);
      let (ix0, ix1) = ((ox0 as isize + dx) as usize, (ox1 as isize + dx) as usize);
      for oy in oy0..oy1 {
        let iy = (oy as isize + dy) as usize;
        let prod = gy.slice(s![oy, ox0..ox1, ..]).dot(&wk.t());
        let mut out = gx.slice_mut(s![iy, ix0..ix1, ..]);
        out += &prod;
      }
    }
  }
  gx
}

/// 池化窗口内第一个最大值的位置
fn window_argmax(x: &Array3<f32>, size: usize, (i, j, k): (usize, usize, usize)) -> (usize, usize) {
  let mut best = (i * size, j * size);
  for dy in 0..size {
    for dx in 0..size {
      let (y, xx) = (i * size + dy, j * size + dx);
      if x[[y, xx, k]] > x[[best.0, best.1, k]] {
        best = (y, xx);
      }
    }
  }
  best
}

fn softmax(a: &Array1<f32>) -> Array1<f32> {
  let max = a.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
  let exp = a.mapv(|v| (v - max).exp());
  let sum = exp.sum();
  exp / sum
}

impl Op {
  fn label(&self) -> &'static str {
    match self {
      Op::Rescale { .. } => "Rescale",
      Op::Conv2d { .. } => "Conv2d",
      Op::Relu => "Relu",
      Op::MaxPool2d { .. } => "MaxPool2d",
      Op::GlobalAveragePool => "GlobalAveragePool",
      Op::Flatten => "Flatten",
      Op::Dense { .. } => "Dense",
      Op::Sigmoid => "Sigmoid",
      Op::Softmax => "Softmax",
    }
  }

  fn compile(name: &str, op: &LayerOp, input: Shape) -> Result<Op, ModelError> {
    Ok(match (op, input) {
      (LayerOp::Rescale { scale, offset }, _) => Op::Rescale {
        scale: *scale,
        offset: *offset,
      },
      (
        LayerOp::Conv2d {
          kernel,
          filters,
          weights,
          bias,
        },
        Shape::Spatial(_, _, c),
      ) => Op::Conv2d {
        kernel: Array4::from_shape_vec((*kernel, *kernel, c, *filters), weights.clone())
          .map_err(|e| invalid(name, e))?,
        bias: Array1::from(bias.clone()),
      },
      (LayerOp::Relu, _) => Op::Relu,
      (LayerOp::MaxPool2d { size }, _) => Op::MaxPool2d { size: *size },
      (LayerOp::GlobalAveragePool, _) => Op::GlobalAveragePool,
      (LayerOp::Flatten, _) => Op::Flatten,
      (
        LayerOp::Dense {
          units,
          weights,
          bias,
        },
        Shape::Flat(n),
      ) => Op::Dense {
        weights: Array2::from_shape_vec((n, *units), weights.clone())
          .map_err(|e| invalid(name, e))?,
        bias: Array1::from(bias.clone()),
      },
      (LayerOp::Sigmoid, _) => Op::Sigmoid,
      (LayerOp::Softmax, _) => Op::Softmax,
      (op, shape) => {
        return Err(invalid(
          name,
          format!("{:?} 不接受形状 {:?}", op.kind(), shape.dims()),
        ));
      }
    })
  }

  fn forward(&self, x: &Value) -> Result<Value, ModelError> {
    match (self, x) {
      (Op::Rescale { scale, offset }, v) => Ok(v.mapv(|a| a * scale + offset)),
      (Op::Conv2d { kernel, bias }, Value::Spatial(a)) => {
        Ok(Value::Spatial(conv_forward(a, kernel, bias)))
      }
      (Op::Relu, v) => Ok(v.mapv(|a| a.max(0.0))),
      (Op::MaxPool2d { size }, Value::Spatial(a)) => {
        let (h, w, c) = a.dim();
        Ok(Value::Spatial(Array3::from_shape_fn(
          (h / size, w / size, c),
          |idx| {
            let (y, xx) = window_argmax(a, *size, idx);
            a[[y, xx, idx.2]]
          },
        )))
      }
      (Op::GlobalAveragePool, Value::Spatial(a)) => {
        let (h, w, _) = a.dim();
        Ok(Value::Flat(
          a.sum_axis(Axis(0)).sum_axis(Axis(0)) / (h * w) as f32,
        ))
      }
      (Op::Flatten, Value::Spatial(a)) => Ok(Value::Flat(a.iter().cloned().collect())),
      (Op::Flatten, v @ Value::Flat(_)) => Ok(v.clone()),
      (Op::Dense { weights, bias }, Value::Flat(a)) => Ok(Value::Flat(a.dot(weights) + bias)),
      (Op::Sigmoid, Value::Flat(a)) => Ok(Value::Flat(a.mapv(|v| 1.0 / (1.0 + (-v).exp())))),
      (Op::Softmax, Value::Flat(a)) => Ok(Value::Flat(softmax(a))),
      (op, _) => Err(mismatch(op.label())),
    }
  }

  /// 由输出梯度 `gy` 求输入梯度；`x` 为该层输入，`y` 为该层输出
  fn backward(&self, x: &Value, y: &Value, gy: Value) -> Result<Value, ModelError> {
    match (self, x, y, gy) {
      (Op::Rescale { scale, .. }, _, _, g) => Ok(g.mapv(|v| v * scale)),
      (Op::Conv2d { kernel, .. }, _, _, Value::Spatial(g)) => {
        Ok(Value::Spatial(conv_backward(&g, kernel)))
      }
      (Op::Relu, x, _, g) => g.zip_with(x, |g, x| if x > 0.0 { g } else { 0.0 }),
      (Op::MaxPool2d { size }, Value::Spatial(a), _, Value::Spatial(g)) => {
        let mut gx = Array3::zeros(a.dim());
        for (idx, v) in g.indexed_iter() {
          let (y, xx) = window_argmax(a, *size, idx);
          gx[[y, xx, idx.2]] += *v;
        }
        Ok(Value::Spatial(gx))
      }
      (Op::GlobalAveragePool, Value::Spatial(a), _, Value::Flat(g)) => {
        let (h, w, c) = a.dim();
        if g.len() != c {
          return Err(mismatch("GlobalAveragePool"));
        }
        let n = (h * w) as f32;
        Ok(Value::Spatial(Array3::from_shape_fn((h, w, c), |(_, _, k)| {
          g[k] / n
        })))
      }
      (Op::Flatten, Value::Spatial(a), _, Value::Flat(g)) => {
        let (h, w, c) = a.dim();
        if g.len() != h * w * c {
          return Err(mismatch("Flatten"));
        }
        Ok(Value::Spatial(Array3::from_shape_fn((h, w, c), |(y, xx, k)| {
          g[(y * w + xx) * c + k]
        })))
      }
      (Op::Flatten, Value::Flat(_), _, g) => Ok(g),
      (Op::Dense { weights, .. }, _, _, Value::Flat(g)) => Ok(Value::Flat(weights.dot(&g))),
      (Op::Sigmoid, _, y, g) => g.zip_with(y, |g, y| g * y * (1.0 - y)),
      (Op::Softmax, _, Value::Flat(y), Value::Flat(g)) => {
        let dot = (&g * y).sum();
        Ok(Value::Flat(y * &(g - dot)))
      }
      (op, _, _, _) => Err(mismatch(op.label())),
    }
  }
}

/// 编译完成、可直接执行的层图模型
#[derive(Debug)]
pub struct GraphModel {
  name: String,
  input_shape: [usize; 3],
  layers: Vec<LayerInfo>,
  steps: Vec<Step>,
}

impl GraphModel {
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    Self::compile(ModelGraph::from_json_file(path)?)
  }

  pub fn compile(graph: ModelGraph) -> Result<Self, ModelError> {
    let [h, w, c] = graph.input_shape;
    let mut steps = Vec::new();
    let (layers, output) = compile_level(
      &graph.layers,
      &LayerPath::root(),
      Shape::Spatial(h, w, c),
      0,
      &mut steps,
    )?;
    if !matches!(output, Shape::Flat(_)) {
      return Err(invalid(&graph.name, "模型输出必须是向量"));
    }
    debug!("模型 {} 编译完成，共 {} 个算子", graph.name, steps.len());
    Ok(Self {
      name: graph.name,
      input_shape: graph.input_shape,
      layers,
      steps,
    })
  }

  fn input_value(&self, input: &ModelTensor) -> Result<Value, ModelError> {
    let array = input.as_array();
    if array.shape() != self.input_shape {
      return Err(ModelError::ShapeMismatch(format!(
        "模型 {} 期望输入 {:?}，实际 {:?}",
        self.name,
        self.input_shape,
        array.shape()
      )));
    }
    Ok(Value::Spatial(array.clone()))
  }

  fn run_from(&self, start: usize, mut value: Value) -> Result<Value, ModelError> {
    for step in &self.steps[start..] {
      value = step.op.forward(&value)?;
    }
    Ok(value)
  }

  /// 完整前向并保留每个算子的输入/输出：`trace[i]` 是第 i 个算子的输入
  fn trace(&self, input: Value) -> Result<Vec<Value>, ModelError> {
    let mut trace = Vec::with_capacity(self.steps.len() + 1);
    trace.push(input);
    for (i, step) in self.steps.iter().enumerate() {
      let next = step.op.forward(&trace[i])?;
      trace.push(next);
    }
    Ok(trace)
  }

  /// 层路径对应的最后一个算子；子模型取其内部最后一个算子
  fn record_index(&self, layer: &LayerPath) -> Result<usize, ModelError> {
    if layer.is_root() {
      return Err(ModelError::LayerNotFound(String::from("<root>")));
    }
    self
      .steps
      .iter()
      .rposition(|s| s.path.starts_with(layer))
      .ok_or_else(|| ModelError::LayerNotFound(layer.to_string()))
  }
}

fn compile_level(
  specs: &[LayerSpec],
  prefix: &LayerPath,
  mut shape: Shape,
  depth: usize,
  steps: &mut Vec<Step>,
) -> Result<(Vec<LayerInfo>, Shape), ModelError> {
  if depth > MAX_NESTING {
    return Err(invalid(&prefix.to_string(), "子模型嵌套过深"));
  }
  let mut seen = HashSet::new();
  let mut infos = Vec::with_capacity(specs.len());
  for spec in specs {
    if spec.name.is_empty() || spec.name.contains('/') {
      return Err(invalid(&spec.name, "层名不能为空或包含 '/'"));
    }
    if !seen.insert(spec.name.as_str()) {
      return Err(invalid(&spec.name, "同级层名重复"));
    }
    let path = prefix.child(&spec.name);
    let (children, next) = match &spec.op {
      LayerOp::Submodel { layers } => {
        if layers.is_empty() {
          return Err(invalid(&spec.name, "子模型不能为空"));
        }
        compile_level(layers, &path, shape, depth + 1, steps)?
      }
      op => {
        let next = infer_shape(&spec.name, op, shape)?;
        steps.push(Step {
          path,
          op: Op::compile(&spec.name, op, shape)?,
        });
        (Vec::new(), next)
      }
    };
    infos.push(LayerInfo {
      name: spec.name.clone(),
      kind: spec.op.kind(),
      output_shape: next.dims(),
      children,
    });
    shape = next;
  }
  Ok((infos, shape))
}

impl ModelHandle for GraphModel {
  fn name(&self) -> &str {
    &self.name
  }

  fn layers(&self) -> &[LayerInfo] {
    &self.layers
  }

  fn forward(&self, input: &ModelTensor) -> Result<RawModelOutput, ModelError> {
    match self.run_from(0, self.input_value(input)?)? {
      Value::Flat(out) if out.len() == 1 => Ok(RawModelOutput::Scalar(out[0])),
      Value::Flat(out) => Ok(RawModelOutput::Vector(out.to_vec())),
      Value::Spatial(_) => Err(ModelError::ShapeMismatch(String::from("模型输出不是向量"))),
    }
  }

  fn gradient_of(
    &self,
    input: &ModelTensor,
    layer: &LayerPath,
    convention: &OutputConvention,
  ) -> Result<LayerGradient, ModelError> {
    let record = self.record_index(layer)?;
    let trace = self.trace(self.input_value(input)?)?;

    let output_len = match &trace[self.steps.len()] {
      Value::Flat(out) => out.len(),
      Value::Spatial(_) => return Err(ModelError::ShapeMismatch(String::from("模型输出不是向量"))),
    };
    let mut grad = Value::Flat(Array1::from(convention.fracture_seed(output_len)?));
    for i in (record + 1..self.steps.len()).rev() {
      grad = self.steps[i].op.backward(&trace[i], &trace[i + 1], grad)?;
    }

    match (&trace[record + 1], grad) {
      (Value::Spatial(activation), Value::Spatial(gradient)) => Ok(LayerGradient {
        activation: activation.clone(),
        gradient,
      }),
      _ => Err(ModelError::NotSpatial(layer.to_string())),
    }
  }

  fn supports_concurrent_calls(&self) -> bool {
    // 编译后只读
    true
  }
}

/// 以确定性随机权重搭建层图，用于演示模型与测试
pub struct GraphBuilder {
  name: String,
  input_shape: [usize; 3],
  rng: StdRng,
  layers: Vec<LayerSpec>,
  shape: Shape,
  error: Option<ModelError>,
}

impl GraphBuilder {
  pub fn new(name: &str, seed: u64) -> Self {
    let input_shape = default_input_shape();
    let [h, w, c] = input_shape;
    Self {
      name: name.to_string(),
      input_shape,
      rng: StdRng::seed_from_u64(seed),
      layers: Vec::new(),
      shape: Shape::Spatial(h, w, c),
      error: None,
    }
  }

  fn push(mut self, name: &str, op: LayerOp) -> Self {
    if self.error.is_some() {
      return self;
    }
    match infer_shape(name, &op, self.shape) {
      Ok(shape) => {
        self.shape = shape;
        self.layers.push(LayerSpec {
          name: name.to_string(),
          op,
        });
      }
      Err(e) => self.error = Some(e),
    }
    self
  }

  fn glorot(&mut self, fan_in: usize, fan_out: usize, len: usize) -> Vec<f32> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    (0..len).map(|_| self.rng.gen_range(-limit..limit)).collect()
  }

  /// 当前特征维度：空间层为通道数，向量层为长度
  fn width(&self) -> usize {
    match self.shape {
      Shape::Spatial(_, _, c) => c,
      Shape::Flat(n) => n,
    }
  }

  pub fn rescale(self, name: &str, scale: f32, offset: f32) -> Self {
    self.push(name, LayerOp::Rescale { scale, offset })
  }

  pub fn conv2d(mut self, name: &str, kernel: usize, filters: usize) -> Self {
    let cin = self.width();
    let weights = self.glorot(
      kernel * kernel * cin,
      kernel * kernel * filters,
      kernel * kernel * cin * filters,
    );
    self.push(
      name,
      LayerOp::Conv2d {
        kernel,
        filters,
        weights,
        bias: vec![0.0; filters],
      },
    )
  }

  pub fn relu(self, name: &str) -> Self {
    self.push(name, LayerOp::Relu)
  }

  pub fn max_pool(self, name: &str, size: usize) -> Self {
    self.push(name, LayerOp::MaxPool2d { size })
  }

  pub fn global_average_pool(self, name: &str) -> Self {
    self.push(name, LayerOp::GlobalAveragePool)
  }

  pub fn flatten(self, name: &str) -> Self {
    self.push(name, LayerOp::Flatten)
  }

  pub fn dense(mut self, name: &str, units: usize) -> Self {
    let n = self.width();
    let weights = self.glorot(n, units, n * units);
    self.push(
      name,
      LayerOp::Dense {
        units,
        weights,
        bias: vec![0.0; units],
      },
    )
  }

  pub fn sigmoid(self, name: &str) -> Self {
    self.push(name, LayerOp::Sigmoid)
  }

  pub fn softmax(self, name: &str) -> Self {
    self.push(name, LayerOp::Softmax)
  }

  /// 在闭包中搭建的层被包装为一个嵌套子模型
  pub fn submodel(mut self, name: &str, build: impl FnOnce(Self) -> Self) -> Self {
    let outer = std::mem::take(&mut self.layers);
    self = build(self);
    let inner = std::mem::replace(&mut self.layers, outer);
    if self.error.is_none() && inner.is_empty() {
      self.error = Some(invalid(name, "子模型不能为空"));
    }
    self.layers.push(LayerSpec {
      name: name.to_string(),
      op: LayerOp::Submodel { layers: inner },
    });
    self
  }

  pub fn build(self) -> Result<ModelGraph, ModelError> {
    if let Some(e) = self.error {
      return Err(e);
    }
    Ok(ModelGraph {
      name: self.name,
      input_shape: self.input_shape,
      layers: self.layers,
    })
  }
}
