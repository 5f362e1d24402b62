// 该文件是 Qianxun （千寻） 项目的一部分。
// src/tensor.rs - 张量定义
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

/// 张量元素数据
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  Float(Box<[f32]>),
  Int(Box<[i32]>),
}

impl TensorData {
  pub(crate) fn len(&self) -> usize {
    match self {
      TensorData::Float(data) => data.len(),
      TensorData::Int(data) => data.len(),
    }
  }
}

/// 带形状标记的不可变数值缓冲区，形状为 `[count, fields...]`
///
/// 张量由最后产生它的阶段独占；被替代时直接丢弃即释放。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: TensorData,
}

impl Tensor {
  /// 构造浮点张量，数据长度必须与形状一致
  pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Option<Self> {
    Self::new(shape, TensorData::Float(data.into_boxed_slice()))
  }

  /// 构造整数张量，数据长度必须与形状一致
  pub fn from_i32(shape: &[usize], data: Vec<i32>) -> Option<Self> {
    Self::new(shape, TensorData::Int(data.into_boxed_slice()))
  }

  pub fn new(shape: &[usize], data: TensorData) -> Option<Self> {
    let expected: usize = shape.iter().product();
    if shape.is_empty() || expected != data.len() {
      return None;
    }
    Some(Self {
      shape: shape.into(),
      data,
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  /// 第一维的大小，即行数
  pub fn rows(&self) -> usize {
    self.shape[0]
  }

  /// 每行元素数量（除第一维外各维的乘积）
  pub fn row_len(&self) -> usize {
    self.shape[1..].iter().product()
  }

  /// 以浮点数读取 `[row, field]` 处的元素，整数张量会做转换
  pub fn get_f32(&self, row: usize, field: usize) -> Option<f32> {
    let idx = self.flat_index(row, field)?;
    match &self.data {
      TensorData::Float(data) => data.get(idx).copied(),
      TensorData::Int(data) => data.get(idx).map(|v| *v as f32),
    }
  }

  /// 以整数读取 `[row, field]` 处的元素，浮点张量会四舍五入
  pub fn get_i32(&self, row: usize, field: usize) -> Option<i32> {
    let idx = self.flat_index(row, field)?;
    match &self.data {
      TensorData::Float(data) => data.get(idx).map(|v| v.round() as i32),
      TensorData::Int(data) => data.get(idx).copied(),
    }
  }

  fn flat_index(&self, row: usize, field: usize) -> Option<usize> {
    let row_len = self.row_len().max(1);
    if row >= self.rows() || field >= row_len {
      return None;
    }
    Some(row * row_len + field)
  }
}
