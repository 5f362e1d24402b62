// 该文件是 Qianxun （千寻） 项目的一部分。
// src/config.rs - 检测参数配置
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

use thiserror::Error;

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CHANNELS: usize = 3;
const DEFAULT_LAYERS_PER_TICK: usize = 25;
const DEFAULT_SPAWN_MIN_DISTANCE: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.6;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.23;
/// 每次推理最多投影的检测框数量
pub const MAX_BOXES: usize = 200;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("每帧执行层数必须大于 0")]
  InvalidLayersPerTick,
  #[error("模型输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("标记最小间距必须为正数: {0}")]
  InvalidSpawnDistance(f32),
  #[error("阈值 {0} 必须位于 [0, 1]: {1}")]
  InvalidThreshold(&'static str, f32),
  #[error("检测框上限必须位于 [1, {MAX_BOXES}]: {0}")]
  InvalidMaxBoxes(usize),
}

/// 二维尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
  pub width: f32,
  pub height: f32,
}

impl Size {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
  /// 模型输入宽高
  pub input_width: u32,
  pub input_height: u32,
  pub channels: usize,
  /// 每次 tick 最多推进的计算图层数
  pub layers_per_tick: usize,
  /// 同类标记之间的最小三维距离（米）
  pub spawn_min_distance: f32,
  // 以下两个阈值在模型内部应用，这里只做记录和校验
  pub iou_threshold: f32,
  pub score_threshold: f32,
  pub max_boxes: usize,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      channels: DEFAULT_CHANNELS,
      layers_per_tick: DEFAULT_LAYERS_PER_TICK,
      spawn_min_distance: DEFAULT_SPAWN_MIN_DISTANCE,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      max_boxes: MAX_BOXES,
    }
  }
}

impl DetectionConfig {
  pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn with_layers_per_tick(mut self, layers_per_tick: usize) -> Self {
    self.layers_per_tick = layers_per_tick;
    self
  }

  pub fn with_spawn_min_distance(mut self, distance: f32) -> Self {
    self.spawn_min_distance = distance;
    self
  }

  pub fn with_thresholds(mut self, iou: f32, score: f32) -> Self {
    self.iou_threshold = iou;
    self.score_threshold = score;
    self
  }

  pub fn with_max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = max_boxes;
    self
  }

  pub fn input_size(&self) -> Size {
    Size::new(self.input_width as f32, self.input_height as f32)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.layers_per_tick == 0 {
      return Err(ConfigError::InvalidLayersPerTick);
    }
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::InvalidInputSize(
        self.input_width,
        self.input_height,
      ));
    }
    if !(self.spawn_min_distance.is_finite() && self.spawn_min_distance > 0.0) {
      return Err(ConfigError::InvalidSpawnDistance(self.spawn_min_distance));
    }
    for (name, value) in [("iou", self.iou_threshold), ("score", self.score_threshold)] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidThreshold(name, value));
      }
    }
    if !(1..=MAX_BOXES).contains(&self.max_boxes) {
      return Err(ConfigError::InvalidMaxBoxes(self.max_boxes));
    }
    Ok(())
  }
}
