// 该文件是 Qianxun （千寻） 项目的一部分。
// src/labels.rs - 类别标签表
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

use std::{path::Path, sync::Arc};

use thiserror::Error;
use tracing::info;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
  "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
  "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
  "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
  "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
  "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
  "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
  "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
  "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
  "teddy bear", "hair drier", "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 按标签 ID 索引的类别名称表，加载后只读，可廉价克隆共享
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
  names: Arc<[String]>,
}

impl LabelTable {
  /// 解析以换行分隔的类别列表。每一行对应一个 ID，空行同样占位，
  /// 只去掉文件末尾换行带来的最后一个空行。
  pub fn parse(text: &str) -> Self {
    let text = text.strip_suffix('\n').unwrap_or(text);
    let names = text
      .split('\n')
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect::<Vec<_>>();
    Self {
      names: names.into(),
    }
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let table = Self::parse(&text);
    info!("加载标签文件 {}: {} 个类别", path.display(), table.len());
    Ok(table)
  }

  pub fn coco() -> Self {
    Self {
      names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, id: i32) -> Option<&str> {
    usize::try_from(id)
      .ok()
      .and_then(|id| self.names.get(id))
      .map(String::as_str)
  }

  /// 稳定的类别标识：空格替换为下划线
  pub fn class_name(&self, id: i32) -> Option<String> {
    self.get(id).map(|name| name.replace(' ', "_"))
  }
}
