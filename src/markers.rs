// 该文件是 Qianxun （千寻） 项目的一部分。
// src/markers.rs - 三维标记去重与放置
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

use nalgebra::distance;
use tracing::{debug, info};

use crate::{camera::Vec3, events::MarkerCount, projector::BoundingBox};

// 各轴旋转速度（度/秒）
const SPIN_SPEED: [f32; 3] = [20.0, 40.0, 60.0];

/// 把角度规约到 [0, 360)
pub fn wrap_degrees(angle: f32) -> f32 {
  angle.rem_euclid(360.0)
}

/// 标记模型的旋转动画状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSpin {
  pub angles: [f32; 3],
  pub speed: [f32; 3],
}

impl Default for MarkerSpin {
  fn default() -> Self {
    Self {
      angles: [0.0; 3],
      speed: SPIN_SPEED,
    }
  }
}

impl MarkerSpin {
  pub fn advance(&mut self, dt: f32) {
    for (angle, speed) in self.angles.iter_mut().zip(self.speed) {
      *angle = wrap_degrees(*angle + speed * dt);
    }
  }
}

/// 已放置在世界中的标记
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMarker {
  pub position: Vec3,
  pub class_name: String,
  pub spin: MarkerSpin,
}

impl PlacedMarker {
  pub fn new(position: Vec3, class_name: impl Into<String>) -> Self {
    Self {
      position,
      class_name: class_name.into(),
      spin: MarkerSpin::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Place,
  Skip,
}

fn is_duplicate<'a>(
  markers: impl IntoIterator<Item = &'a PlacedMarker>,
  position: &Vec3,
  class_name: &str,
  min_distance: f32,
) -> bool {
  markers
    .into_iter()
    .any(|m| distance(&m.position, position) < min_distance && m.class_name == class_name)
}

/// 候选没有世界坐标，或附近已有同类标记时跳过
pub fn try_place(existing: &[PlacedMarker], candidate: &BoundingBox, min_distance: f32) -> Decision {
  match &candidate.world_pos {
    Some(pos) if !is_duplicate(existing, pos, &candidate.class_name, min_distance) => {
      Decision::Place
    }
    _ => Decision::Skip,
  }
}

/// 按输入顺序逐个判断候选，接受的标记立即加入比较集合，
/// 因此同一批次中相互靠近的同类候选只会放置一个。
/// 返回新放置的标记和数量。
pub fn place_all(
  existing: &[PlacedMarker],
  candidates: &[BoundingBox],
  min_distance: f32,
) -> (Vec<PlacedMarker>, usize) {
  let mut placed: Vec<PlacedMarker> = Vec::new();
  for candidate in candidates {
    let Some(pos) = candidate.world_pos else {
      continue;
    };
    if is_duplicate(
      existing.iter().chain(placed.iter()),
      &pos,
      &candidate.class_name,
      min_distance,
    ) {
      debug!("跳过重复标记: {} at {:?}", candidate.class_name, pos);
      continue;
    }
    placed.push(PlacedMarker::new(pos, candidate.class_name.clone()));
  }
  let count = placed.len();
  (placed, count)
}

/// 当前放置的所有标记，只在控制线程上修改
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
  markers: Vec<PlacedMarker>,
}

impl MarkerSet {
  pub fn markers(&self) -> &[PlacedMarker] {
    &self.markers
  }

  pub fn len(&self) -> usize {
    self.markers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.markers.is_empty()
  }

  pub fn place_all(&mut self, candidates: &[BoundingBox], min_distance: f32) -> MarkerCount {
    let (new_markers, count) = place_all(&self.markers, candidates, min_distance);
    self.markers.extend(new_markers);
    info!("放置 {} 个新标记，共 {} 个", count, self.markers.len());
    MarkerCount::Identified(count)
  }

  /// 清空所有标记（重新定位时触发）
  pub fn clear(&mut self) -> MarkerCount {
    info!("清除 {} 个标记", self.markers.len());
    self.markers.clear();
    MarkerCount::Reset
  }

  pub fn advance_spin(&mut self, dt: f32) {
    for marker in &mut self.markers {
      marker.spin.advance(dt);
    }
  }
}
