// 该文件是 Qianxun （千寻） 项目的一部分。
// src/raycast.rs - 环境射线检测
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

use nalgebra::{Point3, Unit, Vector3};
use tracing::{debug, error};

use crate::camera::{Ray, Vec3};

const DEFAULT_MAX_DISTANCE: f32 = 20.0;

/// 表面估计能力：求射线与真实环境表面的交点
pub trait RayCaster {
  fn is_supported(&self) -> bool {
    true
  }

  /// 没有命中表面时返回 None，这不是错误
  fn cast_ray(&self, ray: &Ray) -> Option<Vec3>;
}

/// 对一条相机射线做环境检测，不可用或未命中时返回 None
pub fn place_by_screen_ray<R: RayCaster + ?Sized>(caster: &R, ray: &Ray) -> Option<Vec3> {
  if !caster.is_supported() {
    error!("环境射线检测不可用");
    return None;
  }
  let hit = caster.cast_ray(ray);
  if hit.is_none() {
    debug!("射线没有命中表面: {:?}", ray.origin);
  }
  hit
}

/// 无限大平面
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
  pub point: Point3<f32>,
  pub normal: Unit<Vector3<f32>>,
}

impl Plane {
  pub fn new(point: Point3<f32>, normal: Vector3<f32>) -> Self {
    Self {
      point,
      normal: Unit::new_normalize(normal),
    }
  }

  /// 水平地面，高度为 `y`
  pub fn floor(y: f32) -> Self {
    Self::new(Point3::new(0.0, y, 0.0), Vector3::y())
  }

  /// 射线参数 t，平行或位于射线后方时返回 None
  pub fn intersect(&self, ray: &Ray) -> Option<f32> {
    let denom = self.normal.dot(&ray.direction.into_inner());
    if denom.abs() < 1e-6 {
      return None;
    }
    let t = (self.point - ray.origin).dot(&self.normal.into_inner()) / denom;
    (t > 0.0).then_some(t)
  }
}

/// 以若干平面近似的环境，取最近的命中点
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneRayCaster {
  planes: Vec<Plane>,
  max_distance: f32,
}

impl Default for PlaneRayCaster {
  fn default() -> Self {
    Self {
      planes: Vec::new(),
      max_distance: DEFAULT_MAX_DISTANCE,
    }
  }
}

impl PlaneRayCaster {
  pub fn with_plane(mut self, plane: Plane) -> Self {
    self.planes.push(plane);
    self
  }

  pub fn with_max_distance(mut self, max_distance: f32) -> Self {
    self.max_distance = max_distance;
    self
  }
}

impl RayCaster for PlaneRayCaster {
  fn is_supported(&self) -> bool {
    !self.planes.is_empty()
  }

  fn cast_ray(&self, ray: &Ray) -> Option<Vec3> {
    self
      .planes
      .iter()
      .filter_map(|plane| plane.intersect(ray))
      .filter(|t| *t <= self.max_distance)
      .min_by(|a, b| a.total_cmp(b))
      .map(|t| ray.at(t))
  }
}
