// 该文件是 Qianxun （千寻） 项目的一部分。
// src/camera.rs - 相机模型与射线
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

//! 相机坐标系：x 向右，y 向上，z 指向前方。
//! 像素坐标原点在图像左下角。

use nalgebra::{Isometry3, Point3, Unit, Vector3};

/// 世界坐标点
pub type Vec3 = Point3<f32>;

/// 使用哪一侧的透视相机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eye {
  #[default]
  Left,
  Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
  pub origin: Point3<f32>,
  pub direction: Unit<Vector3<f32>>,
}

impl Ray {
  pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
    Self {
      origin,
      direction: Unit::new_normalize(direction),
    }
  }

  pub fn at(&self, t: f32) -> Point3<f32> {
    self.origin + self.direction.into_inner() * t
  }
}

/// 针孔相机内参
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
  /// 焦距（像素）
  pub fx: f32,
  pub fy: f32,
  /// 主点（像素）
  pub cx: f32,
  pub cy: f32,
  /// 分辨率
  pub width: u32,
  pub height: u32,
}

impl CameraIntrinsics {
  /// 由水平视场角构造，主点位于图像中心，像素为正方形
  pub fn from_horizontal_fov(width: u32, height: u32, hfov_deg: f32) -> Self {
    let f = (width as f32 / 2.0) / (hfov_deg.to_radians() / 2.0).tan();
    Self {
      fx: f,
      fy: f,
      cx: width as f32 / 2.0,
      cy: height as f32 / 2.0,
      width,
      height,
    }
  }
}

/// 相机能力：提供分辨率并把像素转换为世界坐标系中的射线
pub trait CameraModel {
  fn resolution(&self, eye: Eye) -> (u32, u32);
  fn screen_point_to_ray(&self, eye: Eye, pixel: [i32; 2]) -> Ray;
}

/// 左右两侧共用内参、各自带位姿的针孔相机
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
  intrinsics: CameraIntrinsics,
  poses: [Isometry3<f32>; 2],
}

impl PinholeCamera {
  pub fn new(intrinsics: CameraIntrinsics) -> Self {
    Self {
      intrinsics,
      poses: [Isometry3::identity(); 2],
    }
  }

  pub fn with_pose(mut self, eye: Eye, pose: Isometry3<f32>) -> Self {
    self.poses[eye as usize] = pose;
    self
  }

}

impl CameraModel for PinholeCamera {
  fn resolution(&self, _eye: Eye) -> (u32, u32) {
    (self.intrinsics.width, self.intrinsics.height)
  }

  fn screen_point_to_ray(&self, eye: Eye, pixel: [i32; 2]) -> Ray {
    let k = &self.intrinsics;
    let in_camera = Vector3::new(
      (pixel[0] as f32 - k.cx) / k.fx,
      (pixel[1] as f32 - k.cy) / k.fy,
      1.0,
    );
    let pose = &self.poses[eye as usize];
    Ray::new(
      Point3::from(pose.translation.vector),
      pose.rotation * in_camera,
    )
  }
}
