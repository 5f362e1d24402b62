// 该文件是 Qianxun （千寻） 项目的一部分。
// src/projector.rs - 检测框投影到世界坐标
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
use tracing::debug;

use crate::{
  camera::{CameraModel, Eye, Vec3},
  config::{MAX_BOXES, Size},
  labels::LabelTable,
  raycast::{RayCaster, place_by_screen_ray},
  tensor::Tensor,
};

const BOX_FIELDS: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum ProjectionError {
  #[error("坐标输出每行至少需要 4 个元素，实际为 {0}")]
  MalformedCoordinates(usize),
  #[error("标签输出只有 {labels} 行，少于检测框数量 {boxes}")]
  LabelCountMismatch { boxes: usize, labels: usize },
  #[error("第 {row} 个检测框的标签 ID {id} 超出标签表范围")]
  LabelOutOfRange { row: usize, id: i32 },
}

/// 显示空间中的检测框
///
/// 中心坐标以显示区域中心为原点，y 轴向下，单位为显示像素。
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
  /// 供界面显示的诊断文本
  pub label: String,
  pub class_name: String,
  /// 没有命中表面时为 None
  pub world_pos: Option<Vec3>,
}

pub struct DetectionProjector {
  labels: LabelTable,
  eye: Eye,
  max_boxes: usize,
}

impl DetectionProjector {
  pub fn new(labels: LabelTable) -> Self {
    Self {
      labels,
      eye: Eye::default(),
      max_boxes: MAX_BOXES,
    }
  }

  pub fn with_max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = max_boxes;
    self
  }

  /// 把模型输出的检测框投影到显示空间，并通过射线检测求世界坐标。
  /// 输出顺序与输入行顺序一致，最多 `max_boxes` 个。
  pub fn project<C, R>(
    &self,
    coords: &Tensor,
    label_ids: &Tensor,
    model_input: Size,
    display: Size,
    camera: &C,
    caster: &R,
  ) -> Result<Vec<BoundingBox>, ProjectionError>
  where
    C: CameraModel + ?Sized,
    R: RayCaster + ?Sized,
  {
    let boxes_found = coords.rows();
    if boxes_found == 0 {
      debug!("没有检测框需要投影");
      return Ok(Vec::new());
    }
    if coords.row_len() < BOX_FIELDS {
      return Err(ProjectionError::MalformedCoordinates(coords.row_len()));
    }

    let max_boxes = boxes_found.min(self.max_boxes);
    if label_ids.rows() < max_boxes {
      return Err(ProjectionError::LabelCountMismatch {
        boxes: max_boxes,
        labels: label_ids.rows(),
      });
    }

    let scale_x = display.width / model_input.width;
    let scale_y = display.height / model_input.height;
    let half_width = display.width / 2.0;
    let half_height = display.height / 2.0;
    let (cam_width, cam_height) = camera.resolution(self.eye);

    let mut boxes = Vec::with_capacity(max_boxes);
    for n in 0..max_boxes {
      // 行号已检查，字段数已检查
      let field = |i| coords.get_f32(n, i).unwrap_or_default();

      let center_x = field(0) * scale_x - half_width;
      let center_y = field(1) * scale_y - half_height;
      let per_x = (center_x + half_width) / display.width;
      let per_y = (center_y + half_height) / display.height;

      let id = label_ids.get_i32(n, 0).unwrap_or(-1);
      let class_name = self
        .labels
        .class_name(id)
        .ok_or(ProjectionError::LabelOutOfRange { row: n, id })?;

      // 显示空间原点在左上角，相机像素原点在左下角
      let center_pixel = [
        (per_x * cam_width as f32).round() as i32,
        ((1.0 - per_y) * cam_height as f32).round() as i32,
      ];
      let ray = camera.screen_point_to_ray(self.eye, center_pixel);
      let world_pos = place_by_screen_ray(caster, &ray);

      let label = format!(
        "Id: {} Class: {} Center (px): {},{} Center (%): {:.2},{:.2}",
        n, class_name, center_x as i32, center_y as i32, per_x, per_y
      );

      boxes.push(BoundingBox {
        center_x,
        center_y,
        width: field(2) * scale_x,
        height: field(3) * scale_y,
        label,
        class_name,
        world_pos,
      });
    }

    debug!("投影 {} 个检测框（共 {} 个）", boxes.len(), boxes_found);
    Ok(boxes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::camera::Ray;
  use nalgebra::{Point3, Vector3};

  /// 把像素坐标写进射线起点的相机，便于检查像素换算
  struct PixelCamera;

  impl CameraModel for PixelCamera {
    fn resolution(&self, _eye: Eye) -> (u32, u32) {
      (1000, 800)
    }

    fn screen_point_to_ray(&self, _eye: Eye, pixel: [i32; 2]) -> Ray {
      Ray::new(
        Point3::new(pixel[0] as f32, pixel[1] as f32, 0.0),
        Vector3::z(),
      )
    }
  }

  /// 像素 x 小于 100 时没有命中
  struct LeftEdgeMiss;

  impl RayCaster for LeftEdgeMiss {
    fn cast_ray(&self, ray: &Ray) -> Option<Vec3> {
      (ray.origin.x >= 100.0).then(|| ray.at(1.0))
    }
  }

  fn project(coords: &Tensor, labels: &Tensor) -> Result<Vec<BoundingBox>, ProjectionError> {
    DetectionProjector::new(LabelTable::coco()).project(
      coords,
      labels,
      Size::new(640.0, 640.0),
      Size::new(1280.0, 960.0),
      &PixelCamera,
      &LeftEdgeMiss,
    )
  }

  #[test]
  fn matches_hand_computed_reference() {
    let coords = Tensor::from_f32(
      &[3, 4],
      vec![
        320.0, 320.0, 64.0, 32.0, //
        160.0, 480.0, 10.0, 10.0, //
        32.0, 64.0, 8.0, 8.0,
      ],
    )
    .unwrap();
    let labels = Tensor::from_i32(&[3], vec![0, 9, 2]).unwrap();
    let boxes = project(&coords, &labels).unwrap();
    assert_eq!(boxes.len(), 3);

    let b = &boxes[0];
    assert_eq!((b.center_x, b.center_y, b.class_name.as_str()), (0.0, 0.0, "person"));
    assert_eq!((b.width, b.height), (128.0, 48.0));
    assert_eq!(b.world_pos, Some(Point3::new(500.0, 400.0, 1.0)));

    let b = &boxes[1];
    assert_eq!((b.center_x, b.center_y, b.class_name.as_str()), (-320.0, 240.0, "traffic_light"));
    assert_eq!(b.world_pos, Some(Point3::new(250.0, 200.0, 1.0)));
    assert_eq!(
      b.label,
      "Id: 1 Class: traffic_light Center (px): -320,240 Center (%): 0.25,0.75"
    );

    let b = &boxes[2];
    assert_eq!((b.center_x, b.center_y, b.class_name.as_str()), (-576.0, -384.0, "car"));
    // 像素 (50, 720) 没有命中表面
    assert_eq!(b.world_pos, None);
  }

  #[test]
  fn caps_output_at_two_hundred_boxes() {
    let coords = Tensor::from_f32(&[250, 4], vec![320.0; 1000]).unwrap();
    let labels = Tensor::from_i32(&[250], vec![1; 250]).unwrap();
    let boxes = project(&coords, &labels).unwrap();
    assert_eq!(boxes.len(), 200);
    assert!(boxes.iter().all(|b| b.class_name == "bicycle"));
  }

  #[test]
  fn empty_coordinates_give_no_boxes() {
    let coords = Tensor::from_f32(&[0, 4], vec![]).unwrap();
    let labels = Tensor::from_i32(&[0], vec![]).unwrap();
    assert_eq!(project(&coords, &labels).unwrap(), vec![]);
  }

  #[test]
  fn inconsistent_outputs_are_rejected() {
    let coords = Tensor::from_f32(&[2, 4], vec![1.0; 8]).unwrap();
    let labels = Tensor::from_i32(&[1], vec![0]).unwrap();
    assert_eq!(
      project(&coords, &labels),
      Err(ProjectionError::LabelCountMismatch { boxes: 2, labels: 1 })
    );

    let labels = Tensor::from_i32(&[2], vec![0, 80]).unwrap();
    assert_eq!(
      project(&coords, &labels),
      Err(ProjectionError::LabelOutOfRange { row: 1, id: 80 })
    );

    let coords = Tensor::from_f32(&[2, 2], vec![1.0; 4]).unwrap();
    assert_eq!(
      project(&coords, &labels),
      Err(ProjectionError::MalformedCoordinates(2))
    );
  }
}
