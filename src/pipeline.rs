// 该文件是 Qianxun （千寻） 项目的一部分。
// src/pipeline.rs - 每帧检测流程
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
use tracing::{debug, error, info, warn};

use crate::{
  camera::CameraModel,
  config::{ConfigError, DetectionConfig, Size},
  engine::InferenceEngine,
  events::{DetectionEvents, MarkerCount},
  frame::CameraFrame,
  labels::LabelTable,
  markers::MarkerSet,
  projector::{BoundingBox, DetectionProjector},
  raycast::RayCaster,
  scheduler::{
    FailureReason, IncrementalScheduler, OutputStage, SchedulerError, SchedulerEvent, Submission,
  },
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("调度器错误: {0}")]
  Scheduler(#[from] SchedulerError),
}

/// 宿主循环每帧调用一次的检测流程：
/// 推进调度器，投影完成的结果，并在空闲时提交新帧。
pub struct DetectionPipeline<E, C, R, V>
where
  E: InferenceEngine,
{
  scheduler: IncrementalScheduler<E>,
  projector: DetectionProjector,
  camera: C,
  caster: R,
  events: V,
  markers: MarkerSet,
  boxes: Vec<BoundingBox>,
  model_input: Size,
  display: Size,
  spawn_min_distance: f32,
  paused: bool,
}

impl<E, C, R, V> DetectionPipeline<E, C, R, V>
where
  E: InferenceEngine,
  C: CameraModel,
  R: RayCaster,
  V: DetectionEvents,
{
  pub fn new(
    engine: E,
    labels: LabelTable,
    camera: C,
    caster: R,
    events: V,
    config: &DetectionConfig,
    display: Size,
  ) -> Result<Self, PipelineError> {
    config.validate()?;
    Ok(Self {
      scheduler: IncrementalScheduler::new(engine, config),
      projector: DetectionProjector::new(labels).with_max_boxes(config.max_boxes),
      camera,
      caster,
      events,
      markers: MarkerSet::default(),
      boxes: Vec::new(),
      model_input: config.input_size(),
      display,
      spawn_min_distance: config.spawn_min_distance,
      paused: false,
    })
  }

  /// 预热模型，之后才会提交帧
  pub fn load_model(&mut self) -> Result<(), PipelineError> {
    self.scheduler.warm_up()?;
    Ok(())
  }

  pub fn set_paused(&mut self, paused: bool) {
    if self.paused != paused {
      info!("检测{}", if paused { "暂停" } else { "恢复" });
    }
    self.paused = paused;
  }

  pub fn is_paused(&self) -> bool {
    self.paused
  }

  pub fn boxes(&self) -> &[BoundingBox] {
    &self.boxes
  }

  pub fn markers(&self) -> &MarkerSet {
    &self.markers
  }

  pub fn scheduler(&self) -> &IncrementalScheduler<E> {
    &self.scheduler
  }

  pub fn events(&self) -> &V {
    &self.events
  }

  /// 推进一帧。有新的检测结果时返回当前检测框数量。
  pub fn update(&mut self, frame: Option<&CameraFrame>) -> Option<usize> {
    let applied = self.scheduler.tick().map(|event| self.apply(event));

    let ready = !self.paused && self.scheduler.is_model_loaded() && !self.scheduler.is_running();
    let Some(frame) = frame.filter(|_| ready) else {
      return applied;
    };
    match self.scheduler.submit(frame) {
      Ok(Submission::Started) => {}
      Ok(Submission::Busy) => debug!("调度器忙，跳过第 {} 帧", frame.index),
      Err(e) => warn!("第 {} 帧无法编码: {}", frame.index, e),
    }

    applied
  }

  fn apply(&mut self, event: SchedulerEvent) -> usize {
    match event {
      SchedulerEvent::Done { coords, labels } => {
        match self.projector.project(
          &coords,
          &labels,
          self.model_input,
          self.display,
          &self.camera,
          &self.caster,
        ) {
          Ok(boxes) => {
            self.boxes = boxes;
            self.events.on_detection_count_changed(self.boxes.len());
          }
          Err(e) => {
            error!("检测结果投影失败: {}", e);
            self.fail(Some(e.to_string()));
          }
        }
      }
      // 坐标输出为空只表示本帧没有物体
      SchedulerEvent::Failed(FailureReason::EmptyOutput(OutputStage::Coord)) => self.fail(None),
      SchedulerEvent::Failed(reason) => self.fail(Some(reason.to_string())),
    }
    self.boxes.len()
  }

  fn fail(&mut self, reason: Option<String>) {
    self.boxes.clear();
    self.events.on_detection_count_changed(0);
    if let Some(reason) = reason {
      self.events.on_detection_error(&reason);
    }
  }

  /// 把当前检测框中有世界坐标的、不重复的放置为标记
  pub fn place_markers(&mut self) -> MarkerCount {
    let count = self.markers.place_all(&self.boxes, self.spawn_min_distance);
    self.events.on_markers_identified(count);
    count
  }

  /// 重新定位：清空所有标记
  pub fn recenter(&mut self) -> MarkerCount {
    let count = self.markers.clear();
    self.events.on_markers_identified(count);
    count
  }

  pub fn advance_markers(&mut self, dt: f32) {
    self.markers.advance_spin(dt);
  }
}

#[cfg(all(test, feature = "engine_replay"))]
mod tests {
  use super::*;
  use crate::{
    camera::{CameraIntrinsics, PinholeCamera},
    engine::{ReplayEngine, ReplayFrame},
    events::tests::{Recorded, RecordingEvents},
    raycast::{Plane, PlaneRayCaster},
  };
  use image::{Rgb, RgbImage};
  use nalgebra::{Point3, Vector3};

  type TestPipeline = DetectionPipeline<ReplayEngine, PinholeCamera, PlaneRayCaster, RecordingEvents>;

  const CUP: i32 = 41;

  fn pipeline(frame: ReplayFrame) -> TestPipeline {
    let config = DetectionConfig::default()
      .with_input_size(640, 640)
      .with_layers_per_tick(2);
    let engine = ReplayEngine::new(vec![frame], 3);
    let camera = PinholeCamera::new(CameraIntrinsics::from_horizontal_fov(640, 480, 90.0));
    // 相机前方 2 米的墙
    let caster = PlaneRayCaster::default().with_plane(Plane::new(Point3::new(0.0, 0.0, 2.0), -Vector3::z()));
    DetectionPipeline::new(
      engine,
      LabelTable::coco(),
      camera,
      caster,
      RecordingEvents::default(),
      &config,
      Size::new(1280.0, 960.0),
    )
    .unwrap()
  }

  fn camera_frame() -> CameraFrame {
    CameraFrame::from(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90])))
  }

  fn run_until_result(pipeline: &mut TestPipeline) -> usize {
    let frame = camera_frame();
    for _ in 0..100 {
      if let Some(count) = pipeline.update(Some(&frame)) {
        return count;
      }
    }
    panic!("pipeline never produced a result");
  }

  fn two_cups() -> ReplayFrame {
    ReplayFrame {
      boxes: vec![[320.0, 320.0, 64.0, 64.0], [330.0, 320.0, 64.0, 64.0]],
      labels: vec![CUP, CUP],
    }
  }

  #[test]
  fn nothing_is_submitted_before_model_load_or_while_paused() {
    let mut pipeline = pipeline(two_cups());
    let frame = camera_frame();
    pipeline.update(Some(&frame));
    assert!(!pipeline.scheduler().is_running());

    pipeline.load_model().unwrap();
    pipeline.set_paused(true);
    pipeline.update(Some(&frame));
    assert!(!pipeline.scheduler().is_running());
    pipeline.update(None);
    assert!(!pipeline.scheduler().is_running());

    pipeline.set_paused(false);
    pipeline.update(Some(&frame));
    assert!(pipeline.scheduler().is_running());
  }

  #[test]
  fn places_deduplicated_markers_and_resets() {
    let mut pipeline = pipeline(two_cups());
    pipeline.load_model().unwrap();
    assert_eq!(run_until_result(&mut pipeline), 2);

    let boxes = pipeline.boxes();
    let hit = boxes[0].world_pos.unwrap();
    assert!((hit - Point3::new(0.0, 0.0, 2.0)).norm() < 1e-4);
    assert_eq!(boxes[1].class_name, "cup");

    // 两个检测框相距不到 0.25 米，只放置一个
    assert_eq!(pipeline.place_markers(), MarkerCount::Identified(1));
    assert_eq!(pipeline.place_markers(), MarkerCount::Identified(0));
    assert_eq!(pipeline.recenter(), MarkerCount::Reset);
    assert_eq!(pipeline.place_markers(), MarkerCount::Identified(1));

    assert_eq!(
      pipeline.events().events,
      vec![
        Recorded::Count(2),
        Recorded::Markers(1),
        Recorded::Markers(0),
        Recorded::Markers(-1),
        Recorded::Markers(1),
      ]
    );
  }

  #[test]
  fn empty_detection_is_a_zero_count_not_an_error() {
    let mut pipeline = pipeline(ReplayFrame::default());
    pipeline.load_model().unwrap();
    assert_eq!(run_until_result(&mut pipeline), 0);
    assert_eq!(pipeline.events().events, vec![Recorded::Count(0)]);
  }

  #[test]
  fn bad_label_ids_clear_boxes_and_report_error() {
    let mut pipeline = pipeline(ReplayFrame {
      boxes: vec![[320.0, 320.0, 10.0, 10.0]],
      labels: vec![99],
    });
    pipeline.load_model().unwrap();
    assert_eq!(run_until_result(&mut pipeline), 0);
    assert!(pipeline.boxes().is_empty());

    let events = &pipeline.events().events;
    assert_eq!(events[0], Recorded::Count(0));
    assert!(matches!(&events[1], Recorded::Error(reason) if reason.contains("99")));
  }
}
