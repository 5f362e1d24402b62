// 该文件是 Qianxun （千寻） 项目的一部分。
// src/task.rs - 宿主帧循环
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
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
  camera::CameraModel,
  engine::InferenceEngine,
  events::{DetectionEvents, MarkerCount},
  frame::CameraFrame,
  pipeline::DetectionPipeline,
  raycast::RayCaster,
};

// 输入结束后，等待在途任务完成的最多帧数
const DRAIN_LIMIT: usize = 100_000;

pub trait Task<I, P>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: &mut P) -> Result<TaskSummary, Self::Error>;
}

/// 一次任务循环的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
  /// 处理的帧数
  pub frames: usize,
  /// 完成的推理结果数
  pub results: usize,
  /// 放置的标记数
  pub markers: usize,
}

/// 持续从输入读取帧并驱动检测流程，每帧调用一次 `update`
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  place_every: Option<usize>,
  frame_interval: Option<Duration>,
  handle_ctrlc: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每得到 N 个检测结果放置一次标记
  pub fn with_place_every(mut self, place_every: Option<usize>) -> Self {
    self.place_every = place_every.filter(|n| *n > 0);
    self
  }

  /// 限制帧率，模拟宿主渲染循环
  pub fn with_frame_interval(mut self, frame_interval: Option<Duration>) -> Self {
    self.frame_interval = frame_interval;
    self
  }

  pub fn with_ctrlc(mut self, handle_ctrlc: bool) -> Self {
    self.handle_ctrlc = handle_ctrlc;
    self
  }

  fn install_ctrlc(&self) -> anyhow::Result<Option<Receiver<()>>> {
    if !self.handle_ctrlc {
      return Ok(None);
    }
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(Some(rx))
  }

  /// 驱动一帧：推进标记动画、更新检测流程，按需放置标记并控制帧率
  fn drive<E, C, R, V>(
    &self,
    pipeline: &mut DetectionPipeline<E, C, R, V>,
    frame: Option<&CameraFrame>,
    summary: &mut TaskSummary,
    last: &mut Instant,
  ) where
    E: InferenceEngine,
    C: CameraModel,
    R: RayCaster,
    V: DetectionEvents,
  {
    let dt = last.elapsed();
    *last = Instant::now();
    pipeline.advance_markers(dt.as_secs_f32());

    if let Some(count) = pipeline.update(frame) {
      summary.results += 1;
      debug!("第 {} 个结果: {} 个检测框，帧间隔 {:.2?}", summary.results, count, dt);
      if self.place_every.is_some_and(|n| summary.results % n == 0) {
        if let MarkerCount::Identified(n) = pipeline.place_markers() {
          summary.markers += n;
        }
      }
    }

    if let Some(interval) = self.frame_interval {
      thread::sleep(interval.saturating_sub(last.elapsed()));
    }
  }
}

impl<I, E, C, R, V> Task<I, DetectionPipeline<E, C, R, V>> for ContinuousTask
where
  I: Iterator<Item = CameraFrame>,
  E: InferenceEngine,
  C: CameraModel,
  R: RayCaster,
  V: DetectionEvents,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    pipeline: &mut DetectionPipeline<E, C, R, V>,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let interrupt = self.install_ctrlc()?;
    let interrupted = || interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok());

    let mut summary = TaskSummary::default();
    let mut last = Instant::now();

    for frame in input {
      summary.frames += 1;
      self.drive(pipeline, Some(&frame), &mut summary, &mut last);
      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
      if interrupted() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    // 不再提交新帧，让在途任务走完
    let mut drained = 0;
    while pipeline.scheduler().is_running() && drained < DRAIN_LIMIT {
      self.drive(pipeline, None, &mut summary, &mut last);
      drained += 1;
      if interrupted() {
        break;
      }
    }

    info!(
      "任务完成，共 {} 帧，{} 个结果，放置 {} 个标记",
      summary.frames, summary.results, summary.markers
    );
    Ok(summary)
  }
}

#[cfg(all(test, feature = "engine_replay"))]
mod tests {
  use super::*;
  use crate::{
    camera::{CameraIntrinsics, PinholeCamera},
    config::{DetectionConfig, Size},
    engine::{ReplayEngine, ReplayFrame},
    events::TracingEvents,
    labels::LabelTable,
    raycast::{Plane, PlaneRayCaster},
  };
  use image::RgbImage;

  fn pipeline() -> DetectionPipeline<ReplayEngine, PinholeCamera, PlaneRayCaster, TracingEvents> {
    let frame = ReplayFrame {
      boxes: vec![[320.0, 320.0, 32.0, 32.0]],
      labels: vec![0],
    };
    let config = DetectionConfig::default().with_layers_per_tick(4);
    let mut pipeline = DetectionPipeline::new(
      ReplayEngine::new(vec![frame], 8),
      LabelTable::coco(),
      PinholeCamera::new(CameraIntrinsics::from_horizontal_fov(640, 480, 90.0)),
      PlaneRayCaster::default().with_plane(Plane::floor(-1.0)).with_plane(Plane::new(
        nalgebra::Point3::new(0.0, 0.0, 3.0),
        -nalgebra::Vector3::z(),
      )),
      TracingEvents,
      &config,
      Size::new(640.0, 480.0),
    )
    .unwrap();
    pipeline.load_model().unwrap();
    pipeline
  }

  fn frames(n: usize) -> impl Iterator<Item = CameraFrame> {
    (0..n).map(|i| CameraFrame::from(RgbImage::new(8, 8)).with_index(i as u64))
  }

  #[test]
  fn stops_at_frame_number_and_drains_in_flight_job() {
    let mut pipeline = pipeline();
    let summary = ContinuousTask::default()
      .with_frame_number(Some(20))
      .run_task(frames(1000), &mut pipeline)
      .unwrap();
    assert_eq!(summary.frames, 20);
    assert!(summary.results >= 1);
    assert!(!pipeline.scheduler().is_running());
  }

  #[test]
  fn periodic_placement_deduplicates_across_results() {
    let mut pipeline = pipeline();
    let summary = ContinuousTask::default()
      .with_place_every(Some(1))
      .run_task(frames(60), &mut pipeline)
      .unwrap();
    assert!(summary.results >= 2);
    // 每次结果相同，只有第一次放置成功
    assert_eq!(summary.markers, 1);
    assert_eq!(pipeline.markers().len(), 1);
  }
}
