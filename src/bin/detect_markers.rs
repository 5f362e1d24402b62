// 该文件是 Qianxun （千寻） 项目的一部分。
// src/bin/detect_markers.rs - 检测并放置三维标记
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

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use qianxun::{
  FromUrl,
  camera::{CameraIntrinsics, PinholeCamera},
  config::{DetectionConfig, Size},
  engine::EngineWrapper,
  events::TracingEvents,
  input::{FrameSource, InputWrapper},
  labels::LabelTable,
  pipeline::DetectionPipeline,
  raycast::{Plane, PlaneRayCaster},
  task::{ContinuousTask, Task},
};

/// Qianxun 检测标记参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型（replay:///path.json 或 rknn:///path.rknn）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源（image:///path.png）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标签文件，每行一个类别名称，缺省使用 COCO
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 事件记录（jsonl:///path/events.jsonl）
  #[arg(long, value_name = "RECORD")]
  pub record: Option<Url>,

  /// 每帧最多推进的计算图层数
  #[arg(long, default_value = "25")]
  pub layers_per_tick: usize,
  /// 模型输入尺寸
  #[arg(long, default_value = "640")]
  pub input_size: u32,
  /// 同类标记最小间距（米）
  #[arg(long, default_value = "0.25")]
  pub spawn_distance: f32,
  /// 每次推理最多投影的检测框数量
  #[arg(long, default_value = "200")]
  pub max_boxes: usize,
  /// 显示区域尺寸
  #[arg(long, default_value = "1280")]
  pub display_width: u32,
  #[arg(long, default_value = "960")]
  pub display_height: u32,
  /// 相机水平视场角（度）
  #[arg(long, default_value = "90")]
  pub fov: f32,
  /// 地面相对相机的高度（米）
  #[arg(long, default_value = "-1.5", allow_hyphen_values = true)]
  pub floor: f32,

  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 每 N 个检测结果放置一次标记
  #[arg(long, value_name = "N")]
  pub place_every: Option<usize>,
  /// 帧率上限
  #[arg(long, value_name = "FPS")]
  pub fps: Option<f64>,
}

#[cfg(feature = "json_record")]
fn recorder(record: Option<&Url>) -> Result<Option<qianxun::events::JsonRecordEvents>> {
  Ok(
    record
      .map(qianxun::events::JsonRecordEvents::from_url)
      .transpose()?,
  )
}

#[cfg(not(feature = "json_record"))]
fn recorder(record: Option<&Url>) -> Result<Option<TracingEvents>> {
  if record.is_some() {
    tracing::warn!("未启用 json_record 特性，忽略事件记录");
  }
  Ok(None)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let config = DetectionConfig::default()
    .with_input_size(args.input_size, args.input_size)
    .with_layers_per_tick(args.layers_per_tick)
    .with_spawn_min_distance(args.spawn_distance)
    .with_max_boxes(args.max_boxes);

  let labels = match &args.labels {
    Some(path) => LabelTable::load(path)?,
    None => LabelTable::coco(),
  };
  let input = InputWrapper::from_url(&args.input)?;
  let (width, height) = input.resolution();
  let camera = PinholeCamera::new(CameraIntrinsics::from_horizontal_fov(width, height, args.fov));
  let caster = PlaneRayCaster::default().with_plane(Plane::floor(args.floor));
  let engine = EngineWrapper::from_url(&args.model)?;
  let events = (TracingEvents, recorder(args.record.as_ref())?);

  let mut pipeline = DetectionPipeline::new(
    engine,
    labels,
    camera,
    caster,
    events,
    &config,
    Size::new(args.display_width as f32, args.display_height as f32),
  )?;
  pipeline.load_model()?;

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_place_every(args.place_every)
    .with_frame_interval(
      args
        .fps
        .filter(|fps| *fps > 0.0)
        .map(|fps| Duration::from_secs_f64(1.0 / fps)),
    )
    .with_ctrlc(true)
    .run_task(input, &mut pipeline)?;

  info!(
    "共处理 {} 帧，得到 {} 个结果，当前 {} 个标记",
    summary.frames,
    summary.results,
    pipeline.markers().len()
  );

  Ok(())
}
